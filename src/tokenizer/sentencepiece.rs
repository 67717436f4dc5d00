//! SentencePiece adapter with span reconstruction
//!
//! The segmenter itself (the `tokenizer.model` proto and its trained
//! unigram tables) is an external collaborator behind [`PieceSegmenter`];
//! this module adapts any such segmenter to the crate-wide [`Tokenizer`]
//! and [`TokenizerWithSpans`] contracts.
//!
//! SentencePiece processors report pieces but not source positions, so the
//! spans here are *reconstructed*: each piece is located in the original
//! text with a forward-moving cursor, treating the U+2581 prefix as "the
//! preceding whitespace". Reconstruction is best-effort and degrades when
//! a piece's surface text cannot be found verbatim in the input (e.g.
//! after byte-fallback pieces); such encodings are flagged approximate.

use super::{Encoding, SpecialToken, TokenSpan, Tokenizer, TokenizerWithSpans};
use crate::error::{CargarError, Result};

/// A piece emitted by a segmenter: its id and surface text
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    /// Token id
    pub id: u32,
    /// Surface text, usually carrying the U+2581 space marker
    pub text: String,
}

/// Black-box subword segmenter contract
///
/// Implementations wrap an actual SentencePiece processor; the adapter only
/// needs segmentation, decoding, and the model's special ids.
pub trait PieceSegmenter {
    /// Segment text into pieces
    fn segment(&self, text: &str) -> Vec<Piece>;

    /// Decode ids back to text
    fn decode(&self, ids: &[u32]) -> String;

    /// Special-token id from the model, if defined
    fn special_id(&self, token: SpecialToken) -> Option<u32>;
}

/// SentencePiece-backed tokenizer with reconstructed spans
#[derive(Debug, Clone)]
pub struct SentencePieceTokenizer<P: PieceSegmenter> {
    processor: P,
}

const METASPACE_STR: &str = "\u{2581}";

impl<P: PieceSegmenter> SentencePieceTokenizer<P> {
    /// Wrap a segmenter
    pub fn new(processor: P) -> Self {
        Self { processor }
    }

    /// The wrapped segmenter
    pub fn processor(&self) -> &P {
        &self.processor
    }
}

impl<P: PieceSegmenter> Tokenizer for SentencePieceTokenizer<P> {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.encode_with_spans(text).ids
    }

    fn decode(&self, ids: &[u32]) -> String {
        self.processor.decode(ids)
    }

    fn special_token_id(&self, token: SpecialToken) -> Result<u32> {
        self.processor
            .special_id(token)
            .ok_or_else(|| CargarError::NotConfigured(token.to_string()))
    }
}

impl<P: PieceSegmenter> TokenizerWithSpans for SentencePieceTokenizer<P> {
    fn encode_with_spans(&self, text: &str) -> Encoding {
        let pieces = self.processor.segment(text);
        let mut ids = Vec::with_capacity(pieces.len());
        let mut spans = Vec::with_capacity(pieces.len());
        let mut approximate = false;

        let bytes = text.as_bytes();
        let mut cursor = 0usize;
        for piece in pieces {
            ids.push(piece.id);

            let (match_text, leading_space) = match piece.text.strip_prefix(METASPACE_STR) {
                Some(rest) => (rest, true),
                None => (piece.text.as_str(), false),
            };

            if leading_space {
                while cursor < bytes.len()
                    && matches!(bytes[cursor], b' ' | b'\t' | b'\n' | b'\r')
                {
                    cursor += 1;
                }
            }

            if match_text.is_empty() {
                // A pure-space piece: attribute it to the space just skipped.
                if cursor > 0 && bytes[cursor - 1] == b' ' {
                    spans.push(TokenSpan {
                        start: cursor - 1,
                        end: cursor,
                    });
                } else {
                    spans.push(TokenSpan {
                        start: cursor,
                        end: cursor,
                    });
                }
                continue;
            }

            match text.get(cursor..).and_then(|rest| rest.find(match_text)) {
                Some(found) => {
                    let start = cursor + found;
                    cursor = start + match_text.len();
                    spans.push(TokenSpan { start, end: cursor });
                },
                None => {
                    // Surface text not findable (byte fallback, normalization
                    // inside the processor): advance by length and flag it.
                    approximate = true;
                    let start = cursor;
                    cursor = (cursor + match_text.len()).min(text.len());
                    spans.push(TokenSpan { start, end: cursor });
                },
            }
        }

        Encoding {
            ids,
            spans,
            approximate_spans: approximate,
        }
    }
}
