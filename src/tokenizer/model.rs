//! Subword models: WordPiece, BPE, and greedy Unigram
//!
//! Each model consumes one pre-tokenized segment and emits token ids whose
//! spans are sub-spans of the segment, mapped back through the segment's
//! offset array into the original input.
//!
//! The Unigram model here is a greedy longest-match-from-left, not the
//! score-optimal Viterbi segmentation; sequences can differ from reference
//! implementations on inputs where a shorter first piece would enable a
//! better overall split.

use std::collections::HashMap;

use super::pretokenizer::Segment;
use super::TokenSpan;

/// Default WordPiece per-word character cap
pub const DEFAULT_MAX_INPUT_CHARS: usize = 100;

/// Default WordPiece continuation prefix
pub const DEFAULT_CONTINUING_PREFIX: &str = "##";

/// A token id with its span in the original input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenWithSpan {
    /// Token id
    pub id: u32,
    /// Byte span in the original input
    pub span: TokenSpan,
}

/// Byte positions of char boundaries, including the end position
fn char_boundaries(text: &str) -> Vec<usize> {
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());
    bounds
}

/// WordPiece: greedy longest-match-from-left with a continuation prefix
///
/// A word longer than `max_chars` characters, or one with an unmatchable
/// remainder, collapses to a single unk covering the whole segment (or to
/// nothing when no unk is defined).
pub fn word_piece(
    seg: &Segment,
    vocab: &HashMap<String, u32>,
    prefix: &str,
    max_chars: usize,
    unk: Option<u32>,
) -> Vec<TokenWithSpan> {
    if seg.text.is_empty() {
        return Vec::new();
    }

    let whole_unk = || {
        unk.map(|id| {
            vec![TokenWithSpan {
                id,
                span: seg.span(),
            }]
        })
        .unwrap_or_default()
    };

    let bounds = char_boundaries(&seg.text);
    let n_chars = bounds.len() - 1;
    if n_chars > max_chars {
        return whole_unk();
    }

    let mut out = Vec::new();
    let mut start = 0;
    while start < n_chars {
        let mut matched = None;
        let mut end = n_chars;
        while end > start {
            let sub = &seg.text[bounds[start]..bounds[end]];
            let hit = if start > 0 {
                vocab.get(&format!("{prefix}{sub}"))
            } else {
                vocab.get(sub)
            };
            if let Some(&id) = hit {
                matched = Some((id, end));
                break;
            }
            end -= 1;
        }

        let Some((id, end)) = matched else {
            return whole_unk();
        };
        out.push(TokenWithSpan {
            id,
            span: seg.sub_span(bounds[start], bounds[end]),
        });
        start = end;
    }
    out
}

/// One BPE work item: symbol text and its byte range in the segment
struct Symbol {
    text: String,
    a: usize,
    b: usize,
}

/// BPE: repeatedly merge the adjacent pair with the lowest rank
///
/// Ties break toward the earliest pair. Symbols left without an id map to
/// unk when one is defined and are skipped otherwise.
pub fn bpe(
    seg: &Segment,
    vocab: &HashMap<String, u32>,
    merge_ranks: &HashMap<String, usize>,
    end_of_word_suffix: Option<&str>,
    unk: Option<u32>,
) -> Vec<TokenWithSpan> {
    if seg.text.is_empty() {
        return Vec::new();
    }

    let bounds = char_boundaries(&seg.text);
    let mut symbols: Vec<Symbol> = bounds
        .windows(2)
        .map(|w| Symbol {
            text: seg.text[w[0]..w[1]].to_string(),
            a: w[0],
            b: w[1],
        })
        .collect();

    if let Some(suffix) = end_of_word_suffix {
        if !suffix.is_empty() {
            if let Some(last) = symbols.last_mut() {
                last.text.push_str(suffix);
            }
        }
    }

    if symbols.len() == 1 {
        if let Some(&id) = vocab.get(&symbols[0].text) {
            return vec![TokenWithSpan {
                id,
                span: seg.sub_span(symbols[0].a, symbols[0].b),
            }];
        }
    }

    while symbols.len() > 1 {
        let mut best: Option<(usize, usize)> = None; // (rank, index)
        for i in 0..symbols.len() - 1 {
            let pair = format!("{} {}", symbols[i].text, symbols[i + 1].text);
            if let Some(&rank) = merge_ranks.get(&pair) {
                if best.is_none_or(|(r, _)| rank < r) {
                    best = Some((rank, i));
                }
            }
        }
        let Some((_, i)) = best else {
            break;
        };

        let right = symbols.remove(i + 1);
        symbols[i].text.push_str(&right.text);
        symbols[i].b = right.b;
    }

    let mut out = Vec::new();
    for sym in symbols {
        let span = seg.sub_span(sym.a, sym.b);
        if let Some(&id) = vocab.get(&sym.text) {
            out.push(TokenWithSpan { id, span });
        } else if let Some(unk) = unk {
            out.push(TokenWithSpan { id: unk, span });
        }
    }
    out
}

/// Unigram (greedy): longest vocabulary match from the left, falling back
/// to single runes (or unk) where nothing matches
pub fn unigram(seg: &Segment, vocab: &HashMap<String, u32>, unk: Option<u32>) -> Vec<TokenWithSpan> {
    let bounds = char_boundaries(&seg.text);
    let n_chars = bounds.len() - 1;

    let mut out = Vec::new();
    let mut start = 0;
    while start < n_chars {
        let mut matched = None;
        let mut end = n_chars;
        while end > start {
            if let Some(&id) = vocab.get(&seg.text[bounds[start]..bounds[end]]) {
                matched = Some((id, end));
                break;
            }
            end -= 1;
        }

        if let Some((id, end)) = matched {
            out.push(TokenWithSpan {
                id,
                span: seg.sub_span(bounds[start], bounds[end]),
            });
            start = end;
        } else {
            let span = seg.sub_span(bounds[start], bounds[start + 1]);
            let single = &seg.text[bounds[start]..bounds[start + 1]];
            if let Some(&id) = vocab.get(single) {
                out.push(TokenWithSpan { id, span });
            } else if let Some(unk) = unk {
                out.push(TokenWithSpan { id: unk, span });
            }
            start += 1;
        }
    }
    out
}
