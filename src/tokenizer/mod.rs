//! Tokenizers for text encoding and decoding
//!
//! Two implementations share one contract: [`HfTokenizer`] interprets the
//! declarative `tokenizer.json` pipeline (normalizer, pre-tokenizer, model,
//! decoder) for WordPiece, BPE, and Unigram models, and
//! [`sentencepiece::SentencePieceTokenizer`] adapts an external
//! SentencePiece segmenter to the same interface.
//!
//! Every encoded token id carries a byte span in the *original* input such
//! that slicing the input by that span yields the surface text that produced
//! the token, where well-defined. Spans are flagged approximate when a
//! Unicode normalization stage (NFC/NFD/NFKC/NFKD) is in the pipeline.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cargar::tokenizer::{HfTokenizer, Tokenizer, TokenizerWithSpans};
//!
//! let tok = HfTokenizer::from_file(None, "tokenizer.json")?;
//! let encoding = tok.encode_with_spans("testing spans");
//! for (id, span) in encoding.ids.iter().zip(&encoding.spans) {
//!     println!("{id}: {:?}", &"testing spans"[span.start..span.end]);
//! }
//! ```

pub mod descriptor;
pub mod sentencepiece;

mod decoder;
mod hf;
mod model;
mod normalizer;
mod pretokenizer;

pub use hf::HfTokenizer;
pub use pretokenizer::{byte_to_char, char_to_byte};

use crate::error::Result;

/// Byte range of a token in the original input, half-open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    /// Start byte (inclusive)
    pub start: usize,
    /// End byte (exclusive)
    pub end: usize,
}

/// Result of encoding text: token ids with their source spans
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Encoding {
    /// Token ids
    pub ids: Vec<u32>,
    /// Byte span in the original input for each id
    pub spans: Vec<TokenSpan>,
    /// True when a Unicode-normalizer stage made the spans approximate
    pub approximate_spans: bool,
}

/// Commonly used special tokens with tokenizer-specific ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialToken {
    /// Beginning of sentence/sequence
    Bos,
    /// End of sentence/sequence
    Eos,
    /// Unknown token
    Unk,
    /// Padding
    Pad,
    /// Classification (BERT `[CLS]`)
    Cls,
    /// Separator (BERT `[SEP]`)
    Sep,
    /// Mask (BERT `[MASK]`)
    Mask,
}

impl std::fmt::Display for SpecialToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SpecialToken::Bos => "bos",
            SpecialToken::Eos => "eos",
            SpecialToken::Unk => "unk",
            SpecialToken::Pad => "pad",
            SpecialToken::Cls => "cls",
            SpecialToken::Sep => "sep",
            SpecialToken::Mask => "mask",
        };
        write!(f, "{name}")
    }
}

/// Caller-supplied special-token contents, applied when the descriptor
/// itself does not claim a slot
///
/// Typically populated from a repo's `tokenizer_config.json`.
#[derive(Debug, Clone, Default)]
pub struct TokenizerConfig {
    /// Beginning-of-sentence token content
    pub bos_token: Option<String>,
    /// End-of-sentence token content
    pub eos_token: Option<String>,
    /// Unknown token content
    pub unk_token: Option<String>,
    /// Padding token content
    pub pad_token: Option<String>,
    /// Classification token content
    pub cls_token: Option<String>,
    /// Separator token content
    pub sep_token: Option<String>,
    /// Mask token content
    pub mask_token: Option<String>,
}

/// Text to token ids and back
///
/// Implementations are immutable after construction; shared read-only use
/// across threads is safe.
pub trait Tokenizer {
    /// Encode text to token ids
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Decode token ids to text; unknown ids are dropped
    fn decode(&self, ids: &[u32]) -> String;

    /// Id of a special token
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` if the slot was never populated.
    fn special_token_id(&self, token: SpecialToken) -> Result<u32>;
}

/// Tokenizer that also reports byte-span provenance
pub trait TokenizerWithSpans: Tokenizer {
    /// Encode text, returning ids together with their source spans
    fn encode_with_spans(&self, text: &str) -> Encoding;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_token_display() {
        assert_eq!(SpecialToken::Bos.to_string(), "bos");
        assert_eq!(SpecialToken::Mask.to_string(), "mask");
    }

    #[test]
    fn test_encoding_default_is_empty() {
        let e = Encoding::default();
        assert!(e.ids.is_empty());
        assert!(e.spans.is_empty());
        assert!(!e.approximate_spans);
    }
}
