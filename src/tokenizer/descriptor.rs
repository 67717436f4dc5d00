//! Parsed `tokenizer.json` descriptor
//!
//! The descriptor is a declarative pipeline: an optional normalizer, an
//! optional pre-tokenizer, a subword model, and an optional decoder, each a
//! tagged tree. Tags outside the interpreted set parse into an explicit
//! `Unknown` variant rather than failing: the pipeline applies a documented
//! fallback (pass-through for normalizers and decoders, whitespace split
//! for pre-tokenizers) so descriptor parsing never rejects a file over an
//! unrecognized component.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{CargarError, Result};

/// A token added on top of the model vocabulary
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddedToken {
    /// Token id
    pub id: u32,
    /// Surface content
    pub content: String,
    /// Only match as a whole word
    #[serde(default)]
    pub single_word: bool,
    /// Strip whitespace on the left when matching
    #[serde(default)]
    pub lstrip: bool,
    /// Strip whitespace on the right when matching
    #[serde(default)]
    pub rstrip: bool,
    /// Match against normalized text
    #[serde(default)]
    pub normalized: bool,
    /// Token is a special (control) token
    #[serde(default)]
    pub special: bool,
}

/// Normalizer stage
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizerDef {
    /// Lowercase each code point
    Lowercase,
    /// Unicode canonical composition
    Nfc,
    /// Unicode canonical decomposition
    Nfd,
    /// Unicode compatibility composition
    Nfkc,
    /// Unicode compatibility decomposition
    Nfkd,
    /// NFD then drop non-spacing marks
    StripAccents,
    /// BERT text cleanup: drop controls, unify whitespace, optional lowercase
    Bert {
        /// Lowercase after cleanup
        lowercase: bool,
    },
    /// Apply children in order
    Sequence(Vec<NormalizerDef>),
    /// Regex replacement; pass-through in this engine
    Replace,
    /// String prepend; pass-through in this engine
    Prepend,
    /// Unrecognized tag; pass-through
    Unknown(String),
}

/// Pre-tokenizer stage
#[derive(Debug, Clone, PartialEq)]
pub enum PreTokenizerDef {
    /// Split on Unicode whitespace
    Whitespace,
    /// Split on Unicode whitespace (word-boundary variant)
    WhitespaceSplit,
    /// Whitespace split plus one segment per punctuation code point
    Bert,
    /// Punctuation isolation only; whitespace stays in runs
    Punctuation,
    /// GPT-2 byte-level alphabet mapping and space-anchored runs
    ByteLevel {
        /// Prepend a space when the text does not start with one
        add_prefix_space: bool,
    },
    /// Replace spaces with U+2581 and split on it
    Metaspace {
        /// Prepend a space when the text does not start with one
        add_prefix_space: bool,
    },
    /// Pipe each segment through the children in order
    Sequence(Vec<PreTokenizerDef>),
    /// Regex split; whitespace fallback in this engine
    Split,
    /// Unrecognized tag; whitespace fallback
    Unknown(String),
}

/// Decoder stage
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderDef {
    /// Strip continuation prefixes, join words with spaces
    WordPiece {
        /// Continuation prefix (default `##`)
        prefix: String,
    },
    /// Map the byte-level alphabet back to bytes
    ByteLevel,
    /// Replace U+2581 with spaces
    Metaspace,
    /// Strip end-of-word suffixes and insert spaces
    Bpe {
        /// End-of-word suffix; falls back to the model's when absent
        suffix: Option<String>,
    },
    /// Apply children in order, then concatenate
    Sequence(Vec<DecoderDef>),
    /// Unrecognized tag; WordPiece-style fallback
    Unknown(String),
}

/// Subword model family
#[derive(Debug, Clone, PartialEq)]
pub enum ModelKind {
    /// Greedy longest-match with continuation prefix (BERT)
    WordPiece,
    /// Byte-pair encoding with ranked merges (GPT-2, RoBERTa)
    Bpe,
    /// Unigram vocabulary (greedy longest-match in this engine)
    Unigram,
    /// Unrecognized model type; whole-word vocab lookup fallback
    Unknown(String),
}

/// Subword model definition
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDef {
    /// Model family
    pub kind: ModelKind,
    /// Token to id; parsed from either a JSON object or the Unigram array
    /// form where the array index is the id
    pub vocab: HashMap<String, u32>,
    /// BPE merges normalized to `"left right"` form; index is the rank
    pub merges: Vec<String>,
    /// Unknown-token content
    pub unk_token: Option<String>,
    /// WordPiece continuation prefix (default `##`)
    pub continuing_subword_prefix: Option<String>,
    /// BPE end-of-word suffix
    pub end_of_word_suffix: Option<String>,
    /// WordPiece per-word length cap (default 100 characters)
    pub max_input_chars_per_word: Option<usize>,
    /// Byte-fallback flag (parsed, not interpreted by this engine)
    pub byte_fallback: bool,
}

impl Default for ModelDef {
    fn default() -> Self {
        Self {
            kind: ModelKind::Unknown(String::new()),
            vocab: HashMap::new(),
            merges: Vec::new(),
            unk_token: None,
            continuing_subword_prefix: None,
            end_of_word_suffix: None,
            max_input_chars_per_word: None,
            byte_fallback: false,
        }
    }
}

/// Parsed `tokenizer.json`
#[derive(Debug, Clone, Default)]
pub struct TokenizerDescriptor {
    /// Added tokens in file order
    pub added_tokens: Vec<AddedToken>,
    /// Normalizer stage, if declared
    pub normalizer: Option<NormalizerDef>,
    /// Pre-tokenizer stage, if declared
    pub pre_tokenizer: Option<PreTokenizerDef>,
    /// Decoder stage, if declared
    pub decoder: Option<DecoderDef>,
    /// Subword model
    pub model: ModelDef,
}

fn tag_of(v: &Value) -> &str {
    v.get("type").and_then(Value::as_str).unwrap_or("")
}

fn parse_normalizer(v: &Value) -> NormalizerDef {
    match tag_of(v) {
        "Lowercase" => NormalizerDef::Lowercase,
        "NFC" => NormalizerDef::Nfc,
        "NFD" => NormalizerDef::Nfd,
        "NFKC" => NormalizerDef::Nfkc,
        "NFKD" => NormalizerDef::Nfkd,
        "StripAccents" => NormalizerDef::StripAccents,
        "BertNormalizer" => NormalizerDef::Bert {
            lowercase: v.get("lowercase").and_then(Value::as_bool).unwrap_or(false),
        },
        "Sequence" => NormalizerDef::Sequence(
            v.get("normalizers")
                .and_then(Value::as_array)
                .map(|children| children.iter().map(parse_normalizer).collect())
                .unwrap_or_default(),
        ),
        "Replace" => NormalizerDef::Replace,
        "Prepend" => NormalizerDef::Prepend,
        other => NormalizerDef::Unknown(other.to_string()),
    }
}

fn parse_pre_tokenizer(v: &Value) -> PreTokenizerDef {
    let add_prefix_space = v
        .get("add_prefix_space")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    match tag_of(v) {
        "Whitespace" => PreTokenizerDef::Whitespace,
        "WhitespaceSplit" => PreTokenizerDef::WhitespaceSplit,
        "BertPreTokenizer" => PreTokenizerDef::Bert,
        "Punctuation" => PreTokenizerDef::Punctuation,
        "ByteLevel" => PreTokenizerDef::ByteLevel { add_prefix_space },
        "Metaspace" => PreTokenizerDef::Metaspace { add_prefix_space },
        "Sequence" => PreTokenizerDef::Sequence(
            v.get("pretokenizers")
                .and_then(Value::as_array)
                .map(|children| children.iter().map(parse_pre_tokenizer).collect())
                .unwrap_or_default(),
        ),
        "Split" => PreTokenizerDef::Split,
        other => PreTokenizerDef::Unknown(other.to_string()),
    }
}

fn parse_decoder(v: &Value) -> DecoderDef {
    match tag_of(v) {
        "WordPiece" => DecoderDef::WordPiece {
            prefix: v
                .get("prefix")
                .and_then(Value::as_str)
                .unwrap_or("##")
                .to_string(),
        },
        "ByteLevel" => DecoderDef::ByteLevel,
        "Metaspace" => DecoderDef::Metaspace,
        "BPEDecoder" => DecoderDef::Bpe {
            suffix: v
                .get("suffix")
                .and_then(Value::as_str)
                .map(ToString::to_string),
        },
        "Sequence" => DecoderDef::Sequence(
            v.get("decoders")
                .and_then(Value::as_array)
                .map(|children| children.iter().map(parse_decoder).collect())
                .unwrap_or_default(),
        ),
        other => DecoderDef::Unknown(other.to_string()),
    }
}

/// Accept both vocab encodings: `{token: id}` and the Unigram array form
/// `[["piece", score], ...]` where the index is the id.
fn parse_vocab(v: &Value) -> HashMap<String, u32> {
    let mut vocab = HashMap::new();
    match v {
        Value::Object(map) => {
            for (token, id) in map {
                if let Some(id) = id.as_u64() {
                    #[allow(clippy::cast_possible_truncation)]
                    vocab.insert(token.clone(), id as u32);
                }
            }
        },
        Value::Array(entries) => {
            for (id, entry) in entries.iter().enumerate() {
                let token = match entry {
                    Value::String(s) => Some(s.clone()),
                    Value::Array(pair) => pair.first().and_then(Value::as_str).map(ToString::to_string),
                    _ => None,
                };
                if let Some(token) = token {
                    #[allow(clippy::cast_possible_truncation)]
                    vocab.insert(token, id as u32);
                }
            }
        },
        _ => {},
    }
    vocab
}

/// Accept both merge encodings: `"left right"` strings and `[left, right]`
/// pairs; both normalize to the space-joined form.
fn parse_merges(v: &Value) -> Vec<String> {
    let Some(entries) = v.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s.clone()),
            Value::Array(pair) => {
                let left = pair.first().and_then(Value::as_str)?;
                let right = pair.get(1).and_then(Value::as_str)?;
                Some(format!("{left} {right}"))
            },
            _ => None,
        })
        .collect()
}

fn parse_model(v: &Value) -> ModelDef {
    let kind = match tag_of(v) {
        "WordPiece" => ModelKind::WordPiece,
        "BPE" => ModelKind::Bpe,
        "Unigram" => ModelKind::Unigram,
        other => ModelKind::Unknown(other.to_string()),
    };

    let non_empty = |key: &str| {
        v.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    };

    ModelDef {
        kind,
        vocab: v.get("vocab").map(parse_vocab).unwrap_or_default(),
        merges: v.get("merges").map(parse_merges).unwrap_or_default(),
        unk_token: non_empty("unk_token"),
        continuing_subword_prefix: non_empty("continuing_subword_prefix"),
        end_of_word_suffix: non_empty("end_of_word_suffix"),
        max_input_chars_per_word: v
            .get("max_input_chars_per_word")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|&n| n > 0),
        byte_fallback: v
            .get("byte_fallback")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

impl TokenizerDescriptor {
    /// Parse a `tokenizer.json` document
    ///
    /// # Errors
    ///
    /// Returns `MalformedJson` only when the document itself is not a JSON
    /// object; unknown sub-components parse into `Unknown` variants.
    pub fn from_slice(content: &[u8]) -> Result<Self> {
        let root: Value =
            serde_json::from_slice(content).map_err(|e| CargarError::MalformedJson {
                context: "tokenizer.json".to_string(),
                reason: e.to_string(),
            })?;
        if !root.is_object() {
            return Err(CargarError::MalformedJson {
                context: "tokenizer.json".to_string(),
                reason: "expected JSON object".to_string(),
            });
        }

        let added_tokens = root
            .get("added_tokens")
            .cloned()
            .map(|v| serde_json::from_value::<Vec<AddedToken>>(v).unwrap_or_default())
            .unwrap_or_default();

        Ok(Self {
            added_tokens,
            normalizer: root
                .get("normalizer")
                .filter(|v| !v.is_null())
                .map(parse_normalizer),
            pre_tokenizer: root
                .get("pre_tokenizer")
                .filter(|v| !v.is_null())
                .map(parse_pre_tokenizer),
            decoder: root
                .get("decoder")
                .filter(|v| !v.is_null())
                .map(parse_decoder),
            model: root.get("model").map(parse_model).unwrap_or_default(),
        })
    }
}
