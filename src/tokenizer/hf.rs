//! Tokenizer over the `tokenizer.json` declarative pipeline
//!
//! Ties the stages together: normalize (tracking source offsets),
//! pre-tokenize into word segments, run the subword model per segment, and
//! concatenate. `encode` is defined as `encode_with_spans().ids`; there is
//! one code path and span tracking is always on.

use std::collections::HashMap;
use std::path::Path;

use super::descriptor::{AddedToken, ModelKind, TokenizerDescriptor};
use super::model::{
    bpe, unigram, word_piece, TokenWithSpan, DEFAULT_CONTINUING_PREFIX, DEFAULT_MAX_INPUT_CHARS,
};
use super::pretokenizer::Segment;
use super::{decoder, normalizer, pretokenizer};
use super::{Encoding, SpecialToken, Tokenizer, TokenizerConfig, TokenizerWithSpans};
use crate::error::{CargarError, Result};
use crate::hub::ModelStore;

/// Resolved special-token ids
#[derive(Debug, Clone, Copy, Default)]
struct SpecialIds {
    unk: Option<u32>,
    pad: Option<u32>,
    bos: Option<u32>,
    eos: Option<u32>,
    cls: Option<u32>,
    sep: Option<u32>,
    mask: Option<u32>,
}

/// Tokenizer for `HuggingFace` "fast" tokenizer descriptors
///
/// Supports WordPiece, BPE, and Unigram models. Immutable after
/// construction; shared read-only use across threads is safe.
///
/// # Examples
///
/// ```rust,ignore
/// let repo = LocalRepo::new("/models/bert-base-uncased");
/// let tok = HfTokenizer::from_repo(None, &repo)?;
/// let ids = tok.encode("hello world");
/// assert_eq!(tok.decode(&ids), "hello world");
/// ```
#[derive(Debug, Clone)]
pub struct HfTokenizer {
    descriptor: TokenizerDescriptor,
    id_to_token: HashMap<u32, String>,
    merge_ranks: HashMap<String, usize>,
    added_tokens: HashMap<String, u32>,
    special: SpecialIds,
}

impl HfTokenizer {
    /// Build a tokenizer from `tokenizer.json` content
    ///
    /// # Errors
    ///
    /// Returns `MalformedJson` when the document is not a JSON object.
    /// Unknown sub-components never fail: the documented fallbacks apply.
    pub fn from_bytes(config: Option<&TokenizerConfig>, content: &[u8]) -> Result<Self> {
        let descriptor = TokenizerDescriptor::from_slice(content)?;

        let mut id_to_token: HashMap<u32, String> = descriptor
            .model
            .vocab
            .iter()
            .map(|(token, &id)| (id, token.clone()))
            .collect();

        let mut added_tokens = HashMap::new();
        for at in &descriptor.added_tokens {
            added_tokens.insert(at.content.clone(), at.id);
            id_to_token.insert(at.id, at.content.clone());
        }

        let merge_ranks = if descriptor.model.kind == ModelKind::Bpe {
            descriptor
                .model
                .merges
                .iter()
                .enumerate()
                .map(|(rank, merge)| (merge.clone(), rank))
                .collect()
        } else {
            HashMap::new()
        };

        let special = resolve_special_tokens(&descriptor, config);

        Ok(Self {
            descriptor,
            id_to_token,
            merge_ranks,
            added_tokens,
            special,
        })
    }

    /// Build a tokenizer from a local `tokenizer.json` file
    ///
    /// # Errors
    ///
    /// Returns `Io` on read failure, otherwise as [`HfTokenizer::from_bytes`].
    pub fn from_file<P: AsRef<Path>>(config: Option<&TokenizerConfig>, path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read(path)
            .map_err(|e| CargarError::io(format!("read {}", path.display()), &e))?;
        Self::from_bytes(config, &content)
    }

    /// Download `tokenizer.json` from a repository and build a tokenizer
    ///
    /// # Errors
    ///
    /// Returns `Io` when the repository has no `tokenizer.json`, otherwise
    /// as [`HfTokenizer::from_file`].
    pub fn from_repo<S: ModelStore>(config: Option<&TokenizerConfig>, repo: &S) -> Result<Self> {
        if !repo.list_files()?.iter().any(|f| f == "tokenizer.json") {
            return Err(CargarError::Io {
                context: "load tokenizer".to_string(),
                source_msg: "tokenizer.json not found in repository".to_string(),
            });
        }
        let local = repo.download("tokenizer.json")?;
        Self::from_file(config, local)
    }

    /// The subword model family
    #[must_use]
    pub fn model_kind(&self) -> &ModelKind {
        &self.descriptor.model.kind
    }

    /// Vocabulary size including added tokens
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.descriptor.model.vocab.len() + self.descriptor.added_tokens.len()
    }

    /// Token content to id; added tokens win over vocab collisions
    #[must_use]
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.added_tokens
            .get(token)
            .or_else(|| self.descriptor.model.vocab.get(token))
            .copied()
    }

    /// Id to token content
    #[must_use]
    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    /// Merged vocabulary view: model vocab overlaid with added tokens
    #[must_use]
    pub fn get_vocab(&self) -> HashMap<String, u32> {
        let mut vocab = self.descriptor.model.vocab.clone();
        for (content, &id) in &self.added_tokens {
            vocab.insert(content.clone(), id);
        }
        vocab
    }

    /// Added tokens sorted by id
    #[must_use]
    pub fn added_tokens(&self) -> Vec<AddedToken> {
        let mut tokens = self.descriptor.added_tokens.clone();
        tokens.sort_by_key(|at| at.id);
        tokens
    }

    /// Tokenize one pre-tokenized segment
    fn tokenize_segment(&self, seg: &Segment) -> Vec<TokenWithSpan> {
        // A segment that is exactly an added token short-circuits the model.
        if let Some(&id) = self.added_tokens.get(&seg.text) {
            return vec![TokenWithSpan {
                id,
                span: seg.span(),
            }];
        }

        let model = &self.descriptor.model;
        match &model.kind {
            ModelKind::WordPiece => word_piece(
                seg,
                &model.vocab,
                model
                    .continuing_subword_prefix
                    .as_deref()
                    .unwrap_or(DEFAULT_CONTINUING_PREFIX),
                model
                    .max_input_chars_per_word
                    .unwrap_or(DEFAULT_MAX_INPUT_CHARS),
                self.special.unk,
            ),
            ModelKind::Bpe => bpe(
                seg,
                &model.vocab,
                &self.merge_ranks,
                model.end_of_word_suffix.as_deref(),
                self.special.unk,
            ),
            ModelKind::Unigram => unigram(seg, &model.vocab, self.special.unk),
            ModelKind::Unknown(_) => {
                // Whole-word vocab lookup, then unk, then nothing.
                if let Some(&id) = model.vocab.get(&seg.text) {
                    vec![TokenWithSpan {
                        id,
                        span: seg.span(),
                    }]
                } else if let Some(unk) = self.special.unk {
                    vec![TokenWithSpan {
                        id: unk,
                        span: seg.span(),
                    }]
                } else {
                    Vec::new()
                }
            },
        }
    }
}

/// Resolve special-token slots: the model's own `unk_token` first, then
/// special added tokens by canonical content, then the caller config's
/// contents looked up in the vocab.
fn resolve_special_tokens(
    descriptor: &TokenizerDescriptor,
    config: Option<&TokenizerConfig>,
) -> SpecialIds {
    let mut ids = SpecialIds::default();
    let vocab = &descriptor.model.vocab;

    if let Some(unk) = &descriptor.model.unk_token {
        ids.unk = vocab.get(unk).copied();
    }

    for at in &descriptor.added_tokens {
        if !at.special {
            continue;
        }
        match at.content.as_str() {
            "[UNK]" | "<unk>" => ids.unk = Some(at.id),
            "[PAD]" | "<pad>" => ids.pad = Some(at.id),
            "[CLS]" | "<s>" => ids.cls = Some(at.id),
            "[SEP]" | "</s>" => ids.sep = Some(at.id),
            "[MASK]" | "<mask>" => ids.mask = Some(at.id),
            _ => {},
        }
        if let Some(config) = config {
            if config.bos_token.as_deref() == Some(at.content.as_str()) {
                ids.bos = Some(at.id);
            }
            if config.eos_token.as_deref() == Some(at.content.as_str()) {
                ids.eos = Some(at.id);
            }
        }
    }

    if let Some(config) = config {
        let lookup = |content: &Option<String>| {
            content
                .as_deref()
                .and_then(|content| vocab.get(content).copied())
        };
        ids.unk = ids.unk.or_else(|| lookup(&config.unk_token));
        ids.pad = ids.pad.or_else(|| lookup(&config.pad_token));
        ids.cls = ids.cls.or_else(|| lookup(&config.cls_token));
        ids.sep = ids.sep.or_else(|| lookup(&config.sep_token));
        ids.mask = ids.mask.or_else(|| lookup(&config.mask_token));
        ids.bos = ids.bos.or_else(|| lookup(&config.bos_token));
        ids.eos = ids.eos.or_else(|| lookup(&config.eos_token));
    }

    ids
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.encode_with_spans(text).ids
    }

    fn decode(&self, ids: &[u32]) -> String {
        let tokens: Vec<String> = ids
            .iter()
            .filter_map(|id| self.id_to_token.get(id).cloned())
            .collect();
        decoder::decode(
            &tokens,
            self.descriptor.decoder.as_ref(),
            self.descriptor.model.end_of_word_suffix.as_deref(),
        )
    }

    fn special_token_id(&self, token: SpecialToken) -> Result<u32> {
        let id = match token {
            SpecialToken::Unk => self.special.unk,
            SpecialToken::Pad => self.special.pad,
            // BERT-style models use CLS/SEP as sentence boundaries.
            SpecialToken::Bos => self.special.bos.or(self.special.cls),
            SpecialToken::Eos => self.special.eos.or(self.special.sep),
            SpecialToken::Cls => self.special.cls,
            SpecialToken::Sep => self.special.sep,
            SpecialToken::Mask => self.special.mask,
        };
        id.ok_or_else(|| CargarError::NotConfigured(token.to_string()))
    }
}

impl TokenizerWithSpans for HfTokenizer {
    fn encode_with_spans(&self, text: &str) -> Encoding {
        let norm = normalizer::normalize(self.descriptor.normalizer.as_ref(), text);
        let approximate_spans = norm.approximate;
        let segments = pretokenizer::pre_tokenize(self.descriptor.pre_tokenizer.as_ref(), &norm);

        let mut ids = Vec::new();
        let mut spans = Vec::new();
        for seg in &segments {
            for token in self.tokenize_segment(seg) {
                ids.push(token.id);
                spans.push(token.span);
            }
        }

        Encoding {
            ids,
            spans,
            approximate_spans,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::TokenSpan;
    use super::*;

    fn wordpiece_json() -> Vec<u8> {
        br###"{
            "added_tokens": [
                {"id": 0, "content": "[PAD]", "special": true},
                {"id": 99, "content": "[UNK]", "special": true},
                {"id": 101, "content": "[CLS]", "special": true},
                {"id": 102, "content": "[SEP]", "special": true}
            ],
            "normalizer": {"type": "BertNormalizer", "lowercase": true},
            "pre_tokenizer": {"type": "BertPreTokenizer"},
            "decoder": {"type": "WordPiece", "prefix": "##"},
            "model": {
                "type": "WordPiece",
                "unk_token": "[UNK]",
                "continuing_subword_prefix": "##",
                "vocab": {"hello": 1, "world": 2, "test": 3, "##ing": 4, ",": 5}
            }
        }"###
        .to_vec()
    }

    #[test]
    fn test_wordpiece_encode_decode() {
        let tok = HfTokenizer::from_bytes(None, &wordpiece_json()).expect("test");
        let ids = tok.encode("testing");
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(tok.decode(&[3, 4]), "testing");
    }

    #[test]
    fn test_wordpiece_spans() {
        let tok = HfTokenizer::from_bytes(None, &wordpiece_json()).expect("test");
        let enc = tok.encode_with_spans("testing");
        assert_eq!(enc.ids, vec![3, 4]);
        assert_eq!(enc.spans[0], TokenSpan { start: 0, end: 4 });
        assert_eq!(enc.spans[1], TokenSpan { start: 4, end: 7 });
        assert!(!enc.approximate_spans);
    }

    #[test]
    fn test_spans_survive_lowercasing() {
        let tok = HfTokenizer::from_bytes(None, &wordpiece_json()).expect("test");
        let input = "Testing, World";
        let enc = tok.encode_with_spans(input);
        assert_eq!(enc.ids, vec![3, 4, 5, 2]);
        // Slicing the original by each span yields the surface form.
        assert_eq!(&input[enc.spans[0].start..enc.spans[0].end], "Test");
        assert_eq!(&input[enc.spans[1].start..enc.spans[1].end], "ing");
        assert_eq!(&input[enc.spans[2].start..enc.spans[2].end], ",");
        assert_eq!(&input[enc.spans[3].start..enc.spans[3].end], "World");
    }

    #[test]
    fn test_encode_is_encode_with_spans_ids() {
        let tok = HfTokenizer::from_bytes(None, &wordpiece_json()).expect("test");
        let text = "hello, testing world";
        assert_eq!(tok.encode(text), tok.encode_with_spans(text).ids);
        // Deterministic.
        assert_eq!(tok.encode(text), tok.encode(text));
    }

    #[test]
    fn test_unknown_word_maps_to_unk() {
        let tok = HfTokenizer::from_bytes(None, &wordpiece_json()).expect("test");
        assert_eq!(tok.encode("qqq"), vec![99]);
    }

    #[test]
    fn test_added_token_short_circuit() {
        let tok = HfTokenizer::from_bytes(None, &wordpiece_json()).expect("test");
        let enc = tok.encode_with_spans("[CLS] hello");
        // "[CLS]" would otherwise shatter on punctuation; whitespace
        // pre-tokenization happens first, but the bracketed segment is
        // split by BertPreTokenizer, so only exact-segment matches hit.
        assert!(enc.ids.contains(&1));
    }

    #[test]
    fn test_added_token_exact_segment() {
        // With a whitespace pre-tokenizer, "[CLS]" stays one segment.
        let json = br##"{
            "added_tokens": [{"id": 7, "content": "[CLS]", "special": true}],
            "pre_tokenizer": {"type": "Whitespace"},
            "model": {"type": "WordPiece", "vocab": {"hi": 1}}
        }"##;
        let tok = HfTokenizer::from_bytes(None, json).expect("test");
        let enc = tok.encode_with_spans("[CLS] hi");
        assert_eq!(enc.ids, vec![7, 1]);
        assert_eq!(enc.spans[0], TokenSpan { start: 0, end: 5 });
    }

    #[test]
    fn test_added_token_wins_vocab_collision() {
        let json = br##"{
            "added_tokens": [{"id": 50, "content": "dup"}],
            "model": {"type": "WordPiece", "vocab": {"dup": 3}}
        }"##;
        let tok = HfTokenizer::from_bytes(None, json).expect("test");
        assert_eq!(tok.token_to_id("dup"), Some(50));
    }

    #[test]
    fn test_special_token_resolution() {
        let tok = HfTokenizer::from_bytes(None, &wordpiece_json()).expect("test");
        assert_eq!(tok.special_token_id(SpecialToken::Unk).expect("test"), 99);
        assert_eq!(tok.special_token_id(SpecialToken::Pad).expect("test"), 0);
        assert_eq!(tok.special_token_id(SpecialToken::Cls).expect("test"), 101);
        // BOS falls back to CLS, EOS to SEP.
        assert_eq!(tok.special_token_id(SpecialToken::Bos).expect("test"), 101);
        assert_eq!(tok.special_token_id(SpecialToken::Eos).expect("test"), 102);
        assert!(matches!(
            tok.special_token_id(SpecialToken::Mask),
            Err(CargarError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_config_supplied_special_tokens() {
        let json = br##"{
            "model": {"type": "WordPiece", "vocab": {"<bos>": 11, "<eos>": 12}}
        }"##;
        let config = TokenizerConfig {
            bos_token: Some("<bos>".to_string()),
            eos_token: Some("<eos>".to_string()),
            ..TokenizerConfig::default()
        };
        let tok = HfTokenizer::from_bytes(Some(&config), json).expect("test");
        assert_eq!(tok.special_token_id(SpecialToken::Bos).expect("test"), 11);
        assert_eq!(tok.special_token_id(SpecialToken::Eos).expect("test"), 12);
    }

    #[test]
    fn test_bpe_merges_full_word() {
        let json = br##"{
            "pre_tokenizer": {"type": "Whitespace"},
            "model": {
                "type": "BPE",
                "vocab": {"h": 1, "e": 2, "l": 3, "o": 4, "he": 8, "ll": 9, "hell": 11, "hello": 12},
                "merges": ["h e", "l l", "he ll", "hell o"]
            }
        }"##;
        let tok = HfTokenizer::from_bytes(None, json).expect("test");
        assert_eq!(tok.encode("hello"), vec![12]);
    }

    #[test]
    fn test_unigram_greedy() {
        let json = br##"{
            "pre_tokenizer": {"type": "Whitespace"},
            "model": {"type": "Unigram", "unk_token": "<unk>",
                      "vocab": [["<unk>", 0.0], ["hel", -1.0], ["lo", -1.0]]}
        }"##;
        let tok = HfTokenizer::from_bytes(None, json).expect("test");
        assert_eq!(tok.encode("hello"), vec![1, 2]);
    }

    #[test]
    fn test_nfd_spans_marked_approximate() {
        let json = r#"{
            "normalizer": {"type": "NFD"},
            "pre_tokenizer": {"type": "Whitespace"},
            "model": {"type": "WordPiece", "unk_token": "[UNK]",
                      "vocab": {"café": 1, "[UNK]": 0}}
        }"#;
        let tok = HfTokenizer::from_bytes(None, json.as_bytes()).expect("test");
        let enc = tok.encode_with_spans("café");
        assert_eq!(enc.ids, vec![1]);
        assert!(enc.approximate_spans);
        // Spans stay within the original input.
        for span in &enc.spans {
            assert!(span.start <= span.end && span.end <= "café".len());
        }
    }

    #[test]
    fn test_spans_in_bounds_property() {
        let tok = HfTokenizer::from_bytes(None, &wordpiece_json()).expect("test");
        for input in ["", "x", "hello world", "Hello, WORLD!!!", "héllo wörld", "  padded  "] {
            let enc = tok.encode_with_spans(input);
            assert_eq!(enc.ids.len(), enc.spans.len());
            for span in &enc.spans {
                assert!(span.start <= span.end, "{input:?}");
                assert!(span.end <= input.len(), "{input:?}");
            }
        }
    }

    #[test]
    fn test_decode_drops_unknown_ids() {
        let tok = HfTokenizer::from_bytes(None, &wordpiece_json()).expect("test");
        assert_eq!(tok.decode(&[3, 55_555, 4]), "testing");
    }

    #[test]
    fn test_vocab_views() {
        let tok = HfTokenizer::from_bytes(None, &wordpiece_json()).expect("test");
        assert_eq!(tok.vocab_size(), 5 + 4);
        assert_eq!(tok.token_to_id("##ing"), Some(4));
        assert_eq!(tok.id_to_token(101), Some("[CLS]"));
        assert_eq!(tok.get_vocab().get("[SEP]"), Some(&102));
        let added = tok.added_tokens();
        assert_eq!(added.first().map(|a| a.id), Some(0));
        assert_eq!(added.last().map(|a| a.id), Some(102));
    }

    #[test]
    fn test_unknown_model_kind_whole_word_fallback() {
        let json = br##"{
            "model": {"type": "WordLevel", "unk_token": "<u>",
                      "vocab": {"hi": 1, "<u>": 0}}
        }"##;
        let tok = HfTokenizer::from_bytes(None, json).expect("test");
        assert_eq!(tok.encode("hi there"), vec![1, 0]);
    }

    #[test]
    fn test_empty_input() {
        let tok = HfTokenizer::from_bytes(None, &wordpiece_json()).expect("test");
        let enc = tok.encode_with_spans("");
        assert!(enc.ids.is_empty());
        assert!(enc.spans.is_empty());
        assert_eq!(tok.decode(&[]), "");
    }
}
