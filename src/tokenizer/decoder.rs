//! Decode stage: token strings back to text
//!
//! The default behavior (no decoder declared, or an unrecognized tag) is
//! WordPiece-style: strip continuation prefixes and join words with single
//! spaces.

use super::descriptor::DecoderDef;
use super::model::DEFAULT_CONTINUING_PREFIX;
use super::pretokenizer::{char_to_byte, METASPACE};

/// WordPiece joining: prefixed tokens glue onto the previous word, others
/// start a new space-separated word
fn word_piece_decode(tokens: &[String], prefix: &str) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if let Some(stripped) = token.strip_prefix(prefix) {
            out.push_str(stripped);
        } else {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(token);
        }
    }
    out
}

/// Byte-level decoding: map every code point back through the alphabet and
/// reassemble the byte sequence
fn byte_level_decode(tokens: &[String]) -> String {
    let mut bytes = Vec::new();
    for token in tokens {
        for c in token.chars() {
            match char_to_byte(c) {
                Some(b) => bytes.push(b),
                // Code points outside the alphabet pass through as UTF-8.
                None => bytes.extend_from_slice(c.to_string().as_bytes()),
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Metaspace decoding: markers become spaces, leading spaces are trimmed
fn metaspace_decode(tokens: &[String]) -> String {
    let mut out = String::new();
    for token in tokens {
        for c in token.chars() {
            out.push(if c == METASPACE { ' ' } else { c });
        }
    }
    out.trim_start_matches(' ').to_string()
}

/// BPE decoding: end-of-word suffixes turn into word-separating spaces
fn bpe_decode(tokens: &[String], suffix: &str) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        match token.strip_suffix(suffix) {
            Some(stripped) if !suffix.is_empty() => {
                out.push_str(stripped);
                if i + 1 < tokens.len() {
                    out.push(' ');
                }
            },
            _ => out.push_str(token),
        }
    }
    out
}

/// One `Sequence` child applied to the token batch. Decoding children
/// (Metaspace, ByteLevel) run over the whole batch at once, exactly as in
/// the non-Sequence path: per-token application would trim every token's
/// leading space and could split multi-byte characters that span adjacent
/// byte-level tokens. The list transforms in the interpreted set (Replace,
/// Strip, ByteFallback) are pass-through in this engine.
fn sequence_step(tokens: Vec<String>, def: &DecoderDef) -> Vec<String> {
    match def {
        DecoderDef::Metaspace => vec![metaspace_decode(&tokens)],
        DecoderDef::ByteLevel => vec![byte_level_decode(&tokens)],
        _ => tokens,
    }
}

/// Apply the decode stage to resolved token strings
///
/// `model_suffix` is the model's `end_of_word_suffix`, used when a
/// `BPEDecoder` does not declare its own.
#[must_use]
pub fn decode(tokens: &[String], def: Option<&DecoderDef>, model_suffix: Option<&str>) -> String {
    match def {
        None => word_piece_decode(tokens, DEFAULT_CONTINUING_PREFIX),
        Some(DecoderDef::WordPiece { prefix }) => word_piece_decode(tokens, prefix),
        Some(DecoderDef::ByteLevel) => byte_level_decode(tokens),
        Some(DecoderDef::Metaspace) => metaspace_decode(tokens),
        Some(DecoderDef::Bpe { suffix }) => {
            let suffix = suffix
                .as_deref()
                .or(model_suffix)
                .unwrap_or_default();
            bpe_decode(tokens, suffix)
        },
        Some(DecoderDef::Sequence(children)) => {
            let mut tokens = tokens.to_vec();
            for child in children {
                tokens = sequence_step(tokens, child);
            }
            tokens.concat()
        },
        Some(DecoderDef::Unknown(name)) => {
            log::debug!("decoder '{name}' not interpreted, using WordPiece joining");
            word_piece_decode(tokens, DEFAULT_CONTINUING_PREFIX)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::super::pretokenizer::byte_to_char;
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_default_wordpiece_join() {
        let tokens = strings(&["test", "##ing", "works"]);
        assert_eq!(decode(&tokens, None, None), "testing works");
    }

    #[test]
    fn test_wordpiece_custom_prefix() {
        let tokens = strings(&["un", "@@fold"]);
        let def = DecoderDef::WordPiece {
            prefix: "@@".to_string(),
        };
        assert_eq!(decode(&tokens, Some(&def), None), "unfold");
    }

    #[test]
    fn test_byte_level_roundtrip() {
        // "a b" through the alphabet: 'a', then Ġ + 'b'.
        let g = byte_to_char(b' ');
        let tokens = vec!["a".to_string(), format!("{g}b")];
        assert_eq!(decode(&tokens, Some(&DecoderDef::ByteLevel), None), "a b");
    }

    #[test]
    fn test_byte_level_multibyte() {
        // "é" encodes as the alphabet chars for 0xC3 0xA9.
        let tokens = vec![format!("{}{}", byte_to_char(0xC3), byte_to_char(0xA9))];
        assert_eq!(decode(&tokens, Some(&DecoderDef::ByteLevel), None), "é");
    }

    #[test]
    fn test_metaspace_trims_leading() {
        let tokens = strings(&["\u{2581}hello", "\u{2581}world"]);
        assert_eq!(
            decode(&tokens, Some(&DecoderDef::Metaspace), None),
            "hello world"
        );
    }

    #[test]
    fn test_bpe_suffix_from_decoder() {
        let tokens = strings(&["hel", "lo</w>", "there</w>"]);
        let def = DecoderDef::Bpe {
            suffix: Some("</w>".to_string()),
        };
        assert_eq!(decode(&tokens, Some(&def), None), "hello there");
    }

    #[test]
    fn test_bpe_suffix_falls_back_to_model() {
        let tokens = strings(&["ab</w>", "c</w>"]);
        let def = DecoderDef::Bpe { suffix: None };
        assert_eq!(decode(&tokens, Some(&def), Some("</w>")), "ab c");
    }

    #[test]
    fn test_sequence_concatenates() {
        // The Metaspace child sees the whole batch: only the overall
        // leading space is trimmed, inter-word spacing survives.
        let tokens = strings(&["\u{2581}a", "\u{2581}b"]);
        let def = DecoderDef::Sequence(vec![DecoderDef::Metaspace]);
        assert_eq!(decode(&tokens, Some(&def), None), "a b");
    }

    #[test]
    fn test_sequence_byte_level_spans_token_boundary() {
        // "é" (0xC3 0xA9) split across two byte-level tokens decodes
        // intact because the child sees the concatenated batch.
        let tokens = vec![
            byte_to_char(0xC3).to_string(),
            byte_to_char(0xA9).to_string(),
        ];
        let def = DecoderDef::Sequence(vec![DecoderDef::ByteLevel]);
        assert_eq!(decode(&tokens, Some(&def), None), "é");
    }

    #[test]
    fn test_unknown_falls_back_to_wordpiece() {
        let tokens = strings(&["x", "##y"]);
        let def = DecoderDef::Unknown("CTC".to_string());
        assert_eq!(decode(&tokens, Some(&def), None), "xy");
    }

    #[test]
    fn test_empty_tokens() {
        assert_eq!(decode(&[], None, None), "");
    }
}
