//! Pre-tokenization stage: split normalized text into word segments
//!
//! Every emitted segment carries a byte-offset array into the *original*
//! input, so the subword stage can hand out sub-spans of a word without
//! knowing anything about normalization. Segment text may differ from the
//! original bytes (byte-level alphabet mapping, metaspace substitution);
//! the offsets always point home.

use std::collections::HashMap;
use std::sync::LazyLock;

use unicode_properties::{GeneralCategoryGroup, UnicodeGeneralCategory};

use super::descriptor::PreTokenizerDef;
use super::normalizer::NormalizedText;
use super::TokenSpan;

/// U+2581 LOWER ONE EIGHTH BLOCK, the metaspace marker
pub(crate) const METASPACE: char = '\u{2581}';

/// The byte-level alphabet: a process-wide bijection between bytes and a
/// fixed set of 256 code points. Printable bytes (`'!'..='~'`,
/// `0xA1..=0xAC`, `0xAE..=0xFF`) map to themselves; the remaining 68 bytes
/// map to code points 256.. in ascending order.
static BYTE_TO_CHAR_TABLE: LazyLock<[char; 256]> = LazyLock::new(|| {
    let mut table = ['\0'; 256];
    let mut next = 0u32;
    for b in 0u32..256 {
        let printable = (0x21..=0x7E).contains(&b) || (0xA1..=0xAC).contains(&b) || b >= 0xAE;
        table[b as usize] = if printable {
            char::from_u32(b).expect("byte-range code point")
        } else {
            let c = char::from_u32(256 + next).expect("alphabet code point");
            next += 1;
            c
        };
    }
    table
});

static CHAR_TO_BYTE_TABLE: LazyLock<HashMap<char, u8>> = LazyLock::new(|| {
    let mut table = HashMap::with_capacity(256);
    for (b, &c) in BYTE_TO_CHAR_TABLE.iter().enumerate() {
        table.insert(c, u8::try_from(b).expect("table has 256 entries"));
    }
    table
});

/// Map a raw byte through the byte-level alphabet
#[must_use]
pub fn byte_to_char(b: u8) -> char {
    BYTE_TO_CHAR_TABLE[b as usize]
}

/// Invert the byte-level alphabet; `None` for code points outside it
#[must_use]
pub fn char_to_byte(c: char) -> Option<u8> {
    CHAR_TO_BYTE_TABLE.get(&c).copied()
}

/// A word segment: text plus its byte-offset map into the original input
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Segment text (possibly remapped, e.g. through the byte-level alphabet)
    pub text: String,
    /// `text.len() + 1` entries of original byte positions
    pub offsets: Vec<usize>,
}

impl Segment {
    /// Wrap a whole normalized text as one segment
    #[must_use]
    pub fn from_normalized(norm: &NormalizedText) -> Self {
        Self {
            text: norm.text.clone(),
            offsets: norm.offsets.clone(),
        }
    }

    /// Sub-segment over text bytes `[a, b)`
    #[must_use]
    pub fn slice(&self, a: usize, b: usize) -> Self {
        Self {
            text: self.text[a..b].to_string(),
            offsets: self.offsets[a..=b].to_vec(),
        }
    }

    /// Original-input span of the whole segment
    #[must_use]
    pub fn span(&self) -> TokenSpan {
        TokenSpan {
            start: self.offsets[0],
            end: *self.offsets.last().expect("offsets never empty"),
        }
    }

    /// Original-input span of text bytes `[a, b)`
    #[must_use]
    pub fn sub_span(&self, a: usize, b: usize) -> TokenSpan {
        TokenSpan {
            start: self.offsets[a],
            end: self.offsets[b],
        }
    }
}

/// Punctuation test: the four ASCII punctuation ranges (which also cover
/// ASCII symbols like `$` and `` ` ``, the way BERT treats them), plus the
/// Unicode `P*` general category for everything beyond ASCII
pub(crate) fn is_punctuation(c: char) -> bool {
    if c.is_ascii() {
        return matches!(c, '!'..='/' | ':'..='@' | '['..='`' | '{'..='~');
    }
    c.general_category_group() == GeneralCategoryGroup::Punctuation
}

fn whitespace_split(seg: &Segment) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in seg.text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                out.push(seg.slice(s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push(seg.slice(s, seg.text.len()));
    }
    out
}

fn bert_split(seg: &Segment) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in seg.text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                out.push(seg.slice(s, i));
            }
        } else if is_punctuation(c) {
            if let Some(s) = start.take() {
                out.push(seg.slice(s, i));
            }
            out.push(seg.slice(i, i + c.len_utf8()));
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push(seg.slice(s, seg.text.len()));
    }
    out
}

fn punctuation_split(seg: &Segment) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in seg.text.char_indices() {
        if is_punctuation(c) {
            if let Some(s) = start.take() {
                out.push(seg.slice(s, i));
            }
            out.push(seg.slice(i, i + c.len_utf8()));
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push(seg.slice(s, seg.text.len()));
    }
    out
}

/// Prepend an ASCII space whose offset entry points at the segment start
fn with_prefix_space(seg: &Segment) -> Segment {
    let mut text = String::with_capacity(seg.text.len() + 1);
    text.push(' ');
    text.push_str(&seg.text);
    let mut offsets = Vec::with_capacity(seg.offsets.len() + 1);
    offsets.push(seg.offsets[0]);
    offsets.extend_from_slice(&seg.offsets);
    Segment { text, offsets }
}

/// Collects an output segment whose bytes each record an original position
struct SegmentBuilder {
    text: String,
    offsets: Vec<usize>,
}

impl SegmentBuilder {
    fn new() -> Self {
        Self {
            text: String::new(),
            offsets: Vec::new(),
        }
    }

    fn push_char(&mut self, c: char, orig: usize) {
        self.text.push(c);
        for _ in 0..c.len_utf8() {
            self.offsets.push(orig);
        }
    }

    fn finish(&mut self, end: usize, out: &mut Vec<Segment>) {
        if self.text.is_empty() {
            return;
        }
        let mut offsets = std::mem::take(&mut self.offsets);
        offsets.push(end);
        out.push(Segment {
            text: std::mem::take(&mut self.text),
            offsets,
        });
    }
}

/// Byte-level pre-tokenization: map every byte through the alphabet; a run
/// starts at each ASCII space, with the space carried into the following
/// segment. Consecutive spaces accumulate into the next segment.
fn byte_level_split(seg: &Segment, add_prefix_space: bool) -> Vec<Segment> {
    let src = if add_prefix_space && !seg.text.starts_with(' ') {
        with_prefix_space(seg)
    } else {
        seg.clone()
    };

    let bytes = src.text.as_bytes();
    let mut out = Vec::new();
    let mut cur = SegmentBuilder::new();
    let mut in_word = false;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b' ' {
            if in_word {
                cur.finish(src.offsets[i], &mut out);
                in_word = false;
            }
            cur.push_char(byte_to_char(b' '), src.offsets[i]);
        } else {
            in_word = true;
            cur.push_char(byte_to_char(b), src.offsets[i]);
        }
    }
    cur.finish(src.offsets[bytes.len()], &mut out);
    out
}

/// Metaspace pre-tokenization: spaces become U+2581; each run beginning
/// with the marker (or the whole string when none occurs) is a segment.
fn metaspace_split(seg: &Segment, add_prefix_space: bool) -> Vec<Segment> {
    let src = if add_prefix_space && !seg.text.starts_with(' ') {
        with_prefix_space(seg)
    } else {
        seg.clone()
    };

    let mut out = Vec::new();
    let mut cur = SegmentBuilder::new();
    for (i, c) in src.text.char_indices() {
        let mapped = if c == ' ' { METASPACE } else { c };
        if mapped == METASPACE && !cur.text.is_empty() {
            cur.finish(src.offsets[i], &mut out);
        }
        cur.push_char(mapped, src.offsets[i]);
    }
    cur.finish(src.offsets[src.text.len()], &mut out);
    out
}

/// Apply one pre-tokenizer stage to a segment
#[must_use]
pub fn apply(def: &PreTokenizerDef, seg: &Segment) -> Vec<Segment> {
    match def {
        PreTokenizerDef::Whitespace | PreTokenizerDef::WhitespaceSplit => whitespace_split(seg),
        PreTokenizerDef::Bert => bert_split(seg),
        PreTokenizerDef::Punctuation => punctuation_split(seg),
        PreTokenizerDef::ByteLevel { add_prefix_space } => {
            byte_level_split(seg, *add_prefix_space)
        },
        PreTokenizerDef::Metaspace { add_prefix_space } => metaspace_split(seg, *add_prefix_space),
        PreTokenizerDef::Sequence(children) => {
            let mut segments = vec![seg.clone()];
            for child in children {
                segments = segments.iter().flat_map(|s| apply(child, s)).collect();
            }
            segments
        },
        PreTokenizerDef::Split => whitespace_split(seg),
        PreTokenizerDef::Unknown(name) => {
            log::debug!("pre-tokenizer '{name}' not interpreted, splitting on whitespace");
            whitespace_split(seg)
        },
    }
}

/// Run the full pre-tokenization stage; the default without a declared
/// pre-tokenizer is a whitespace split
#[must_use]
pub fn pre_tokenize(def: Option<&PreTokenizerDef>, norm: &NormalizedText) -> Vec<Segment> {
    let root = Segment::from_normalized(norm);
    match def {
        Some(def) => apply(def, &root),
        None => whitespace_split(&root),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(text: &str) -> Segment {
        Segment::from_normalized(&NormalizedText::identity(text))
    }

    fn texts(segs: &[Segment]) -> Vec<&str> {
        segs.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn test_alphabet_is_a_bijection() {
        let mut seen = std::collections::HashSet::new();
        for b in 0u16..256 {
            #[allow(clippy::cast_possible_truncation)]
            let c = byte_to_char(b as u8);
            assert!(seen.insert(c), "duplicate mapping for byte {b}");
            #[allow(clippy::cast_possible_truncation)]
            {
                assert_eq!(char_to_byte(c), Some(b as u8));
            }
        }
    }

    #[test]
    fn test_alphabet_known_points() {
        assert_eq!(byte_to_char(b'!'), '!');
        assert_eq!(byte_to_char(b'~'), '~');
        assert_eq!(byte_to_char(b' '), '\u{120}'); // Ġ
        assert_eq!(byte_to_char(0xA9), '\u{A9}');
        assert_eq!(char_to_byte('\u{120}'), Some(b' '));
        assert_eq!(char_to_byte('日'), None);
    }

    #[test]
    fn test_whitespace_split_spans() {
        let segs = whitespace_split(&seg("hello  world"));
        assert_eq!(texts(&segs), vec!["hello", "world"]);
        assert_eq!(segs[0].span(), TokenSpan { start: 0, end: 5 });
        assert_eq!(segs[1].span(), TokenSpan { start: 7, end: 12 });
    }

    #[test]
    fn test_whitespace_split_empty_and_blank() {
        assert!(whitespace_split(&seg("")).is_empty());
        assert!(whitespace_split(&seg("   ")).is_empty());
    }

    #[test]
    fn test_bert_split_isolates_punctuation() {
        let segs = bert_split(&seg("hey, you!"));
        assert_eq!(texts(&segs), vec!["hey", ",", "you", "!"]);
        assert_eq!(segs[1].span(), TokenSpan { start: 3, end: 4 });
        assert_eq!(segs[3].span(), TokenSpan { start: 8, end: 9 });
    }

    #[test]
    fn test_punctuation_split_keeps_whitespace_runs() {
        let segs = punctuation_split(&seg("hey, you"));
        assert_eq!(texts(&segs), vec!["hey", ",", " you"]);
    }

    #[test]
    fn test_punctuation_covers_non_latin_scripts() {
        // Devanagari danda, Arabic comma, Armenian apostrophe, CJK comma.
        for c in ['\u{964}', '\u{965}', '\u{60C}', '\u{55A}', '\u{3001}'] {
            assert!(is_punctuation(c), "{c:?}");
        }
        // Letters and non-ASCII symbols (e.g. currency) are not punctuation.
        for c in ['a', 'é', '日', '\u{20AC}'] {
            assert!(!is_punctuation(c), "{c:?}");
        }
    }

    #[test]
    fn test_bert_split_non_latin_punctuation() {
        let segs = bert_split(&seg("नहीं\u{964} ठीक"));
        assert_eq!(texts(&segs), vec!["नहीं", "\u{964}", "ठीक"]);
    }

    #[test]
    fn test_byte_level_space_carried_forward() {
        let segs = byte_level_split(&seg("a b"), false);
        assert_eq!(texts(&segs), vec!["a", "\u{120}b"]);
        assert_eq!(segs[0].span(), TokenSpan { start: 0, end: 1 });
        // The Ġ maps back to the space at byte 1.
        assert_eq!(segs[1].span(), TokenSpan { start: 1, end: 3 });
    }

    #[test]
    fn test_byte_level_consecutive_spaces_accumulate() {
        let segs = byte_level_split(&seg("a  b"), false);
        assert_eq!(texts(&segs), vec!["a", "\u{120}\u{120}b"]);
    }

    #[test]
    fn test_byte_level_prefix_space() {
        let segs = byte_level_split(&seg("ab"), true);
        assert_eq!(texts(&segs), vec!["\u{120}ab"]);
        // The synthetic space maps to position 0.
        assert_eq!(segs[0].span(), TokenSpan { start: 0, end: 2 });
    }

    #[test]
    fn test_byte_level_multibyte_char() {
        // "é" is 0xC3 0xA9: both bytes are in the printable set.
        let segs = byte_level_split(&seg("é"), false);
        assert_eq!(texts(&segs), vec!["\u{C3}\u{A9}"]);
        assert_eq!(segs[0].span(), TokenSpan { start: 0, end: 2 });
    }

    #[test]
    fn test_metaspace_split() {
        let segs = metaspace_split(&seg("hello world"), false);
        assert_eq!(texts(&segs), vec!["hello", "\u{2581}world"]);
        assert_eq!(segs[1].span(), TokenSpan { start: 5, end: 11 });
    }

    #[test]
    fn test_metaspace_prefix_space() {
        let segs = metaspace_split(&seg("hello world"), true);
        assert_eq!(texts(&segs), vec!["\u{2581}hello", "\u{2581}world"]);
        assert_eq!(segs[0].span(), TokenSpan { start: 0, end: 5 });
    }

    #[test]
    fn test_metaspace_no_marker_whole_string() {
        let segs = metaspace_split(&seg("solo"), false);
        assert_eq!(texts(&segs), vec!["solo"]);
    }

    #[test]
    fn test_sequence_pipes_segments() {
        let def = PreTokenizerDef::Sequence(vec![
            PreTokenizerDef::Whitespace,
            PreTokenizerDef::Punctuation,
        ]);
        let segs = apply(&def, &seg("ab, cd"));
        assert_eq!(texts(&segs), vec!["ab", ",", "cd"]);
    }

    #[test]
    fn test_split_and_unknown_fall_back_to_whitespace() {
        for def in [
            PreTokenizerDef::Split,
            PreTokenizerDef::Unknown("Digits".to_string()),
        ] {
            let segs = apply(&def, &seg("a b"));
            assert_eq!(texts(&segs), vec!["a", "b"]);
        }
    }

    #[test]
    fn test_default_is_whitespace() {
        let norm = NormalizedText::identity("x y");
        let segs = pre_tokenize(None, &norm);
        assert_eq!(texts(&segs), vec!["x", "y"]);
    }

    #[test]
    fn test_spans_in_bounds_property() {
        let inputs = ["", "a", "hello, world!", "  leading", "trailing  ", "日本 語"];
        let defs = [
            PreTokenizerDef::Whitespace,
            PreTokenizerDef::Bert,
            PreTokenizerDef::Punctuation,
            PreTokenizerDef::ByteLevel {
                add_prefix_space: true,
            },
            PreTokenizerDef::Metaspace {
                add_prefix_space: true,
            },
        ];
        for input in inputs {
            for def in &defs {
                for s in apply(def, &seg(input)) {
                    let span = s.span();
                    assert!(span.start <= span.end, "{input:?} {def:?}");
                    assert!(span.end <= input.len(), "{input:?} {def:?}");
                }
            }
        }
    }
}
