//! Normalization stage with source-offset tracking
//!
//! Every transform produces the normalized text together with a byte-level
//! map back into the *original* input: `offsets[i]` is the original byte
//! position that produced normalized byte `i`, with one trailing entry for
//! the end position. Character-level transforms (lowercasing, BERT cleanup)
//! map exactly. Unicode normalization forms map approximately by linear
//! interpolation between input and output lengths, and set the
//! `approximate` flag that eventually surfaces on the encoding.

use unicode_normalization::UnicodeNormalization;

use super::descriptor::NormalizerDef;

/// Normalized text plus the map from its bytes to original byte positions
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedText {
    /// The normalized string
    pub text: String,
    /// `text.len() + 1` entries; `offsets[i]` is the original byte position
    /// for normalized byte `i`, `offsets[len]` the original end
    pub offsets: Vec<usize>,
    /// True when any applied stage maps only approximately
    pub approximate: bool,
}

impl NormalizedText {
    /// Wrap an original string with the identity mapping
    #[must_use]
    pub fn identity(text: &str) -> Self {
        Self {
            text: text.to_string(),
            offsets: (0..=text.len()).collect(),
            approximate: false,
        }
    }
}

/// Accumulates an output string whose bytes each remember the *input* byte
/// position they came from; composing with the input's own offsets yields
/// original positions.
struct OutputMap {
    text: String,
    out_to_in: Vec<usize>,
}

impl OutputMap {
    fn new() -> Self {
        Self {
            text: String::new(),
            out_to_in: Vec::new(),
        }
    }

    fn push_char(&mut self, c: char, in_pos: usize) {
        self.text.push(c);
        for _ in 0..c.len_utf8() {
            self.out_to_in.push(in_pos);
        }
    }

    fn compose(self, input: &NormalizedText, approximate: bool) -> NormalizedText {
        let mut offsets: Vec<usize> = self
            .out_to_in
            .iter()
            .map(|&in_pos| input.offsets[in_pos])
            .collect();
        offsets.push(*input.offsets.last().expect("offsets never empty"));
        NormalizedText {
            text: self.text,
            offsets,
            approximate: input.approximate || approximate,
        }
    }
}

/// BERT whitespace class: ASCII space, tab, newline, carriage return, and
/// the Unicode `Zs` category
pub(crate) fn is_bert_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
        || matches!(
            c,
            '\u{A0}' | '\u{1680}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{3000}'
        )
}

fn is_removable_control(c: char) -> bool {
    if matches!(c, '\t' | '\n' | '\r') {
        return false;
    }
    c.is_control()
}

fn lowercase(input: &NormalizedText) -> NormalizedText {
    let mut out = OutputMap::new();
    for (i, c) in input.text.char_indices() {
        for lc in c.to_lowercase() {
            out.push_char(lc, i);
        }
    }
    out.compose(input, false)
}

fn bert_clean(input: &NormalizedText) -> NormalizedText {
    let mut out = OutputMap::new();
    for (i, c) in input.text.char_indices() {
        if c == '\0' || c == '\u{FFFD}' || is_removable_control(c) {
            continue;
        }
        if is_bert_whitespace(c) {
            out.push_char(' ', i);
        } else {
            out.push_char(c, i);
        }
    }
    out.compose(input, false)
}

/// Unicode normalization with an interpolated offset map
fn unicode_form(input: &NormalizedText, form: &NormalizerDef) -> NormalizedText {
    let text: String = match form {
        NormalizerDef::Nfc => input.text.nfc().collect(),
        NormalizerDef::Nfd => input.text.nfd().collect(),
        NormalizerDef::Nfkc => input.text.nfkc().collect(),
        _ => input.text.nfkd().collect(),
    };

    let in_len = input.text.len();
    let out_len = text.len();
    let mut offsets = Vec::with_capacity(out_len + 1);
    for i in 0..out_len {
        let in_pos = if out_len == 0 { 0 } else { i * in_len / out_len };
        offsets.push(input.offsets[in_pos]);
    }
    offsets.push(*input.offsets.last().expect("offsets never empty"));

    NormalizedText {
        text,
        offsets,
        approximate: true,
    }
}

fn strip_accents(input: &NormalizedText) -> NormalizedText {
    let decomposed = unicode_form(input, &NormalizerDef::Nfd);
    let mut out = OutputMap::new();
    for (i, c) in decomposed.text.char_indices() {
        if !unicode_normalization::char::is_combining_mark(c) {
            out.push_char(c, i);
        }
    }
    out.compose(&decomposed, false)
}

/// Apply one normalizer stage
#[must_use]
pub fn apply(def: &NormalizerDef, input: NormalizedText) -> NormalizedText {
    match def {
        NormalizerDef::Lowercase => lowercase(&input),
        NormalizerDef::Nfc | NormalizerDef::Nfd | NormalizerDef::Nfkc | NormalizerDef::Nfkd => {
            unicode_form(&input, def)
        },
        NormalizerDef::StripAccents => strip_accents(&input),
        NormalizerDef::Bert { lowercase: lc } => {
            let cleaned = bert_clean(&input);
            if *lc {
                lowercase(&cleaned)
            } else {
                cleaned
            }
        },
        NormalizerDef::Sequence(children) => children.iter().fold(input, |acc, n| apply(n, acc)),
        NormalizerDef::Replace | NormalizerDef::Prepend => input,
        NormalizerDef::Unknown(name) => {
            log::debug!("normalizer '{name}' not interpreted, passing text through");
            input
        },
    }
}

/// Run the full normalization stage over an input string
#[must_use]
pub fn normalize(def: Option<&NormalizerDef>, text: &str) -> NormalizedText {
    let identity = NormalizedText::identity(text);
    match def {
        Some(def) => apply(def, identity),
        None => identity,
    }
}
