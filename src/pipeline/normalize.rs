//! Token normalization for OCR lines.
//!
//! Each line is split on whitespace and delimiter runs, look-alike
//! characters are repaired only where the fragment reads as a number, and
//! every fragment is classified. Nothing is dropped: fragments that fit no
//! class stay in the stream as `Noise`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::models::{RawLine, TokenKind};
use crate::units::is_known_unit;

// ═══════════════════════════════════════════════════════════
// Patterns
// ═══════════════════════════════════════════════════════════

/// "12.0 - 16.0", "12.0 – 16.0" and "12.0~16.0" become "12.0-16.0".
static RANGE_DASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d)\s*[-–—~]\s*(\d)").unwrap());

/// "< 200" becomes "<200".
static COMPARATOR_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([<>≤≥]=?)\s+(\d)").unwrap());

/// "x 10 3 / uL" becomes "x10^3/uL".
static POWER_OF_TEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|[\s(])[x×]\s*10\s*\^?\s*(\d{1,2})\s*/\s*").unwrap()
});

static DOUBLE_POINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d)\.{2,}(\d)").unwrap());

static THOUSANDS_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d),(\d{3})\b").unwrap());

static DECIMAL_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d),(\d{1,2})\b").unwrap());

static NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(?:\d+(?:\.\d+)?|\.\d+)$").unwrap());

static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:<=?|>=?|≤|≥)\d+(?:\.\d+)?|\d+(?:\.\d+)?-\d+(?:\.\d+)?|\d+(?:\.\d+)?-)$")
        .unwrap()
});

/// Power-of-ten multiplier printed apart from its unit ("x10^3" then "/uL").
static POWER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:[x×]?10\^\d{1,2}|[x×]10\d{1,2})$").unwrap());

/// Value glued to its unit or flag ("13.2g/dL", "45%", "210H").
static GLUED_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:[.,]\d+)?)([^\d.,].*)$").unwrap());

/// Table furniture that never names a test. Sorted for binary search.
const DESCRIPTOR_WORDS: &[&str] = &[
    "bio",
    "biological",
    "flag",
    "interval",
    "normal",
    "range",
    "ref",
    "reference",
    "result",
    "results",
    "status",
    "test",
    "unit",
    "units",
    "value",
    "values",
];

/// Abnormality markers printed after a value. Sorted for binary search.
const FLAG_MARKERS: &[&str] = &["abn", "h", "hi", "high", "l", "lo", "low", "n"];

// ═══════════════════════════════════════════════════════════
// Token
// ═══════════════════════════════════════════════════════════

/// A classified fragment of one raw line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    /// Fragment exactly as it appeared in the line.
    pub surface: String,
    /// Repaired form used by later stages: case-folded labels, repaired
    /// numbers, canonical comparison signs in ranges.
    pub normalized: String,
    pub kind: TokenKind,
    /// Index of the originating raw line.
    pub line: u32,
}

impl Token {
    fn new(surface: &str, normalized: String, kind: TokenKind, line: u32) -> Self {
        Self {
            surface: surface.to_string(),
            normalized,
            kind,
            line,
        }
    }

    /// Surface form without wrapping punctuation, case preserved.
    pub fn text(&self) -> &str {
        clean(&self.surface)
    }

    pub fn is_noise(&self) -> bool {
        self.kind == TokenKind::Noise
    }
}

// ═══════════════════════════════════════════════════════════
// Normalization
// ═══════════════════════════════════════════════════════════

/// Split and classify one raw line.
pub fn normalize_line(line: &RawLine) -> Vec<Token> {
    let text = repair_line(line.text());
    let mut tokens = Vec::new();
    for fragment in split_fragments(&text) {
        tokens.extend(normalize_fragment(fragment, line.index()));
    }
    apply_line_context(&mut tokens);
    tokens
}

/// Rejoin notation that OCR spaced apart.
fn repair_line(text: &str) -> String {
    let text = RANGE_DASH.replace_all(text, "${1}-${2}");
    let text = COMPARATOR_GAP.replace_all(&text, "${1}${2}");
    POWER_OF_TEN.replace_all(&text, "${1}x10^${2}/").into_owned()
}

/// Split on whitespace, `|`, `;`, `=` and on `:` unless it sits between
/// digits (a time or ratio).
fn split_fragments(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut fragments = Vec::new();
    let mut start: Option<usize> = None;

    for (pos, &(offset, c)) in chars.iter().enumerate() {
        let between_digits = pos > 0
            && chars[pos - 1].1.is_ascii_digit()
            && chars.get(pos + 1).is_some_and(|(_, n)| n.is_ascii_digit());
        let delimiter = c.is_whitespace()
            || matches!(c, '|' | ';' | '=')
            || (c == ':' && !between_digits);

        if delimiter {
            if let Some(s) = start.take() {
                fragments.push(&text[s..offset]);
            }
        } else if start.is_none() {
            start = Some(offset);
        }
    }
    if let Some(s) = start {
        fragments.push(&text[s..]);
    }
    fragments
}

/// A power-of-ten multiplier still waiting for the rest of its unit.
pub fn is_power_prefix(unit: &str) -> bool {
    POWER_PREFIX.is_match(unit)
}

/// Strip wrapping punctuation and a trailing full stop.
fn clean(fragment: &str) -> &str {
    fragment
        .trim_matches(|c: char| {
            matches!(
                c,
                '(' | ')' | '[' | ']' | '{' | '}' | ',' | '"' | '\'' | '*' | ':' | ';'
            )
        })
        .trim_end_matches('.')
}

fn normalize_fragment(fragment: &str, line: u32) -> Vec<Token> {
    let cleaned = clean(fragment);
    if cleaned.is_empty() {
        return vec![Token::new(fragment, String::new(), TokenKind::Noise, line)];
    }

    let repaired = repair_number(cleaned);
    let kind = classify(&repaired);
    if matches!(kind, TokenKind::Numeric | TokenKind::RangeFragment) {
        return vec![Token::new(fragment, canonical_form(&repaired, kind), kind, line)];
    }

    if let Some(split) = split_glued_value(cleaned, line) {
        return split;
    }

    if kind != TokenKind::UnitFragment {
        if let Some(corrected) = correct_confusables(cleaned) {
            let corrected = repair_number(&corrected);
            let corrected_kind = classify(&corrected);
            if matches!(corrected_kind, TokenKind::Numeric | TokenKind::RangeFragment) {
                tracing::trace!(from = cleaned, to = %corrected, "Repaired OCR look-alikes");
                return vec![Token::new(
                    fragment,
                    canonical_form(&corrected, corrected_kind),
                    corrected_kind,
                    line,
                )];
            }
        }
    }

    vec![Token::new(fragment, canonical_form(cleaned, kind), kind, line)]
}

fn canonical_form(fragment: &str, kind: TokenKind) -> String {
    match kind {
        TokenKind::LabelFragment => fragment.to_lowercase(),
        TokenKind::Numeric => fragment.trim_start_matches('+').to_string(),
        TokenKind::RangeFragment => fragment.replace('≤', "<=").replace('≥', ">="),
        TokenKind::UnitFragment | TokenKind::Noise => fragment.to_string(),
    }
}

/// Classify an already cleaned fragment.
fn classify(fragment: &str) -> TokenKind {
    if fragment.is_empty() {
        return TokenKind::Noise;
    }
    if RANGE.is_match(fragment) {
        return TokenKind::RangeFragment;
    }
    if NUMERIC.is_match(fragment) {
        return TokenKind::Numeric;
    }
    if is_known_unit(fragment) || POWER_PREFIX.is_match(fragment) {
        return TokenKind::UnitFragment;
    }
    if !fragment.chars().any(char::is_alphanumeric) {
        return TokenKind::Noise;
    }
    let lower = fragment.to_lowercase();
    if DESCRIPTOR_WORDS.binary_search(&lower.as_str()).is_ok() {
        return TokenKind::Noise;
    }
    if fragment.chars().next().is_some_and(char::is_alphabetic) {
        TokenKind::LabelFragment
    } else {
        TokenKind::Noise
    }
}

/// Collapse doubled decimal points and resolve commas: a comma followed by
/// exactly three digits groups thousands, one or two digits mark a decimal.
fn repair_number(fragment: &str) -> String {
    let mut text = DOUBLE_POINT.replace_all(fragment, "${1}.${2}").into_owned();
    loop {
        let next = THOUSANDS_SEPARATOR.replace_all(&text, "${1}${2}").into_owned();
        if next == text {
            break;
        }
        text = next;
    }
    DECIMAL_COMMA.replace_all(&text, "${1}.${2}").into_owned()
}

fn confusable_digit(c: char) -> Option<char> {
    match c {
        'O' | 'o' => Some('0'),
        'l' | 'I' => Some('1'),
        'S' => Some('5'),
        'B' => Some('8'),
        'Z' => Some('2'),
        _ => None,
    }
}

/// Replace letter look-alikes with digits where the neighbours say the
/// fragment is a number: between two digits, next to a decimal point, or
/// next to a digit in a fragment that has a decimal point. Returns `None`
/// when nothing changed.
fn correct_confusables(fragment: &str) -> Option<String> {
    if !fragment.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let mut chars: Vec<char> = fragment.chars().collect();
    let has_point = chars.contains(&'.');
    let is_digit = |c: Option<char>| c.is_some_and(|c| c.is_ascii_digit());
    let mut changed = false;

    loop {
        let mut pass_changed = false;
        for i in 0..chars.len() {
            let Some(digit) = confusable_digit(chars[i]) else {
                continue;
            };
            let prev = i.checked_sub(1).map(|j| chars[j]);
            let next = chars.get(i + 1).copied();
            let numeric_context = (is_digit(prev) && is_digit(next))
                || prev == Some('.')
                || next == Some('.')
                || (has_point && (is_digit(prev) || is_digit(next)));
            if numeric_context {
                chars[i] = digit;
                pass_changed = true;
            }
        }
        if !pass_changed {
            break;
        }
        changed = true;
    }

    changed.then(|| chars.into_iter().collect())
}

fn split_glued_value(cleaned: &str, line: u32) -> Option<Vec<Token>> {
    let caps = GLUED_VALUE.captures(cleaned)?;
    let number = caps.get(1)?.as_str();
    let rest = caps.get(2)?.as_str();

    let rest_kind = if is_known_unit(rest) {
        TokenKind::UnitFragment
    } else if FLAG_MARKERS.binary_search(&rest.to_lowercase().as_str()).is_ok() {
        TokenKind::Noise
    } else {
        return None;
    };

    let value = repair_number(number);
    if classify(&value) != TokenKind::Numeric {
        return None;
    }
    Some(vec![
        Token::new(number, canonical_form(&value, TokenKind::Numeric), TokenKind::Numeric, line),
        Token::new(rest, rest.to_string(), rest_kind, line),
    ])
}

/// Reclassify labels that directly follow a value: flag markers become
/// noise and short lowercase words become units ("gm%", "cells/hpf").
fn apply_line_context(tokens: &mut [Token]) {
    let significant: Vec<usize> = (0..tokens.len()).filter(|&i| !tokens[i].is_noise()).collect();

    for (pos, &i) in significant.iter().enumerate() {
        if tokens[i].kind != TokenKind::LabelFragment {
            continue;
        }
        let after_value = pos > 0 && tokens[significant[pos - 1]].kind == TokenKind::Numeric;
        if !after_value {
            continue;
        }

        let word = tokens[i].normalized.clone();
        if FLAG_MARKERS.binary_search(&word.as_str()).is_ok() {
            tokens[i].kind = TokenKind::Noise;
            continue;
        }

        let text = tokens[i].text().to_string();
        let lowercase = !text.chars().any(char::is_uppercase);
        let unit_shaped = (text.contains('/') && text.chars().count() <= 12) || text.chars().count() <= 3;
        let before_value = significant
            .get(pos + 1)
            .is_some_and(|&n| tokens[n].kind == TokenKind::Numeric);
        if lowercase && unit_shaped && !before_value {
            tokens[i].kind = TokenKind::UnitFragment;
            tokens[i].normalized = text;
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<Token> {
        normalize_line(&RawLine::new(7, text))
    }

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokens(text).iter().map(|t| t.kind).collect()
    }

    fn normalized(text: &str) -> Vec<String> {
        tokens(text).into_iter().map(|t| t.normalized).collect()
    }

    #[test]
    fn classifies_a_full_row() {
        use TokenKind::*;
        assert_eq!(
            kinds("Hemoglobin 13.2 g/dL (12.0-16.0)"),
            vec![LabelFragment, Numeric, UnitFragment, RangeFragment]
        );
        assert_eq!(
            normalized("Hemoglobin 13.2 g/dL (12.0-16.0)"),
            vec!["hemoglobin", "13.2", "g/dL", "12.0-16.0"]
        );
    }

    #[test]
    fn tokens_carry_line_index() {
        assert!(tokens("WBC Count 7.8").iter().all(|t| t.line == 7));
    }

    #[test]
    fn spaced_range_and_comparator_rejoined() {
        assert_eq!(normalized("4.0 - 11.0"), vec!["4.0-11.0"]);
        assert_eq!(normalized("70 \u{2013} 100"), vec!["70-100"]);
        assert_eq!(normalized("< 200"), vec!["<200"]);
        assert_eq!(normalized("≥ 40"), vec![">=40"]);
        assert_eq!(kinds("12.0-"), vec![TokenKind::RangeFragment]);
    }

    #[test]
    fn spaced_power_of_ten_unit_rejoined() {
        let result = tokens("7.8 x 10 3 / uL");
        assert_eq!(result[1].normalized, "x10^3/uL");
        assert_eq!(result[1].kind, TokenKind::UnitFragment);
    }

    #[test]
    fn letter_lookalikes_repaired_in_numbers() {
        assert_eq!(normalized("1O.5"), vec!["10.5"]);
        assert_eq!(normalized("l3.2"), vec!["13.2"]);
        assert_eq!(normalized("2O0"), vec!["200"]);
        assert_eq!(normalized("O.8"), vec!["0.8"]);
        assert_eq!(kinds("l2.O-l6.O"), vec![TokenKind::RangeFragment]);
        assert_eq!(normalized("l2.O-l6.O"), vec!["12.0-16.0"]);
    }

    #[test]
    fn labels_never_become_numbers() {
        use TokenKind::*;
        assert_eq!(kinds("B12"), vec![LabelFragment]);
        assert_eq!(kinds("SGOT"), vec![LabelFragment]);
        assert_eq!(kinds("Iron"), vec![LabelFragment]);
        assert_eq!(normalized("HbA1c"), vec!["hba1c"]);
    }

    #[test]
    fn comma_repair() {
        assert_eq!(normalized("1,500"), vec!["1500"]);
        assert_eq!(normalized("250,000"), vec!["250000"]);
        assert_eq!(normalized("4,5"), vec!["4.5"]);
        assert_eq!(normalized("13..2"), vec!["13.2"]);
    }

    #[test]
    fn glued_value_and_unit_split() {
        let result = tokens("13.2g/dL");
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].kind, TokenKind::Numeric);
        assert_eq!(result[0].normalized, "13.2");
        assert_eq!(result[1].kind, TokenKind::UnitFragment);
        assert_eq!(result[1].surface, "g/dL");

        assert_eq!(kinds("45%"), vec![TokenKind::Numeric, TokenKind::UnitFragment]);
        assert_eq!(kinds("210H"), vec![TokenKind::Numeric, TokenKind::Noise]);
    }

    #[test]
    fn flag_marker_after_value_is_noise() {
        use TokenKind::*;
        assert_eq!(
            kinds("Glucose 210 H mg/dL"),
            vec![LabelFragment, Numeric, Noise, UnitFragment]
        );
        assert_eq!(kinds("HDL 35 Low"), vec![LabelFragment, Numeric, Noise]);
    }

    #[test]
    fn short_word_after_value_is_unit() {
        use TokenKind::*;
        assert_eq!(kinds("Hb 13.2 gm%"), vec![LabelFragment, Numeric, UnitFragment]);
        assert_eq!(kinds("Pus cells 2 cells/hpf"), vec![LabelFragment, LabelFragment, Numeric, UnitFragment]);
        // A capitalized word after a value starts the next test.
        assert_eq!(kinds("Sodium 140 Urea 30"), vec![LabelFragment, Numeric, LabelFragment, Numeric]);
    }

    #[test]
    fn punctuation_and_furniture_kept_as_noise() {
        use TokenKind::*;
        let result = tokens("---- Test Result Unit Reference Range ----");
        assert!(result.iter().all(|t| t.kind == Noise));
        assert_eq!(result.len(), 7);
        assert_eq!(result[0].surface, "----");
    }

    #[test]
    fn delimiters_split_fragments() {
        assert_eq!(normalized("Glucose: 95 | mg/dL"), vec!["glucose", "95", "mg/dL"]);
        assert_eq!(normalized("Time 10:30"), vec!["time", "10:30"]);
        assert_eq!(kinds("10:30"), vec![TokenKind::Noise]);
    }

    #[test]
    fn empty_line_has_no_tokens() {
        assert!(tokens("").is_empty());
        assert!(tokens("   ").is_empty());
    }

    #[test]
    fn text_keeps_case() {
        let result = tokens("(WBC)");
        assert_eq!(result[0].text(), "WBC");
        assert_eq!(result[0].normalized, "wbc");
    }

    #[test]
    fn sorted_word_lists() {
        for list in [DESCRIPTOR_WORDS, FLAG_MARKERS] {
            for window in list.windows(2) {
                assert!(window[0] < window[1], "{:?} >= {:?}", window[0], window[1]);
            }
        }
    }
}
