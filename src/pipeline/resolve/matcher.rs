//! Fuzzy matching of reconstructed labels against catalog names.
//!
//! Scores are in `[0, 1]`. An exact hit on a display name, id or alias
//! scores 1.0, also after dropping specimen and qualifier words ("Serum",
//! "Total", "Count"). Anything else scores the better of a normalized edit
//! similarity and a token overlap (Dice) score. Names shorter than five
//! characters only ever match exactly, since one edit turns "AST" into "ALT".

use crate::models::MatchConfidence;
use crate::reference::ReferenceCatalog;

/// Words that qualify a test name without identifying it. Sorted.
const QUALIFIER_WORDS: &[&str] = &["blood", "count", "level", "plasma", "serum", "total"];

/// Shorter strings are compared for equality only.
const MIN_FUZZY_LEN: usize = 5;

/// Similarity at which two words count as the same word in the token score.
const TOKEN_MATCH_THRESHOLD: f64 = 0.8;

/// Outcome of matching one label.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogMatch {
    /// `None` when the best score fell below the accept threshold.
    pub test_id: Option<String>,
    /// Best score seen, reported even when unresolved.
    pub score: f64,
    pub confidence: MatchConfidence,
}

impl CatalogMatch {
    pub fn is_resolved(&self) -> bool {
        self.test_id.is_some()
    }
}

struct CatalogName {
    test_index: usize,
    full: String,
    core: String,
}

pub struct TestMatcher<'a> {
    catalog: &'a ReferenceCatalog,
    names: Vec<CatalogName>,
    accept: f64,
    high: f64,
}

impl<'a> TestMatcher<'a> {
    pub fn new(catalog: &'a ReferenceCatalog, accept: f64, high: f64) -> Self {
        let names = catalog
            .tests()
            .iter()
            .enumerate()
            .flat_map(|(test_index, test)| {
                test.match_names().map(move |name| {
                    let full = normalize_name(&name);
                    let core = strip_qualifiers(&full);
                    CatalogName {
                        test_index,
                        full,
                        core,
                    }
                })
            })
            .collect();
        Self {
            catalog,
            names,
            accept,
            high,
        }
    }

    /// Best catalog match for `label`. Earlier catalog entries win ties.
    pub fn best_match(&self, label: &str) -> CatalogMatch {
        let full = normalize_name(label);
        let core = strip_qualifiers(&full);

        let mut best: Option<(usize, f64)> = None;
        if !full.is_empty() {
            for name in &self.names {
                let score = name_score(&full, &core, name);
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((name.test_index, score));
                }
            }
        }

        let Some((index, score)) = best else {
            return CatalogMatch {
                test_id: None,
                score: 0.0,
                confidence: MatchConfidence::Unresolved,
            };
        };

        let confidence = if score >= self.high {
            MatchConfidence::High
        } else if score >= self.accept {
            MatchConfidence::Fuzzy
        } else {
            MatchConfidence::Unresolved
        };
        let test_id = (confidence != MatchConfidence::Unresolved)
            .then(|| self.catalog.tests()[index].id.clone());

        CatalogMatch {
            test_id,
            score,
            confidence,
        }
    }
}

fn name_score(full: &str, core: &str, name: &CatalogName) -> f64 {
    if full == name.full || (!core.is_empty() && core == name.core) {
        return 1.0;
    }
    let (a, b) = if core.is_empty() || name.core.is_empty() {
        (full, name.full.as_str())
    } else {
        (core, name.core.as_str())
    };
    edit_similarity(a, b).max(token_dice(a, b))
}

/// Lowercase, replace punctuation with spaces, collapse runs.
pub fn normalize_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_qualifiers(name: &str) -> String {
    name.split_whitespace()
        .filter(|word| QUALIFIER_WORDS.binary_search(word).is_err())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `1 - distance / longer length`, or exact equality for short strings.
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let longest = a.chars().count().max(b.chars().count());
    if longest < MIN_FUZZY_LEN {
        return 0.0;
    }
    1.0 - edit_distance(a, b) as f64 / longest as f64
}

/// Dice coefficient over words. Near-identical words count as shared,
/// weighted by their similarity.
fn token_dice(a: &str, b: &str) -> f64 {
    let a_words: Vec<&str> = a.split_whitespace().collect();
    let mut b_words: Vec<Option<&str>> = b.split_whitespace().map(Some).collect();
    if a_words.is_empty() || b_words.is_empty() {
        return 0.0;
    }

    let total = a_words.len() + b_words.len();
    let mut shared = 0.0;
    for word in &a_words {
        let hit = b_words.iter().enumerate().find_map(|(i, other)| {
            let similarity = edit_similarity(word, (*other)?);
            (similarity >= TOKEN_MATCH_THRESHOLD).then_some((i, similarity))
        });
        if let Some((i, similarity)) = hit {
            b_words[i] = None;
            shared += similarity;
        }
    }
    2.0 * shared / total as f64
}

/// Levenshtein distance over chars.
fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let n = b_chars.len();

    if a_chars.is_empty() {
        return n;
    }
    if n == 0 {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for (i, &a_ch) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &b_ch) in b_chars.iter().enumerate() {
            let cost = usize::from(a_ch != b_ch);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(catalog: &ReferenceCatalog) -> TestMatcher<'_> {
        TestMatcher::new(catalog, 0.60, 0.90)
    }

    #[test]
    fn exact_display_name_and_alias_are_high() {
        let catalog = ReferenceCatalog::builtin().unwrap();
        let m = matcher(&catalog);

        let hb = m.best_match("Hemoglobin");
        assert_eq!(hb.test_id.as_deref(), Some("hemoglobin"));
        assert_eq!(hb.score, 1.0);
        assert_eq!(hb.confidence, MatchConfidence::High);

        assert_eq!(m.best_match("HGB").test_id.as_deref(), Some("hemoglobin"));
    }

    #[test]
    fn qualifier_words_ignored() {
        let catalog = ReferenceCatalog::builtin().unwrap();
        let m = matcher(&catalog);

        let wbc = m.best_match("WBC Count");
        assert_eq!(wbc.test_id.as_deref(), Some("wbc"));
        assert_eq!(wbc.confidence, MatchConfidence::High);

        assert_eq!(m.best_match("Serum Sodium").test_id.as_deref(), Some("sodium"));
        assert_eq!(m.best_match("Blood Urea").test_id.as_deref(), Some("urea"));
    }

    #[test]
    fn urea_and_urea_nitrogen_stay_apart() {
        let catalog = ReferenceCatalog::builtin().unwrap();
        let m = matcher(&catalog);

        let urea = m.best_match("Blood Urea");
        assert_eq!(urea.test_id.as_deref(), Some("urea"));
        assert_eq!(urea.confidence, MatchConfidence::High);

        assert_eq!(m.best_match("Blood Urea Nitrogen").test_id.as_deref(), Some("bun"));
        assert_eq!(m.best_match("BUN").test_id.as_deref(), Some("bun"));
        assert_eq!(m.best_match("Urea Nitrogen").test_id.as_deref(), Some("bun"));
    }

    #[test]
    fn ocr_misspelling_is_fuzzy_or_better() {
        let catalog = ReferenceCatalog::builtin().unwrap();
        let m = matcher(&catalog);

        let result = m.best_match("Triglycerdes");
        assert_eq!(result.test_id.as_deref(), Some("triglycerides"));
        assert!(result.score < 1.0);

        let result = m.best_match("Potasium");
        assert_eq!(result.test_id.as_deref(), Some("potassium"));
        assert_eq!(result.confidence, MatchConfidence::Fuzzy);

        let result = m.best_match("S. Creatinine");
        assert_eq!(result.test_id.as_deref(), Some("creatinine"));
        assert_eq!(result.confidence, MatchConfidence::Fuzzy);
    }

    #[test]
    fn unknown_label_is_unresolved() {
        let catalog = ReferenceCatalog::builtin().unwrap();
        let result = matcher(&catalog).best_match("Xyzyte Level");
        assert_eq!(result.test_id, None);
        assert_eq!(result.confidence, MatchConfidence::Unresolved);
        assert!(result.score < 0.60);
    }

    #[test]
    fn short_abbreviations_match_only_exactly() {
        let catalog = ReferenceCatalog::builtin().unwrap();
        let result = matcher(&catalog).best_match("AST");
        assert!(!result.is_resolved(), "AST must not resolve to ALT");
    }

    #[test]
    fn thresholds_control_tiers() {
        let catalog = ReferenceCatalog::builtin().unwrap();
        let strict = TestMatcher::new(&catalog, 0.95, 1.0);
        assert!(!strict.best_match("Potasium").is_resolved());
        assert_eq!(
            strict.best_match("Potassium").confidence,
            MatchConfidence::High
        );
    }

    #[test]
    fn empty_label_is_unresolved() {
        let catalog = ReferenceCatalog::builtin().unwrap();
        let result = matcher(&catalog).best_match("--");
        assert_eq!(result.score, 0.0);
        assert!(!result.is_resolved());
    }

    #[test]
    fn edit_similarity_scores() {
        assert_eq!(edit_similarity("glucose", "glucose"), 1.0);
        assert!((edit_similarity("glucose", "glucoze") - (1.0 - 1.0 / 7.0)).abs() < 1e-9);
        assert_eq!(edit_similarity("ast", "alt"), 0.0);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
    }

    #[test]
    fn normalize_name_strips_punctuation() {
        assert_eq!(normalize_name("  S.Creatinine (Serum) "), "s creatinine serum");
        assert_eq!(normalize_name("HbA1c"), "hba1c");
    }

    #[test]
    fn qualifier_words_sorted() {
        for window in QUALIFIER_WORDS.windows(2) {
            assert!(window[0] < window[1]);
        }
    }
}
