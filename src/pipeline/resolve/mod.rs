//! Value resolution: reconstructed rows become lab entries.
//!
//! Each row's label is matched against the reference catalog, its value is
//! converted to the canonical unit, and a reference range is chosen: the
//! row's own printed range when it parses, else the catalog's range for
//! the demographic, else none. Failures degrade the entry (confidence,
//! flag, recorded issues) and never drop it.

pub mod matcher;

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::models::{
    compute_flag, EntryIssue, LabEntry, LabFlag, MatchConfidence, Measurement, RangeSource,
    ReferenceRange,
};
use crate::pipeline::reconstruct::ReconstructedRow;
use crate::pipeline_config::PipelineConfig;
use crate::reference::{CatalogTest, Demographic, ReferenceCatalog};

pub use matcher::{CatalogMatch, TestMatcher};

static BOUNDED_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)-(\d+(?:\.\d+)?)$").unwrap());

static UPPER_BOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<=?(\d+(?:\.\d+)?)$").unwrap());

static LOWER_BOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^>=?(\d+(?:\.\d+)?)$").unwrap());

/// Parse a joined range such as "12.0-16.0", "<200" or ">=40".
pub fn parse_range(text: &str) -> Option<ReferenceRange> {
    if let Some(caps) = BOUNDED_RANGE.captures(text) {
        let low: f64 = caps[1].parse().ok()?;
        let high: f64 = caps[2].parse().ok()?;
        return (low <= high).then(|| ReferenceRange::between(low, high));
    }
    if let Some(caps) = UPPER_BOUND.captures(text) {
        return caps[1].parse().ok().map(ReferenceRange::at_most);
    }
    if let Some(caps) = LOWER_BOUND.captures(text) {
        return caps[1].parse().ok().map(ReferenceRange::at_least);
    }
    None
}

/// Multiply by a conversion factor, rounding away float noise.
pub fn convert(value: f64, factor: f64) -> f64 {
    if factor == 1.0 {
        value
    } else {
        (value * factor * 10_000.0).round() / 10_000.0
    }
}

/// Stable entry id: the same document and row always get the same id.
pub fn entry_id(document: &str, row: &ReconstructedRow) -> Uuid {
    let key = format!("{document}:{}:{:?}", row.row_id, row.lines);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

pub struct ValueResolver<'a> {
    catalog: &'a ReferenceCatalog,
    matcher: TestMatcher<'a>,
    demographic: Demographic,
}

impl<'a> ValueResolver<'a> {
    pub fn new(catalog: &'a ReferenceCatalog, config: &PipelineConfig, demographic: Demographic) -> Self {
        Self {
            catalog,
            matcher: TestMatcher::new(catalog, config.match_accept, config.match_high),
            demographic,
        }
    }

    /// Resolve one finalized row. `document` scopes the entry id.
    pub fn resolve(&self, row: &ReconstructedRow, document: &str) -> LabEntry {
        let label = row.label_text();
        let found = self.matcher.best_match(&label);
        let test = found.test_id.as_deref().and_then(|id| self.catalog.get(id));

        let entry = match test {
            Some(test) => self.resolve_matched(row, &label, &found, test, document),
            None => resolve_unmatched(row, &label, &found, document),
        };

        tracing::debug!(
            row = row.row_id,
            test = entry.test_id.as_deref().unwrap_or("-"),
            score = found.score,
            flag = %entry.flag,
            confidence = %entry.confidence,
            "Resolved row"
        );
        entry
    }

    pub fn resolve_all(&self, rows: &[ReconstructedRow], document: &str) -> Vec<LabEntry> {
        rows.iter().map(|row| self.resolve(row, document)).collect()
    }

    fn resolve_matched(
        &self,
        row: &ReconstructedRow,
        label: &str,
        found: &CatalogMatch,
        test: &CatalogTest,
        document: &str,
    ) -> LabEntry {
        let mut issues = Vec::new();
        let mut confidence = found.confidence;
        let raw_unit = row.unit_text();

        // A row without a unit is read in the canonical unit.
        let factor = match raw_unit.as_deref() {
            Some(unit) => test.conversion_factor(unit),
            None => Some(1.0),
        };
        if factor.is_none() {
            tracing::warn!(
                test = %test.id,
                unit = raw_unit.as_deref().unwrap_or(""),
                canonical = %test.canonical_unit,
                "No unit conversion, flag left unknown"
            );
            issues.push(EntryIssue::UnitConversionMissing {
                from: raw_unit.clone().unwrap_or_default(),
                to: test.canonical_unit.clone(),
            });
            confidence = confidence.downgraded();
        }
        let normalized = factor.map(|f| {
            Measurement::new(convert(row.value, f), Some(test.canonical_unit.clone()))
        });

        let catalog_range = || match test.range_for(&self.demographic) {
            Some(range) => (Some(range), RangeSource::Catalog),
            None => (None, RangeSource::Unavailable),
        };
        let (range, range_source) = match row.range_text() {
            Some(text) => match parse_range(&text) {
                Some(extracted) => {
                    let range = match factor {
                        Some(f) if f != 1.0 => extracted.scaled(f),
                        _ => extracted,
                    };
                    (Some(range), RangeSource::Extracted)
                }
                None => {
                    issues.push(EntryIssue::RangeUnparseable { text });
                    catalog_range()
                }
            },
            None => catalog_range(),
        };

        let flag = match &normalized {
            Some(measurement) => compute_flag(true, Some(measurement.value), range.as_ref()),
            None => LabFlag::Unknown,
        };

        LabEntry {
            id: entry_id(document, row),
            row_id: row.row_id,
            test_id: Some(test.id.clone()),
            display_name: test.display_name.clone(),
            raw_label: label.to_string(),
            raw: Measurement::new(row.value, raw_unit),
            normalized,
            range,
            range_source,
            flag,
            confidence,
            match_score: found.score,
            provenance: row.lines.clone(),
            issues,
        }
    }
}

/// An unmatched label still yields an entry, with no canonical value or flag.
fn resolve_unmatched(
    row: &ReconstructedRow,
    label: &str,
    found: &CatalogMatch,
    document: &str,
) -> LabEntry {
    let mut issues = vec![EntryIssue::UnresolvedTest {
        label: label.to_string(),
        best_score: found.score,
    }];

    let range = match row.range_text() {
        Some(text) => {
            let parsed = parse_range(&text);
            if parsed.is_none() {
                issues.push(EntryIssue::RangeUnparseable { text });
            }
            parsed
        }
        None => None,
    };

    LabEntry {
        id: entry_id(document, row),
        row_id: row.row_id,
        test_id: None,
        display_name: label.to_string(),
        raw_label: label.to_string(),
        raw: Measurement::new(row.value, row.unit_text()),
        normalized: None,
        range,
        range_source: if range.is_some() {
            RangeSource::Extracted
        } else {
            RangeSource::Unavailable
        },
        flag: LabFlag::Unknown,
        confidence: MatchConfidence::Unresolved,
        match_score: found.score,
        provenance: row.lines.clone(),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::models::Sex;

    fn row(label: &str, value: f64, unit: Option<&str>, range: Option<&str>) -> ReconstructedRow {
        ReconstructedRow {
            row_id: 0,
            label: label.split_whitespace().map(String::from).collect(),
            value,
            unit: unit.into_iter().map(String::from).collect(),
            range: range.into_iter().map(String::from).collect(),
            lines: BTreeSet::from([0]),
        }
    }

    fn resolve(row: &ReconstructedRow, demographic: Demographic) -> LabEntry {
        let catalog = ReferenceCatalog::builtin().unwrap();
        let resolver = ValueResolver::new(&catalog, &PipelineConfig::default(), demographic);
        resolver.resolve(row, "doc")
    }

    #[test]
    fn extracted_range_takes_precedence() {
        let entry = resolve(
            &row("Hemoglobin", 13.2, Some("g/dL"), Some("12.0-16.0")),
            Demographic::default(),
        );
        assert_eq!(entry.test_id.as_deref(), Some("hemoglobin"));
        assert_eq!(entry.normalized, Some(Measurement::new(13.2, Some("g/dL".into()))));
        assert_eq!(entry.range, Some(ReferenceRange::between(12.0, 16.0)));
        assert_eq!(entry.range_source, RangeSource::Extracted);
        assert_eq!(entry.flag, LabFlag::Normal);
        assert_eq!(entry.confidence, MatchConfidence::High);
        assert!(entry.issues.is_empty());
    }

    #[test]
    fn catalog_range_used_when_row_has_none() {
        let entry = resolve(&row("Glucose", 210.0, Some("mg/dL"), None), Demographic::default());
        assert_eq!(entry.range, Some(ReferenceRange::between(70.0, 100.0)));
        assert_eq!(entry.range_source, RangeSource::Catalog);
        assert_eq!(entry.flag, LabFlag::High);
        assert_eq!(entry.confidence, MatchConfidence::High);
    }

    #[test]
    fn demographic_selects_catalog_range() {
        let female = Demographic {
            age: Some(35),
            sex: Some(Sex::Female),
        };
        let entry = resolve(&row("Hemoglobin", 15.8, Some("g/dL"), None), female);
        assert_eq!(entry.range, Some(ReferenceRange::between(12.0, 15.5)));
        assert_eq!(entry.flag, LabFlag::High);

        let entry = resolve(&row("Hemoglobin", 15.8, Some("g/dL"), None), Demographic::default());
        assert_eq!(entry.flag, LabFlag::Normal);
    }

    #[test]
    fn blood_urea_uses_urea_range() {
        let entry = resolve(&row("Blood Urea", 30.0, Some("mg/dL"), None), Demographic::default());
        assert_eq!(entry.test_id.as_deref(), Some("urea"));
        assert_eq!(entry.display_name, "Urea");
        assert_eq!(entry.range, Some(ReferenceRange::between(15.0, 40.0)));
        assert_eq!(entry.flag, LabFlag::Normal);

        let bun = resolve(&row("BUN", 30.0, Some("mg/dL"), None), Demographic::default());
        assert_eq!(bun.test_id.as_deref(), Some("bun"));
        assert_eq!(bun.flag, LabFlag::High);
    }

    #[test]
    fn converts_to_canonical_unit() {
        let entry = resolve(&row("Glucose", 5.0, Some("mmol/L"), None), Demographic::default());
        let normalized = entry.normalized.unwrap();
        assert!((normalized.value - 90.08).abs() < 1e-9);
        assert_eq!(normalized.unit.as_deref(), Some("mg/dL"));
        assert_eq!(entry.raw, Measurement::new(5.0, Some("mmol/L".into())));
        assert_eq!(entry.flag, LabFlag::Normal);
    }

    #[test]
    fn extracted_range_scaled_with_value() {
        let entry = resolve(
            &row("Glucose", 5.0, Some("mmol/L"), Some("3.9-5.5")),
            Demographic::default(),
        );
        let range = entry.range.unwrap();
        assert!((range.low.unwrap() - 3.9 * 18.016).abs() < 1e-9);
        assert_eq!(entry.flag, LabFlag::Normal);
    }

    #[test]
    fn missing_conversion_fails_closed() {
        let entry = resolve(&row("Glucose", 5.0, Some("g/L"), None), Demographic::default());
        assert_eq!(entry.normalized, None);
        assert_eq!(entry.flag, LabFlag::Unknown);
        assert_eq!(entry.confidence, MatchConfidence::Fuzzy);
        assert!(matches!(
            entry.issues.as_slice(),
            [EntryIssue::UnitConversionMissing { from, to }] if from == "g/L" && to == "mg/dL"
        ));
    }

    #[test]
    fn missing_unit_assumes_canonical() {
        let entry = resolve(&row("Glucose", 210.0, None, None), Demographic::default());
        assert_eq!(entry.normalized.unwrap().unit.as_deref(), Some("mg/dL"));
        assert_eq!(entry.raw.unit, None);
        assert_eq!(entry.flag, LabFlag::High);
    }

    #[test]
    fn unresolved_label_still_produces_entry() {
        let entry = resolve(&row("Xyzyte Level", 5.0, Some("mg/dL"), None), Demographic::default());
        assert_eq!(entry.test_id, None);
        assert_eq!(entry.confidence, MatchConfidence::Unresolved);
        assert_eq!(entry.flag, LabFlag::Unknown);
        assert_eq!(entry.display_name, "Xyzyte Level");
        assert_eq!(entry.normalized, None);
        assert!(matches!(entry.issues[0], EntryIssue::UnresolvedTest { .. }));
    }

    #[test]
    fn unparseable_range_falls_back_to_catalog() {
        let entry = resolve(
            &row("Glucose", 95.0, Some("mg/dL"), Some("70-")),
            Demographic::default(),
        );
        assert_eq!(entry.range_source, RangeSource::Catalog);
        assert_eq!(entry.flag, LabFlag::Normal);
        assert!(matches!(entry.issues[0], EntryIssue::RangeUnparseable { ref text } if text == "70-"));
    }

    #[test]
    fn open_ended_printed_range() {
        let entry = resolve(
            &row("Total Cholesterol", 180.0, Some("mg/dL"), Some("<200")),
            Demographic::default(),
        );
        assert_eq!(entry.range, Some(ReferenceRange::at_most(200.0)));
        assert_eq!(entry.flag, LabFlag::Normal);
    }

    #[test]
    fn entry_ids_are_stable_per_document() {
        let r = row("Glucose", 95.0, None, None);
        assert_eq!(entry_id("doc", &r), entry_id("doc", &r));
        assert_ne!(entry_id("doc", &r), entry_id("other", &r));
    }

    #[test]
    fn parse_range_forms() {
        assert_eq!(parse_range("4.0-11.0"), Some(ReferenceRange::between(4.0, 11.0)));
        assert_eq!(parse_range("<=5"), Some(ReferenceRange::at_most(5.0)));
        assert_eq!(parse_range(">40"), Some(ReferenceRange::at_least(40.0)));
        assert_eq!(parse_range("16-12"), None);
        assert_eq!(parse_range("12-16<200"), None);
    }
}
