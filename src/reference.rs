//! Reference catalog of lab tests.
//!
//! Maps canonical test ids to display names, aliases, the canonical unit,
//! unit conversions and demographic-keyed reference ranges. Loaded once and
//! shared read-only between documents.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;
use crate::models::{ReferenceRange, Sex};
use crate::units::unit_key;

const BUILTIN_CATALOG: &str = include_str!("../resources/lab_catalog.json");

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read reference catalog {0}: {1}")]
    ReferenceDataLoad(String, String),

    #[error("Failed to parse reference catalog {0}: {1}")]
    ReferenceDataParse(String, String),

    #[error("Invalid reference catalog: {0}")]
    Invalid(String),
}

/// Demographic category used to pick a reference range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demographic {
    pub age: Option<u32>,
    pub sex: Option<Sex>,
}

impl Demographic {
    /// Fill fields left unset here from `fallback`.
    pub fn or(self, fallback: Demographic) -> Demographic {
        Demographic {
            age: self.age.or(fallback.age),
            sex: self.sex.or(fallback.sex),
        }
    }
}

/// Multiply a value in `from_unit` by `factor` to get the canonical unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConversion {
    pub from_unit: String,
    pub factor: f64,
}

/// A reference range restricted to a demographic slice. Unset criteria match anyone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemographicRange {
    #[serde(default)]
    pub sex: Option<Sex>,
    #[serde(default)]
    pub min_age: Option<u32>,
    #[serde(default)]
    pub max_age: Option<u32>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
}

impl DemographicRange {
    /// Specificity of the match (number of criteria satisfied), or `None`
    /// when a stated criterion excludes this demographic.
    fn specificity(&self, demographic: &Demographic) -> Option<u8> {
        let mut score = 0;
        if let Some(sex) = self.sex {
            if demographic.sex != Some(sex) {
                return None;
            }
            score += 1;
        }
        if self.min_age.is_some() || self.max_age.is_some() {
            let age = demographic.age?;
            if self.min_age.is_some_and(|min| age < min) || self.max_age.is_some_and(|max| age > max) {
                return None;
            }
            score += 1;
        }
        Some(score)
    }

    pub fn range(&self) -> ReferenceRange {
        ReferenceRange {
            low: self.low,
            high: self.high,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogTest {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub canonical_unit: String,
    /// Other spellings that denote exactly the canonical unit.
    #[serde(default)]
    pub unit_aliases: Vec<String>,
    #[serde(default)]
    pub conversions: Vec<UnitConversion>,
    #[serde(default)]
    pub ranges: Vec<DemographicRange>,
}

impl CatalogTest {
    /// Names the matcher compares labels against: display name, id, aliases.
    pub fn match_names(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(self.display_name.clone())
            .chain(std::iter::once(self.id.replace('_', " ")))
            .chain(self.aliases.iter().cloned())
    }

    /// Factor converting `unit` to the canonical unit, 1.0 when already canonical.
    pub fn conversion_factor(&self, unit: &str) -> Option<f64> {
        let key = unit_key(unit);
        if key == unit_key(&self.canonical_unit)
            || self.unit_aliases.iter().any(|a| unit_key(a) == key)
        {
            return Some(1.0);
        }
        self.conversions
            .iter()
            .find(|c| unit_key(&c.from_unit) == key)
            .map(|c| c.factor)
    }

    /// Most specific range for `demographic`; declaration order breaks ties.
    pub fn range_for(&self, demographic: &Demographic) -> Option<ReferenceRange> {
        let mut best: Option<(u8, &DemographicRange)> = None;
        for candidate in &self.ranges {
            if let Some(score) = candidate.specificity(demographic) {
                if best.map_or(true, |(s, _)| score > s) {
                    best = Some((score, candidate));
                }
            }
        }
        best.map(|(_, r)| r.range())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    tests: Vec<CatalogTest>,
}

/// Read-only lookup of lab tests by canonical id.
#[derive(Debug, Clone)]
pub struct ReferenceCatalog {
    tests: Vec<CatalogTest>,
    index: HashMap<String, usize>,
}

impl ReferenceCatalog {
    /// Build and validate a catalog from test definitions.
    pub fn new(tests: Vec<CatalogTest>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(tests.len());
        for (i, test) in tests.iter().enumerate() {
            validate_test(test)?;
            if index.insert(test.id.clone(), i).is_some() {
                return Err(CatalogError::Invalid(format!("duplicate test id '{}'", test.id)));
            }
        }
        Ok(Self { tests, index })
    }

    /// The catalog bundled with the crate.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json("lab_catalog.json", BUILTIN_CATALOG)
    }

    pub fn from_json(source: &str, json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)
            .map_err(|e| CatalogError::ReferenceDataParse(source.into(), e.to_string()))?;
        Self::new(file.tests)
    }

    /// Load a catalog from a JSON file on disk.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CatalogError::ReferenceDataLoad(path.display().to_string(), e.to_string())
        })?;
        let catalog = Self::from_json(&path.display().to_string(), &json)?;
        tracing::info!(path = %path.display(), tests = catalog.len(), "Loaded reference catalog");
        Ok(catalog)
    }

    /// The user's override catalog when one exists, otherwise the bundled one.
    pub fn load_default() -> Result<Self, CatalogError> {
        match config::catalog_override_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Self::builtin(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&CatalogTest> {
        self.index.get(id).map(|&i| &self.tests[i])
    }

    pub fn tests(&self) -> &[CatalogTest] {
        &self.tests
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn range_for(&self, id: &str, demographic: &Demographic) -> Option<ReferenceRange> {
        self.get(id)?.range_for(demographic)
    }
}

fn validate_test(test: &CatalogTest) -> Result<(), CatalogError> {
    let invalid = |msg: &str| CatalogError::Invalid(format!("test '{}': {msg}", test.id));

    if test.id.trim().is_empty() {
        return Err(CatalogError::Invalid("test with empty id".into()));
    }
    if test.display_name.trim().is_empty() {
        return Err(invalid("empty display name"));
    }
    if test.canonical_unit.trim().is_empty() {
        return Err(invalid("empty canonical unit"));
    }
    for conversion in &test.conversions {
        if !conversion.factor.is_finite() || conversion.factor <= 0.0 {
            return Err(invalid(&format!(
                "conversion from '{}' has non-positive factor",
                conversion.from_unit
            )));
        }
    }
    for range in &test.ranges {
        if range.low.is_none() && range.high.is_none() {
            return Err(invalid("range without bounds"));
        }
        if let (Some(low), Some(high)) = (range.low, range.high) {
            if low > high {
                return Err(invalid(&format!("range low {low} above high {high}")));
            }
        }
        if let (Some(min), Some(max)) = (range.min_age, range.max_age) {
            if min > max {
                return Err(invalid("min_age above max_age"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ReferenceCatalog {
        ReferenceCatalog::builtin().unwrap()
    }

    #[test]
    fn builtin_catalog_loads() {
        let catalog = catalog();
        assert!(!catalog.is_empty());
        assert!(catalog.get("hemoglobin").is_some());
        assert!(catalog.get("glucose").is_some());
        assert!(catalog.get("nonexistent").is_none());
    }

    #[test]
    fn glucose_generic_range() {
        let range = catalog()
            .range_for("glucose", &Demographic::default())
            .unwrap();
        assert_eq!(range, ReferenceRange::between(70.0, 100.0));
    }

    #[test]
    fn sex_specific_range_preferred() {
        let catalog = catalog();
        let male = Demographic {
            age: Some(40),
            sex: Some(Sex::Male),
        };
        let female = Demographic {
            age: Some(40),
            sex: Some(Sex::Female),
        };
        let hb_male = catalog.range_for("hemoglobin", &male).unwrap();
        let hb_female = catalog.range_for("hemoglobin", &female).unwrap();
        let hb_any = catalog.range_for("hemoglobin", &Demographic::default()).unwrap();
        assert_eq!(hb_male, ReferenceRange::between(13.0, 17.0));
        assert_eq!(hb_female, ReferenceRange::between(12.0, 15.5));
        assert_eq!(hb_any, ReferenceRange::between(12.0, 16.0));
    }

    #[test]
    fn age_band_range_selected_for_children() {
        let child = Demographic {
            age: Some(8),
            sex: Some(Sex::Male),
        };
        let range = catalog().range_for("hemoglobin", &child).unwrap();
        assert_eq!(range, ReferenceRange::between(11.5, 15.5));
    }

    #[test]
    fn conversion_factor_lookup() {
        let catalog = catalog();
        let glucose = catalog.get("glucose").unwrap();
        assert_eq!(glucose.conversion_factor("mg/dL"), Some(1.0));
        assert_eq!(glucose.conversion_factor("MG/DL"), Some(1.0));
        assert!((glucose.conversion_factor("mmol/L").unwrap() - 18.016).abs() < 1e-9);
        assert_eq!(glucose.conversion_factor("g/dL"), None);

        let wbc = catalog.get("wbc").unwrap();
        assert_eq!(wbc.conversion_factor("x10^9/L"), Some(1.0));
        assert_eq!(wbc.conversion_factor("cells/cumm"), Some(0.001));
    }

    #[test]
    fn demographic_or_fills_missing_fields() {
        let configured = Demographic {
            age: None,
            sex: Some(Sex::Female),
        };
        let header = Demographic {
            age: Some(52),
            sex: Some(Sex::Male),
        };
        let merged = configured.or(header);
        assert_eq!(merged.age, Some(52));
        assert_eq!(merged.sex, Some(Sex::Female));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let json = r#"{"tests": [
            {"id": "k", "display_name": "Potassium", "canonical_unit": "mmol/L"},
            {"id": "k", "display_name": "Potassium", "canonical_unit": "mmol/L"}
        ]}"#;
        let err = ReferenceCatalog::from_json("test", json).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_range() {
        let json = r#"{"tests": [
            {"id": "k", "display_name": "Potassium", "canonical_unit": "mmol/L",
             "ranges": [{"low": 5.1, "high": 3.5}]}
        ]}"#;
        assert!(ReferenceCatalog::from_json("test", json).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = ReferenceCatalog::from_json("broken.json", "{ tests: ").unwrap_err();
        assert!(matches!(err, CatalogError::ReferenceDataParse(ref src, _) if src == "broken.json"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"tests": [{"id": "sodium", "display_name": "Sodium",
                "aliases": ["na"], "canonical_unit": "mmol/L",
                "ranges": [{"low": 135, "high": 145}]}]}"#,
        )
        .unwrap();

        let catalog = ReferenceCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(
            catalog.range_for("sodium", &Demographic::default()),
            Some(ReferenceRange::between(135.0, 145.0))
        );
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = ReferenceCatalog::load(Path::new("/nonexistent/catalog.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/catalog.json"));
    }

    #[test]
    fn every_builtin_test_has_a_generic_range() {
        let catalog = catalog();
        for test in catalog.tests() {
            assert!(
                test.range_for(&Demographic::default()).is_some(),
                "{} lacks a range usable without demographics",
                test.id
            );
        }
    }
}
