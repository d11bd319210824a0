use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Highlight, LabFlag, MatchConfidence, RangeSource};

/// A numeric result with the unit it is expressed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub unit: Option<String>,
}

impl Measurement {
    pub fn new(value: f64, unit: Option<String>) -> Self {
        Self { value, unit }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.unit {
            Some(unit) => write!(f, "{} {}", self.value, unit),
            None => write!(f, "{}", self.value),
        }
    }
}

/// Reference range bounds. Either side may be open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl ReferenceRange {
    pub fn between(low: f64, high: f64) -> Self {
        Self {
            low: Some(low),
            high: Some(high),
        }
    }

    pub fn at_least(low: f64) -> Self {
        Self {
            low: Some(low),
            high: None,
        }
    }

    pub fn at_most(high: f64) -> Self {
        Self {
            low: None,
            high: Some(high),
        }
    }

    /// A range with no bound at all cannot classify anything.
    pub fn is_usable(&self) -> bool {
        self.low.is_some() || self.high.is_some()
    }

    /// Bounds are inclusive; a missing bound never flags on its side.
    pub fn classify(&self, value: f64) -> LabFlag {
        if !value.is_finite() || !self.is_usable() {
            return LabFlag::Unknown;
        }
        if let Some(low) = self.low {
            if value < low {
                return LabFlag::Low;
            }
        }
        if let Some(high) = self.high {
            if value > high {
                return LabFlag::High;
            }
        }
        LabFlag::Normal
    }

    /// Express the range in another unit (`factor` multiplies both bounds).
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            low: self.low.map(|v| v * factor),
            high: self.high.map(|v| v * factor),
        }
    }
}

impl fmt::Display for ReferenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.low, self.high) {
            (Some(low), Some(high)) => write!(f, "{low}\u{2013}{high}"),
            (Some(low), None) => write!(f, ">= {low}"),
            (None, Some(high)) => write!(f, "<= {high}"),
            (None, None) => f.write_str("Not available"),
        }
    }
}

/// Flag rule shared by the resolver and the correction overlay.
///
/// `Unknown` whenever the test is unidentified, the value is missing,
/// or no usable range exists.
pub fn compute_flag(
    test_identified: bool,
    value: Option<f64>,
    range: Option<&ReferenceRange>,
) -> LabFlag {
    match (test_identified, value, range) {
        (true, Some(value), Some(range)) => range.classify(value),
        _ => LabFlag::Unknown,
    }
}

/// Non-fatal problems recorded on an entry instead of aborting the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryIssue {
    /// The label matched nothing in the catalog above the accept threshold.
    UnresolvedTest { label: String, best_score: f64 },
    /// The extracted unit has no conversion to the catalog's canonical unit.
    UnitConversionMissing { from: String, to: String },
    /// Range tokens were present but did not parse; catalog range used instead.
    RangeUnparseable { text: String },
}

/// A finalized, resolved lab test record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabEntry {
    pub id: Uuid,
    /// Id of the reconstructed row this entry came from.
    pub row_id: u32,
    pub test_id: Option<String>,
    pub display_name: String,
    /// Label text exactly as reconstructed from the OCR tokens.
    pub raw_label: String,
    pub raw: Measurement,
    /// Value in the catalog's canonical unit. `None` if the test is
    /// unresolved or the unit could not be converted.
    pub normalized: Option<Measurement>,
    pub range: Option<ReferenceRange>,
    pub range_source: RangeSource,
    pub flag: LabFlag,
    pub confidence: MatchConfidence,
    pub match_score: f64,
    pub provenance: BTreeSet<u32>,
    pub issues: Vec<EntryIssue>,
}

impl LabEntry {
    pub fn highlight(&self) -> Highlight {
        self.flag.highlight()
    }

    /// The value a reader should see: normalized when available, raw otherwise.
    pub fn display_value(&self) -> &Measurement {
        self.normalized.as_ref().unwrap_or(&self.raw)
    }

    /// One-line rendering, e.g. `[!] Glucose: 210 mg/dL (Normal: 70–100, Status: High)`.
    pub fn render_line(&self) -> String {
        let tag = match self.highlight() {
            Highlight::Warning => "[!] ",
            Highlight::Normal => "[OK] ",
            Highlight::Unknown => "",
        };
        let range = self
            .range
            .map(|r| r.to_string())
            .unwrap_or_else(|| "Not available".into());
        format!(
            "{tag}{}: {} (Normal: {range}, Status: {})",
            self.display_name,
            self.display_value(),
            self.flag.label()
        )
    }
}

/// Render entries one per line for downstream explanation or display.
pub fn render_lab_lines(entries: &[LabEntry]) -> String {
    if entries.is_empty() {
        return "No lab values were detected.".into();
    }
    entries
        .iter()
        .map(LabEntry::render_line)
        .collect::<Vec<_>>()
        .join("\n")
}
