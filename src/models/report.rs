use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::enums::Sex;
use super::lab::LabEntry;

/// Patient details found in the report header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub name: Option<String>,
    pub age: Option<u32>,
    pub sex: Option<Sex>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VitalSigns {
    pub blood_pressure: Option<String>,
    pub heart_rate: Option<String>,
}

/// Why a candidate row never became an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// No value arrived within the lookahead bound.
    LookaheadExceeded,
    /// A label on a later line opened a new row first.
    SupersededByLabel,
    /// The stream ended before any value arrived.
    EndOfStream,
    /// Every line the row drew from was already claimed by an earlier entry.
    SharedLine,
}

/// A candidate row that was abandoned, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscardedRow {
    pub row_id: u32,
    pub label: String,
    pub lines: BTreeSet<u32>,
    pub reason: DiscardReason,
}

/// Structured reconstruction of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabReport {
    /// Base64 SHA-256 over the ingested line texts.
    pub fingerprint: String,
    pub line_count: usize,
    pub patient: PatientInfo,
    pub vital_signs: VitalSigns,
    pub entries: Vec<LabEntry>,
    pub discarded: Vec<DiscardedRow>,
}

impl LabReport {
    pub fn discard_count(&self) -> usize {
        self.discarded.len()
    }

    pub fn unresolved_count(&self) -> usize {
        self.entries.iter().filter(|e| e.test_id.is_none()).count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
