//! Correction overlay: user edits layered over resolved lab entries.
//!
//! Original entries are never modified. Each accepted edit is stored as a
//! new `CorrectedEntry` carrying the cumulative overrides for that entry and
//! the next revision number; readers combine the original with the latest
//! correction. Edits are revision-checked so that a client working from an
//! outdated view cannot overwrite newer input.
//!
//! A corrected value or unit goes through the same catalog conversion as
//! extraction. When the unit cannot be converted the entry has no
//! normalized value and its flag is `Unknown`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    compute_flag, render_lab_lines, EntryIssue, LabEntry, LabFlag, LabReport, Measurement, ReferenceRange,
};
use crate::pipeline::resolve::convert;
use crate::reference::ReferenceCatalog;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReviewError {
    #[error("Entry {entry_id} is at revision {current}, edit based on revision {submitted} rejected")]
    StaleRevisionRejected {
        entry_id: Uuid,
        submitted: u32,
        current: u32,
    },

    #[error("Unknown entry: {0}")]
    UnknownEntry(Uuid),

    #[error("Invalid override: {0}")]
    InvalidOverride(String),

    #[error("Correction store lock poisoned")]
    LockPoisoned,
}

impl ReviewError {
    /// Stale edits can be retried after re-reading the entry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleRevisionRejected { .. })
    }
}

/// Field values a user supplied for one entry. Unset fields keep the
/// underlying value. A value given without a unit is read in the unit the
/// entry is displayed in; a unit given without a value relabels the raw
/// reading. A range is read in the test's canonical unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldOverrides {
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub range: Option<ReferenceRange>,
    pub flag: Option<LabFlag>,
}

impl FieldOverrides {
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.unit.is_none() && self.range.is_none() && self.flag.is_none()
    }

    /// Whether any field the flag is derived from is overridden.
    pub fn touches_measurement(&self) -> bool {
        self.value.is_some() || self.unit.is_some() || self.range.is_some()
    }

    fn validate(&self) -> Result<(), ReviewError> {
        if self.is_empty() {
            return Err(ReviewError::InvalidOverride("no fields to change".into()));
        }
        if self.value.is_some_and(|v| !v.is_finite()) {
            return Err(ReviewError::InvalidOverride("value must be a finite number".into()));
        }
        if self.unit.as_ref().is_some_and(|u| u.trim().is_empty()) {
            return Err(ReviewError::InvalidOverride("unit must not be empty".into()));
        }
        if let Some(range) = &self.range {
            if !range.is_usable() {
                return Err(ReviewError::InvalidOverride("range needs at least one bound".into()));
            }
            if let (Some(low), Some(high)) = (range.low, range.high) {
                if low > high {
                    return Err(ReviewError::InvalidOverride(format!(
                        "range low {low} above high {high}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Layer `self` over an earlier set of overrides. A new value, unit or
    /// range without an explicit flag drops an earlier flag override so
    /// the flag is recomputed.
    fn merged_over(self, previous: &FieldOverrides) -> FieldOverrides {
        let flag = match self.flag {
            Some(flag) => Some(flag),
            None if self.touches_measurement() => None,
            None => previous.flag,
        };
        FieldOverrides {
            value: self.value.or(previous.value),
            unit: self.unit.or_else(|| previous.unit.clone()),
            range: self.range.or(previous.range),
            flag,
        }
    }
}

/// One accepted edit. `overrides` is cumulative across revisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedEntry {
    pub entry_id: Uuid,
    pub overrides: FieldOverrides,
    pub revision: u32,
    pub edited_at: NaiveDateTime,
}

/// An entry as readers should see it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveEntry {
    pub entry: LabEntry,
    /// 0 when the entry was never corrected.
    pub revision: u32,
    pub corrected: bool,
}

// ---------------------------------------------------------------------------
// CorrectionOverlay
// ---------------------------------------------------------------------------

/// Per-document store of user corrections. Each document session owns its
/// own overlay; it is safe to share between threads.
pub struct CorrectionOverlay {
    catalog: Arc<ReferenceCatalog>,
    originals: Vec<LabEntry>,
    index: HashMap<Uuid, usize>,
    corrections: Mutex<HashMap<Uuid, Vec<CorrectedEntry>>>,
}

impl CorrectionOverlay {
    pub fn new(entries: Vec<LabEntry>, catalog: Arc<ReferenceCatalog>) -> Self {
        let index = entries.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
        Self {
            catalog,
            originals: entries,
            index,
            corrections: Mutex::new(HashMap::new()),
        }
    }

    /// `catalog` must be the one the report was resolved against.
    pub fn from_report(report: &LabReport, catalog: Arc<ReferenceCatalog>) -> Self {
        Self::new(report.entries.clone(), catalog)
    }

    /// The entry exactly as extracted.
    pub fn original(&self, entry_id: Uuid) -> Option<&LabEntry> {
        self.index.get(&entry_id).map(|&i| &self.originals[i])
    }

    pub fn current_revision(&self, entry_id: Uuid) -> Result<u32, ReviewError> {
        self.require(entry_id)?;
        let corrections = self.corrections.lock().map_err(|_| ReviewError::LockPoisoned)?;
        Ok(latest_revision(&corrections, entry_id))
    }

    /// Record an edit made against `expected_revision` (0 for an entry not
    /// yet corrected). Rejected when another edit landed first.
    pub fn apply(
        &self,
        entry_id: Uuid,
        expected_revision: u32,
        overrides: FieldOverrides,
    ) -> Result<CorrectedEntry, ReviewError> {
        self.require(entry_id)?;
        overrides.validate()?;

        let mut corrections = self.corrections.lock().map_err(|_| ReviewError::LockPoisoned)?;
        let current = latest_revision(&corrections, entry_id);
        if expected_revision != current {
            tracing::warn!(
                entry_id = %entry_id,
                submitted = expected_revision,
                current,
                "Rejected edit against stale revision"
            );
            return Err(ReviewError::StaleRevisionRejected {
                entry_id,
                submitted: expected_revision,
                current,
            });
        }

        let history = corrections.entry(entry_id).or_default();
        let merged = match history.last() {
            Some(previous) => overrides.merged_over(&previous.overrides),
            None => overrides,
        };
        let corrected = CorrectedEntry {
            entry_id,
            overrides: merged,
            revision: current + 1,
            edited_at: chrono::Local::now().naive_local(),
        };
        history.push(corrected.clone());

        tracing::info!(entry_id = %entry_id, revision = corrected.revision, "Correction applied");
        Ok(corrected)
    }

    /// The original entry with the latest overrides applied.
    pub fn resolve(&self, entry_id: Uuid) -> Result<EffectiveEntry, ReviewError> {
        let original = self.require(entry_id)?;
        let corrections = self.corrections.lock().map_err(|_| ReviewError::LockPoisoned)?;
        let latest = corrections.get(&entry_id).and_then(|h| h.last());
        Ok(effective(&self.catalog, original, latest))
    }

    /// Every entry in extraction order, corrections applied.
    pub fn effective_entries(&self) -> Result<Vec<EffectiveEntry>, ReviewError> {
        let corrections = self.corrections.lock().map_err(|_| ReviewError::LockPoisoned)?;
        Ok(self
            .originals
            .iter()
            .map(|original| {
                let latest = corrections.get(&original.id).and_then(|h| h.last());
                effective(&self.catalog, original, latest)
            })
            .collect())
    }

    /// All accepted edits for one entry, oldest first.
    pub fn history(&self, entry_id: Uuid) -> Result<Vec<CorrectedEntry>, ReviewError> {
        self.require(entry_id)?;
        let corrections = self.corrections.lock().map_err(|_| ReviewError::LockPoisoned)?;
        Ok(corrections.get(&entry_id).cloned().unwrap_or_default())
    }

    /// Render the user-approved table, one entry per line.
    pub fn render(&self) -> Result<String, ReviewError> {
        let entries: Vec<LabEntry> = self
            .effective_entries()?
            .into_iter()
            .map(|effective| effective.entry)
            .collect();
        Ok(render_lab_lines(&entries))
    }

    fn require(&self, entry_id: Uuid) -> Result<&LabEntry, ReviewError> {
        self.original(entry_id).ok_or(ReviewError::UnknownEntry(entry_id))
    }
}

fn latest_revision(corrections: &HashMap<Uuid, Vec<CorrectedEntry>>, entry_id: Uuid) -> u32 {
    corrections
        .get(&entry_id)
        .and_then(|h| h.last())
        .map_or(0, |c| c.revision)
}

fn effective(
    catalog: &ReferenceCatalog,
    original: &LabEntry,
    latest: Option<&CorrectedEntry>,
) -> EffectiveEntry {
    let Some(correction) = latest else {
        return EffectiveEntry {
            entry: original.clone(),
            revision: 0,
            corrected: false,
        };
    };

    let overrides = &correction.overrides;
    let mut entry = original.clone();

    if let Some(range) = overrides.range {
        entry.range = Some(range);
    }
    if overrides.value.is_some() || overrides.unit.is_some() {
        let reading = match &overrides.unit {
            Some(unit) => Measurement::new(
                overrides.value.unwrap_or(original.raw.value),
                Some(unit.clone()),
            ),
            None => Measurement::new(
                overrides.value.unwrap_or(original.raw.value),
                original.display_value().unit.clone(),
            ),
        };
        renormalize(catalog, &mut entry, reading);
    }

    entry.flag = match overrides.flag {
        Some(flag) => flag,
        None if overrides.touches_measurement() => compute_flag(
            entry.test_id.is_some(),
            entry.normalized.as_ref().map(|m| m.value),
            entry.range.as_ref(),
        ),
        None => original.flag,
    };

    EffectiveEntry {
        entry,
        revision: correction.revision,
        corrected: true,
    }
}

/// Replace the entry's reading and convert it to the canonical unit.
/// Leaves `normalized` empty when the test or the unit is not known.
fn renormalize(catalog: &ReferenceCatalog, entry: &mut LabEntry, reading: Measurement) {
    entry
        .issues
        .retain(|issue| !matches!(issue, EntryIssue::UnitConversionMissing { .. }));

    let test = entry.test_id.as_deref().and_then(|id| catalog.get(id));
    entry.normalized = test.and_then(|test| {
        // A reading without a unit is taken to be in the canonical unit.
        let factor = match reading.unit.as_deref() {
            Some(unit) => test.conversion_factor(unit),
            None => Some(1.0),
        };
        match factor {
            Some(factor) => Some(Measurement::new(
                convert(reading.value, factor),
                Some(test.canonical_unit.clone()),
            )),
            None => {
                tracing::warn!(
                    entry_id = %entry.id,
                    test = %test.id,
                    unit = reading.unit.as_deref().unwrap_or(""),
                    "Corrected unit has no conversion, flag left unknown"
                );
                entry.issues.push(EntryIssue::UnitConversionMissing {
                    from: reading.unit.clone().unwrap_or_default(),
                    to: test.canonical_unit.clone(),
                });
                None
            }
        }
    });
    entry.raw = reading;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
