//! Recognized options for a reconstruction run.
//!
//! Every field can be overridden per invocation. Defaults suit common
//! single-column lab report layouts.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reference::Demographic;

// ═══════════════════════════════════════════════════════════
// Defaults
// ═══════════════════════════════════════════════════════════

/// Lines a row may wait for its value before it is abandoned.
pub const DEFAULT_LOOKAHEAD_LINES: usize = 3;

/// Minimum similarity for a catalog match to be accepted at all.
pub const DEFAULT_MATCH_ACCEPT: f64 = 0.60;

/// Similarity at or above which a match counts as High confidence.
pub const DEFAULT_MATCH_HIGH: f64 = 0.90;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("lookahead_lines must be at least 1")]
    ZeroLookahead,

    #[error("match thresholds must satisfy 0 < accept ({accept}) <= high ({high}) <= 1")]
    ThresholdOrder { accept: f64, high: f64 },

    #[error("Failed to read config {0}: {1}")]
    Load(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

// ═══════════════════════════════════════════════════════════
// PipelineConfig
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Consecutive lines a label-only row may span before it is discarded.
    pub lookahead_lines: usize,
    /// Catalog matches scoring below this are unresolved.
    pub match_accept: f64,
    /// Accepted matches scoring below this are tagged Fuzzy.
    pub match_high: f64,
    /// Demographic for range selection. Unset fields fall back to the
    /// patient header found in the document.
    pub demographic: Demographic,
    /// Reorder two-column layouts left column first before line splitting.
    pub reorder_columns: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lookahead_lines: DEFAULT_LOOKAHEAD_LINES,
            match_accept: DEFAULT_MATCH_ACCEPT,
            match_high: DEFAULT_MATCH_HIGH,
            demographic: Demographic::default(),
            reorder_columns: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(path.display().to_string(), e.to_string()))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lookahead_lines == 0 {
            return Err(ConfigError::ZeroLookahead);
        }
        let ordered = self.match_accept > 0.0
            && self.match_accept <= self.match_high
            && self.match_high <= 1.0;
        if !ordered {
            return Err(ConfigError::ThresholdOrder {
                accept: self.match_accept,
                high: self.match_high,
            });
        }
        Ok(())
    }

    pub fn with_lookahead(mut self, lines: usize) -> Self {
        self.lookahead_lines = lines;
        self
    }

    pub fn with_thresholds(mut self, accept: f64, high: f64) -> Self {
        self.match_accept = accept;
        self.match_high = high;
        self
    }

    pub fn with_demographic(mut self, demographic: Demographic) -> Self {
        self.demographic = demographic;
        self
    }

    pub fn with_column_reordering(mut self, enabled: bool) -> Self {
        self.reorder_columns = enabled;
        self
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
