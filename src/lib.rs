//! Reconstructs structured lab result tables from noisy OCR text.
//!
//! `LabTableProcessor` turns an ordered sequence of OCR lines into a
//! `LabReport`; `CorrectionOverlay` layers user edits over its entries.

pub mod config;
pub mod models;
pub mod pipeline;
pub mod pipeline_config;
pub mod reference;
pub mod review;
pub mod units;

pub use models::{LabEntry, LabFlag, LabReport, MatchConfidence, RawLine};
pub use pipeline::{InputError, LabTableProcessor, ProcessingError};
pub use pipeline_config::PipelineConfig;
pub use reference::{Demographic, ReferenceCatalog};
pub use review::{CorrectedEntry, CorrectionOverlay, FieldOverrides, ReviewError};

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` overrides the default
/// filter. Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
