//! Document processing orchestrator.
//!
//! Single entry point that drives the reconstruction pipeline for one
//! document: header scan → normalize → reconstruct → resolve. Each document
//! runs single-threaded in line order. Independent documents can run in
//! parallel against one shared, read-only catalog.

use std::sync::Arc;

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::models::{LabReport, RawLine};
use crate::pipeline::column_detect::reorder_columns;
use crate::pipeline::header::scan_header;
use crate::pipeline::normalize::normalize_line;
use crate::pipeline::reconstruct::LineReconstructor;
use crate::pipeline::resolve::ValueResolver;
use crate::pipeline::sanitize::{collapse_whitespace, strip_noise};
use crate::pipeline_config::{ConfigError, PipelineConfig};
use crate::reference::{CatalogError, Demographic, ReferenceCatalog};
use crate::review::CorrectionOverlay;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Structurally invalid line sequences. These are caller contract
/// violations; everything else degrades individual entries instead.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InputError {
    #[error("Duplicate line index {0}")]
    DuplicateIndex(u32),

    #[error("Line index {index} follows {previous}; indices must increase")]
    NonMonotonic { previous: u32, index: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Reference catalog unavailable: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Processing task failed: {0}")]
    Task(String),
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Reconstructs lab tables from OCR lines.
///
/// Cheap to clone: the catalog is shared behind an `Arc` and never mutated.
#[derive(Debug, Clone)]
pub struct LabTableProcessor {
    catalog: Arc<ReferenceCatalog>,
    config: PipelineConfig,
}

impl LabTableProcessor {
    pub fn new(catalog: Arc<ReferenceCatalog>, config: PipelineConfig) -> Result<Self, ProcessingError> {
        config.validate()?;
        Ok(Self { catalog, config })
    }

    /// Processor over the bundled (or user-overridden) catalog.
    pub fn with_default_catalog(config: PipelineConfig) -> Result<Self, ProcessingError> {
        let catalog = ReferenceCatalog::load_default()?;
        Self::new(Arc::new(catalog), config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ReferenceCatalog {
        &self.catalog
    }

    /// A correction overlay over `report`, converting against this
    /// processor's catalog.
    pub fn overlay(&self, report: &LabReport) -> CorrectionOverlay {
        CorrectionOverlay::from_report(report, Arc::clone(&self.catalog))
    }

    /// Reconstruct the lab table encoded in `lines`.
    ///
    /// Only a malformed sequence (duplicate or decreasing indices) is an
    /// error. Unmatched tests, missing conversions and abandoned rows are
    /// reported inside the returned report.
    pub fn process(&self, lines: &[RawLine]) -> Result<LabReport, ProcessingError> {
        validate_sequence(lines)?;

        let fingerprint = fingerprint(lines);
        let span = tracing::info_span!("process_document", doc = %&fingerprint[..12], lines = lines.len());
        let _guard = span.enter();

        let header = scan_header(lines);
        let demographic = self.config.demographic.or(Demographic {
            age: header.patient.age,
            sex: header.patient.sex,
        });

        let mut reconstructor = LineReconstructor::new(self.config.lookahead_lines);
        for line in lines {
            if header.consumed.contains(&line.index()) {
                reconstructor.push_line(&[]);
            } else {
                reconstructor.push_line(&normalize_line(line));
            }
        }
        let reconstruction = reconstructor.finish();

        let resolver = ValueResolver::new(&self.catalog, &self.config, demographic);
        let entries = resolver.resolve_all(&reconstruction.rows, &fingerprint);

        let report = LabReport {
            fingerprint,
            line_count: lines.len(),
            patient: header.patient,
            vital_signs: header.vital_signs,
            entries,
            discarded: reconstruction.discarded,
        };

        tracing::info!(
            entries = report.entries.len(),
            discarded = report.discard_count(),
            unresolved = report.unresolved_count(),
            ignored_tokens = reconstruction.ignored_tokens,
            "Reconstructed lab table"
        );
        Ok(report)
    }

    /// Clean free OCR text, untangle two-column layouts and split into lines.
    pub fn prepare_text(&self, text: &str) -> Vec<RawLine> {
        let stripped = strip_noise(text);
        let arranged = if self.config.reorder_columns {
            reorder_columns(&stripped)
        } else {
            stripped
        };
        RawLine::sequence(&collapse_whitespace(&arranged))
    }

    pub fn process_text(&self, text: &str) -> Result<LabReport, ProcessingError> {
        self.process(&self.prepare_text(text))
    }

    /// Process independent documents in parallel. Results keep input order.
    pub async fn process_batch(
        &self,
        documents: Vec<Vec<RawLine>>,
    ) -> Vec<Result<LabReport, ProcessingError>> {
        let handles: Vec<_> = documents
            .into_iter()
            .map(|lines| {
                let processor = self.clone();
                tokio::task::spawn_blocking(move || processor.process(&lines))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "Document task failed");
                    Err(ProcessingError::Task(e.to_string()))
                }
            });
        }
        results
    }
}

/// Indices must be unique and strictly increasing.
pub fn validate_sequence(lines: &[RawLine]) -> Result<(), InputError> {
    for pair in lines.windows(2) {
        let (previous, index) = (pair[0].index(), pair[1].index());
        if index == previous {
            return Err(InputError::DuplicateIndex(index));
        }
        if index < previous {
            return Err(InputError::NonMonotonic { previous, index });
        }
    }
    Ok(())
}

/// Base64 SHA-256 over line indices and texts.
pub fn fingerprint(lines: &[RawLine]) -> String {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.index().to_be_bytes());
        hasher.update(line.text().as_bytes());
        hasher.update(b"\n");
    }
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
