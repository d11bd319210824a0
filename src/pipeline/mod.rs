pub mod column_detect;
pub mod header;
pub mod normalize;
pub mod processor; // OCR lines → LabReport orchestrator
pub mod reconstruct;
pub mod resolve;
pub mod sanitize;

pub use processor::{InputError, LabTableProcessor, ProcessingError};
