pub mod enums;
pub mod lab;
pub mod raw_line;
pub mod report;

pub use enums::*;
pub use lab::*;
pub use raw_line::*;
pub use report::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid value for {field}: {value}")]
    InvalidEnum { field: String, value: String },
}
