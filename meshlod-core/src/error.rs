//! Error types for meshlod

use thiserror::Error;

/// Main error type for meshlod operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid LOD configuration: {0}")]
    Config(String),

    #[error("Unsupported index size: {0} bytes (expected 2 or 4)")]
    UnsupportedIndexSize(usize),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("Buffer error: {0}")]
    Buffer(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

/// Result type alias for meshlod operations
pub type Result<T> = std::result::Result<T, Error>;
