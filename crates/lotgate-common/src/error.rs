//! Error types shared across lotgate crates

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for lotgate common operations
pub type Result<T> = std::result::Result<T, LotgateError>;

/// Main error type for shared utilities
#[derive(Error, Debug)]
pub enum LotgateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown checksum algorithm: {0}")]
    UnknownAlgorithm(String),
}
