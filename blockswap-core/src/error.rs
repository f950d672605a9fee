//! Error types for the core crate

use thiserror::Error;

/// Core content-addressing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid CID '{input}': {reason}")]
    InvalidCid { input: String, reason: String },

    #[error("Multihash error: {0}")]
    Multihash(String),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
