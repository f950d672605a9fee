//! Block store error types

use blockswap_core::BlockId;
use std::path::PathBuf;
use thiserror::Error;

/// Block store error type
#[derive(Error, Debug)]
pub enum StoreError {
    /// No block is stored under the identifier
    #[error("Block not found: {0}")]
    NotFound(BlockId),

    /// The storage root does not exist
    #[error("Storage root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this error reports an absence rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::RootNotFound(_))
    }
}

/// Result type for block store operations
pub type StoreResult<T> = Result<T, StoreError>;
