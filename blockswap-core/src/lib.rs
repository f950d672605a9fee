//! Core content-addressing types
//!
//! This crate provides the identifiers shared by every other crate in the
//! workspace:
//! - `ContentId`, the value type wrapping a CID
//! - `BlockId` and `PeerCid`, its two roles (blocks and peers)
//! - Derivation of identifiers from raw bytes and peer names

pub mod content_id;
pub mod error;

// Re-export commonly used types
pub use content_id::*;
pub use error::*;
