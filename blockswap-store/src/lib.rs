//! Local block storage
//!
//! This crate persists raw content blocks keyed by their content identifier.
//! Blocks live one file per block directly under a fixed root directory,
//! named by the canonical string form of the block's CID.

pub mod error;
pub mod local;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use local::LocalBlockStore;
pub use traits::BlockStorage;
