//! Block storage traits and interfaces

use crate::StoreResult;
use async_trait::async_trait;
use blockswap_core::BlockId;

/// Content-addressed block storage.
///
/// This is the storage surface the exchange engine drives. Implementations
/// do not verify that a block's bytes hash to its identifier.
#[async_trait]
pub trait BlockStorage: Send + Sync {
    /// Get the bytes stored under `id`
    async fn get(&self, id: &BlockId) -> StoreResult<Vec<u8>>;

    /// Write or overwrite the block stored under `id`
    async fn put(&self, id: &BlockId, block: &[u8]) -> StoreResult<()>;

    /// Remove the block stored under `id`
    async fn delete(&self, id: &BlockId) -> StoreResult<()>;

    /// Check whether a block is stored under `id`
    fn has(&self, id: &BlockId) -> bool;

    /// Stored size of the block in bytes
    async fn size(&self, id: &BlockId) -> StoreResult<u64>;

    /// Put every block in order.
    ///
    /// Not atomic: on error the blocks before the failing one stay written
    /// and the rest are never attempted.
    async fn put_many(&self, blocks: &[(BlockId, Vec<u8>)]) -> StoreResult<()> {
        for (id, block) in blocks {
            self.put(id, block).await?;
        }
        Ok(())
    }

    /// Put a block unless one is already stored under `id`.
    ///
    /// Returns `false` when the block was already present.
    async fn put_if_absent(&self, id: &BlockId, block: &[u8]) -> StoreResult<bool> {
        if self.has(id) {
            return Ok(false);
        }
        self.put(id, block).await?;
        Ok(true)
    }
}
