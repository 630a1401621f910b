//! Block storage abstraction used by the consensus engine.

use crate::types::{Block, BlockHash};

/// Abstract block storage interface.
///
/// Implementations can be backed by in-memory maps, RocksDB, etc. The
/// interface is intentionally small: the engine only needs get/put and a
/// notion of the current tip; everything else (cumulative work, height
/// indexing, reorg bookkeeping) lives in the engine itself.
pub trait BlockStore {
    /// Fetches a block by hash, if present.
    fn get_block(&self, hash: &BlockHash) -> Option<Block>;

    /// Persists a block. Does not affect the tip.
    fn put_block(&mut self, block: Block);

    /// Returns the hash of the current tip of the active chain, if any.
    fn tip(&self) -> Option<BlockHash>;

    /// Updates the current tip of the active chain.
    fn set_tip(&mut self, hash: BlockHash);

    fn contains(&self, hash: &BlockHash) -> bool {
        self.get_block(hash).is_some()
    }
}

