//! In-memory block store.
//!
//! Useful for unit tests, benchmarks, and small devnets. Keeps all blocks
//! in a `HashMap` keyed by `BlockHash` and tracks the current tip
//! separately, exactly mirroring what a persistent backend has to do.

use std::collections::HashMap;

use crate::consensus::store::BlockStore;
use crate::types::{Block, BlockHash};

/// In-memory implementation of [`BlockStore`].
#[derive(Default)]
pub struct InMemoryBlockStore {
    blocks: HashMap<BlockHash, Block>,
    tip: Option<BlockHash>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl BlockStore for InMemoryBlockStore {
    fn get_block(&self, hash: &BlockHash) -> Option<Block> {
        self.blocks.get(hash).cloned()
    }

    fn put_block(&mut self, block: Block) {
        self.blocks.insert(block.block_hash(), block);
    }

    fn tip(&self) -> Option<BlockHash> {
        self.tip
    }

    fn set_tip(&mut self, hash: BlockHash) {
        self.tip = Some(hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Hash256, KeyPair};
    use crate::types::Header;

    fn sample_block(height: u64) -> Block {
        let header = Header {
            version: 1,
            height,
            prev_hash: BlockHash(Hash256::zero()),
            timestamp: 1_700_000_000 + height,
            miner: KeyPair::generate().public_key(),
            difficulty: 1,
            nonce: 0,
            tx_merkle_root: Hash256::empty(),
            state_root: Hash256::empty(),
            tx_count: 0,
        };
        Block { header, txs: vec![] }
    }

    #[test]
    fn put_and_get_block_roundtrip() {
        let mut store = InMemoryBlockStore::new();
        let block = sample_block(0);
        let hash = block.block_hash();

        store.put_block(block.clone());
        let fetched = store.get_block(&hash).expect("block should be present");

        assert_eq!(fetched.header.height, 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn tip_is_tracked_separately_from_blocks() {
        let mut store = InMemoryBlockStore::new();
        let block = sample_block(5);
        let hash = block.block_hash();

        store.put_block(block);
        assert!(store.tip().is_none());

        store.set_tip(hash);
        assert_eq!(store.tip(), Some(hash));
    }
}
