//! Fork-choice rule for selecting the active chain.

use crate::types::{Block, BlockHash};

use super::store::BlockStore;

/// Abstraction over fork-choice rules.
///
/// Given the current tip (if any) and a candidate block, a fork-choice
/// implementation decides whether the candidate should replace it.
pub trait ForkChoice {
    /// Returns `true` if `candidate` should replace `current_tip`.
    fn should_update_tip(
        &self,
        store: &dyn BlockStore,
        current_tip: Option<BlockHash>,
        candidate: &Block,
    ) -> bool;
}

/// Cumulative-work fork choice: the active chain is the one with the
/// greatest total work, `W(B) = W(parent) + 2^difficulty`. Ties keep the
/// current tip (first-seen wins), so `should_update_tip` requires the
/// candidate's work to be *strictly* greater.
#[derive(Clone, Copy, Debug, Default)]
pub struct CumulativeWorkForkChoice;

/// Work contributed by a single block at `difficulty`, saturating rather
/// than overflowing for implausibly large difficulties.
pub fn block_work(difficulty: u64) -> u128 {
    1u128.checked_shl(difficulty.min(127) as u32).unwrap_or(u128::MAX)
}

/// Walks `hash` back to genesis via `store`, summing each block's work.
/// Returns `None` if any ancestor is missing from `store`.
pub fn cumulative_work(store: &dyn BlockStore, hash: BlockHash) -> Option<u128> {
    let mut total: u128 = 0;
    let mut current = hash;
    loop {
        let block = store.get_block(&current)?;
        total = total.saturating_add(block_work(block.header.difficulty));
        if block.header.height == 0 {
            return Some(total);
        }
        current = block.header.prev_hash;
    }
}

impl ForkChoice for CumulativeWorkForkChoice {
    fn should_update_tip(
        &self,
        store: &dyn BlockStore,
        current_tip: Option<BlockHash>,
        candidate: &Block,
    ) -> bool {
        let candidate_hash = candidate.block_hash();
        let candidate_work = match cumulative_work(store, candidate_hash) {
            Some(w) => w,
            // Candidate isn't in `store` yet (common: the engine asks before
            // persisting it) - work it out directly from the header chain.
            None => block_work(candidate.header.difficulty)
                + cumulative_work(store, candidate.header.prev_hash).unwrap_or(0),
        };

        match current_tip {
            None => true,
            Some(tip_hash) => {
                let tip_work = cumulative_work(store, tip_hash).unwrap_or(0);
                candidate_work > tip_work
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_doubles_per_difficulty_bit() {
        assert_eq!(block_work(0), 1);
        assert_eq!(block_work(1), 2);
        assert_eq!(block_work(10), 1024);
    }

    #[test]
    fn no_tip_always_accepts_candidate() {
        let store = crate::storage::InMemoryBlockStore::new();
        let fc = CumulativeWorkForkChoice;
        let candidate = crate::types::Block {
            header: crate::types::Header {
                version: 1,
                height: 0,
                prev_hash: crate::types::BlockHash(crate::crypto::Hash256::zero()),
                timestamp: 0,
                miner: crate::crypto::KeyPair::generate().public_key(),
                difficulty: 1,
                nonce: 0,
                tx_merkle_root: crate::crypto::Hash256::empty(),
                state_root: crate::crypto::Hash256::empty(),
                tx_count: 0,
            },
            txs: vec![],
        };
        assert!(fc.should_update_tip(&store, None, &candidate));
    }
}
