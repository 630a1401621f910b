//! Proof-of-work mining loop.
//!
//! Wraps [`crate::consensus::proposer::Proposer`] with the actual nonce
//! search. Deliberately synchronous and CPU-bound; callers run it on a
//! blocking thread (`tokio::task::spawn_blocking`) rather than the async
//! executor.

use crate::consensus::config::ConsensusConfig;
use crate::consensus::proposer::{Proposer, TxPool};
use crate::consensus::store::BlockStore;
use crate::consensus::validator::{ChainView, StateView};
use crate::crypto::PubKey;
use crate::types::{Block, Header};

/// Number of nonces tried between cooperative checks of the abort signal
/// and timestamp refresh, matching the cadence at which a real miner
/// would want to notice a new tip has arrived.
pub const NONCE_REFRESH_INTERVAL: u64 = 1 << 20;

/// Outcome of a bounded mining attempt.
pub enum MineOutcome {
    /// Found a nonce satisfying proof of work.
    Found(Block),
    /// Aborted (`should_abort` returned `true`) before exhausting the
    /// nonce space, typically because a new tip arrived from a peer.
    Aborted,
}

/// Mines on top of `parent` until proof of work is satisfied or
/// `should_abort` returns `true`. `wall_clock_now` supplies the current
/// time, re-read every [`NONCE_REFRESH_INTERVAL`] tries so the header
/// timestamp doesn't go stale across a long search.
pub fn mine<P: TxPool>(
    cfg: &ConsensusConfig,
    store: &dyn BlockStore,
    state: &dyn StateView,
    chain: &dyn ChainView,
    parent: Option<&Header>,
    miner: PubKey,
    tx_pool: &mut P,
    wall_clock_now: impl Fn() -> u64,
    should_abort: impl Fn() -> bool,
) -> MineOutcome {
    let proposer = Proposer;
    let mut block = proposer.build_candidate(
        cfg,
        store,
        state,
        chain,
        parent,
        miner,
        tx_pool,
        wall_clock_now(),
    );

    let mut nonce: u64 = 0;
    loop {
        if nonce % NONCE_REFRESH_INTERVAL == 0 {
            if should_abort() {
                return MineOutcome::Aborted;
            }
            let now = wall_clock_now();
            let floor = parent.map_or(now, |p| p.timestamp + 1);
            block.header.timestamp = now.max(floor);
        }

        block.header.nonce = nonce;
        if block.header.block_hash().0.meets_difficulty(block.header.difficulty) {
            return MineOutcome::Found(block);
        }

        nonce = nonce.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBlockStore;
    use crate::consensus::validator::TxKind;
    use crate::crypto::{Hash256, KeyPair};
    use crate::types::{Account, BlockHash, Transaction};
    use std::collections::BTreeMap;

    struct EmptyPool;
    impl TxPool for EmptyPool {
        fn select_for_block(&mut self, _max_bytes: usize) -> Vec<Transaction> {
            vec![]
        }
    }

    struct EmptyState;
    impl StateView for EmptyState {
        fn account(&self, _pubkey: &PubKey) -> Account {
            Default::default()
        }
        fn snapshot(&self) -> BTreeMap<PubKey, Account> {
            BTreeMap::new()
        }
    }

    struct EmptyChain;
    impl ChainView for EmptyChain {
        fn confirmed_tx_kind(&self, _hash: &Hash256) -> Option<TxKind> {
            None
        }
        fn header_by_hash(&self, _hash: &BlockHash) -> Option<Header> {
            None
        }
        fn timestamp_at_height(&self, _height: u64) -> Option<u64> {
            None
        }
        fn wall_clock_now(&self) -> u64 {
            0
        }
    }

    #[test]
    fn mining_at_zero_difficulty_succeeds_immediately() {
        let cfg = ConsensusConfig {
            initial_difficulty: 0,
            ..ConsensusConfig::default()
        };
        let store = InMemoryBlockStore::new();
        let miner = KeyPair::generate().public_key();
        let outcome = mine(
            &cfg,
            &store,
            &EmptyState,
            &EmptyChain,
            None,
            miner,
            &mut EmptyPool,
            || 1_700_000_000,
            || false,
        );
        match outcome {
            MineOutcome::Found(block) => assert_eq!(block.header.nonce, 0),
            MineOutcome::Aborted => panic!("should not abort"),
        }
    }

    #[test]
    fn abort_signal_stops_the_search() {
        let cfg = ConsensusConfig {
            initial_difficulty: 255,
            ..ConsensusConfig::default()
        };
        let store = InMemoryBlockStore::new();
        let miner = KeyPair::generate().public_key();
        let outcome = mine(
            &cfg,
            &store,
            &EmptyState,
            &EmptyChain,
            None,
            miner,
            &mut EmptyPool,
            || 1_700_000_000,
            || true,
        );
        assert!(matches!(outcome, MineOutcome::Aborted));
    }
}
