//! Candidate block assembly.
//!
//! The proposer builds an unmined candidate on top of a given parent: it
//! selects transactions from a pool, prepends the coinbase, and fills in
//! every header field except `nonce` (the miner's job is purely to search
//! for a `nonce` that satisfies proof of work over this otherwise-final
//! header).

use crate::consensus::difficulty::{is_retarget_height, next_difficulty};
use crate::consensus::reward::reward;
use crate::consensus::validator::{apply_block_body, state_root, ChainView, StateView};
use crate::crypto::PubKey;
use crate::types::tx::CoinbaseTx;
use crate::types::{Block, BlockHash, Header, Transaction};

use super::config::ConsensusConfig;
use super::store::BlockStore;

/// Abstract transaction pool interface.
///
/// The proposer does not care how transactions are stored or gossiped; it
/// only needs a way to ask for a fee-ordered batch that fits a size budget.
pub trait TxPool {
    /// Selects transactions for inclusion in a block, highest fee first,
    /// respecting `max_bytes` as a soft limit on their combined encoded
    /// size (the coinbase is not counted against this budget).
    fn select_for_block(&mut self, max_bytes: usize) -> Vec<Transaction>;
}

/// Assembles candidate blocks on top of a given tip.
#[derive(Clone, Copy, Debug, Default)]
pub struct Proposer;

impl Proposer {
    /// Builds an unmined candidate block on top of `parent` (or genesis, if
    /// `parent` is `None`), rewarding `miner`.
    ///
    /// `state` must reflect the parent's post-application account map, and
    /// `chain` must be able to answer `timestamp_at_height` for the parent's
    /// ancestry (needed for difficulty retargeting and the median-time
    /// check the resulting block will be held to once it comes back through
    /// `validate_block`).
    pub fn build_candidate<P: TxPool>(
        &self,
        cfg: &ConsensusConfig,
        store: &dyn BlockStore,
        state: &dyn StateView,
        chain: &dyn ChainView,
        parent: Option<&Header>,
        miner: PubKey,
        tx_pool: &mut P,
        timestamp: u64,
    ) -> Block {
        let height = parent.map_or(0, |p| p.height + 1);
        let prev_hash = parent.map_or(BlockHash(crate::crypto::Hash256::zero()), |p| p.block_hash());

        let difficulty = match parent {
            None => cfg.initial_difficulty,
            Some(p) => {
                if is_retarget_height(height, cfg.retarget_window) {
                    let window_start_height = height.saturating_sub(cfg.retarget_window + 1);
                    let window_start = chain.timestamp_at_height(window_start_height).unwrap_or(p.timestamp);
                    next_difficulty(cfg, height, p.difficulty, window_start, p.timestamp)
                } else {
                    p.difficulty
                }
            }
        };

        let timestamp = match parent {
            Some(p) => timestamp.max(p.timestamp + 1),
            None => timestamp,
        };

        let coinbase = Transaction::Coinbase(CoinbaseTx {
            recipient: miner,
            amount: reward(height, cfg.initial_reward, cfg.halving_interval),
            height,
        });

        let body_budget = cfg.max_block_size_bytes.saturating_sub(512); // headroom for header + coinbase
        let mut txs = vec![coinbase];
        txs.extend(tx_pool.select_for_block(body_budget));

        let new_accounts = apply_block_body(&txs, &miner, state);
        let new_state_root = state_root(&new_accounts);
        let tx_merkle_root = {
            let hashes: Vec<_> = txs.iter().map(Transaction::tx_hash).collect();
            crate::types::merkle_root(&hashes)
        };

        let header = Header {
            version: 1,
            height,
            prev_hash,
            timestamp,
            miner,
            difficulty,
            nonce: 0,
            tx_merkle_root,
            state_root: new_state_root,
            tx_count: txs.len() as u16,
        };

        let _ = store; // reserved: future header-chain lookups beyond `parent`/`chain`
        Block { header, txs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::validator::TxKind;
    use crate::crypto::{Hash256, KeyPair};
    use std::collections::BTreeMap;

    struct EmptyPool;
    impl TxPool for EmptyPool {
        fn select_for_block(&mut self, _max_bytes: usize) -> Vec<Transaction> {
            vec![]
        }
    }

    struct EmptyState;
    impl StateView for EmptyState {
        fn account(&self, _pubkey: &PubKey) -> crate::types::Account {
            Default::default()
        }
        fn snapshot(&self) -> BTreeMap<PubKey, crate::types::Account> {
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
    fn genesis_candidate_has_height_zero_and_single_coinbase() {
        let cfg = ConsensusConfig::default();
        let store = crate::storage::InMemoryBlockStore::new();
        let miner = KeyPair::generate().public_key();
        let proposer = Proposer;
        let block = proposer.build_candidate(
            &cfg,
            &store,
            &EmptyState,
            &EmptyChain,
            None,
            miner,
            &mut EmptyPool,
            1_700_000_000,
        );
        assert_eq!(block.header.height, 0);
        assert_eq!(block.txs.len(), 1);
        assert!(block.txs[0].is_coinbase());
    }
}
