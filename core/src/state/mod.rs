//! Account state store.
//!
//! The world state is a total mapping from public key to `Account`,
//! materialized lazily (an account springs into existence on first credit
//! or first authored transaction) and persisted forever once materialized.
//! The store exposes the mapping as a [`crate::consensus::validator::StateView`]
//! so the validator can read it, plus `apply`/`rewind_to` so the chain
//! engine can move it along the active branch.

use std::collections::BTreeMap;

use crate::consensus::validator::{state_root, StateView};
use crate::crypto::{Hash256, PubKey};
use crate::types::{Account, Block, BlockHash};

/// In-memory account state, indexed by the block it currently reflects.
///
/// `rewind_to`/`apply` are implemented by replaying blocks from genesis
/// along the requested path rather than keeping per-block snapshots: simple
/// and correct, at the cost of replay time bounded by `max_reorg_depth`
/// blocks deep. A production node would keep incremental diffs instead.
pub struct AccountStateStore {
    accounts: BTreeMap<PubKey, Account>,
    at_block: Option<BlockHash>,
}

impl AccountStateStore {
    /// Empty state, as it exists before the genesis block is applied.
    pub fn new() -> Self {
        Self {
            accounts: BTreeMap::new(),
            at_block: None,
        }
    }

    /// The block hash this state currently reflects, if any block has been
    /// applied yet.
    pub fn at_block(&self) -> Option<BlockHash> {
        self.at_block
    }

    pub fn state_root(&self) -> Hash256 {
        state_root(&self.accounts)
    }

    /// Commits `block`'s already-validated resulting account map, advancing
    /// the store to reflect it. Callers are expected to have obtained
    /// `new_accounts` from [`crate::consensus::validator::validate_block`].
    pub fn apply(&mut self, block: &Block, new_accounts: BTreeMap<PubKey, Account>) {
        self.accounts = new_accounts;
        self.at_block = Some(block.block_hash());
    }

    /// Discards all state, returning to the pre-genesis empty mapping. Used
    /// by the chain engine as the first step of a replay-based rewind.
    pub fn reset(&mut self) {
        self.accounts.clear();
        self.at_block = None;
    }
}

impl Default for AccountStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateView for AccountStateStore {
    fn account(&self, pubkey: &PubKey) -> Account {
        self.accounts.get(pubkey).copied().unwrap_or_default()
    }

    fn snapshot(&self) -> BTreeMap<PubKey, Account> {
        self.accounts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::config::ConsensusConfig;
    use crate::consensus::reward::reward;
    use crate::consensus::validator::validate_block;
    use crate::crypto::KeyPair;
    use crate::types::{BlockHash, Header, Transaction};
    use crate::types::tx::CoinbaseTx;

    struct NullChain;
    impl crate::consensus::validator::ChainView for NullChain {
        fn confirmed_tx_kind(&self, _hash: &Hash256) -> Option<crate::consensus::validator::TxKind> {
            None
        }
        fn header_by_hash(&self, _hash: &BlockHash) -> Option<Header> {
            None
        }
        fn timestamp_at_height(&self, _height: u64) -> Option<u64> {
            None
        }
        fn wall_clock_now(&self) -> u64 {
            2_000_000_000
        }
    }

    #[test]
    fn applying_genesis_materializes_the_miner_account() {
        let cfg = ConsensusConfig {
            initial_difficulty: 0,
            ..ConsensusConfig::default()
        };
        let miner = KeyPair::generate().public_key();
        let cb = Transaction::Coinbase(CoinbaseTx {
            recipient: miner,
            amount: reward(0, cfg.initial_reward, cfg.halving_interval),
            height: 0,
        });
        let mut store = AccountStateStore::new();
        let header = Header {
            version: 1,
            height: 0,
            prev_hash: BlockHash(Hash256::zero()),
            timestamp: 1_700_000_000,
            miner,
            difficulty: 0,
            nonce: 0,
            tx_merkle_root: cb.tx_hash(),
            state_root: Hash256::zero(), // placeholder, recomputed below
            tx_count: 1,
        };
        let mut block = crate::types::Block { header, txs: vec![cb] };
        let tentative = validate_block(&block, &store, &NullChain, &cfg);
        // First pass fails on state_root mismatch; fix it up then re-validate,
        // mirroring how a miner fills in the header after assembling the body.
        assert!(matches!(
            tentative,
            Err(crate::consensus::error::ValidationError::ConsensusViolation(_))
        ));
        let accounts = {
            let mut m = BTreeMap::new();
            m.insert(miner, Account::new(50, 0));
            m
        };
        block.header.state_root = state_root(&accounts);
        let new_accounts = validate_block(&block, &store, &NullChain, &cfg).expect("valid genesis");
        store.apply(&block, new_accounts);
        assert_eq!(store.account(&miner).balance, 50);
        assert_eq!(store.at_block(), Some(block.block_hash()));
    }
}
