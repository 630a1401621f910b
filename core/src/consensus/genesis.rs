//! The genesis block: a protocol constant, not a node-local choice.
//!
//! Every node must derive byte-identical genesis blocks from the same
//! [`ConsensusConfig`], since `prev_hash` chains and fork choice both assume
//! a single shared root. The genesis coinbase pays the all-zero public key,
//! a sentinel nobody holds the private key for, so the genesis reward is
//! permanently unspendable rather than handing an unfair head start to
//! whoever happens to run the first node.

use crate::crypto::{Hash256, PubKey};
use crate::miner::{mine, MineOutcome};
use crate::storage::InMemoryBlockStore;
use crate::types::Transaction;
use crate::types::tx::CoinbaseTx;

use super::config::ConsensusConfig;
use super::proposer::{Proposer, TxPool};
use super::reward::reward;
use super::validator::{ChainView, StateView};

struct NoTxPool;
impl TxPool for NoTxPool {
    fn select_for_block(&mut self, _max_bytes: usize) -> Vec<Transaction> {
        Vec::new()
    }
}

struct EmptyState;
impl StateView for EmptyState {
    fn account(&self, _pubkey: &PubKey) -> crate::types::Account {
        Default::default()
    }
    fn snapshot(&self) -> std::collections::BTreeMap<PubKey, crate::types::Account> {
        std::collections::BTreeMap::new()
    }
}

struct NoChain;
impl ChainView for NoChain {
    fn confirmed_tx_kind(&self, _hash: &Hash256) -> Option<super::validator::TxKind> {
        None
    }
    fn header_by_hash(&self, _hash: &crate::types::BlockHash) -> Option<crate::types::Header> {
        None
    }
    fn timestamp_at_height(&self, _height: u64) -> Option<u64> {
        None
    }
    fn wall_clock_now(&self) -> u64 {
        0
    }
}

/// The unspendable sentinel address that receives the genesis coinbase.
pub fn genesis_miner() -> PubKey {
    PubKey([0u8; crate::crypto::PUBKEY_LEN])
}

/// Builds and mines the genesis block for `cfg`. Deterministic: the same
/// config always yields the same block, since the only variable quantity
/// (the PoW nonce) is searched exhaustively from zero.
pub fn genesis_block(cfg: &ConsensusConfig) -> crate::types::Block {
    let store = InMemoryBlockStore::new();
    let proposer = Proposer;
    let candidate = proposer.build_candidate(
        cfg,
        &store,
        &EmptyState,
        &NoChain,
        None,
        genesis_miner(),
        &mut NoTxPool,
        cfg.genesis_timestamp,
    );
    debug_assert_eq!(candidate.txs.len(), 1);
    debug_assert!(matches!(
        candidate.txs[0],
        Transaction::Coinbase(CoinbaseTx { height: 0, .. })
    ));
    debug_assert_eq!(reward(0, cfg.initial_reward, cfg.halving_interval), cfg.initial_reward);

    match mine(cfg, &store, &EmptyState, &NoChain, None, genesis_miner(), &mut NoTxPool, || cfg.genesis_timestamp, || false) {
        MineOutcome::Found(block) => block,
        MineOutcome::Aborted => unreachable!("genesis mining never aborts: should_abort always returns false"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        let cfg = ConsensusConfig { initial_difficulty: 1, ..ConsensusConfig::default() };
        let a = genesis_block(&cfg);
        let b = genesis_block(&cfg);
        assert_eq!(a.block_hash(), b.block_hash());
        assert_eq!(a.header.height, 0);
        assert!(a.header.block_hash().0.meets_difficulty(cfg.initial_difficulty));
    }
}
