//! Consensus engine: wires together a [`BlockStore`], a [`ForkChoice`] rule,
//! and the free-function validator into block import with reorg handling.
//!
//! Blocks are only ever accepted into `store` after `validate_block`
//! passes, so replaying a previously-stored branch to reconstruct its state
//! (as reorg handling needs to) trusts those blocks rather than
//! re-validating them - cheap, and sound as long as nothing ever bypasses
//! `import_block` to call `store.put_block` directly.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::crypto::Hash256;
use crate::types::{Account, Block, BlockHash, Header, Transaction};

use super::config::ConsensusConfig;
use super::error::{ConsensusError, ValidationError};
use super::fork_choice::ForkChoice;
use super::store::BlockStore;
use super::validator::{validate_block, apply_block_body, ChainView, MapState, TxKind};
use crate::state::AccountStateStore;

/// [`ChainView`] that answers queries by walking a store from a given
/// branch tip back toward genesis. Works for any branch, active or not.
struct StoreChainView<'a> {
    store: &'a dyn BlockStore,
    from: BlockHash,
    now: u64,
}

impl<'a> ChainView for StoreChainView<'a> {
    fn confirmed_tx_kind(&self, hash: &Hash256) -> Option<TxKind> {
        let mut current = self.from;
        loop {
            let block = self.store.get_block(&current)?;
            if let Some(tx) = block.txs.iter().find(|tx| &tx.tx_hash() == hash) {
                return Some(TxKind::from(tx));
            }
            if block.header.height == 0 {
                return None;
            }
            current = block.header.prev_hash;
        }
    }

    fn header_by_hash(&self, hash: &BlockHash) -> Option<Header> {
        self.store.get_block(hash).map(|b| b.header)
    }

    fn timestamp_at_height(&self, height: u64) -> Option<u64> {
        let mut current = self.from;
        loop {
            let block = self.store.get_block(&current)?;
            if block.header.height == height {
                return Some(block.header.timestamp);
            }
            if block.header.height == 0 {
                return None;
            }
            current = block.header.prev_hash;
        }
    }

    fn wall_clock_now(&self) -> u64 {
        self.now
    }
}

/// Consensus engine: `S` is the block storage backend, `F` the fork-choice
/// rule. The account state store is owned directly (not generic) since its
/// semantics - replaying blocks already trusted by `store` - are fixed by
/// how the engine itself handles reorgs.
pub struct ConsensusEngine<S, F> {
    pub config: ConsensusConfig,
    store: S,
    fork_choice: F,
    state: AccountStateStore,
}

impl<S, F> ConsensusEngine<S, F>
where
    S: BlockStore,
    F: ForkChoice,
{
    pub fn new(config: ConsensusConfig, store: S, fork_choice: F) -> Self {
        Self {
            config,
            store,
            fork_choice,
            state: AccountStateStore::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tip(&self) -> Option<BlockHash> {
        self.store.tip()
    }

    pub fn tip_header(&self) -> Option<Header> {
        self.tip().and_then(|h| self.store.get_block(&h)).map(|b| b.header)
    }

    /// The account state as of the current active tip.
    pub fn state(&self) -> &AccountStateStore {
        &self.state
    }

    /// Rebuilds the in-memory account state from the persisted tip, by
    /// replaying its branch from genesis. Blocks themselves survive a
    /// restart via `store`, but `AccountStateStore` does not, so a node
    /// must call this once after opening its store and before serving
    /// queries or mining.
    pub fn rebuild_state_to_tip(&mut self) {
        let Some(tip) = self.store.tip() else {
            self.state.reset();
            return;
        };
        let Some(accounts) = self.state_at(tip) else {
            self.state.reset();
            return;
        };
        let Some(block) = self.store.get_block(&tip) else {
            self.state.reset();
            return;
        };
        self.state.apply(&block, accounts);
    }

    /// Reconstructs the account map as of `target` by replaying its branch
    /// from genesis. `target` must already be present in `store` (i.e. it
    /// passed `validate_block` when it was first imported).
    fn state_at(&self, target: BlockHash) -> Option<BTreeMap<crate::crypto::PubKey, Account>> {
        let mut path = Vec::new();
        let mut current = target;
        loop {
            let block = self.store.get_block(&current)?;
            let prev = block.header.prev_hash;
            let height = block.header.height;
            path.push(block);
            if height == 0 {
                break;
            }
            current = prev;
        }
        path.reverse();

        let mut accounts: BTreeMap<crate::crypto::PubKey, Account> = BTreeMap::new();
        for block in &path {
            accounts = apply_block_body(&block.txs, &block.header.miner, &MapState(&accounts));
        }
        Some(accounts)
    }

    /// The blocks unique to each side of a reorg between `old_tip` and
    /// `new_tip`, found by walking both branches back to their lowest
    /// common ancestor.
    ///
    /// `orphaned` holds the old branch's blocks above the fork point,
    /// ordered from `old_tip` down toward (but excluding) the ancestor;
    /// `adopted` holds the new branch's blocks above the fork point,
    /// ordered from the ancestor up to (and including) `new_tip`.
    /// `depth` is `old_tip.height - fork_point.height`. Errs if the two
    /// branches share no ancestor reachable through `store` (a different
    /// genesis).
    fn branch_diff(&self, old_tip: BlockHash, new_tip: BlockHash) -> Result<BranchDiff, ValidationError> {
        let mut old_blocks = Vec::new();
        let mut cur = old_tip;
        loop {
            let block = self.store.get_block(&cur).ok_or(ValidationError::UnknownParent)?;
            let prev = block.header.prev_hash;
            let height = block.header.height;
            old_blocks.push(block);
            if height == 0 {
                break;
            }
            cur = prev;
        }
        let old_index: HashMap<BlockHash, usize> =
            old_blocks.iter().enumerate().map(|(i, b)| (b.block_hash(), i)).collect();

        let mut adopted = Vec::new();
        let mut cur = new_tip;
        let fork_idx = loop {
            if let Some(&idx) = old_index.get(&cur) {
                break idx;
            }
            let block = self.store.get_block(&cur).ok_or(ValidationError::UnknownParent)?;
            let prev = block.header.prev_hash;
            let height = block.header.height;
            adopted.push(block);
            if height == 0 {
                return Err(ValidationError::ConsensusViolation("branches share no common ancestor"));
            }
            cur = prev;
        };
        adopted.reverse();

        let orphaned = old_blocks[..fork_idx].to_vec();
        Ok(BranchDiff {
            depth: fork_idx as u64,
            orphaned,
            adopted,
        })
    }

    /// Validates and imports `block`. Idempotent: re-importing an
    /// already-known block is a no-op. On success, updates the active tip
    /// (and reorgs the account state to match) if the fork-choice rule
    /// prefers this block over the current tip, and reports which
    /// transactions of the abandoned branch (if any) were not also
    /// confirmed by the newly-adopted branch - the caller is responsible
    /// for re-offering those to the mempool (spec §4.4 step 4).
    pub fn import_block(&mut self, block: Block, now: u64) -> Result<ImportOutcome, ConsensusError> {
        let hash = block.block_hash();
        if self.store.contains(&hash) {
            return Ok(ImportOutcome {
                hash,
                reorged: false,
                reorg_depth: 0,
                orphaned_txs: Vec::new(),
            });
        }

        let parent_hash = block.header.prev_hash;
        let is_genesis = block.header.height == 0;

        let parent_state = if is_genesis {
            BTreeMap::new()
        } else {
            self.state_at(parent_hash)
                .ok_or(ValidationError::UnknownParent)?
        };
        let parent_state_view = MapState(&parent_state);
        let chain_view = StoreChainView {
            store: &self.store,
            from: parent_hash,
            now,
        };

        let new_accounts = validate_block(&block, &parent_state_view, &chain_view, &self.config)?;

        self.store.put_block(block.clone());

        let current_tip = self.store.tip();
        let should_update = self.fork_choice.should_update_tip(&self.store, current_tip, &block);

        let mut reorged = false;
        let mut reorg_depth = 0;
        let mut orphaned_txs = Vec::new();

        if should_update {
            if let Some(tip_hash) = current_tip {
                if tip_hash != parent_hash {
                    let diff = self.branch_diff(tip_hash, hash)?;
                    if diff.depth > self.config.max_reorg_depth {
                        return Err(ValidationError::ReorgTooDeep.into());
                    }
                    let adopted_hashes: HashSet<Hash256> = diff
                        .adopted
                        .iter()
                        .flat_map(|b| b.txs.iter().map(Transaction::tx_hash))
                        .collect();
                    orphaned_txs = diff
                        .orphaned
                        .iter()
                        // skip each orphaned block's coinbase: it pays a
                        // miner reward that no longer exists on the
                        // adopted branch, not a transaction to reinject.
                        .flat_map(|b| b.txs.iter().skip(1))
                        .filter(|tx| !adopted_hashes.contains(&tx.tx_hash()))
                        .cloned()
                        .collect();
                    reorg_depth = diff.depth;
                    reorged = true;
                }
            }
            self.state.apply(&block, new_accounts);
            self.store.set_tip(hash);
        }

        Ok(ImportOutcome {
            hash,
            reorged,
            reorg_depth,
            orphaned_txs,
        })
    }
}

struct BranchDiff {
    depth: u64,
    orphaned: Vec<Block>,
    adopted: Vec<Block>,
}

/// Result of [`ConsensusEngine::import_block`].
#[derive(Debug)]
pub struct ImportOutcome {
    /// Hash of the imported block.
    pub hash: BlockHash,
    /// Whether importing this block switched the active tip via a reorg
    /// (as opposed to simple linear extension or a no-op re-import).
    pub reorged: bool,
    /// Depth of the reorg (blocks of the old branch left behind), zero
    /// when `reorged` is `false`.
    pub reorg_depth: u64,
    /// Transactions confirmed on the previously-active branch but not on
    /// the newly-adopted one, in the order they were orphaned. Callers
    /// should offer each back to the mempool (subject to mempool
    /// admission rules against the new tip's state).
    pub orphaned_txs: Vec<Transaction>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::fork_choice::CumulativeWorkForkChoice;
    use crate::consensus::proposer::{Proposer, TxPool};
    use crate::consensus::reward::reward;
    use crate::storage::InMemoryBlockStore;
    use crate::crypto::KeyPair;
    use crate::types::Transaction;

    struct EmptyPool;
    impl TxPool for EmptyPool {
        fn select_for_block(&mut self, _max_bytes: usize) -> Vec<Transaction> {
            vec![]
        }
    }

    fn mined(
        cfg: &ConsensusConfig,
        store: &dyn BlockStore,
        state: &dyn super::super::validator::StateView,
        chain: &dyn ChainView,
        parent: Option<&Header>,
        miner: crate::crypto::PubKey,
        now: u64,
    ) -> Block {
        let proposer = Proposer;
        let mut block =
            proposer.build_candidate(cfg, store, state, chain, parent, miner, &mut EmptyPool, now);
        loop {
            if block.header.block_hash().0.meets_difficulty(block.header.difficulty) {
                return block;
            }
            block.header.nonce += 1;
        }
    }

    #[test]
    fn genesis_then_one_block_advances_tip_and_pays_reward() {
        let cfg = ConsensusConfig {
            initial_difficulty: 0,
            ..ConsensusConfig::default()
        };
        let store = InMemoryBlockStore::new();
        let mut engine = ConsensusEngine::new(cfg.clone(), store, CumulativeWorkForkChoice);
        let miner = KeyPair::generate().public_key();

        let empty_state = crate::state::AccountStateStore::new();
        struct NullChain(u64);
        impl ChainView for NullChain {
            fn confirmed_tx_kind(&self, _h: &Hash256) -> Option<TxKind> {
                None
            }
            fn header_by_hash(&self, _h: &BlockHash) -> Option<Header> {
                None
            }
            fn timestamp_at_height(&self, _h: u64) -> Option<u64> {
                None
            }
            fn wall_clock_now(&self) -> u64 {
                self.0
            }
        }

        let genesis = mined(
            &cfg,
            engine.store(),
            &empty_state,
            &NullChain(2_000_000_000),
            None,
            miner,
            1_700_000_000,
        );
        let genesis_hash = engine.import_block(genesis.clone(), 2_000_000_000).expect("genesis valid").hash;
        assert_eq!(engine.tip(), Some(genesis_hash));
        assert_eq!(engine.state().account(&miner).balance, reward(0, cfg.initial_reward, cfg.halving_interval));

        let chain_view = StoreChainView {
            store: engine.store(),
            from: genesis_hash,
            now: 2_000_000_000,
        };
        let block1 = mined(
            &cfg,
            engine.store(),
            engine.state(),
            &chain_view,
            Some(&genesis.header),
            miner,
            genesis.header.timestamp + 10,
        );
        let hash1 = engine.import_block(block1, 2_000_000_000).expect("block1 valid").hash;
        assert_eq!(engine.tip(), Some(hash1));
        assert_eq!(
            engine.state().account(&miner).balance,
            2 * reward(0, cfg.initial_reward, cfg.halving_interval)
        );
    }

    #[test]
    fn reimporting_known_block_is_a_no_op() {
        let cfg = ConsensusConfig {
            initial_difficulty: 0,
            ..ConsensusConfig::default()
        };
        let store = InMemoryBlockStore::new();
        let mut engine = ConsensusEngine::new(cfg.clone(), store, CumulativeWorkForkChoice);
        let miner = KeyPair::generate().public_key();
        let empty_state = crate::state::AccountStateStore::new();
        struct NullChain;
        impl ChainView for NullChain {
            fn confirmed_tx_kind(&self, _h: &Hash256) -> Option<TxKind> {
                None
            }
            fn header_by_hash(&self, _h: &BlockHash) -> Option<Header> {
                None
            }
            fn timestamp_at_height(&self, _h: u64) -> Option<u64> {
                None
            }
            fn wall_clock_now(&self) -> u64 {
                2_000_000_000
            }
        }
        let genesis = mined(&cfg, engine.store(), &empty_state, &NullChain, None, miner, 1_700_000_000);
        let first = engine.import_block(genesis.clone(), 2_000_000_000).unwrap();
        let second = engine.import_block(genesis, 2_000_000_000).unwrap();
        assert_eq!(first.hash, second.hash);
        assert!(!second.reorged);
        assert!(second.orphaned_txs.is_empty());
    }

    #[test]
    fn reorg_reports_orphaned_non_coinbase_transactions() {
        let cfg = ConsensusConfig {
            initial_difficulty: 0,
            ..ConsensusConfig::default()
        };
        let store = InMemoryBlockStore::new();
        let mut engine = ConsensusEngine::new(cfg.clone(), store, CumulativeWorkForkChoice);
        let miner_a = KeyPair::generate().public_key();
        let miner_b = KeyPair::generate().public_key();

        struct NullChain;
        impl ChainView for NullChain {
            fn confirmed_tx_kind(&self, _h: &Hash256) -> Option<TxKind> {
                None
            }
            fn header_by_hash(&self, _h: &BlockHash) -> Option<Header> {
                None
            }
            fn timestamp_at_height(&self, _h: u64) -> Option<u64> {
                None
            }
            fn wall_clock_now(&self) -> u64 {
                2_000_000_000
            }
        }

        let empty_state = crate::state::AccountStateStore::new();
        let genesis = mined(&cfg, engine.store(), &empty_state, &NullChain, None, miner_a, 1_700_000_000);
        let genesis_hash = engine.import_block(genesis.clone(), 2_000_000_000).unwrap().hash;

        // Two competing blocks at height 1, same parent, different miners
        // (and therefore different hashes - one must end up heavier once
        // a child extends it).
        let chain_view = StoreChainView { store: engine.store(), from: genesis_hash, now: 2_000_000_000 };
        let fork_a = mined(
            &cfg, engine.store(), engine.state(), &chain_view, Some(&genesis.header), miner_a,
            genesis.header.timestamp + 10,
        );
        let outcome_a = engine.import_block(fork_a.clone(), 2_000_000_000).unwrap();
        assert!(!outcome_a.reorged);

        let fork_b = mined(
            &cfg, engine.store(), engine.state(), &chain_view, Some(&genesis.header), miner_b,
            genesis.header.timestamp + 20,
        );
        let outcome_b = engine.import_block(fork_b.clone(), 2_000_000_000).unwrap();
        // Equal cumulative work at the same height: fork choice keeps the
        // first-seen tip (fork_a), so fork_b is stored but not adopted.
        assert!(!outcome_b.reorged);
        assert_eq!(engine.tip(), Some(fork_a.block_hash()));

        // Extend fork_b: it now outweighs fork_a, forcing a reorg that
        // orphans fork_a (whose only transaction was its own coinbase).
        let chain_view_b = StoreChainView { store: engine.store(), from: fork_b.block_hash(), now: 2_000_000_000 };
        let state_at_b = crate::consensus::validator::apply_block_body(
            &fork_b.txs,
            &fork_b.header.miner,
            &empty_state,
        );
        let fork_b_state = MapState(&state_at_b);
        let block3 = mined(
            &cfg, engine.store(), &fork_b_state, &chain_view_b, Some(&fork_b.header), miner_b,
            fork_b.header.timestamp + 10,
        );
        let block3_hash = block3.block_hash();
        let outcome3 = engine.import_block(block3, 2_000_000_000).unwrap();
        assert!(outcome3.reorged);
        assert_eq!(engine.tip(), Some(block3_hash));
        // fork_a's only transaction is its coinbase, which is never
        // reinjected (it has no standing off its own branch).
        assert!(outcome3.orphaned_txs.is_empty());
    }
}
