//! Transaction and block validation.
//!
//! Pure, stateless given a read-only view of prior state and chain
//! metadata: `validate_tx(tx, state, chain_view)` and
//! `validate_block(block, parent_state, chain_view)`. Neither function
//! mutates anything; `validate_block`'s `Ok` carries the resulting account
//! map so callers (the state store's `apply`) don't need to re-run the
//! same state transition a second time to get what it already computed
//! while checking `state_root`.

use std::collections::BTreeMap;

use crate::crypto::{Hash256, PubKey};
use crate::types::{Block, BlockHash, Header, Transaction, merkle_root};

use super::config::ConsensusConfig;
use super::difficulty::{is_retarget_height, next_difficulty};
use super::error::{NonceMismatchKind, ValidationError};
use super::reward::reward;
use crate::types::Account;

/// The kind of a previously-confirmed transaction, as needed to check
/// `reply_to` / `target` references without pulling in the whole tx body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxKind {
    Post,
    Endorse,
    Transfer,
    Coinbase,
}

impl From<&Transaction> for TxKind {
    fn from(tx: &Transaction) -> Self {
        match tx {
            Transaction::Post(_) => TxKind::Post,
            Transaction::Endorse(_) => TxKind::Endorse,
            Transaction::Transfer(_) => TxKind::Transfer,
            Transaction::Coinbase(_) => TxKind::Coinbase,
        }
    }
}

/// Read-only view over the account map at some point in the chain.
pub trait StateView {
    /// Returns the account for `pubkey`, or the implicit
    /// `{balance: 0, nonce: 0}` default if it has never been materialized.
    fn account(&self, pubkey: &PubKey) -> Account;

    /// Full snapshot of every materialized account, sorted by pubkey (the
    /// leaf order of the state Merkle tree).
    fn snapshot(&self) -> BTreeMap<PubKey, Account>;
}

/// Read-only view over chain metadata needed to validate a block: does a
/// hash resolve to a confirmed transaction (and of what kind), and what
/// are the timestamps of recent blocks on the active branch.
pub trait ChainView {
    fn confirmed_tx_kind(&self, hash: &Hash256) -> Option<TxKind>;
    fn header_by_hash(&self, hash: &BlockHash) -> Option<Header>;
    fn timestamp_at_height(&self, height: u64) -> Option<u64>;
    fn wall_clock_now(&self) -> u64;
}

/// A [`StateView`] over a plain borrowed account map, used when replaying
/// history to reconstruct the state at some non-tip block.
pub struct MapState<'a>(pub &'a BTreeMap<PubKey, Account>);

impl<'a> StateView for MapState<'a> {
    fn account(&self, pubkey: &PubKey) -> Account {
        self.0.get(pubkey).copied().unwrap_or_default()
    }
    fn snapshot(&self) -> BTreeMap<PubKey, Account> {
        self.0.clone()
    }
}

/// A [`StateView`] backed by an in-memory overlay on top of a base view,
/// used to apply a block's transactions sequentially without mutating the
/// base store until the whole block is known to be valid.
struct ScratchState<'a> {
    base: &'a dyn StateView,
    overlay: BTreeMap<PubKey, Account>,
}

impl<'a> ScratchState<'a> {
    fn new(base: &'a dyn StateView) -> Self {
        Self {
            base,
            overlay: BTreeMap::new(),
        }
    }

    fn get(&self, pubkey: &PubKey) -> Account {
        self.overlay
            .get(pubkey)
            .copied()
            .unwrap_or_else(|| self.base.account(pubkey))
    }

    fn set(&mut self, pubkey: PubKey, account: Account) {
        self.overlay.insert(pubkey, account);
    }

    /// Materializes the overlay on top of the base snapshot, producing the
    /// full account map that the new `state_root` is computed from.
    fn into_full_map(self) -> BTreeMap<PubKey, Account> {
        let mut map = self.base.snapshot();
        for (k, v) in self.overlay {
            map.insert(k, v);
        }
        map
    }
}

/// Recomputes the Merkle root over `(pubkey, balance, nonce)` leaves,
/// sorted by pubkey (the map is already ordered that way).
pub fn state_root(accounts: &BTreeMap<PubKey, Account>) -> Hash256 {
    let leaves: Vec<Hash256> = accounts
        .iter()
        .map(|(pk, acc)| crate::crypto::hash_canonical(&serde_json::json!([pk, acc.balance, acc.nonce])))
        .collect();
    merkle_root(&leaves)
}

/// Validates a single non-coinbase transaction against `state`/`chain`.
pub fn validate_tx(
    tx: &Transaction,
    state: &dyn StateView,
    chain: &dyn ChainView,
    cfg: &ConsensusConfig,
) -> Result<(), ValidationError> {
    if tx.is_coinbase() {
        return Err(ValidationError::ConsensusViolation(
            "coinbase cannot be submitted standalone",
        ));
    }
    if !tx.verify_signature() {
        return Err(ValidationError::InvalidSignature);
    }

    let gas_fee = tx.gas_fee();
    if gas_fee < cfg.min_gas_fee {
        return Err(ValidationError::FeeBelowMinimum);
    }

    let author = tx.author().expect("non-coinbase carries an author");
    let account = state.account(&author);
    let nonce = tx.nonce().expect("non-coinbase carries a nonce");

    if nonce < account.nonce + 1 {
        return Err(ValidationError::NonceMismatch(NonceMismatchKind::Stale));
    }
    if nonce > account.nonce + 1 {
        return Err(ValidationError::NonceMismatch(NonceMismatchKind::FutureGap));
    }

    match tx {
        Transaction::Post(p) => {
            if p.body.chars().count() > cfg.max_post_body_chars {
                return Err(ValidationError::LimitExceeded("post body length"));
            }
            if let Some(reply_to) = p.reply_to {
                match chain.confirmed_tx_kind(&reply_to) {
                    Some(TxKind::Post) => {}
                    Some(_) => return Err(ValidationError::ReferenceWrongKind),
                    None => return Err(ValidationError::ReferenceNotFound),
                }
            }
            if account.balance < gas_fee {
                return Err(ValidationError::InsufficientBalance);
            }
        }
        Transaction::Endorse(e) => {
            match chain.confirmed_tx_kind(&e.target) {
                Some(TxKind::Post) => {}
                Some(_) => return Err(ValidationError::ReferenceWrongKind),
                None => return Err(ValidationError::ReferenceNotFound),
            }
            if e.message.chars().count() > cfg.max_endorse_message_chars {
                return Err(ValidationError::LimitExceeded("endorse message length"));
            }
            let total = e
                .amount
                .checked_add(gas_fee)
                .ok_or(ValidationError::InsufficientBalance)?;
            if account.balance < total {
                return Err(ValidationError::InsufficientBalance);
            }
        }
        Transaction::Transfer(t) => {
            if t.sender == t.recipient {
                return Err(ValidationError::ConsensusViolation("sender equals recipient"));
            }
            let total = t
                .amount
                .checked_add(gas_fee)
                .ok_or(ValidationError::InsufficientBalance)?;
            if account.balance < total {
                return Err(ValidationError::InsufficientBalance);
            }
        }
        Transaction::Coinbase(_) => unreachable!("handled above"),
    }

    Ok(())
}

/// Applies a single already-checked transaction to `scratch`, crediting
/// the miner's fee balance along the way. Assumes `validate_tx` already
/// passed (or, for the coinbase, that the block-level coinbase check did).
fn apply_tx(scratch: &mut ScratchState<'_>, tx: &Transaction, miner: &PubKey) {
    match tx {
        Transaction::Post(p) => {
            let mut acc = scratch.get(&p.author);
            acc.balance -= p.gas_fee;
            acc.nonce = p.nonce;
            scratch.set(p.author, acc);
            credit_fee(scratch, miner, p.gas_fee);
        }
        Transaction::Endorse(e) => {
            let mut acc = scratch.get(&e.author);
            acc.balance -= e.amount + e.gas_fee;
            acc.nonce = e.nonce;
            scratch.set(e.author, acc);
            credit_fee(scratch, miner, e.gas_fee);
        }
        Transaction::Transfer(t) => {
            let mut sender = scratch.get(&t.sender);
            sender.balance -= t.amount + t.gas_fee;
            sender.nonce = t.nonce;
            scratch.set(t.sender, sender);

            let mut recipient = scratch.get(&t.recipient);
            recipient.balance += t.amount;
            scratch.set(t.recipient, recipient);

            credit_fee(scratch, miner, t.gas_fee);
        }
        Transaction::Coinbase(cb) => {
            let mut acc = scratch.get(&cb.recipient);
            acc.balance += cb.amount;
            scratch.set(cb.recipient, acc);
        }
    }
}

/// Applies `txs` (coinbase first) to `base` without re-validating them,
/// returning the resulting full account map. Used by the block assembler
/// to compute the `state_root` it should embed in a candidate header; the
/// same transactions are re-validated for real the moment the block comes
/// back through [`validate_block`].
pub fn apply_block_body(
    txs: &[Transaction],
    miner: &PubKey,
    base: &dyn StateView,
) -> BTreeMap<PubKey, Account> {
    let mut scratch = ScratchState::new(base);
    for tx in txs {
        apply_tx(&mut scratch, tx, miner);
    }
    scratch.into_full_map()
}

fn credit_fee(scratch: &mut ScratchState<'_>, miner: &PubKey, fee: u64) {
    let mut acc = scratch.get(miner);
    acc.balance += fee;
    scratch.set(*miner, acc);
}

/// Median of `timestamps`. `timestamps` need not be sorted.
fn median(mut timestamps: Vec<u64>) -> Option<u64> {
    if timestamps.is_empty() {
        return None;
    }
    timestamps.sort_unstable();
    Some(timestamps[timestamps.len() / 2])
}

/// Validates a full block against `parent_state`/`chain` and, on success,
/// returns the resulting full account map (the post-application state).
///
/// Checks run in the order given in the specification; the first failing
/// check determines the returned error, and no partial application is
/// observable (the scratch overlay is discarded on any failure).
pub fn validate_block(
    block: &Block,
    parent_state: &dyn StateView,
    chain: &dyn ChainView,
    cfg: &ConsensusConfig,
) -> Result<BTreeMap<PubKey, Account>, ValidationError> {
    let header = &block.header;

    // 1. Header well-formed.
    if header.version != 1 {
        return Err(ValidationError::ConsensusViolation("unsupported version"));
    }
    if header.tx_count as usize != block.txs.len() {
        return Err(ValidationError::MalformedEncoding);
    }
    if block.body_serialized_size() > cfg.max_block_size_bytes {
        return Err(ValidationError::LimitExceeded("block size"));
    }

    // 2. prev_hash resolves to a known block; height == parent.height + 1.
    // Height 0 (genesis) is special: there is no parent to resolve.
    let parent_header = if header.height == 0 {
        if header.prev_hash != BlockHash(Hash256::zero()) {
            return Err(ValidationError::UnknownParent);
        }
        None
    } else {
        let parent = chain
            .header_by_hash(&header.prev_hash)
            .ok_or(ValidationError::UnknownParent)?;
        if header.height != parent.height + 1 {
            return Err(ValidationError::ConsensusViolation("height does not follow parent"));
        }
        Some(parent)
    };

    // 3. difficulty equals the value computed deterministically from the
    //    parent's chain.
    let expected_difficulty = match &parent_header {
        None => cfg.initial_difficulty,
        Some(parent) => {
            if is_retarget_height(header.height, cfg.retarget_window) {
                let window_start_height = header
                    .height
                    .saturating_sub(cfg.retarget_window + 1);
                let window_start = chain
                    .timestamp_at_height(window_start_height)
                    .unwrap_or(parent.timestamp);
                next_difficulty(cfg, header.height, parent.difficulty, window_start, parent.timestamp)
            } else {
                parent.difficulty
            }
        }
    };
    if header.difficulty != expected_difficulty {
        return Err(ValidationError::ConsensusViolation("difficulty mismatch"));
    }

    // 4. timestamp strictly greater than the median of the previous
    //    `median_time_span` timestamps, and <= wall-clock + tolerance.
    if header.height > 0 {
        let mut prev_timestamps = Vec::with_capacity(cfg.median_time_span);
        for h in 1..=cfg.median_time_span as u64 {
            if h > header.height {
                break;
            }
            if let Some(ts) = chain.timestamp_at_height(header.height - h) {
                prev_timestamps.push(ts);
            }
        }
        if let Some(med) = median(prev_timestamps) {
            if header.timestamp <= med {
                return Err(ValidationError::ConsensusViolation("timestamp not after median"));
            }
        }
    }
    if header.timestamp > chain.wall_clock_now() + cfg.timestamp_future_tolerance_secs {
        return Err(ValidationError::ConsensusViolation("timestamp too far in the future"));
    }

    // 5. proof of work.
    if !header.block_hash().0.meets_difficulty(header.difficulty) {
        return Err(ValidationError::ConsensusViolation("proof of work invalid"));
    }

    // 6. first transaction is a coinbase paying `miner` exactly
    //    reward(height); no other coinbases.
    let expected_reward = reward(header.height, cfg.initial_reward, cfg.halving_interval);
    match block.txs.first() {
        Some(Transaction::Coinbase(cb)) => {
            if cb.recipient != header.miner || cb.amount != expected_reward || cb.height != header.height {
                return Err(ValidationError::ConsensusViolation("bad coinbase"));
            }
        }
        _ => return Err(ValidationError::ConsensusViolation("missing coinbase")),
    }
    if block.txs.iter().skip(1).any(Transaction::is_coinbase) {
        return Err(ValidationError::ConsensusViolation("duplicate coinbase"));
    }

    // 7. remaining transactions validate sequentially against a running
    //    state starting at `parent_state`.
    let mut scratch = ScratchState::new(parent_state);
    apply_tx(&mut scratch, &block.txs[0], &header.miner);

    for tx in block.txs.iter().skip(1) {
        validate_tx(tx, &scratch, chain, cfg)?;
        apply_tx(&mut scratch, tx, &header.miner);
    }

    // 8. recomputed tx_merkle_root and state_root match header.
    let recomputed_tx_root = block.compute_tx_merkle_root();
    if recomputed_tx_root != header.tx_merkle_root {
        return Err(ValidationError::ConsensusViolation("tx_merkle_root mismatch"));
    }

    let new_accounts = scratch.into_full_map();
    let recomputed_state_root = state_root(&new_accounts);
    if recomputed_state_root != header.state_root {
        return Err(ValidationError::ConsensusViolation("state_root mismatch"));
    }

    Ok(new_accounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::types::tx::{CoinbaseTx, TransferTx};

    struct FakeState(BTreeMap<PubKey, Account>);

    impl StateView for FakeState {
        fn account(&self, pubkey: &PubKey) -> Account {
            self.0.get(pubkey).copied().unwrap_or_default()
        }
        fn snapshot(&self) -> BTreeMap<PubKey, Account> {
            self.0.clone()
        }
    }

    struct FakeChain {
        now: u64,
        posts: BTreeMap<Hash256, TxKind>,
        headers: BTreeMap<u64, Header>,
    }

    impl ChainView for FakeChain {
        fn confirmed_tx_kind(&self, hash: &Hash256) -> Option<TxKind> {
            self.posts.get(hash).copied()
        }
        fn header_by_hash(&self, hash: &BlockHash) -> Option<Header> {
            self.headers.values().find(|h| &h.block_hash() == hash).cloned()
        }
        fn timestamp_at_height(&self, height: u64) -> Option<u64> {
            self.headers.get(&height).map(|h| h.timestamp)
        }
        fn wall_clock_now(&self) -> u64 {
            self.now
        }
    }

    #[test]
    fn validate_tx_rejects_stale_nonce() {
        let kp = KeyPair::generate();
        let mut accounts = BTreeMap::new();
        accounts.insert(kp.public_key(), Account::new(100, 3));
        let state = FakeState(accounts);
        let chain = FakeChain {
            now: 2_000_000_000,
            posts: BTreeMap::new(),
            headers: BTreeMap::new(),
        };
        let cfg = ConsensusConfig::default();

        let unsigned = TransferTx {
            sender: kp.public_key(),
            recipient: KeyPair::generate().public_key(),
            amount: 1,
            nonce: 1, // stale: account nonce is already 3
            gas_fee: 1,
            signature: crate::crypto::Sig([0u8; 64]),
        };
        let sig = kp.sign(&Transaction::Transfer(unsigned.clone()).signing_bytes());
        let tx = Transaction::Transfer(TransferTx {
            signature: sig,
            ..unsigned
        });

        let err = validate_tx(&tx, &state, &chain, &cfg).unwrap_err();
        assert_eq!(err, ValidationError::NonceMismatch(NonceMismatchKind::Stale));
    }

    #[test]
    fn genesis_block_validates_with_single_coinbase() {
        let miner = KeyPair::generate().public_key();
        let cfg = ConsensusConfig {
            initial_difficulty: 0,
            ..ConsensusConfig::default()
        };
        let cb = Transaction::Coinbase(CoinbaseTx {
            recipient: miner,
            amount: reward(0, cfg.initial_reward, cfg.halving_interval),
            height: 0,
        });
        let tx_root = cb.tx_hash();
        let mut accounts = BTreeMap::new();
        accounts.insert(miner, Account::new(cb_amount(&cb), 0));
        let expected_state_root = state_root(&accounts);

        let header = Header {
            version: 1,
            height: 0,
            prev_hash: BlockHash(Hash256::zero()),
            timestamp: 1_700_000_000,
            miner,
            difficulty: 0,
            nonce: 0,
            tx_merkle_root: tx_root,
            state_root: expected_state_root,
            tx_count: 1,
        };
        let block = Block { header, txs: vec![cb] };

        let state = FakeState(BTreeMap::new());
        let chain = FakeChain {
            now: 1_700_000_100,
            posts: BTreeMap::new(),
            headers: BTreeMap::new(),
        };

        let result = validate_block(&block, &state, &chain, &cfg);
        assert!(result.is_ok(), "{result:?}");
    }

    fn cb_amount(tx: &Transaction) -> u64 {
        match tx {
            Transaction::Coinbase(cb) => cb.amount,
            _ => unreachable!(),
        }
    }
}
