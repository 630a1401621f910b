//! Transaction mempool.
//!
//! Bounded, fee-prioritized, indexed by content hash and by author (each
//! author has at most one pending transaction: `validate_tx` only accepts
//! the exact next nonce, so a second submission before the first confirms
//! is either a replace-by-fee of the same nonce or a rejected future gap).

use std::collections::BTreeMap;

use crate::consensus::config::ConsensusConfig;
use crate::consensus::error::ValidationError;
use crate::consensus::proposer::TxPool;
use crate::consensus::validator::{validate_tx, ChainView, StateView};
use crate::crypto::{self, Hash256, PubKey};
use crate::types::Transaction;

struct Entry {
    tx: Transaction,
    seq: u64,
}

/// Bounded mempool of pending, individually-valid-against-the-tip
/// transactions.
pub struct Mempool {
    cfg: ConsensusConfig,
    by_hash: BTreeMap<Hash256, Entry>,
    by_author: BTreeMap<PubKey, Hash256>,
    next_seq: u64,
}

impl Mempool {
    pub fn new(cfg: ConsensusConfig) -> Self {
        Self {
            cfg,
            by_hash: BTreeMap::new(),
            by_author: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash256) -> Option<&Transaction> {
        self.by_hash.get(hash).map(|entry| &entry.tx)
    }

    /// Content hashes of every pending transaction, in no particular order.
    pub fn hashes(&self) -> Vec<Hash256> {
        self.by_hash.keys().copied().collect()
    }

    /// Validates and admits `tx`. Replaces an existing same-author,
    /// same-nonce entry only if `tx`'s `gas_fee` is strictly higher
    /// (replace-by-fee); otherwise rejects it as a conflicting duplicate.
    pub fn insert(
        &mut self,
        tx: Transaction,
        state: &dyn StateView,
        chain: &dyn ChainView,
    ) -> Result<Hash256, ValidationError> {
        validate_tx(&tx, state, chain, &self.cfg)?;

        let author = tx.author().expect("validate_tx rejects coinbase");
        let hash = tx.tx_hash();

        if let Some(existing_hash) = self.by_author.get(&author).copied() {
            let existing_fee = self.by_hash.get(&existing_hash).map(|e| e.tx.gas_fee());
            if let Some(existing_fee) = existing_fee {
                if tx.gas_fee() <= existing_fee {
                    return Err(ValidationError::ConsensusViolation(
                        "replacement transaction does not raise the fee",
                    ));
                }
                self.by_hash.remove(&existing_hash);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_hash.insert(hash, Entry { tx, seq });
        self.by_author.insert(author, hash);
        self.evict_over_capacity();
        Ok(hash)
    }

    fn remove_hash(&mut self, hash: &Hash256) {
        if let Some(entry) = self.by_hash.remove(hash) {
            if let Some(author) = entry.tx.author() {
                if self.by_author.get(&author) == Some(hash) {
                    self.by_author.remove(&author);
                }
            }
        }
    }

    /// Drops the confirmed `txs` (now in a block) from the pool.
    pub fn remove_confirmed(&mut self, txs: &[Transaction]) {
        for tx in txs {
            self.remove_hash(&tx.tx_hash());
        }
    }

    /// Re-checks every pending transaction against `state`/`chain`,
    /// dropping any that no longer validate. Called after the tip changes
    /// (including after a reorg).
    pub fn revalidate(&mut self, state: &dyn StateView, chain: &dyn ChainView) {
        let stale: Vec<Hash256> = self
            .by_hash
            .iter()
            .filter(|(_, entry)| validate_tx(&entry.tx, state, chain, &self.cfg).is_err())
            .map(|(hash, _)| *hash)
            .collect();
        for hash in stale {
            self.remove_hash(&hash);
        }
    }

    fn evict_over_capacity(&mut self) {
        while self.by_hash.len() > self.cfg.max_mempool {
            let victim = self
                .by_hash
                .iter()
                .min_by_key(|(_, entry)| (entry.tx.gas_fee(), entry.seq))
                .map(|(hash, _)| *hash);
            match victim {
                Some(hash) => self.remove_hash(&hash),
                None => break,
            }
        }
    }
}

impl TxPool for Mempool {
    fn select_for_block(&mut self, max_bytes: usize) -> Vec<Transaction> {
        let mut candidates: Vec<&Entry> = self.by_hash.values().collect();
        candidates.sort_by(|a, b| b.tx.gas_fee().cmp(&a.tx.gas_fee()).then(a.seq.cmp(&b.seq)));

        let mut selected = Vec::new();
        let mut used = 0usize;
        for entry in candidates {
            let size = crypto::to_canonical_bytes(&entry.tx).len();
            if used + size > max_bytes {
                continue;
            }
            used += size;
            selected.push(entry.tx.clone());
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::types::tx::TransferTx;
    use crate::types::Account;
    use std::collections::BTreeMap as StdBTreeMap;

    struct FakeState(StdBTreeMap<PubKey, Account>);
    impl StateView for FakeState {
        fn account(&self, pubkey: &PubKey) -> Account {
            self.0.get(pubkey).copied().unwrap_or_default()
        }
        fn snapshot(&self) -> StdBTreeMap<PubKey, Account> {
            self.0.clone()
        }
    }

    struct NullChain;
    impl ChainView for NullChain {
        fn confirmed_tx_kind(&self, _h: &Hash256) -> Option<crate::consensus::validator::TxKind> {
            None
        }
        fn header_by_hash(&self, _h: &crate::types::BlockHash) -> Option<crate::types::Header> {
            None
        }
        fn timestamp_at_height(&self, _h: u64) -> Option<u64> {
            None
        }
        fn wall_clock_now(&self) -> u64 {
            2_000_000_000
        }
    }

    fn signed_transfer(kp: &KeyPair, nonce: u64, gas_fee: u64) -> Transaction {
        let unsigned = TransferTx {
            sender: kp.public_key(),
            recipient: KeyPair::generate().public_key(),
            amount: 1,
            nonce,
            gas_fee,
            signature: crate::crypto::Sig([0u8; 64]),
        };
        let sig = kp.sign(&Transaction::Transfer(unsigned.clone()).signing_bytes());
        Transaction::Transfer(TransferTx { signature: sig, ..unsigned })
    }

    #[test]
    fn higher_fee_replaces_same_nonce_entry() {
        let kp = KeyPair::generate();
        let mut accounts = StdBTreeMap::new();
        accounts.insert(kp.public_key(), Account::new(1000, 0));
        let state = FakeState(accounts);
        let mut pool = Mempool::new(ConsensusConfig::default());

        pool.insert(signed_transfer(&kp, 1, 1), &state, &NullChain).unwrap();
        assert_eq!(pool.len(), 1);

        let err = pool.insert(signed_transfer(&kp, 1, 1), &state, &NullChain).unwrap_err();
        assert_eq!(err, ValidationError::ConsensusViolation("replacement transaction does not raise the fee"));

        pool.insert(signed_transfer(&kp, 1, 5), &state, &NullChain).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn select_for_block_orders_by_fee_descending() {
        let kp_a = KeyPair::generate();
        let kp_b = KeyPair::generate();
        let mut accounts = StdBTreeMap::new();
        accounts.insert(kp_a.public_key(), Account::new(1000, 0));
        accounts.insert(kp_b.public_key(), Account::new(1000, 0));
        let state = FakeState(accounts);
        let mut pool = Mempool::new(ConsensusConfig::default());

        pool.insert(signed_transfer(&kp_a, 1, 2), &state, &NullChain).unwrap();
        pool.insert(signed_transfer(&kp_b, 1, 9), &state, &NullChain).unwrap();

        let selected = pool.select_for_block(1_000_000);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].gas_fee(), 9);
        assert_eq!(selected[1].gas_fee(), 2);
    }
}
