//! Block header and block types.

use serde::{Deserialize, Serialize};

use crate::crypto::{self, Hash256, PubKey};

use super::merkle::merkle_root;
use super::tx::Transaction;

/// Strongly-typed block hash, newtype over [`Hash256`] to avoid mixing it
/// up with transaction or state-root hashes at the type level.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(pub Hash256);

impl std::fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockHash({})", self.0.to_hex())
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consensus-critical block header. `block_hash = SHA-256(canonical_serialize(header))`,
/// with the current `nonce` included (unlike transactions, headers are
/// hashed in full — there is no field omitted).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Header {
    pub version: u8,
    pub height: u64,
    pub prev_hash: BlockHash,
    pub timestamp: u64,
    pub miner: PubKey,
    pub difficulty: u64,
    pub nonce: u64,
    pub tx_merkle_root: Hash256,
    pub state_root: Hash256,
    pub tx_count: u16,
}

impl Header {
    pub fn block_hash(&self) -> BlockHash {
        BlockHash(crypto::hash_canonical(self))
    }
}

/// A block: header plus ordered transaction list. The first transaction
/// must be a coinbase paying `header.miner`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub txs: Vec<Transaction>,
}

impl Block {
    pub fn block_hash(&self) -> BlockHash {
        self.header.block_hash()
    }

    /// Canonical wire encoding of the whole block (header + body), used for
    /// persistence and P2P transport.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        crypto::to_canonical_bytes(self)
    }

    /// Recomputes the Merkle root over this block's transaction hashes, in
    /// order. Must match `header.tx_merkle_root` for the block to be valid.
    pub fn compute_tx_merkle_root(&self) -> Hash256 {
        let hashes: Vec<Hash256> = self.txs.iter().map(Transaction::tx_hash).collect();
        merkle_root(&hashes)
    }

    /// The block's coinbase transaction, if the first entry is one.
    pub fn coinbase(&self) -> Option<&super::tx::CoinbaseTx> {
        match self.txs.first() {
            Some(Transaction::Coinbase(cb)) => Some(cb),
            _ => None,
        }
    }

    /// Serialized size of the whole block (header + body), used for
    /// persistence and wire-transfer accounting.
    pub fn serialized_size(&self) -> usize {
        self.canonical_bytes().len()
    }

    /// Serialized size of the transaction body alone, in bytes. The block
    /// size cap (spec §4.2 check 1) bounds the body, not the header: a
    /// header-inclusive measurement would let a block sit right at the
    /// cap's boundary and disagree between two conforming implementations
    /// whenever header field widths differ by even a byte.
    pub fn body_serialized_size(&self) -> usize {
        crypto::to_canonical_bytes(&self.txs).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::types::tx::CoinbaseTx;

    fn sample_header() -> Header {
        Header {
            version: 1,
            height: 1,
            prev_hash: BlockHash(Hash256::zero()),
            timestamp: 1_700_000_000,
            miner: KeyPair::generate().public_key(),
            difficulty: 1,
            nonce: 0,
            tx_merkle_root: Hash256::empty(),
            state_root: Hash256::empty(),
            tx_count: 0,
        }
    }

    #[test]
    fn header_hash_changes_with_nonce() {
        let mut h1 = sample_header();
        let mut h2 = h1.clone();
        h2.nonce = 1;
        assert_ne!(h1.block_hash(), h2.block_hash());
        h1.nonce = 1;
        assert_eq!(h1.block_hash(), h2.block_hash());
    }

    #[test]
    fn block_with_single_coinbase_tx_merkle_root_matches_tx_hash() {
        let cb = Transaction::Coinbase(CoinbaseTx {
            recipient: KeyPair::generate().public_key(),
            amount: 50,
            height: 1,
        });
        let block = Block {
            header: sample_header(),
            txs: vec![cb.clone()],
        };
        assert_eq!(block.compute_tx_merkle_root(), cb.tx_hash());
    }

    #[test]
    fn empty_body_tx_merkle_root_is_empty_hash() {
        let block = Block {
            header: sample_header(),
            txs: vec![],
        };
        assert_eq!(block.compute_tx_merkle_root(), Hash256::empty());
    }

    #[test]
    fn body_serialized_size_excludes_header() {
        let cb = Transaction::Coinbase(CoinbaseTx {
            recipient: KeyPair::generate().public_key(),
            amount: 50,
            height: 1,
        });
        let block = Block {
            header: sample_header(),
            txs: vec![cb],
        };
        assert!(block.body_serialized_size() < block.serialized_size());
        assert_eq!(block.body_serialized_size(), crypto::to_canonical_bytes(&block.txs).len());
    }
}
