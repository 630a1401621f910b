//! Transaction types.
//!
//! Four kinds, all content-addressed by `SHA-256(canonical_serialize(tx
//! without signature))`. The signing/hashing payload is built by hand per
//! variant (see [`Transaction::signing_value`]) rather than derived from
//! the wire `Serialize` impl, so that the `signature` field is genuinely
//! omitted rather than merely nulled out.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::crypto::{self, Hash256, PubKey, Sig};

/// A short signed message, optionally replying to a prior post.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostTx {
    pub author: PubKey,
    pub nonce: u64,
    pub timestamp: u64,
    /// UTF-8 body, at most 300 Unicode scalar values (see
    /// `ConsensusConfig::max_post_body_chars`).
    pub body: String,
    /// Content hash of the post this one replies to, if any. Must resolve
    /// to a confirmed post at validation time.
    pub reply_to: Option<Hash256>,
    pub gas_fee: u64,
    pub signature: Sig,
}

/// A reference to an existing post, optionally tipping its author.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndorseTx {
    pub author: PubKey,
    pub nonce: u64,
    /// Content hash of the post being endorsed.
    pub target: Hash256,
    pub amount: u64,
    pub message: String,
    pub gas_fee: u64,
    pub signature: Sig,
}

/// A plain value transfer between two accounts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferTx {
    pub sender: PubKey,
    pub recipient: PubKey,
    pub amount: u64,
    pub nonce: u64,
    pub gas_fee: u64,
    pub signature: Sig,
}

/// The block-reward transaction. Unsigned; exactly one per block, first
/// in the body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoinbaseTx {
    pub recipient: PubKey,
    pub amount: u64,
    pub height: u64,
}

/// Tagged transaction envelope, as it appears in blocks, the mempool, and
/// on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transaction {
    Post(PostTx),
    Endorse(EndorseTx),
    Transfer(TransferTx),
    Coinbase(CoinbaseTx),
}

impl Transaction {
    /// The account that authored / must sign this transaction. `None` for
    /// coinbases, which carry no signature.
    pub fn author(&self) -> Option<PubKey> {
        match self {
            Transaction::Post(t) => Some(t.author),
            Transaction::Endorse(t) => Some(t.author),
            Transaction::Transfer(t) => Some(t.sender),
            Transaction::Coinbase(_) => None,
        }
    }

    pub fn nonce(&self) -> Option<u64> {
        match self {
            Transaction::Post(t) => Some(t.nonce),
            Transaction::Endorse(t) => Some(t.nonce),
            Transaction::Transfer(t) => Some(t.nonce),
            Transaction::Coinbase(_) => None,
        }
    }

    pub fn gas_fee(&self) -> u64 {
        match self {
            Transaction::Post(t) => t.gas_fee,
            Transaction::Endorse(t) => t.gas_fee,
            Transaction::Transfer(t) => t.gas_fee,
            Transaction::Coinbase(_) => 0,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self, Transaction::Coinbase(_))
    }

    /// The value hashed/signed: every field except `signature`. Coinbases
    /// have no signature field to begin with, so their whole body is
    /// hashed; `height` is what disambiguates two coinbases that would
    /// otherwise be identical.
    pub fn signing_value(&self) -> serde_json::Value {
        match self {
            Transaction::Post(t) => json!({
                "kind": "post",
                "author": t.author,
                "nonce": t.nonce,
                "timestamp": t.timestamp,
                "body": t.body,
                "reply_to": t.reply_to,
                "gas_fee": t.gas_fee,
            }),
            Transaction::Endorse(t) => json!({
                "kind": "endorse",
                "author": t.author,
                "nonce": t.nonce,
                "target": t.target,
                "amount": t.amount,
                "message": t.message,
                "gas_fee": t.gas_fee,
            }),
            Transaction::Transfer(t) => json!({
                "kind": "transfer",
                "sender": t.sender,
                "recipient": t.recipient,
                "amount": t.amount,
                "nonce": t.nonce,
                "gas_fee": t.gas_fee,
            }),
            Transaction::Coinbase(t) => json!({
                "kind": "coinbase",
                "recipient": t.recipient,
                "amount": t.amount,
                "height": t.height,
            }),
        }
    }

    /// Bytes that a signature is computed over / verified against.
    pub fn signing_bytes(&self) -> Vec<u8> {
        crypto::to_canonical_bytes(&self.signing_value())
    }

    /// Content hash: `SHA-256(canonical_serialize(tx_without_signature))`.
    pub fn tx_hash(&self) -> Hash256 {
        Hash256::compute(&self.signing_bytes())
    }

    /// Verifies the embedded signature against `author`/`sender`. Always
    /// `false` for coinbases (they carry no signature to check).
    pub fn verify_signature(&self) -> bool {
        match self {
            Transaction::Coinbase(_) => false,
            _ => {
                let author = self.author().expect("non-coinbase has an author");
                let sig = match self {
                    Transaction::Post(t) => &t.signature,
                    Transaction::Endorse(t) => &t.signature,
                    Transaction::Transfer(t) => &t.signature,
                    Transaction::Coinbase(_) => unreachable!(),
                };
                crypto::verify(&author, &self.signing_bytes(), sig)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn dummy_sig() -> Sig {
        Sig([0u8; 64])
    }

    #[test]
    fn tx_hash_excludes_signature_field() {
        let author = KeyPair::generate().public_key();
        let base = PostTx {
            author,
            nonce: 1,
            timestamp: 1_700_000_000,
            body: "hello".to_string(),
            reply_to: None,
            gas_fee: 1,
            signature: dummy_sig(),
        };
        let mut other = base.clone();
        other.signature = Sig([0xffu8; 64]);

        let h1 = Transaction::Post(base).tx_hash();
        let h2 = Transaction::Post(other).tx_hash();
        assert_eq!(h1, h2, "signature must not affect the content hash");
    }

    #[test]
    fn tx_hash_round_trips_through_wire_serialization() {
        let author = KeyPair::generate().public_key();
        let tx = Transaction::Transfer(TransferTx {
            sender: author,
            recipient: KeyPair::generate().public_key(),
            amount: 10,
            nonce: 0,
            gas_fee: 1,
            signature: dummy_sig(),
        });

        let bytes = crypto::to_canonical_bytes(&tx);
        let decoded: Transaction = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(tx.tx_hash(), decoded.tx_hash());
    }

    #[test]
    fn signed_transfer_verifies() {
        let kp = KeyPair::generate();
        let recipient = KeyPair::generate().public_key();
        let mut tx = Transaction::Transfer(TransferTx {
            sender: kp.public_key(),
            recipient,
            amount: 5,
            nonce: 0,
            gas_fee: 1,
            signature: dummy_sig(),
        });
        let sig = kp.sign(&tx.signing_bytes());
        if let Transaction::Transfer(ref mut t) = tx {
            t.signature = sig;
        }
        assert!(tx.verify_signature());
    }

    #[test]
    fn coinbase_carries_no_verifiable_signature() {
        let tx = Transaction::Coinbase(CoinbaseTx {
            recipient: KeyPair::generate().public_key(),
            amount: 50,
            height: 0,
        });
        assert!(!tx.verify_signature());
        assert!(tx.author().is_none());
    }

    #[test]
    fn two_coinbases_at_different_heights_hash_differently() {
        let recipient = KeyPair::generate().public_key();
        let a = Transaction::Coinbase(CoinbaseTx {
            recipient,
            amount: 50,
            height: 1,
        });
        let b = Transaction::Coinbase(CoinbaseTx {
            recipient,
            amount: 50,
            height: 2,
        });
        assert_ne!(a.tx_hash(), b.tx_hash());
    }
}
