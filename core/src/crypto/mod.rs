//! Cryptographic primitives and canonical encoding.
//!
//! Everywhere a hash or a signature is computed, it MUST go through the
//! helpers in this module. The canonical encoding is produced by routing
//! any `Serialize` value through `serde_json::to_value` and then
//! `serde_json::to_vec`: since this crate does not enable serde_json's
//! `preserve_order` feature, `serde_json::Map` is `BTreeMap`-backed, so
//! object keys always come out sorted in code-point order with no
//! whitespace — exactly the "JSON-like, sorted keys, no whitespace"
//! contract every node must agree on.

use std::fmt;

use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as DeError};
use sha2::{Digest, Sha256};

pub const HASH_LEN: usize = 32;
pub const PUBKEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Errors raised by the crypto layer itself (not consensus-level rejection,
/// see [`crate::consensus::error::ValidationError`] for that).
#[derive(Debug)]
pub enum CryptoError {
    MalformedHex,
    WrongLength { expected: usize, got: usize },
    InvalidKeyMaterial,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::MalformedHex => write!(f, "malformed hex encoding"),
            CryptoError::WrongLength { expected, got } => {
                write!(f, "expected {expected} bytes, got {got}")
            }
            CryptoError::InvalidKeyMaterial => write!(f, "invalid key material"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// 32-byte SHA-256 digest. Serialized as a lowercase hex string in the
/// canonical encoding and on the wire.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Hash256(pub [u8; HASH_LEN]);

impl Hash256 {
    /// Hashes `data` with SHA-256. This is the only hash function used
    /// anywhere in the protocol: transactions, headers, the Merkle trees,
    /// and the genesis sentinel all go through this.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&digest);
        Hash256(out)
    }

    /// The empty-input hash, used as the Merkle root of an empty leaf list.
    pub fn empty() -> Self {
        Hash256::compute(b"")
    }

    /// The all-zero sentinel used as `prev_hash` for the genesis block.
    pub fn zero() -> Self {
        Hash256([0u8; HASH_LEN])
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::MalformedHex)?;
        if bytes.len() != HASH_LEN {
            return Err(CryptoError::WrongLength {
                expected: HASH_LEN,
                got: bytes.len(),
            });
        }
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&bytes);
        Ok(Hash256(out))
    }

    /// Number of leading zero bits in the big-endian interpretation of this
    /// hash. `leading_zero_bits() >= difficulty` is equivalent to
    /// `hash < 2^(256 - difficulty)`, which is the proof-of-work predicate.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut count = 0u32;
        for byte in &self.0 {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros();
                break;
            }
        }
        count
    }

    /// Returns `true` if this hash satisfies `hash < 2^(256 - difficulty)`.
    pub fn meets_difficulty(&self, difficulty: u64) -> bool {
        u64::from(self.leading_zero_bits()) >= difficulty
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Hash256::from_hex(&s).map_err(DeError::custom)
    }
}

/// An Ed25519 public key, identifying an account. Serialized as a
/// lowercase hex string.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PubKey(pub [u8; PUBKEY_LEN]);

impl PubKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PUBKEY_LEN {
            return Err(CryptoError::WrongLength {
                expected: PUBKEY_LEN,
                got: bytes.len(),
            });
        }
        let mut out = [0u8; PUBKEY_LEN];
        out.copy_from_slice(bytes);
        Ok(PubKey(out))
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::MalformedHex)?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; PUBKEY_LEN] {
        &self.0
    }

    fn as_dalek(&self) -> Result<ed25519_dalek::VerifyingKey, CryptoError> {
        ed25519_dalek::VerifyingKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidKeyMaterial)
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", self.to_hex())
    }
}

impl Serialize for PubKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        PubKey::from_hex(&s).map_err(DeError::custom)
    }
}

/// A detached Ed25519 signature. Serialized as a lowercase hex string.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Sig(pub [u8; SIGNATURE_LEN]);

impl Sig {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(CryptoError::WrongLength {
                expected: SIGNATURE_LEN,
                got: bytes.len(),
            });
        }
        let mut out = [0u8; SIGNATURE_LEN];
        out.copy_from_slice(bytes);
        Ok(Sig(out))
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::MalformedHex)?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }
}

impl fmt::Debug for Sig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sig({})", self.to_hex())
    }
}

impl Serialize for Sig {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Sig {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Sig::from_hex(&s).map_err(DeError::custom)
    }
}

/// An Ed25519 keypair, used by clients and by the miner to identify itself.
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Generates a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut rng),
        }
    }

    /// Reconstructs a keypair from a 32-byte seed (e.g. loaded from disk).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> PubKey {
        PubKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Signs `message` (the canonical encoding of a transaction with its
    /// `signature` field omitted).
    pub fn sign(&self, message: &[u8]) -> Sig {
        let sig = self.signing_key.sign(message);
        Sig(sig.to_bytes())
    }
}

/// Verifies that `sig` is a valid Ed25519 signature over `message` by
/// `pubkey`. Returns `false` rather than an error on any failure, matching
/// the prototype contract `verify(pubkey, message, sig) -> bool`.
pub fn verify(pubkey: &PubKey, message: &[u8], sig: &Sig) -> bool {
    let Ok(verifying_key) = pubkey.as_dalek() else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(&sig.0);
    verifying_key.verify(message, &signature).is_ok()
}

/// Encodes `value` into the canonical byte form used for hashing, signing,
/// and wire transport.
///
/// # Panics
///
/// Panics if `value` cannot be serialized. Every type that goes through
/// this function is a plain data type with no fallible `Serialize` impl,
/// so failure here indicates a programming error, not a runtime condition.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("value should always be canonically serializable")
}

/// Hashes `value` via its canonical encoding.
pub fn hash_canonical<T: Serialize>(value: &T) -> Hash256 {
    Hash256::compute(&to_canonical_bytes(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_content_addressed() {
        let a = Hash256::compute(b"hello");
        let b = Hash256::compute(b"hello");
        let c = Hash256::compute(b"hellp");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn empty_hash_matches_sha256_of_empty_string() {
        assert_eq!(Hash256::empty(), Hash256::compute(b""));
    }

    #[test]
    fn hex_roundtrip() {
        let h = Hash256::compute(b"roundtrip");
        let hex = h.to_hex();
        let back = Hash256::from_hex(&hex).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = KeyPair::generate();
        let pk = kp.public_key();
        let msg = b"the message";
        let sig = kp.sign(msg);
        assert!(verify(&pk, msg, &sig));
    }

    #[test]
    fn tampered_message_fails_verification() {
        let kp = KeyPair::generate();
        let pk = kp.public_key();
        let sig = kp.sign(b"original");
        assert!(!verify(&pk, b"tampered", &sig));
    }

    #[test]
    fn canonical_bytes_have_sorted_keys_and_no_whitespace() {
        #[derive(Serialize)]
        struct S {
            z: u64,
            a: u64,
        }
        let bytes = to_canonical_bytes(&S { z: 1, a: 2 });
        let s = String::from_utf8(bytes).unwrap();
        assert_eq!(s, r#"{"a":2,"z":1}"#);
    }

    #[test]
    fn leading_zero_bits_counts_correctly() {
        let mut bytes = [0xffu8; HASH_LEN];
        bytes[0] = 0x00;
        bytes[1] = 0x0f;
        let h = Hash256(bytes);
        assert_eq!(h.leading_zero_bits(), 12);
        assert!(h.meets_difficulty(12));
        assert!(!h.meets_difficulty(13));
    }
}
