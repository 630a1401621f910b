//! Account records.

use serde::{Deserialize, Serialize};

/// An account's balance and next expected nonce.
///
/// Accounts are never deleted and are never stored explicitly for an
/// absent key: a pubkey with no entry in the state map behaves as
/// `Account { balance: 0, nonce: 0 }`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    pub nonce: u64,
}

impl Account {
    pub fn new(balance: u64, nonce: u64) -> Self {
        Self { balance, nonce }
    }
}
