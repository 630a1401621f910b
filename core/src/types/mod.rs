//! Domain types: accounts, transactions, blocks, and the Merkle trees
//! that tie them into `tx_merkle_root` / `state_root`.

pub mod account;
pub mod block;
pub mod merkle;
pub mod tx;

pub use account::Account;
pub use block::{Block, BlockHash, Header};
pub use merkle::{merkle_proof, merkle_root, verify_merkle_proof};
pub use tx::{CoinbaseTx, EndorseTx, PostTx, Transaction, TransferTx};
