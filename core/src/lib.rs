//! Ledger core library crate.
//!
//! This crate provides the core building blocks for a permissionless,
//! content-addressed, append-only, proof-of-work-secured ledger:
//!
//! - strongly-typed domain types (`types`): accounts, transactions, blocks,
//!   Merkle trees,
//! - cryptographic primitives and canonical encoding (`crypto`),
//! - a modular consensus engine (`consensus`): config, validator, fork
//!   choice, proposer, reward/difficulty schedules, block import,
//! - the account state store (`state`),
//! - a fee-prioritized transaction mempool (`mempool`),
//! - a proof-of-work mining loop (`miner`),
//! - storage backends (`storage`),
//! - Prometheus-based metrics (`metrics`),
//! - and a top-level node configuration (`config`).
//!
//! Higher-level binaries compose these pieces into full nodes: importing
//! blocks received over the network, mining new ones, and serving queries.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod mempool;
pub mod metrics;
pub mod miner;
pub mod state;
pub mod storage;
pub mod types;

// Re-export top-level configuration types.
pub use config::{LedgerConfig, MetricsConfig};

// Re-export "core" consensus types and traits.
pub use consensus::{
    genesis_block, genesis_miner, validate_block, validate_tx, BlockStore, ChainView,
    ConsensusConfig, ConsensusEngine, ConsensusError, CumulativeWorkForkChoice, ForkChoice,
    ImportOutcome, NonceMismatchKind, PeerProtocolError, StateView, TxKind, ValidationError,
};
pub use consensus::proposer::{Proposer, TxPool};

// Re-export storage backends.
pub use storage::{InMemoryBlockStore, RocksDbBlockStore, RocksDbConfig, StorageError};

// Re-export state and mempool types.
pub use mempool::Mempool;
pub use state::AccountStateStore;

// Re-export the mining entry point.
pub use miner::{mine, MineOutcome};

// Re-export metrics registry and consensus metrics.
pub use metrics::{run_prometheus_http_server, ConsensusMetrics, MetricsRegistry};

// Re-export domain types at the crate root for convenience.
pub use types::*;

// Re-export key material.
pub use crypto::{Hash256, KeyPair, PubKey, Sig};

/// Type alias for the default fork-choice rule.
pub type DefaultForkChoice = CumulativeWorkForkChoice;

/// Type alias for the default block store backend.
pub type DefaultBlockStore = RocksDbBlockStore;

/// Type alias for the default consensus engine stack: [`DefaultBlockStore`]
/// (RocksDB) with [`DefaultForkChoice`] (cumulative proof-of-work).
pub type DefaultConsensusEngine = ConsensusEngine<DefaultBlockStore, DefaultForkChoice>;
