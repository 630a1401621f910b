//! Node configuration.
//!
//! Aggregates everything a running node needs beyond the consensus-critical
//! parameters already carried by `ledger_core::LedgerConfig`: where to listen
//! for peers and RPC clients, who to dial on startup, and whether to mine.

use std::net::SocketAddr;
use std::path::PathBuf;

use ledger_core::LedgerConfig;

/// P2P transport configuration.
#[derive(Clone, Debug)]
pub struct P2pConfig {
    /// Address to accept inbound peer connections on.
    pub listen_addr: SocketAddr,
    /// Peers to dial on startup.
    pub bootstrap_peers: Vec<SocketAddr>,
    /// Maximum number of simultaneously connected peers.
    pub max_peers: usize,
    /// Maximum addresses exchanged in a single PEERS_RESPONSE.
    pub max_peers_per_response: usize,
    /// Maximum blocks returned in a single SYNC_RESPONSE.
    pub max_sync_batch: u64,
    /// Size of the recent-seen dedup cache (transactions and blocks).
    pub seen_cache_size: usize,
    /// Misbehavior score at which a peer is disconnected and temporarily banned.
    pub ban_threshold: u32,
    /// Timeout for an outbound request awaiting its response.
    pub request_timeout_secs: u64,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7600".parse().expect("hard-coded P2P listen address should parse"),
            bootstrap_peers: Vec::new(),
            max_peers: 32,
            max_peers_per_response: 32,
            max_sync_batch: 500,
            seen_cache_size: 10_000,
            ban_threshold: 100,
            request_timeout_secs: 10,
        }
    }
}

/// JSON-RPC HTTP surface configuration.
#[derive(Clone, Debug)]
pub struct RpcConfig {
    /// Address to bind the RPC HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8081".parse().expect("hard-coded RPC listen address should parse"),
        }
    }
}

/// Mining configuration. `enabled` with no `miner_pubkey_hex` is a
/// configuration error the node refuses to start with.
#[derive(Clone, Debug, Default)]
pub struct MiningConfig {
    pub enabled: bool,
    pub miner_pubkey_hex: Option<String>,
}

/// Top-level node configuration.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Directory holding the RocksDB store and any other on-disk state.
    pub data_dir: PathBuf,
    pub ledger: LedgerConfig,
    pub p2p: P2pConfig,
    pub rpc: RpcConfig,
    pub mining: MiningConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            ledger: LedgerConfig::default(),
            p2p: P2pConfig::default(),
            rpc: RpcConfig::default(),
            mining: MiningConfig::default(),
        }
    }
}
