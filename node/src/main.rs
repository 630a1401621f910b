//! Node binary.
//!
//! Wires together the consensus engine, the peer-to-peer transport, the
//! mempool, a JSON RPC surface, an optional miner task, and a Prometheus
//! metrics exporter:
//!
//! - `GET /health`
//! - `POST /tx`, `GET /tx/:hash`
//! - `GET /block/latest`, `GET /block/:hash`, `GET /block/:hash/merkle-proof/:index`
//! - `GET /account/:pubkey`, `GET /account/:pubkey/state-proof`
//! - `GET /mempool`

mod config;
mod p2p;
mod routes;
mod state;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{routing::get, routing::post, Router};
use tokio::signal;

use ledger_core::{
    genesis_block, mine, Account, BlockStore, ChainView, ConsensusEngine, CumulativeWorkForkChoice,
    Header, Mempool, MetricsRegistry, MineOutcome, PubKey, RocksDbBlockStore, RocksDbConfig,
    StateView, Transaction, TxPool,
};

use config::NodeConfig;
use p2p::PeerManager;
use routes::{health, ledger};
use state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "node=info,ledger_core=info".to_string()))
        .init();

    if let Err(e) = run().await {
        eprintln!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let cfg = NodeConfig::default();

    // ---------------------------
    // Metrics
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new().map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );

    if cfg.ledger.metrics.enabled {
        let metrics_clone = metrics.clone();
        let addr = cfg.ledger.metrics.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = ledger_core::run_prometheus_http_server(metrics_clone, addr).await {
                eprintln!("metrics HTTP server error: {e}");
            }
        });
        tracing::info!("metrics exporter listening on http://{}/metrics", addr);
    }

    // ---------------------------
    // Storage + consensus engine
    // ---------------------------

    let store_cfg = RocksDbConfig {
        path: cfg.data_dir.join("chain").to_string_lossy().into_owned(),
        ..cfg.ledger.storage.clone()
    };
    let mut store = RocksDbBlockStore::open(&store_cfg)
        .map_err(|e| format!("failed to open RocksDB store at {}: {e:?}", store_cfg.path))?;

    let genesis = genesis_block(&cfg.ledger.consensus);
    let genesis_hash = genesis.block_hash();
    if store.tip().is_none() {
        store.put_block(genesis.clone());
        store.set_tip(genesis_hash);
        tracing::info!(hash = %genesis_hash.0.to_hex(), "initialised fresh chain from genesis");
    }

    let fork_choice = CumulativeWorkForkChoice::default();
    let mut engine: ConsensusEngine<RocksDbBlockStore, CumulativeWorkForkChoice> =
        ConsensusEngine::new(cfg.ledger.consensus.clone(), store, fork_choice);

    // The account state store is in-memory only; rebuild it from the
    // persisted chain before serving any queries or mining.
    engine.rebuild_state_to_tip();

    let mempool = Mempool::new(cfg.ledger.consensus.clone());

    // ---------------------------
    // Peer-to-peer transport
    // ---------------------------

    let peers = PeerManager::new(
        cfg.p2p.listen_addr,
        cfg.p2p.max_peers,
        cfg.p2p.seen_cache_size,
        cfg.p2p.ban_threshold,
    );

    let listener = tokio::net::TcpListener::bind(cfg.p2p.listen_addr)
        .await
        .map_err(|e| format!("failed to bind p2p listener on {}: {e}", cfg.p2p.listen_addr))?;
    {
        let peers = peers.clone();
        tokio::spawn(async move {
            peers.run_accept_loop(listener).await;
        });
    }
    tracing::info!("p2p listening on {}", cfg.p2p.listen_addr);

    for addr in cfg.p2p.bootstrap_peers.clone() {
        let peers = peers.clone();
        tokio::spawn(async move {
            if let Err(e) = peers.connect(addr).await {
                tracing::warn!(peer = %addr, error = %e, "failed to connect to bootstrap peer");
            }
        });
    }

    // ---------------------------
    // Shared state + event loop
    // ---------------------------

    let app_state = AppState::new(cfg.clone(), engine, mempool, peers, metrics, genesis_hash);

    {
        let app_state = app_state.clone();
        tokio::spawn(async move {
            app_state.run_event_loop().await;
        });
    }

    // ---------------------------
    // Miner
    // ---------------------------

    if cfg.mining.enabled {
        let miner_pubkey = cfg
            .mining
            .miner_pubkey_hex
            .as_deref()
            .ok_or_else(|| "mining.enabled is set but mining.miner_pubkey_hex is missing".to_string())
            .and_then(|hex_str| {
                PubKey::from_hex(hex_str).map_err(|e| format!("invalid mining.miner_pubkey_hex: {e:?}"))
            })?;

        let app_state = app_state.clone();
        tokio::spawn(async move {
            run_miner(app_state, miner_pubkey).await;
        });
    }

    // ---------------------------
    // RPC HTTP router
    // ---------------------------

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/tx", post(ledger::submit_transaction))
        .route("/tx/{hash}", get(ledger::get_transaction))
        .route("/block/latest", get(ledger::get_latest_block))
        .route("/block/{hash}", get(ledger::get_block))
        .route("/block/{hash}/merkle-proof/{index}", get(ledger::get_merkle_proof))
        .route("/account/{pubkey}", get(ledger::get_account))
        .route("/account/{pubkey}/state-proof", get(ledger::get_state_proof))
        .route("/mempool", get(ledger::get_mempool))
        .with_state(app_state);

    tracing::info!("RPC listening on http://{}", cfg.rpc.listen_addr);

    let rpc_listener = tokio::net::TcpListener::bind(cfg.rpc.listen_addr)
        .await
        .map_err(|e| format!("failed to bind {}: {e}", cfg.rpc.listen_addr))?;

    axum::serve(rpc_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("RPC server error: {e}"))?;

    Ok(())
}

/// Owned, point-in-time snapshot of the data a mining attempt needs,
/// taken under the engine lock so the CPU-bound search itself can run on
/// a blocking thread without holding the lock.
struct MiningSnapshot {
    parent: Option<Header>,
    accounts: BTreeMap<PubKey, Account>,
    recent_timestamps: BTreeMap<u64, u64>,
}

struct SnapshotState<'a>(&'a BTreeMap<PubKey, Account>);
impl<'a> StateView for SnapshotState<'a> {
    fn account(&self, pubkey: &PubKey) -> Account {
        self.0.get(pubkey).copied().unwrap_or_default()
    }
    fn snapshot(&self) -> BTreeMap<PubKey, Account> {
        self.0.clone()
    }
}

struct SnapshotChain<'a> {
    recent_timestamps: &'a BTreeMap<u64, u64>,
    now: u64,
}
impl<'a> ChainView for SnapshotChain<'a> {
    fn confirmed_tx_kind(&self, _hash: &ledger_core::Hash256) -> Option<ledger_core::TxKind> {
        None
    }
    fn header_by_hash(&self, _hash: &ledger_core::BlockHash) -> Option<Header> {
        None
    }
    fn timestamp_at_height(&self, height: u64) -> Option<u64> {
        self.recent_timestamps.get(&height).copied()
    }
    fn wall_clock_now(&self) -> u64 {
        self.now
    }
}

/// Background proof-of-work loop: snapshots the tip, mines a candidate on
/// a blocking thread, and imports the result if the tip hasn't moved on
/// in the meantime.
async fn run_miner(state: Arc<AppState>, miner: PubKey) {
    tracing::info!(miner = %miner.to_hex(), "miner task starting");
    loop {
        let cfg = state.cfg.ledger.consensus.clone();

        let snapshot = {
            let engine = state.engine.lock().await;
            let parent = engine.tip_header();
            let accounts = engine.state().snapshot();

            let mut recent_timestamps = BTreeMap::new();
            if let Some(p) = &parent {
                let window = cfg.retarget_window + 2;
                let mut header = p.clone();
                loop {
                    recent_timestamps.insert(header.height, header.timestamp);
                    if header.height == 0 || recent_timestamps.len() as u64 > window {
                        break;
                    }
                    match engine.store().get_block(&header.prev_hash) {
                        Some(block) => header = block.header,
                        None => break,
                    }
                }
            }

            MiningSnapshot { parent, accounts, recent_timestamps }
        };

        let tip_before = state.engine.lock().await.tip();

        // Pre-select a fee-ordered batch under the mempool lock; the mining
        // search itself runs on a blocking thread without holding it.
        let body_budget = cfg.max_block_size_bytes.saturating_sub(512);
        let candidate_txs = state.mempool.lock().await.select_for_block(body_budget);

        // Aborts the in-progress search as soon as the active tip changes
        // underneath it (spec §4.6: "abandon the candidate and restart").
        let mut tip_rx = state.subscribe_tip_changes();
        let outcome = tokio::task::spawn_blocking(move || {
            let placeholder_store = ledger_core::InMemoryBlockStore::new();
            let now_fn = || {
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs()
            };
            let mut pool = VecTxPool(candidate_txs);
            mine(
                &cfg,
                &placeholder_store,
                &SnapshotState(&snapshot.accounts),
                &SnapshotChain { recent_timestamps: &snapshot.recent_timestamps, now: now_fn() },
                snapshot.parent.as_ref(),
                miner,
                &mut pool,
                now_fn,
                move || tip_rx.has_changed().unwrap_or(true),
            )
        })
        .await;

        match outcome {
            Ok(MineOutcome::Found(block)) => {
                let still_current_tip = state.engine.lock().await.tip() == tip_before;
                if !still_current_tip {
                    tracing::debug!("discarding mined block: tip moved on while mining");
                    continue;
                }
                let now = state.now();
                let hash = block.block_hash();
                let height = block.header.height;
                let import_result = state.engine.lock().await.import_block(block.clone(), now);
                match import_result {
                    Ok(outcome) => {
                        state.mempool.lock().await.remove_confirmed(&block.txs);
                        state.on_own_block_imported(&outcome).await;
                        tracing::info!(height, hash = %hash.0.to_hex(), "mined block");
                        if state.peers.mark_seen(hash.0).await {
                            state
                                .peers
                                .broadcast(
                                    p2p::Message::BlockAnnounce(p2p::message::BlockAnnounce { hash, height }),
                                    None,
                                )
                                .await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "mined block rejected by own engine");
                    }
                }
            }
            Ok(MineOutcome::Aborted) => {}
            Err(e) => {
                tracing::error!(error = %e, "miner task panicked");
            }
        }
    }
}

/// Wraps an already fee-selected batch of transactions so it can be handed
/// to [`Proposer::build_candidate`][ledger_core::Proposer::build_candidate]
/// (via [`mine`]) as a `TxPool` without re-selecting on the blocking thread.
struct VecTxPool(Vec<Transaction>);
impl TxPool for VecTxPool {
    fn select_for_block(&mut self, _max_bytes: usize) -> Vec<Transaction> {
        std::mem::take(&mut self.0)
    }
}

/// Waits for Ctrl-C and returns, used for graceful shutdown.
async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
