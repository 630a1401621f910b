//! Shared application state: the embedded consensus engine, mempool, peer
//! set, and the dispatch logic that turns incoming peer messages into
//! engine/mempool operations.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, Mutex};

use ledger_core::{
    BlockHash, BlockStore, ChainView, ConsensusEngine, ConsensusError, CumulativeWorkForkChoice,
    Hash256, Mempool, MetricsRegistry, RocksDbBlockStore, Transaction, ValidationError,
};

use crate::config::NodeConfig;
use crate::p2p::message::{
    BlockAnnounce, BlockRequest, BlockResponse, Handshake, Message, PeersResponse, SyncRequest,
    SyncResponse, TxAnnounce, TxRequest, TxResponse, PROTOCOL_VERSION,
};
use crate::p2p::peer::penalty;
use crate::p2p::sync::{plan_sync_batches, verify_handshake};
use crate::p2p::{PeerEvent, PeerManager};

pub type Engine = ConsensusEngine<RocksDbBlockStore, CumulativeWorkForkChoice>;

/// Per-peer sync bookkeeping: the height they last reported, so we know
/// whether to keep pulling sync batches from them.
struct PeerSyncState {
    reported_height: u64,
}

pub struct AppState {
    pub engine: Mutex<Engine>,
    pub mempool: Mutex<Mempool>,
    pub peers: Arc<PeerManager>,
    pub metrics: Arc<MetricsRegistry>,
    pub genesis_hash: BlockHash,
    pub cfg: NodeConfig,
    sync_state: Mutex<HashMap<SocketAddr, PeerSyncState>>,
    /// Published every time the active tip changes, carrying a
    /// monotonically increasing generation counter. The miner subscribes
    /// to this to notice mid-search that its candidate is stale (spec
    /// §4.4 step 5's "publish a tip-changed event to subscribers", and
    /// §4.6/§5's tip-change abort signal).
    tip_version: watch::Sender<u64>,
}

impl AppState {
    pub fn new(
        cfg: NodeConfig,
        engine: Engine,
        mempool: Mempool,
        peers: Arc<PeerManager>,
        metrics: Arc<MetricsRegistry>,
        genesis_hash: BlockHash,
    ) -> Arc<Self> {
        let (tip_version, _) = watch::channel(0);
        Arc::new(Self {
            engine: Mutex::new(engine),
            mempool: Mutex::new(mempool),
            peers,
            metrics,
            genesis_hash,
            cfg,
            sync_state: Mutex::new(HashMap::new()),
            tip_version,
        })
    }

    pub fn now(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }

    /// Subscribes to tip-change notifications; the miner uses this as its
    /// abort signal for an in-progress proof-of-work search.
    pub fn subscribe_tip_changes(&self) -> watch::Receiver<u64> {
        self.tip_version.subscribe()
    }

    fn announce_tip_change(&self) {
        self.tip_version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Re-offers transactions orphaned by a reorg to the mempool (spec
    /// §4.4 step 4). Each is independently re-validated against the new
    /// tip's state; ones that no longer apply (stale nonce, insufficient
    /// balance) are silently dropped, same as ordinary admission.
    async fn reinject_orphaned(&self, txs: Vec<Transaction>) {
        if txs.is_empty() {
            return;
        }
        let total = txs.len();
        let mut reinjected = 0usize;
        {
            let engine = self.engine.lock().await;
            let chain_view = self.chain_view(&engine);
            let mut mempool = self.mempool.lock().await;
            for tx in txs {
                if mempool.insert(tx, engine.state(), &chain_view).is_ok() {
                    reinjected += 1;
                }
            }
        }
        tracing::info!(reinjected, total, "reorg: re-offered orphaned transactions to mempool");
        self.metrics.consensus.mempool_size.set(self.mempool.lock().await.len() as i64);
    }

    /// Drops mempool entries that no longer validate against the current
    /// tip (spec §4.5: re-validate on every tip change).
    async fn revalidate_mempool(&self) {
        let engine = self.engine.lock().await;
        let chain_view = self.chain_view(&engine);
        self.mempool.lock().await.revalidate(engine.state(), &chain_view);
    }

    /// Applies the side effects of a successful `import_block` that didn't
    /// come from the P2P dispatch loop (namely, the miner's own freshly
    /// mined block). Mirrors `on_block_response`'s bookkeeping: confirmed
    /// mempool removal is the caller's job since it already has `block`.
    pub(crate) async fn on_own_block_imported(&self, outcome: &ledger_core::ImportOutcome) {
        self.metrics.consensus.blocks_validated_total.inc();
        if outcome.reorged {
            self.metrics.consensus.reorgs_total.inc();
            self.metrics.consensus.reorg_depth.observe(outcome.reorg_depth as f64);
            self.reinject_orphaned(outcome.orphaned_txs.clone()).await;
        }
        self.revalidate_mempool().await;
        if let Some(h) = self.engine.lock().await.tip_header() {
            self.metrics.consensus.tip_height.set(h.height as i64);
        }
        self.announce_tip_change();
    }

    async fn local_handshake(&self) -> Handshake {
        let engine = self.engine.lock().await;
        Handshake {
            version: PROTOCOL_VERSION,
            height: engine.tip_header().map(|h| h.height).unwrap_or(0),
            genesis_hash: self.genesis_hash,
        }
    }

    /// Drives the peer-event loop forever. Intended to be the body of a
    /// single dedicated task; `next_event` already serializes access.
    pub async fn run_event_loop(self: Arc<Self>) {
        loop {
            match self.peers.next_event().await {
                Some(PeerEvent::Message(addr, msg)) => {
                    self.clone().handle_message(addr, msg).await;
                }
                Some(PeerEvent::Disconnected(addr)) => {
                    self.peers.remove_disconnected(addr).await;
                    self.sync_state.lock().await.remove(&addr);
                }
                None => return,
            }
        }
    }

    async fn handle_message(self: Arc<Self>, addr: SocketAddr, msg: Message) {
        match msg {
            Message::Handshake(remote) => self.on_handshake(addr, remote).await,
            Message::PeersRequest(_) => self.on_peers_request(addr).await,
            Message::PeersResponse(m) => self.on_peers_response(m).await,
            Message::TxAnnounce(m) => self.on_tx_announce(addr, m).await,
            Message::TxRequest(m) => self.on_tx_request(addr, m).await,
            Message::TxResponse(m) => self.on_tx_response(addr, m).await,
            Message::BlockAnnounce(m) => self.on_block_announce(addr, m).await,
            Message::BlockRequest(m) => self.on_block_request(addr, m).await,
            Message::BlockResponse(m) => self.on_block_response(addr, m).await,
            Message::SyncRequest(m) => self.on_sync_request(addr, m).await,
            Message::SyncResponse(m) => self.on_sync_response(addr, m).await,
        }
    }

    async fn on_handshake(self: Arc<Self>, addr: SocketAddr, remote: Handshake) {
        let local = self.local_handshake().await;
        if let Err(e) = verify_handshake(&local, &remote) {
            tracing::warn!(peer = %addr, error = %e, "handshake rejected");
            self.peers.record_misbehavior(addr, penalty::UNEXPECTED_MESSAGE).await;
            self.peers.disconnect(addr).await;
            return;
        }

        self.sync_state.lock().await.insert(addr, PeerSyncState { reported_height: remote.height });

        if remote.height > local.height {
            self.request_next_sync_batch(addr, local.height, remote.height).await;
        }
    }

    async fn request_next_sync_batch(&self, addr: SocketAddr, local_height: u64, peer_height: u64) {
        let batches = plan_sync_batches(local_height, peer_height, self.cfg.p2p.max_sync_batch);
        if let Some((from, to)) = batches.into_iter().next() {
            self.peers.send_to(addr, Message::SyncRequest(SyncRequest { from_height: from, to_height: to })).await;
        }
    }

    async fn on_peers_request(&self, addr: SocketAddr) {
        let addrs = self.peers.connected_addrs(self.cfg.p2p.max_peers_per_response).await;
        self.peers.send_to(addr, Message::PeersResponse(PeersResponse { addrs })).await;
    }

    async fn on_peers_response(self: Arc<Self>, m: PeersResponse) {
        for addr in m.addrs {
            if addr == self.peers.local_addr() {
                continue;
            }
            let peers = self.peers.clone();
            tokio::spawn(async move {
                if let Err(e) = peers.connect(addr).await {
                    tracing::debug!(peer = %addr, error = %e, "failed to connect to gossiped peer");
                }
            });
        }
    }

    async fn on_tx_announce(&self, addr: SocketAddr, m: TxAnnounce) {
        let already_pending = self.mempool.lock().await.contains(&m.hash);
        if !already_pending {
            self.peers.send_to(addr, Message::TxRequest(TxRequest { hash: m.hash })).await;
        }
    }

    async fn on_tx_request(&self, addr: SocketAddr, m: TxRequest) {
        let mempool = self.mempool.lock().await;
        if let Some(tx) = mempool.get(&m.hash) {
            self.peers.send_to(addr, Message::TxResponse(TxResponse { tx: tx.clone() })).await;
        }
    }

    async fn on_tx_response(self: Arc<Self>, addr: SocketAddr, m: TxResponse) {
        let hash = m.tx.tx_hash();
        let accepted = {
            let engine = self.engine.lock().await;
            let chain_view = self.chain_view(&engine);
            let mut mempool = self.mempool.lock().await;
            mempool.insert(m.tx, engine.state(), &chain_view).is_ok()
        };

        if accepted {
            self.metrics.consensus.mempool_size.set(self.mempool.lock().await.len() as i64);
            if self.peers.mark_seen(hash).await {
                self.peers.broadcast(Message::TxAnnounce(TxAnnounce { hash }), Some(addr)).await;
            }
        } else {
            self.peers.record_misbehavior(addr, penalty::ANNOUNCED_INVALID).await;
        }
    }

    async fn on_block_announce(&self, addr: SocketAddr, m: BlockAnnounce) {
        let known = self.engine.lock().await.store().contains(&m.hash);
        if !known {
            self.peers.send_to(addr, Message::BlockRequest(BlockRequest { hash: m.hash })).await;
        }
    }

    async fn on_block_request(&self, addr: SocketAddr, m: BlockRequest) {
        let block = self.engine.lock().await.store().get_block(&m.hash);
        if let Some(block) = block {
            self.peers.send_to(addr, Message::BlockResponse(BlockResponse { block })).await;
        }
    }

    async fn on_block_response(self: Arc<Self>, addr: SocketAddr, m: BlockResponse) {
        let hash = m.block.block_hash();
        let now = self.now();
        let result = self.engine.lock().await.import_block(m.block.clone(), now);
        match result {
            Ok(outcome) => {
                self.mempool.lock().await.remove_confirmed(&m.block.txs);
                self.metrics.consensus.blocks_validated_total.inc();
                if outcome.reorged {
                    self.metrics.consensus.reorgs_total.inc();
                    self.metrics.consensus.reorg_depth.observe(outcome.reorg_depth as f64);
                    self.reinject_orphaned(outcome.orphaned_txs).await;
                }
                self.revalidate_mempool().await;
                if let Some(h) = self.engine.lock().await.tip_header() {
                    self.metrics.consensus.tip_height.set(h.height as i64);
                }
                self.announce_tip_change();
                if self.peers.mark_seen(hash).await {
                    self.peers
                        .broadcast(Message::BlockAnnounce(BlockAnnounce { hash, height: m.block.header.height }), Some(addr))
                        .await;
                }
            }
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "rejected block");
                self.metrics.consensus.blocks_rejected_total.with_label_values(&[rejection_label(&e)]).inc();
                self.peers.record_misbehavior(addr, penalty::ANNOUNCED_INVALID).await;
            }
        }
    }

    async fn on_sync_request(&self, addr: SocketAddr, m: SyncRequest) {
        let cap = self.cfg.p2p.max_sync_batch;
        let to_height = m.to_height.min(m.from_height.saturating_add(cap.saturating_sub(1)));

        let engine = self.engine.lock().await;
        let Some(mut header) = engine.tip_header() else {
            self.peers.send_to(addr, Message::SyncResponse(SyncResponse { blocks: Vec::new() })).await;
            return;
        };

        let mut blocks = Vec::new();
        loop {
            if header.height < m.from_height {
                break;
            }
            if header.height <= to_height {
                if let Some(block) = engine.store().get_block(&header.block_hash()) {
                    blocks.push(block);
                }
            }
            if header.height == 0 {
                break;
            }
            match engine.store().get_block(&header.prev_hash) {
                Some(parent) => header = parent.header,
                None => break,
            }
        }
        blocks.reverse();
        drop(engine);
        self.peers.send_to(addr, Message::SyncResponse(SyncResponse { blocks })).await;
    }

    async fn on_sync_response(self: Arc<Self>, addr: SocketAddr, m: SyncResponse) {
        let count = m.blocks.len();
        let now = self.now();
        for block in m.blocks {
            let height = block.header.height;
            match self.engine.lock().await.import_block(block, now) {
                Ok(outcome) => {
                    if outcome.reorged {
                        self.metrics.consensus.reorgs_total.inc();
                        self.metrics.consensus.reorg_depth.observe(outcome.reorg_depth as f64);
                        self.reinject_orphaned(outcome.orphaned_txs).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = %addr, height, error = %e, "sync block rejected, stopping this batch");
                    self.peers.record_misbehavior(addr, penalty::ANNOUNCED_INVALID).await;
                    return;
                }
            }
        }
        if count > 0 {
            self.revalidate_mempool().await;
            self.announce_tip_change();
        }
        if let Some(h) = self.engine.lock().await.tip_header() {
            self.metrics.consensus.tip_height.set(h.height as i64);
        }

        let (local_height, peer_height) = {
            let local_height = self.engine.lock().await.tip_header().map(|h| h.height).unwrap_or(0);
            let peer_height = self.sync_state.lock().await.get(&addr).map(|s| s.reported_height).unwrap_or(0);
            (local_height, peer_height)
        };
        if count > 0 && local_height < peer_height {
            self.request_next_sync_batch(addr, local_height, peer_height).await;
        }
    }

    pub(crate) fn chain_view<'a>(&self, engine: &'a Engine) -> impl ChainView + 'a {
        EngineChainView { engine, now: self.now() }
    }

    /// Walks the active chain from the tip looking for a confirmed
    /// transaction by content hash. Does not consult the mempool.
    pub(crate) async fn find_confirmed_tx(&self, hash: &Hash256) -> Option<Transaction> {
        let engine = self.engine.lock().await;
        let mut current = engine.tip()?;
        loop {
            let block = engine.store().get_block(&current)?;
            if let Some(tx) = block.txs.iter().find(|tx| &tx.tx_hash() == hash) {
                return Some(tx.clone());
            }
            if block.header.height == 0 {
                return None;
            }
            current = block.header.prev_hash;
        }
    }
}

/// Adapts a live [`Engine`] (borrowed from [`AppState`]) into a
/// [`ChainView`] rooted at its current active tip, for mempool admission
/// checks made outside the engine's own `import_block` path.
struct EngineChainView<'a> {
    engine: &'a Engine,
    now: u64,
}

impl<'a> ChainView for EngineChainView<'a> {
    fn confirmed_tx_kind(&self, hash: &ledger_core::Hash256) -> Option<ledger_core::TxKind> {
        let mut current = self.engine.tip()?;
        loop {
            let block = self.engine.store().get_block(&current)?;
            if let Some(tx) = block.txs.iter().find(|tx| &tx.tx_hash() == hash) {
                return Some(ledger_core::TxKind::from(tx));
            }
            if block.header.height == 0 {
                return None;
            }
            current = block.header.prev_hash;
        }
    }

    fn header_by_hash(&self, hash: &BlockHash) -> Option<ledger_core::Header> {
        self.engine.store().get_block(hash).map(|b| b.header)
    }

    fn timestamp_at_height(&self, height: u64) -> Option<u64> {
        let mut current = self.engine.tip()?;
        loop {
            let block = self.engine.store().get_block(&current)?;
            if block.header.height == height {
                return Some(block.header.timestamp);
            }
            if block.header.height == 0 {
                return None;
            }
            current = block.header.prev_hash;
        }
    }

    fn wall_clock_now(&self) -> u64 {
        self.now
    }
}

/// Stable, low-cardinality label for the `consensus_blocks_rejected_total`
/// metric. Deliberately coarser than [`ConsensusError`]'s `Display` text,
/// which embeds free-form detail not suited to a metric label.
fn rejection_label(err: &ConsensusError) -> &'static str {
    match err {
        ConsensusError::Validation(v) => match v {
            ValidationError::MalformedEncoding => "malformed_encoding",
            ValidationError::InvalidSignature => "invalid_signature",
            ValidationError::NonceMismatch(_) => "nonce_mismatch",
            ValidationError::InsufficientBalance => "insufficient_balance",
            ValidationError::FeeBelowMinimum => "fee_below_minimum",
            ValidationError::ReferenceNotFound => "reference_not_found",
            ValidationError::ReferenceWrongKind => "reference_wrong_kind",
            ValidationError::LimitExceeded(_) => "limit_exceeded",
            ValidationError::ConsensusViolation(_) => "consensus_violation",
            ValidationError::UnknownParent => "unknown_parent",
            ValidationError::ReorgTooDeep => "reorg_too_deep",
        },
        ConsensusError::Storage(_) => "storage",
        ConsensusError::PeerProtocol(_) => "peer_protocol",
        ConsensusError::Other(_) => "other",
    }
}
