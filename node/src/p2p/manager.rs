//! Peer set management: connection bookkeeping, the recent-seen gossip
//! dedup cache, and misbehavior scoring / bans.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use ledger_core::Hash256;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};

use super::message::Message;
use super::peer::{spawn_peer, PeerEvent, PeerHandle};

/// Bounded FIFO set used to avoid re-gossiping the same transaction or block
/// to a peer more than once. Oldest entries fall off once `capacity` is
/// exceeded.
struct SeenCache {
    capacity: usize,
    order: VecDeque<Hash256>,
    set: HashSet<Hash256>,
}

impl SeenCache {
    fn new(capacity: usize) -> Self {
        Self { capacity, order: VecDeque::with_capacity(capacity), set: HashSet::with_capacity(capacity) }
    }

    /// Returns `true` if `hash` had not been seen before (and records it).
    fn insert(&mut self, hash: Hash256) -> bool {
        if !self.set.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }
}

/// A connected (or since-disconnected) peer's address and its banned-until
/// misbehavior state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerStatus {
    Connected,
    Banned,
}

/// Owns the live peer set, the recent-seen dedup cache, and misbehavior
/// scores. Does not interpret message contents: that is the caller's job,
/// driven by [`PeerManager::next_event`].
pub struct PeerManager {
    local_addr: SocketAddr,
    max_peers: usize,
    ban_threshold: u32,
    peers: RwLock<HashMap<SocketAddr, PeerHandle>>,
    banned: RwLock<HashSet<SocketAddr>>,
    seen: Mutex<SeenCache>,
    events_tx: mpsc::Sender<PeerEvent>,
    events_rx: Mutex<mpsc::Receiver<PeerEvent>>,
}

impl PeerManager {
    pub fn new(local_addr: SocketAddr, max_peers: usize, seen_cache_size: usize, ban_threshold: u32) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(1024);
        Arc::new(Self {
            local_addr,
            max_peers,
            ban_threshold,
            peers: RwLock::new(HashMap::new()),
            banned: RwLock::new(HashSet::new()),
            seen: Mutex::new(SeenCache::new(seen_cache_size)),
            events_tx,
            events_rx: Mutex::new(events_rx),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts inbound connections on `listener` until it errors out.
    pub async fn run_accept_loop(self: &Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    self.clone().on_connected(addr, stream).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept() failed");
                }
            }
        }
    }

    /// Dials `addr` and registers the resulting connection.
    pub async fn connect(self: &Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        if self.banned.read().await.contains(&addr) {
            return Ok(());
        }
        let stream = TcpStream::connect(addr).await?;
        self.clone().on_connected(addr, stream).await;
        Ok(())
    }

    /// Registers a connection, inbound or outbound. Refuses banned
    /// addresses (a banned peer must not simply re-dial in) and a
    /// peer set that is already at capacity.
    async fn on_connected(self: Arc<Self>, addr: SocketAddr, stream: TcpStream) {
        if self.banned.read().await.contains(&addr) {
            tracing::debug!(peer = %addr, "refusing connection: peer is banned");
            return;
        }
        if self.peers.read().await.len() >= self.max_peers {
            tracing::debug!(peer = %addr, "refusing connection: peer set is full");
            return;
        }
        let handle = spawn_peer(addr, stream, 256, self.events_tx.clone());
        self.peers.write().await.insert(addr, handle);
        tracing::info!(peer = %addr, "peer connected");
    }

    /// Pulls the next peer event (incoming message or disconnect). There
    /// should be exactly one caller driving this loop.
    pub async fn next_event(&self) -> Option<PeerEvent> {
        self.events_rx.lock().await.recv().await
    }

    pub async fn send_to(&self, addr: SocketAddr, message: Message) {
        if let Some(handle) = self.peers.read().await.get(&addr) {
            if handle.send(message).is_err() {
                tracing::debug!(peer = %addr, "outbound queue full or closed");
            }
        }
    }

    /// Sends `message` to every connected peer except `exclude`.
    pub async fn broadcast(&self, message: Message, exclude: Option<SocketAddr>) {
        let peers = self.peers.read().await;
        for (addr, handle) in peers.iter() {
            if Some(*addr) == exclude {
                continue;
            }
            if handle.send(message.clone()).is_err() {
                tracing::debug!(peer = %addr, "outbound queue full or closed during broadcast");
            }
        }
    }

    pub async fn connected_addrs(&self, limit: usize) -> Vec<SocketAddr> {
        self.peers.read().await.keys().take(limit).copied().collect()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Records that `hash` was just gossiped/received. Returns `true` the
    /// first time a given hash is seen, `false` on every subsequent call -
    /// callers use this to implement "propagate at most once".
    pub async fn mark_seen(&self, hash: Hash256) -> bool {
        self.seen.lock().await.insert(hash)
    }

    pub async fn disconnect(&self, addr: SocketAddr) {
        self.peers.write().await.remove(&addr);
    }

    /// Adds `amount` to `addr`'s misbehavior score, banning and
    /// disconnecting it if the configured threshold is crossed. Returns
    /// `true` if the peer was banned as a result.
    pub async fn record_misbehavior(&self, addr: SocketAddr, amount: u32) -> bool {
        let score = {
            let peers = self.peers.read().await;
            match peers.get(&addr) {
                Some(handle) => handle.add_misbehavior(amount),
                None => return false,
            }
        };
        if score >= self.ban_threshold {
            tracing::warn!(peer = %addr, score, "peer exceeded misbehavior threshold, banning");
            self.banned.write().await.insert(addr);
            self.disconnect(addr).await;
            true
        } else {
            false
        }
    }

    pub async fn remove_disconnected(&self, addr: SocketAddr) {
        self.peers.write().await.remove(&addr);
        tracing::info!(peer = %addr, "peer disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn banned_peer_is_refused_on_the_accept_path() {
        let manager = PeerManager::new("127.0.0.1:0".parse().unwrap(), 8, 64, 3);
        let addr: SocketAddr = "203.0.113.1:4000".parse().unwrap();
        manager.banned.write().await.insert(addr);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let accept = tokio::spawn({
            let manager = manager.clone();
            async move {
                let (stream, _) = listener.accept().await.unwrap();
                manager.on_connected(addr, stream).await;
            }
        });
        let _client = tokio::net::TcpStream::connect(local).await.unwrap();
        accept.await.unwrap();

        assert_eq!(manager.peer_count().await, 0);
    }

    #[test]
    fn seen_cache_deduplicates_and_evicts_oldest() {
        let mut cache = SeenCache::new(2);
        let a = Hash256::compute(b"a");
        let b = Hash256::compute(b"b");
        let c = Hash256::compute(b"c");

        assert!(cache.insert(a));
        assert!(!cache.insert(a));
        assert!(cache.insert(b));
        assert!(cache.insert(c));
        // `a` should have been evicted to make room for `c`.
        assert!(cache.insert(a));
    }
}
