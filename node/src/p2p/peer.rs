//! A single peer connection: a reader task, a writer task, and the handle
//! the rest of the node uses to send it messages and track its behavior.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::framing::{read_frame, write_frame, FramingError};
use super::message::Message;

/// Misbehavior score increments. Crossing the configured ban threshold
/// disconnects the peer.
pub mod penalty {
    pub const MALFORMED_MESSAGE: u32 = 20;
    pub const UNEXPECTED_MESSAGE: u32 = 10;
    pub const REQUEST_TIMEOUT: u32 = 5;
    pub const ANNOUNCED_INVALID: u32 = 50;
}

/// Handle to a connected peer, held by the [`super::manager::PeerManager`].
/// Cloning is cheap; every clone shares the same outbound queue and score.
#[derive(Clone)]
pub struct PeerHandle {
    pub addr: SocketAddr,
    outbound: mpsc::Sender<Message>,
    misbehavior: Arc<AtomicU32>,
}

impl PeerHandle {
    /// Queues `message` for delivery. Fails silently (logged by the caller)
    /// if the peer's writer task has already exited.
    pub fn send(&self, message: Message) -> Result<(), mpsc::error::TrySendError<Message>> {
        self.outbound.try_send(message)
    }

    pub fn misbehavior_score(&self) -> u32 {
        self.misbehavior.load(Ordering::Relaxed)
    }

    pub fn add_misbehavior(&self, amount: u32) -> u32 {
        self.misbehavior.fetch_add(amount, Ordering::Relaxed) + amount
    }
}

/// Events the reader task surfaces to the manager.
pub enum PeerEvent {
    Message(SocketAddr, Message),
    Disconnected(SocketAddr),
}

/// Splits `stream` into a reader and writer task, returning a handle for the
/// rest of the node plus a channel the manager reads incoming messages from.
/// Both tasks exit (and notify the manager of the disconnect) when the
/// connection closes or the outbound queue is dropped.
pub fn spawn_peer(
    addr: SocketAddr,
    stream: TcpStream,
    outbound_capacity: usize,
    events: mpsc::Sender<PeerEvent>,
) -> PeerHandle {
    let (read_half, write_half): (ReadHalf<TcpStream>, WriteHalf<TcpStream>) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(outbound_capacity);

    tokio::spawn(reader_task(addr, read_half, events));
    tokio::spawn(writer_task(write_half, rx));

    PeerHandle {
        addr,
        outbound: tx,
        misbehavior: Arc::new(AtomicU32::new(0)),
    }
}

async fn reader_task(addr: SocketAddr, mut reader: ReadHalf<TcpStream>, events: mpsc::Sender<PeerEvent>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(message)) => {
                if events.send(PeerEvent::Message(addr, message)).await.is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "framing error, closing connection");
                break;
            }
        }
    }
    let _ = events.send(PeerEvent::Disconnected(addr)).await;
}

async fn writer_task(mut writer: WriteHalf<TcpStream>, mut outbound: mpsc::Receiver<Message>) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &message).await {
            tracing::warn!(error = %e, "failed to write frame, dropping peer connection");
            return;
        }
    }
}

pub(crate) fn framing_error_penalty(_: &FramingError) -> u32 {
    penalty::MALFORMED_MESSAGE
}
