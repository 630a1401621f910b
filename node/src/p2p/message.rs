//! Wire messages exchanged between peers.
//!
//! Every message is framed as a 4-byte big-endian length, a 1-byte message
//! type tag, then the canonical encoding (the same `serde_json`-via-sorted-
//! keys encoding `ledger_core::crypto` uses for hashing) of the payload. The
//! tag lets a reader pick the right payload type to deserialize into without
//! inspecting the bytes first.

use ledger_core::{Block, BlockHash, Hash256, Transaction};
use serde::{Deserialize, Serialize};

/// Maximum number of block hashes/heights accepted in a single
/// `PEERS_RESPONSE` / `SYNC_RESPONSE` before the sender is considered
/// misbehaving (actual cap applied is `min(requested, config value)`).
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Handshake {
    pub version: u32,
    pub height: u64,
    pub genesis_hash: BlockHash,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeersRequest;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeersResponse {
    pub addrs: Vec<std::net::SocketAddr>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxAnnounce {
    pub hash: Hash256,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxRequest {
    pub hash: Hash256,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxResponse {
    pub tx: Transaction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockAnnounce {
    pub hash: BlockHash,
    pub height: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockRequest {
    pub hash: BlockHash,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockResponse {
    pub block: Block,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncRequest {
    pub from_height: u64,
    pub to_height: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub blocks: Vec<Block>,
}

/// The full message set of the peer protocol. Variant order fixes each
/// message's 1-byte wire tag via [`Message::tag`]; it must never change
/// without bumping [`PROTOCOL_VERSION`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    Handshake(Handshake),
    PeersRequest(PeersRequest),
    PeersResponse(PeersResponse),
    TxAnnounce(TxAnnounce),
    TxRequest(TxRequest),
    TxResponse(TxResponse),
    BlockAnnounce(BlockAnnounce),
    BlockRequest(BlockRequest),
    BlockResponse(BlockResponse),
    SyncRequest(SyncRequest),
    SyncResponse(SyncResponse),
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::Handshake(_) => 0,
            Message::PeersRequest(_) => 1,
            Message::PeersResponse(_) => 2,
            Message::TxAnnounce(_) => 3,
            Message::TxRequest(_) => 4,
            Message::TxResponse(_) => 5,
            Message::BlockAnnounce(_) => 6,
            Message::BlockRequest(_) => 7,
            Message::BlockResponse(_) => 8,
            Message::SyncRequest(_) => 9,
            Message::SyncResponse(_) => 10,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Message::Handshake(_) => "HANDSHAKE",
            Message::PeersRequest(_) => "PEERS_REQUEST",
            Message::PeersResponse(_) => "PEERS_RESPONSE",
            Message::TxAnnounce(_) => "TX_ANNOUNCE",
            Message::TxRequest(_) => "TX_REQUEST",
            Message::TxResponse(_) => "TX_RESPONSE",
            Message::BlockAnnounce(_) => "BLOCK_ANNOUNCE",
            Message::BlockRequest(_) => "BLOCK_REQUEST",
            Message::BlockResponse(_) => "BLOCK_RESPONSE",
            Message::SyncRequest(_) => "SYNC_REQUEST",
            Message::SyncResponse(_) => "SYNC_RESPONSE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable_and_unique() {
        let msgs = [
            Message::Handshake(Handshake { version: 1, height: 0, genesis_hash: BlockHash(Hash256::zero()) }),
            Message::PeersRequest(PeersRequest),
            Message::PeersResponse(PeersResponse { addrs: vec![] }),
            Message::TxAnnounce(TxAnnounce { hash: Hash256::zero() }),
            Message::TxRequest(TxRequest { hash: Hash256::zero() }),
            Message::BlockAnnounce(BlockAnnounce { hash: BlockHash(Hash256::zero()), height: 0 }),
            Message::BlockRequest(BlockRequest { hash: BlockHash(Hash256::zero()) }),
            Message::SyncRequest(SyncRequest { from_height: 0, to_height: 1 }),
            Message::SyncResponse(SyncResponse { blocks: vec![] }),
        ];
        let mut tags: Vec<u8> = msgs.iter().map(Message::tag).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), msgs.len());
    }
}
