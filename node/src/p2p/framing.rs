//! Length-prefixed message framing over an async byte stream.
//!
//! Each frame is `[4-byte big-endian length][1-byte message tag][payload]`,
//! where `length` counts the tag byte plus the payload. The payload is the
//! canonical encoding (see `ledger_core::crypto`) of the message body for
//! that tag.

use ledger_core::crypto::to_canonical_bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::message::Message;

/// Frames above this size are refused outright rather than allocated for,
/// bounding the damage a misbehaving peer can do with a bogus length prefix.
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

#[derive(Debug)]
pub enum FramingError {
    FrameTooLarge { got: u32, max: u32 },
    Io(std::io::Error),
    Decode(serde_json::Error),
    UnknownTag(u8),
}

impl std::fmt::Display for FramingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramingError::FrameTooLarge { got, max } => {
                write!(f, "frame of {got} bytes exceeds the {max} byte limit")
            }
            FramingError::Io(e) => write!(f, "I/O error: {e}"),
            FramingError::Decode(e) => write!(f, "failed to decode message payload: {e}"),
            FramingError::UnknownTag(t) => write!(f, "unknown message tag {t}"),
        }
    }
}

impl std::error::Error for FramingError {}

impl From<std::io::Error> for FramingError {
    fn from(e: std::io::Error) -> Self {
        FramingError::Io(e)
    }
}

/// Writes one framed message to `writer`. The payload is the canonical
/// encoding of the variant's inner struct alone (the tag byte already
/// identifies which one it is, so the variant name itself is not repeated
/// in the payload).
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<(), FramingError> {
    let payload = match message {
        Message::Handshake(m) => to_canonical_bytes(m),
        Message::PeersRequest(m) => to_canonical_bytes(m),
        Message::PeersResponse(m) => to_canonical_bytes(m),
        Message::TxAnnounce(m) => to_canonical_bytes(m),
        Message::TxRequest(m) => to_canonical_bytes(m),
        Message::TxResponse(m) => to_canonical_bytes(m),
        Message::BlockAnnounce(m) => to_canonical_bytes(m),
        Message::BlockRequest(m) => to_canonical_bytes(m),
        Message::BlockResponse(m) => to_canonical_bytes(m),
        Message::SyncRequest(m) => to_canonical_bytes(m),
        Message::SyncResponse(m) => to_canonical_bytes(m),
    };
    let frame_len = 1u32 + payload.len() as u32;
    writer.write_all(&frame_len.to_be_bytes()).await?;
    writer.write_all(&[message.tag()]).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one framed message from `reader`. Returns `Ok(None)` on a clean EOF
/// at a frame boundary (peer closed the connection).
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Message>, FramingError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let frame_len = u32::from_be_bytes(len_buf);
    if frame_len == 0 || frame_len > MAX_FRAME_BYTES {
        return Err(FramingError::FrameTooLarge { got: frame_len, max: MAX_FRAME_BYTES });
    }

    let mut body = vec![0u8; frame_len as usize];
    reader.read_exact(&mut body).await?;
    let tag = body[0];
    let payload = &body[1..];

    decode_tagged(tag, payload).map(Some)
}

fn decode_tagged(tag: u8, payload: &[u8]) -> Result<Message, FramingError> {
    use super::message::*;
    let msg: Message = match tag {
        0 => Message::Handshake(serde_json::from_slice::<Handshake>(payload).map_err(FramingError::Decode)?),
        1 => Message::PeersRequest(serde_json::from_slice::<PeersRequest>(payload).map_err(FramingError::Decode)?),
        2 => Message::PeersResponse(serde_json::from_slice::<PeersResponse>(payload).map_err(FramingError::Decode)?),
        3 => Message::TxAnnounce(serde_json::from_slice::<TxAnnounce>(payload).map_err(FramingError::Decode)?),
        4 => Message::TxRequest(serde_json::from_slice::<TxRequest>(payload).map_err(FramingError::Decode)?),
        5 => Message::TxResponse(serde_json::from_slice::<TxResponse>(payload).map_err(FramingError::Decode)?),
        6 => Message::BlockAnnounce(serde_json::from_slice::<BlockAnnounce>(payload).map_err(FramingError::Decode)?),
        7 => Message::BlockRequest(serde_json::from_slice::<BlockRequest>(payload).map_err(FramingError::Decode)?),
        8 => Message::BlockResponse(serde_json::from_slice::<BlockResponse>(payload).map_err(FramingError::Decode)?),
        9 => Message::SyncRequest(serde_json::from_slice::<SyncRequest>(payload).map_err(FramingError::Decode)?),
        10 => Message::SyncResponse(serde_json::from_slice::<SyncResponse>(payload).map_err(FramingError::Decode)?),
        other => return Err(FramingError::UnknownTag(other)),
    };
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::message::{Handshake, PeersRequest};
    use ledger_core::{BlockHash, Hash256};

    #[tokio::test]
    async fn roundtrips_a_message_through_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let msg = Message::Handshake(Handshake {
            version: 1,
            height: 42,
            genesis_hash: BlockHash(Hash256::compute(b"genesis")),
        });
        write_frame(&mut a, &msg).await.unwrap();
        let got = read_frame(&mut b).await.unwrap().unwrap();
        match got {
            Message::Handshake(h) => {
                assert_eq!(h.version, 1);
                assert_eq!(h.height, 42);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn empty_payload_message_roundtrips() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &Message::PeersRequest(PeersRequest)).await.unwrap();
        let got = read_frame(&mut b).await.unwrap().unwrap();
        assert!(matches!(got, Message::PeersRequest(_)));
    }

    #[tokio::test]
    async fn clean_eof_at_frame_boundary_returns_none() {
        let (a, mut b) = tokio::io::duplex(16);
        drop(a);
        let got = read_frame(&mut b).await.unwrap();
        assert!(got.is_none());
    }
}
