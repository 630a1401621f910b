//! Initial sync and handshake verification.
//!
//! The message set only carries full blocks (`SYNC_RESPONSE(block[])`), so
//! sync here pulls and validates whole blocks in capped batches rather than
//! a separate headers-then-bodies phase; each batch is validated and
//! applied in order before the next is requested, which gives the same
//! "verify cheaply before committing to more work" property against bad
//! peers without a second message type.

use ledger_core::BlockHash;

use super::message::Handshake;

#[derive(Debug, PartialEq, Eq)]
pub enum HandshakeError {
    VersionMismatch { local: u32, remote: u32 },
    GenesisMismatch { local: BlockHash, remote: BlockHash },
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeError::VersionMismatch { local, remote } => {
                write!(f, "protocol version mismatch: local={local} remote={remote}")
            }
            HandshakeError::GenesisMismatch { local, remote } => {
                write!(f, "genesis hash mismatch: local={local} remote={remote}")
            }
        }
    }
}

/// Validates an incoming handshake against this node's own genesis and
/// protocol version. A mismatch on either must cause an immediate
/// disconnect per the protocol.
pub fn verify_handshake(local: &Handshake, remote: &Handshake) -> Result<(), HandshakeError> {
    if local.version != remote.version {
        return Err(HandshakeError::VersionMismatch { local: local.version, remote: remote.version });
    }
    if local.genesis_hash != remote.genesis_hash {
        return Err(HandshakeError::GenesisMismatch { local: local.genesis_hash, remote: remote.genesis_hash });
    }
    Ok(())
}

/// Splits the range `(local_height, peer_height]` into `SYNC_REQUEST`
/// batches of at most `max_batch` blocks each, in ascending order so each
/// batch extends directly on the last.
pub fn plan_sync_batches(local_height: u64, peer_height: u64, max_batch: u64) -> Vec<(u64, u64)> {
    if peer_height <= local_height || max_batch == 0 {
        return Vec::new();
    }
    let mut batches = Vec::new();
    let mut from = local_height + 1;
    while from <= peer_height {
        let to = (from + max_batch - 1).min(peer_height);
        batches.push((from, to));
        from = to + 1;
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::Hash256;

    #[test]
    fn matching_handshakes_pass() {
        let genesis = BlockHash(Hash256::compute(b"genesis"));
        let local = Handshake { version: 1, height: 10, genesis_hash: genesis };
        let remote = Handshake { version: 1, height: 20, genesis_hash: genesis };
        assert!(verify_handshake(&local, &remote).is_ok());
    }

    #[test]
    fn genesis_mismatch_is_rejected() {
        let local = Handshake { version: 1, height: 0, genesis_hash: BlockHash(Hash256::compute(b"a")) };
        let remote = Handshake { version: 1, height: 0, genesis_hash: BlockHash(Hash256::compute(b"b")) };
        assert_eq!(
            verify_handshake(&local, &remote),
            Err(HandshakeError::GenesisMismatch { local: local.genesis_hash, remote: remote.genesis_hash })
        );
    }

    #[test]
    fn sync_batches_are_capped_and_contiguous() {
        let batches = plan_sync_batches(0, 250, 100);
        assert_eq!(batches, vec![(1, 100), (101, 200), (201, 250)]);
    }

    #[test]
    fn no_batches_when_already_caught_up() {
        assert!(plan_sync_batches(50, 50, 100).is_empty());
        assert!(plan_sync_batches(60, 50, 100).is_empty());
    }
}
