//! Categorical error kinds for transaction and block validation.

use std::fmt;

/// Sub-classification of a nonce disagreement.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NonceMismatchKind {
    /// Supplied nonce is lower than expected: already applied or replaced.
    Stale,
    /// Supplied nonce is higher than expected: a gap in the sequence.
    FutureGap,
}

/// Error returned when a transaction or block fails validation.
///
/// Categorical by design (see spec §7): callers match on the kind, not on
/// a message string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ValidationError {
    MalformedEncoding,
    InvalidSignature,
    NonceMismatch(NonceMismatchKind),
    InsufficientBalance,
    FeeBelowMinimum,
    ReferenceNotFound,
    ReferenceWrongKind,
    LimitExceeded(&'static str),
    ConsensusViolation(&'static str),
    UnknownParent,
    ReorgTooDeep,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MalformedEncoding => write!(f, "malformed encoding"),
            ValidationError::InvalidSignature => write!(f, "invalid signature"),
            ValidationError::NonceMismatch(NonceMismatchKind::Stale) => {
                write!(f, "nonce mismatch: stale")
            }
            ValidationError::NonceMismatch(NonceMismatchKind::FutureGap) => {
                write!(f, "nonce mismatch: future gap")
            }
            ValidationError::InsufficientBalance => write!(f, "insufficient balance"),
            ValidationError::FeeBelowMinimum => write!(f, "fee below minimum"),
            ValidationError::ReferenceNotFound => write!(f, "referenced transaction not found"),
            ValidationError::ReferenceWrongKind => write!(f, "reference is the wrong kind"),
            ValidationError::LimitExceeded(what) => write!(f, "limit exceeded: {what}"),
            ValidationError::ConsensusViolation(what) => write!(f, "consensus violation: {what}"),
            ValidationError::UnknownParent => write!(f, "unknown parent block"),
            ValidationError::ReorgTooDeep => write!(f, "reorg exceeds configured depth bound"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors surfaced by the peer-to-peer layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PeerProtocolError {
    MalformedMessage,
    UnexpectedMessageOrder,
    VersionMismatch,
    GenesisMismatch,
}

impl fmt::Display for PeerProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerProtocolError::MalformedMessage => write!(f, "malformed message"),
            PeerProtocolError::UnexpectedMessageOrder => write!(f, "unexpected message order"),
            PeerProtocolError::VersionMismatch => write!(f, "protocol version mismatch"),
            PeerProtocolError::GenesisMismatch => write!(f, "genesis hash mismatch"),
        }
    }
}

impl std::error::Error for PeerProtocolError {}

/// High-level errors from the consensus engine (store + validator +
/// fork-choice composition).
#[derive(Debug)]
pub enum ConsensusError {
    Validation(ValidationError),
    Storage(String),
    PeerProtocol(PeerProtocolError),
    Other(String),
}

impl From<ValidationError> for ConsensusError {
    fn from(e: ValidationError) -> Self {
        ConsensusError::Validation(e)
    }
}

impl From<PeerProtocolError> for ConsensusError {
    fn from(e: PeerProtocolError) -> Self {
        ConsensusError::PeerProtocol(e)
    }
}

impl fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::Validation(e) => write!(f, "{e}"),
            ConsensusError::Storage(msg) => write!(f, "storage error: {msg}"),
            ConsensusError::PeerProtocol(e) => write!(f, "{e}"),
            ConsensusError::Other(msg) => write!(f, "consensus error: {msg}"),
        }
    }
}

impl std::error::Error for ConsensusError {}
