//! Error types for block sync.

use crate::store::{ApplyError, StoreError};
use crate::verify::VerifyError;
use keystone_types::{Hash, Height, NodeId};
use thiserror::Error;

/// Why a peer is being reported to the transport.
#[derive(Debug, Clone, Error)]
pub enum PeerErrorKind {
    #[error("sent block at height {height} nobody asked for")]
    UnsolicitedBlock { height: Height },

    #[error("sent block at height {height} assigned to a different peer")]
    WrongPeer { height: Height },

    #[error("block at height {height} failed verification: {source}")]
    InvalidBlock {
        height: Height,
        #[source]
        source: VerifyError,
    },

    #[error("request for height {height} timed out")]
    Timeout { height: Height },

    #[error("receive rate {rate:.0} B/s below minimum {min:.0} B/s")]
    TooSlow { rate: f64, min: f64 },

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    #[error("transport send failed")]
    SendFailure,
}

/// A peer error event, consumed by the transport for demotion or banning.
#[derive(Debug, Clone)]
pub struct PeerError {
    pub peer: NodeId,
    pub kind: PeerErrorKind,
}

impl PeerError {
    pub fn new(peer: NodeId, kind: PeerErrorKind) -> Self {
        PeerError { peer, kind }
    }
}

impl PeerErrorKind {
    /// Label used for the per-kind error metric.
    pub fn label(&self) -> &'static str {
        match self {
            PeerErrorKind::UnsolicitedBlock { .. } => "unsolicited_block",
            PeerErrorKind::WrongPeer { .. } => "wrong_peer",
            PeerErrorKind::InvalidBlock { .. } => "invalid_block",
            PeerErrorKind::Timeout { .. } => "timeout",
            PeerErrorKind::TooSlow { .. } => "too_slow",
            PeerErrorKind::MalformedMessage(_) => "malformed_message",
            PeerErrorKind::HandlerPanic(_) => "handler_panic",
            PeerErrorKind::SendFailure => "send_failure",
        }
    }
}

/// Fatal conditions that terminate block sync.
///
/// Everything here means either local corruption or an operator problem;
/// continuing would hand consensus an inconsistent state.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("state height {state} and store height {store} mismatch")]
    StateStoreHeightMismatch { state: Height, store: Height },

    #[error("failed to load state: {0}")]
    StateLoad(#[source] StoreError),

    #[error("missing trusted block at height {height}")]
    MissingTrustedBlock { height: Height },

    #[error(
        "validator set mismatch at first block: state has {expected}, block declares {got}"
    )]
    ValidatorSetMismatch { expected: Hash, got: Hash },

    #[error("failed to persist block at height {height}: {source}")]
    SaveBlock {
        height: Height,
        #[source]
        source: StoreError,
    },

    #[error("failed to apply block at height {height}: {source}")]
    ApplyBlock {
        height: Height,
        #[source]
        source: ApplyError,
    },

    #[error("failed to encode block at height {height} into parts")]
    MakePartSet { height: Height },
}
