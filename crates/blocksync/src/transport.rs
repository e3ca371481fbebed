//! Outbound seam to the wire transport.

use keystone_messages::Envelope;
use keystone_types::NodeId;
use thiserror::Error;

/// Failure to hand an envelope to the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The addressed peer is gone or its send queue is full.
    #[error("peer {0} unreachable")]
    PeerUnreachable(NodeId),

    /// The transport itself is shutting down.
    #[error("transport closed")]
    Closed,
}

/// Envelope sink provided by the transport layer.
///
/// Sends are queue-and-forget: the transport owns retries and framing.
/// Queue capacities come from the channel descriptor. A
/// [`TransportError::PeerUnreachable`] on a per-peer send makes the reactor
/// remove that peer; [`TransportError::Closed`] makes the sending task exit
/// cleanly.
pub trait Transport: Send + Sync {
    fn send(&self, envelope: Envelope) -> Result<(), TransportError>;
}
