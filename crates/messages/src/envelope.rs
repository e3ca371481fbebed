//! Transport envelopes and peer lifecycle updates.

use keystone_types::NodeId;

/// A framed message crossing the transport boundary.
///
/// The payload is an encoded message (see [`crate::encode_message`]); the
/// transport never inspects it. Inbound envelopes carry `from`; outbound
/// envelopes carry either a `to` peer or the `broadcast` flag.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: Option<NodeId>,
    pub to: Option<NodeId>,
    pub broadcast: bool,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// An outbound envelope addressed to one peer.
    pub fn send_to(peer: NodeId, payload: Vec<u8>) -> Self {
        Envelope {
            from: None,
            to: Some(peer),
            broadcast: false,
            payload,
        }
    }

    /// An outbound envelope for all connected peers.
    pub fn broadcast(payload: Vec<u8>) -> Self {
        Envelope {
            from: None,
            to: None,
            broadcast: true,
            payload,
        }
    }

    /// An inbound envelope received from `peer`.
    pub fn received_from(peer: NodeId, payload: Vec<u8>) -> Self {
        Envelope {
            from: Some(peer),
            to: None,
            broadcast: false,
            payload,
        }
    }
}

/// Connection status carried by a [`PeerUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Up,
    Down,
}

/// A peer connected or disconnected at the transport layer.
#[derive(Debug, Clone, Copy)]
pub struct PeerUpdate {
    pub peer: NodeId,
    pub status: PeerStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode_message, BlockRequest, BlockSyncMessage, StatusRequest};
    use keystone_types::Height;

    #[test]
    fn send_to_addresses_one_peer() {
        let peer = NodeId([1; 20]);
        let payload =
            encode_message(&BlockSyncMessage::BlockRequest(BlockRequest {
                height: Height(3),
            }))
            .unwrap();
        let env = Envelope::send_to(peer, payload);
        assert_eq!(env.to, Some(peer));
        assert!(!env.broadcast);
        assert!(env.from.is_none());
    }

    #[test]
    fn broadcast_has_no_target() {
        let payload = encode_message(&BlockSyncMessage::StatusRequest(StatusRequest)).unwrap();
        let env = Envelope::broadcast(payload);
        assert!(env.to.is_none());
        assert!(env.broadcast);
    }
}
