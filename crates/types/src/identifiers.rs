//! Identifier newtypes shared across the engine.

use sbor::prelude::BasicSbor;
use std::fmt;

/// A block height.
///
/// Heights increase monotonically from a chain-specific initial value.
/// `Height(0)` means "no blocks yet" and is never a valid block height.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor)]
pub struct Height(pub u64);

impl Height {
    /// The height immediately after this one.
    pub fn next(self) -> Height {
        Height(self.0 + 1)
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Height({})", self.0)
    }
}

/// Opaque identifier for a node reachable through the transport.
///
/// Stable for the peer's lifetime on this node. Authentication of the
/// id is the transport's concern.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct NodeId(pub [u8; 20]);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}..)", hex::encode(&self.0[..4]))
    }
}

/// Chain identifier, unique per network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, BasicSbor)]
pub struct ChainId(pub String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        ChainId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_ordering() {
        assert!(Height(1) < Height(2));
        assert_eq!(Height(4).next(), Height(5));
    }

    #[test]
    fn node_id_display_is_hex() {
        let id = NodeId([0xAB; 20]);
        assert_eq!(id.to_string(), "ab".repeat(20));
    }
}
