//! Status events published on the node's event bus.

use serde::Serialize;

/// Progress of block sync, published at sync start and at handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockSyncStatus {
    /// True once block sync has handed off to consensus.
    pub complete: bool,
    /// The next height to be consumed at the time of the event.
    pub height: u64,
}
