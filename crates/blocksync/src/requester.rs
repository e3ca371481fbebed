//! The per-height request state machine.

use keystone_types::{Block, Commit, Height, NodeId};
use std::sync::Arc;
use std::time::Instant;

/// Where one outstanding fetch currently stands.
///
/// ```text
/// Unassigned ──assign──► Pending ──block──► Filled ──consume──► (destroyed)
///      ▲                    │                  │
///      └──(no peer)         └───────redo───────┴──► Redo ──assign──► Pending
/// ```
///
/// A requester never moves from Filled back to Pending except through Redo.
#[derive(Debug, Clone)]
pub enum RequesterState {
    /// No peer picked yet.
    Unassigned,
    /// Requested from `peer` at `since`; response outstanding.
    Pending { peer: NodeId, since: Instant },
    /// `peer` delivered the block; waiting to be consumed in order.
    Filled {
        peer: NodeId,
        block: Arc<Block>,
        commit: Arc<Commit>,
    },
    /// The previous attempt was abandoned; eligible for reassignment.
    Redo,
}

/// One outstanding fetch for a specific height.
///
/// Requesters are owned by the pool in a height-keyed map and hold only
/// peer ids, never peer records. All peer accounting happens in the pool.
#[derive(Debug)]
pub struct BlockRequester {
    height: Height,
    state: RequesterState,
    /// When the block arrived, for latency metrics.
    got_block_at: Option<Instant>,
}

impl BlockRequester {
    pub fn new(height: Height) -> Self {
        BlockRequester {
            height,
            state: RequesterState::Unassigned,
            got_block_at: None,
        }
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn state(&self) -> &RequesterState {
        &self.state
    }

    /// True for Unassigned and Redo requesters.
    pub fn needs_assignment(&self) -> bool {
        matches!(
            self.state,
            RequesterState::Unassigned | RequesterState::Redo
        )
    }

    /// The peer currently responsible for this height, if any.
    pub fn assigned_peer(&self) -> Option<NodeId> {
        match &self.state {
            RequesterState::Pending { peer, .. } | RequesterState::Filled { peer, .. } => {
                Some(*peer)
            }
            _ => None,
        }
    }

    /// How long the request has been outstanding, if Pending.
    pub fn pending_since(&self) -> Option<Instant> {
        match &self.state {
            RequesterState::Pending { since, .. } => Some(*since),
            _ => None,
        }
    }

    /// Assign the request to `peer`. Only valid from Unassigned or Redo.
    pub fn assign(&mut self, peer: NodeId, now: Instant) {
        debug_assert!(self.needs_assignment(), "assign on a held requester");
        self.state = RequesterState::Pending { peer, since: now };
    }

    /// Record a delivered block.
    ///
    /// Returns `false` without mutation when the requester is not Pending
    /// on `from` (unsolicited or wrong-peer delivery).
    pub fn set_block(&mut self, from: NodeId, block: Arc<Block>, commit: Arc<Commit>) -> bool {
        match &self.state {
            RequesterState::Pending { peer, .. } if *peer == from => {
                self.state = RequesterState::Filled {
                    peer: from,
                    block,
                    commit,
                };
                self.got_block_at = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    pub fn is_filled(&self) -> bool {
        matches!(self.state, RequesterState::Filled { .. })
    }

    /// The delivered block and commit, if Filled.
    pub fn filled(&self) -> Option<(Arc<Block>, Arc<Commit>, NodeId)> {
        match &self.state {
            RequesterState::Filled {
                peer,
                block,
                commit,
            } => Some((Arc::clone(block), Arc::clone(commit), *peer)),
            _ => None,
        }
    }

    pub fn got_block_at(&self) -> Option<Instant> {
        self.got_block_at
    }

    /// Abandon the current attempt. Returns the peer that held the
    /// requester so the pool can adjust its accounting.
    pub fn redo(&mut self) -> Option<NodeId> {
        let peer = self.assigned_peer();
        if peer.is_some() {
            self.state = RequesterState::Redo;
            self.got_block_at = None;
        }
        peer
    }
}
