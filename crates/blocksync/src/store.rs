//! Seams to the node's storage, state machine and consensus.
//!
//! Block sync does not own persistence or execution; the embedding node
//! supplies these. Implementations are called from the driver task, so
//! long-running work should be kept internal (e.g. `spawn_blocking` inside
//! the implementation) rather than blocking the caller for extended
//! periods.

use keystone_types::{Block, BlockId, ChainState, Commit, Height, PartSet};
use std::sync::Arc;
use thiserror::Error;

/// Storage-layer failure. Fatal when it happens during a save.
#[derive(Debug, Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// State-machine rejection of a block. Always fatal: the block already
/// passed light verification, so disagreement means local corruption.
#[derive(Debug, Error)]
#[error("apply error: {0}")]
pub struct ApplyError(pub String);

/// The persistent block store.
pub trait BlockStore: Send + Sync {
    /// Height of the newest stored block, `Height(0)` when empty.
    fn height(&self) -> Height;

    /// Height of the oldest stored block, `Height(0)` when empty.
    fn base(&self) -> Height;

    fn load_block(&self, height: Height) -> Option<Arc<Block>>;

    fn load_commit(&self, height: Height) -> Option<Arc<Commit>>;

    /// Persist a block, its part set and the commit certifying it.
    fn save_block(&self, block: &Block, parts: &PartSet, commit: &Commit)
        -> Result<(), StoreError>;
}

/// Source of the replicated-machine state at startup.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<ChainState, StoreError>;
}

/// The state-machine executor.
pub trait BlockExecutor: Send + Sync {
    /// Apply a verified block, returning the evolved state.
    fn apply_block(
        &self,
        state: ChainState,
        block_id: &BlockId,
        block: &Block,
    ) -> Result<ChainState, ApplyError>;
}

/// Target of the catch-up handoff.
pub trait ConsensusHandoff: Send + Sync {
    /// Take over from block sync with the synced state.
    ///
    /// `skip_wal` is true when any block was synced (or state sync ran
    /// before block sync), letting consensus skip write-ahead-log replay.
    fn switch_to_consensus(&self, state: ChainState, skip_wal: bool);
}
