//! Fast-catchup block synchronization for the keystone consensus engine.
//!
//! When a replica starts far behind the chain tip, block sync downloads
//! missing blocks in parallel from many peers, verifies each against the
//! preceding trusted block with a light-client adjacency check, applies it
//! to the state machine and persists it. Once the replica is within one
//! block of the best known peer height (or sync has stalled), control is
//! handed to the consensus subsystem.
//!
//! # Architecture
//!
//! ```text
//!              transport                         node
//!   ┌────────────┐  envelopes   ┌──────────────────────────────────────┐
//!   │  inbound   │─────────────►│ Reactor                              │
//!   │  peer ups  │─────────────►│  ├─ inbound dispatch ──► BlockPool   │
//!   │  outbound  │◄─────────────│  ├─ request pump     ◄── scheduler   │
//!   │  peer errs │◄─────────────│  ├─ peer updates         timeouts    │
//!   └────────────┘              │  └─ driver: peek ► verify ► save     │
//!                               │            ► apply ► pop ► handoff   │
//!                               └──────────────────────────────────────┘
//! ```
//!
//! The [`BlockPool`] owns all sync state behind one lock: a peer table and
//! a sliding window of per-height requesters. Its scheduler fans requests
//! out across peers at random; responses arrive in any order, but the
//! driver consumes blocks strictly in height order.
//!
//! Storage, execution and the consensus handoff are seams
//! ([`BlockStore`], [`StateStore`], [`BlockExecutor`],
//! [`ConsensusHandoff`]); the transport is a pair of envelope channels
//! plus a [`Transport`] sink.

mod config;
mod error;
mod events;
pub mod metrics;
mod peer;
mod pool;
mod reactor;
mod requester;
mod store;
mod transport;
mod verify;

pub use config::BlockSyncConfig;
pub use error::{PeerError, PeerErrorKind, ReactorError};
pub use events::BlockSyncStatus;
pub use pool::{BlockPool, BlockRequest, PoolChannels, PoolStatus, SyncedBlock};
pub use reactor::{Reactor, ReactorChannels, ShutdownHandle};
pub use requester::{BlockRequester, RequesterState};
pub use store::{ApplyError, BlockExecutor, BlockStore, ConsensusHandoff, StateStore, StoreError};
pub use transport::{Transport, TransportError};
pub use verify::{verify_adjacent, VerifyError};
