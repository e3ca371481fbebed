//! The block pool: a peer-aware scheduler for parallel block download.
//!
//! The pool owns a table of peers and a sliding window of
//! [`BlockRequester`]s covering `[next_height, next_height + window)`.
//! Requests fan out across peers and responses arrive in any order, but
//! blocks are only ever consumed at `next_height`, so the driver sees a
//! strictly ordered stream with no gaps.
//!
//! Three background tasks keep the pool moving:
//!
//! - the **scheduler** grows the window and assigns Unassigned/Redo
//!   requesters to randomly chosen eligible peers, emitting
//!   [`BlockRequest`]s on a bounded channel (backpressure stalls the
//!   scheduler, which bounds in-flight work);
//! - the **timeout sweep** removes peers that sit on a request longer than
//!   `request_timeout`;
//! - the **rate sampler** folds per-peer byte counters into an EWMA and
//!   removes peers that deliver below `min_recv_rate`.
//!
//! All pool state lives behind a single mutex. Nothing under the lock does
//! I/O; channel sends happen after release.

use crate::config::BlockSyncConfig;
use crate::error::{PeerError, PeerErrorKind};
use crate::metrics;
use crate::peer::PeerRecord;
use crate::requester::{BlockRequester, RequesterState};
use keystone_types::{Block, Commit, Height, NodeId};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, trace, warn};

/// Grace period after pool creation before an all-zero height claim from
/// peers counts as caught up. Bridges the gap between a peer connecting
/// and its first status response.
const STARTUP_GRACE: Duration = Duration::from_secs(5);

/// An instruction to request `height` from `peer`.
///
/// Emitted by the scheduler; the reactor's request pump encodes and sends
/// it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub height: Height,
    pub peer: NodeId,
}

/// A delivered block waiting at the bottom of the window.
#[derive(Debug, Clone)]
pub struct SyncedBlock {
    pub block: Arc<Block>,
    pub commit: Arc<Commit>,
    /// The peer that served the block.
    pub peer: NodeId,
}

/// Snapshot of pool progress for logs and external APIs.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStatus {
    /// Next height the driver will consume.
    pub height: u64,
    /// Requests sent and not yet answered.
    pub num_pending: u32,
    /// Requesters in the window.
    pub num_requesters: usize,
}

/// Receiving ends of the pool's outbound channels.
pub struct PoolChannels {
    /// Requests for the reactor to put on the wire.
    pub requests: mpsc::Receiver<BlockRequest>,
    /// Peer errors for the transport to act on.
    pub errors: mpsc::Receiver<PeerError>,
}

struct PoolInner {
    peers: HashMap<NodeId, PeerRecord>,
    /// Exactly one requester per height in
    /// `[next_height, next_height + len)`.
    requesters: BTreeMap<Height, BlockRequester>,
    next_height: Height,
    max_peer_height: Height,
    last_advance: Instant,
    /// EWMA of consumed blocks per second, maintained by the driver.
    last_sync_rate: f64,
}

impl PoolInner {
    /// Highest `top` among live, non-muted peers.
    fn recompute_max_peer_height(&mut self, now: Instant) {
        self.max_peer_height = self
            .peers
            .values()
            .filter(|p| !p.is_muted(now))
            .map(PeerRecord::top)
            .max()
            .unwrap_or(Height(0));
    }

    /// Move every requester held by `peer` to Redo and drop the record.
    ///
    /// Returns how many requesters were abandoned.
    fn remove_peer(&mut self, peer: NodeId, now: Instant) -> usize {
        if self.peers.remove(&peer).is_none() {
            return 0;
        }
        let mut redone = 0;
        for requester in self.requesters.values_mut() {
            if requester.assigned_peer() == Some(peer) {
                requester.redo();
                redone += 1;
            }
        }
        self.recompute_max_peer_height(now);
        redone
    }

    fn num_pending(&self) -> u32 {
        self.requesters
            .values()
            .filter(|r| matches!(r.state(), RequesterState::Pending { .. }))
            .count() as u32
    }
}

/// The concurrent block pool.
pub struct BlockPool {
    config: BlockSyncConfig,
    inner: Mutex<PoolInner>,
    start_height: Height,
    created_at: Instant,
    request_tx: mpsc::Sender<BlockRequest>,
    error_tx: mpsc::Sender<PeerError>,
    /// Wakes the scheduler ahead of its next tick.
    wake: Notify,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
}

impl BlockPool {
    /// Create a pool that will fetch from `start_height` upward.
    ///
    /// The returned [`PoolChannels`] carry scheduled requests and peer
    /// errors; both must be drained by the caller.
    pub fn new(config: BlockSyncConfig, start_height: Height) -> (Arc<BlockPool>, PoolChannels) {
        let (request_tx, request_rx) = mpsc::channel(config.max_pending_requesters.max(1));
        let (error_tx, error_rx) = mpsc::channel(config.peer_error_buffer.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        let pool = Arc::new(BlockPool {
            config,
            inner: Mutex::new(PoolInner {
                peers: HashMap::new(),
                requesters: BTreeMap::new(),
                next_height: start_height,
                max_peer_height: Height(0),
                last_advance: Instant::now(),
                last_sync_rate: 0.0,
            }),
            start_height,
            created_at: Instant::now(),
            request_tx,
            error_tx,
            wake: Notify::new(),
            shutdown_tx,
            started: AtomicBool::new(false),
        });
        (
            pool,
            PoolChannels {
                requests: request_rx,
                errors: error_rx,
            },
        )
    }

    /// Spawn the scheduler, timeout sweep and rate sampler tasks.
    ///
    /// Idempotent; tasks run until [`stop`](Self::stop).
    pub fn start(self: Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(start_height = self.start_height.0, "starting block pool");

        let pool = Arc::clone(&self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(pool.config.try_sync_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tick.tick() => {}
                    _ = pool.wake.notified() => {}
                }
                if pool.schedule().await.is_err() {
                    break;
                }
            }
            trace!("scheduler task exited");
        });

        let pool = Arc::clone(&self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(pool.config.timeout_sweep_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tick.tick() => {}
                }
                pool.sweep_timeouts(Instant::now()).await;
            }
            trace!("timeout sweep task exited");
        });

        let pool = Arc::clone(&self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(pool.config.peer_sample_time);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tick.tick() => {}
                }
                pool.sample_rates(Instant::now()).await;
            }
            trace!("rate sampler task exited");
        });
    }

    /// Signal all pool tasks to exit.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    // ═══════════════════════════════════════════════════════════════════
    // Peer table
    // ═══════════════════════════════════════════════════════════════════

    /// Register a peer. Idempotent: a known peer keeps its state.
    pub fn add_peer(&self, peer: NodeId) {
        {
            let mut inner = self.inner.lock();
            inner
                .peers
                .entry(peer)
                .or_insert_with(|| PeerRecord::new(Instant::now()));
            metrics::record_peer_count(inner.peers.len());
        }
        debug!(%peer, "peer added to block pool");
        self.wake.notify_one();
    }

    /// Record a peer's advertised `[base, top]` range, inserting the peer
    /// if unknown. The raw claim is kept; validity is enforced at
    /// assignment time.
    pub fn set_peer_range(&self, peer: NodeId, base: Height, top: Height) {
        {
            let now = Instant::now();
            let mut inner = self.inner.lock();
            inner
                .peers
                .entry(peer)
                .or_insert_with(|| PeerRecord::new(now))
                .set_range(base, top);
            inner.recompute_max_peer_height(now);
            metrics::record_peer_count(inner.peers.len());
        }
        trace!(%peer, base = base.0, top = top.0, "peer range updated");
        self.wake.notify_one();
    }

    /// Drop a peer; every requester it held becomes Redo.
    pub fn remove_peer(&self, peer: NodeId) {
        let redone = {
            let mut inner = self.inner.lock();
            let redone = inner.remove_peer(peer, Instant::now());
            metrics::record_peer_count(inner.peers.len());
            redone
        };
        if redone > 0 {
            debug!(%peer, redone, "peer removed, requests redistributed");
        } else {
            debug!(%peer, "peer removed");
        }
        self.wake.notify_one();
    }

    /// Number of peers currently tracked.
    pub fn num_peers(&self) -> usize {
        self.inner.lock().peers.len()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Responses
    // ═══════════════════════════════════════════════════════════════════

    /// Feed a block received from `peer`.
    ///
    /// An unsolicited block, or one from a peer the height is not pending
    /// on, is discarded: the peer is muted and a peer error is emitted.
    pub async fn add_block(&self, peer: NodeId, block: Block, commit: Commit, recv_size: usize) {
        let height = block.height();
        // Outcome of the requester transition, resolved before any peer
        // bookkeeping so the two tables are borrowed one at a time.
        enum Delivery {
            Accepted { since: Option<Instant> },
            NoRequester,
            NotPendingOnPeer,
        }

        let error = {
            let now = Instant::now();
            let mut inner = self.inner.lock();

            let delivery = match inner.requesters.get_mut(&height) {
                None => Delivery::NoRequester,
                Some(requester) => {
                    let since = requester.pending_since();
                    if requester.set_block(peer, Arc::new(block), Arc::new(commit)) {
                        Delivery::Accepted { since }
                    } else {
                        Delivery::NotPendingOnPeer
                    }
                }
            };

            match delivery {
                Delivery::Accepted { since } => {
                    if let Some(record) = inner.peers.get_mut(&peer) {
                        record.record_received(recv_size);
                    }
                    if let Some(since) = since {
                        metrics::record_fetch_latency(since.elapsed());
                    }
                    metrics::record_bytes_received(recv_size);
                    trace!(%peer, height = height.0, size = recv_size, "block received");
                    None
                }
                Delivery::NoRequester | Delivery::NotPendingOnPeer => {
                    // Mute affects assignment only; the peer's height claim
                    // stays until the next range update or removal.
                    if let Some(record) = inner.peers.get_mut(&peer) {
                        record.mute(now + self.config.peer_mute_duration);
                    }
                    let kind = match delivery {
                        Delivery::NoRequester => PeerErrorKind::UnsolicitedBlock { height },
                        _ => PeerErrorKind::WrongPeer { height },
                    };
                    Some(PeerError::new(peer, kind))
                }
            }
        };

        if let Some(error) = error {
            warn!(peer = %error.peer, height = height.0, kind = error.kind.label(), "discarding block");
            self.report_error(error).await;
        }
    }

    /// The filled requester at `next_height`, if any.
    pub fn peek_block(&self) -> Option<SyncedBlock> {
        let inner = self.inner.lock();
        let requester = inner.requesters.get(&inner.next_height)?;
        let (block, commit, peer) = requester.filled()?;
        Some(SyncedBlock {
            block,
            commit,
            peer,
        })
    }

    /// Consume the filled requester at `next_height` and advance.
    ///
    /// Returns false (and changes nothing) if that requester is not
    /// Filled; the driver must peek first.
    pub fn pop_block(&self) -> bool {
        let popped = {
            let mut inner = self.inner.lock();
            let next = inner.next_height;
            let Some(requester) = inner.requesters.get(&next) else {
                warn!(height = next.0, "pop without a requester");
                return false;
            };
            if !requester.is_filled() {
                warn!(height = next.0, "pop on an unfilled requester");
                return false;
            }
            let requester = inner.requesters.remove(&next).expect("checked above");
            if let Some(peer) = requester.assigned_peer() {
                if let Some(record) = inner.peers.get_mut(&peer) {
                    record.decrement_pending();
                }
            }
            inner.next_height = next.next();
            inner.last_advance = Instant::now();
            metrics::record_block_synced();
            metrics::record_pool_status(
                inner.next_height.0,
                inner.max_peer_height.0,
                inner.requesters.len(),
                inner.num_pending(),
            );
            true
        };
        // The window can grow by one; let the scheduler top it up.
        self.wake.notify_one();
        popped
    }

    /// Abandon the request at `height`, report `reason` against the peer
    /// that served it, and make the height eligible for reassignment.
    ///
    /// Returns the peer that last held the requester.
    pub async fn redo_request(&self, height: Height, reason: PeerErrorKind) -> Option<NodeId> {
        let peer = {
            let mut inner = self.inner.lock();
            let requester = inner.requesters.get_mut(&height)?;
            let peer = requester.redo()?;
            if let Some(record) = inner.peers.get_mut(&peer) {
                record.decrement_pending();
            }
            Some(peer)
        }?;

        debug!(%peer, height = height.0, reason = reason.label(), "redoing request");
        self.report_error(PeerError::new(peer, reason)).await;
        self.wake.notify_one();
        Some(peer)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Progress
    // ═══════════════════════════════════════════════════════════════════

    /// Conservative catch-up check: at least one peer is known and no peer
    /// advertises a height we have not consumed.
    ///
    /// Until a block has been consumed or [`STARTUP_GRACE`] has passed,
    /// peers that have not yet announced a range do not count as
    /// "nothing left to sync".
    pub fn is_caught_up(&self) -> bool {
        let inner = self.inner.lock();
        if inner.peers.is_empty() {
            return false;
        }
        let advanced_or_waited = inner.next_height > self.start_height
            || self.created_at.elapsed() > STARTUP_GRACE;
        advanced_or_waited
            && (inner.max_peer_height.0 == 0 || inner.next_height >= inner.max_peer_height)
    }

    pub fn status(&self) -> PoolStatus {
        let inner = self.inner.lock();
        PoolStatus {
            height: inner.next_height.0,
            num_pending: inner.num_pending(),
            num_requesters: inner.requesters.len(),
        }
    }

    /// Timestamp of the most recent successful consumption.
    pub fn last_advance(&self) -> Instant {
        self.inner.lock().last_advance
    }

    pub fn max_peer_height(&self) -> Height {
        self.inner.lock().max_peer_height
    }

    /// Total blocks this sync run is expected to download.
    pub fn target_sync_blocks(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .max_peer_height
            .0
            .saturating_sub(self.start_height.0)
            .saturating_add(1)
    }

    pub fn start_height(&self) -> Height {
        self.start_height
    }

    /// Estimated time to reach the best known peer height at the current
    /// sync rate. Zero while the rate is unknown.
    pub fn remaining_sync_time(&self) -> Duration {
        let inner = self.inner.lock();
        let target = inner
            .max_peer_height
            .0
            .saturating_sub(self.start_height.0)
            .saturating_add(1);
        let current = inner.next_height.0.saturating_sub(self.start_height.0);
        if inner.last_sync_rate < 0.001 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(target.saturating_sub(current) as f64 / inner.last_sync_rate)
    }

    /// EWMA of consumed blocks per second, as maintained by the driver.
    pub fn last_sync_rate(&self) -> f64 {
        self.inner.lock().last_sync_rate
    }

    pub fn set_last_sync_rate(&self, rate: f64) {
        self.inner.lock().last_sync_rate = rate;
    }

    // ═══════════════════════════════════════════════════════════════════
    // Background passes
    // ═══════════════════════════════════════════════════════════════════

    /// One scheduling pass: grow the window, then assign every requester
    /// that needs a peer.
    ///
    /// Channel sends happen after the lock is released; a full request
    /// channel therefore stalls this task without blocking the pool.
    async fn schedule(&self) -> Result<(), ()> {
        let assignments = {
            let now = Instant::now();
            let mut rng = rand::thread_rng();
            let mut inner = self.inner.lock();
            let inner = &mut *inner;

            while inner.requesters.len() < self.config.max_pending_requesters {
                let height = Height(inner.next_height.0 + inner.requesters.len() as u64);
                if inner.max_peer_height.0 == 0 || height > inner.max_peer_height {
                    break;
                }
                inner.requesters.insert(height, BlockRequester::new(height));
            }

            let mut assignments: Vec<BlockRequest> = Vec::new();
            let max_per_peer = self.config.max_pending_requests_per_peer;
            'assign: for (&height, requester) in inner.requesters.iter_mut() {
                if !requester.needs_assignment() {
                    continue;
                }
                let eligible: Vec<NodeId> = inner
                    .peers
                    .iter()
                    .filter(|(_, record)| record.is_eligible(height, max_per_peer, now))
                    .map(|(id, _)| *id)
                    .collect();
                // No eligible peer for the lowest open height: later
                // heights would herd onto the same peers, so stop.
                let Some(&peer) = eligible.choose(&mut rng) else {
                    break 'assign;
                };
                requester.assign(peer, now);
                inner
                    .peers
                    .get_mut(&peer)
                    .expect("eligible peer exists")
                    .increment_pending();
                assignments.push(BlockRequest { height, peer });
            }

            metrics::record_pool_status(
                inner.next_height.0,
                inner.max_peer_height.0,
                inner.requesters.len(),
                inner.num_pending(),
            );
            assignments
        };

        for request in assignments {
            trace!(peer = %request.peer, height = request.height.0, "scheduling block request");
            metrics::record_request_sent();
            if self.request_tx.send(request).await.is_err() {
                // Reactor gone; nothing left to schedule for.
                return Err(());
            }
        }
        Ok(())
    }

    /// Remove peers sitting on requests longer than `request_timeout`.
    ///
    /// The peer is removed rather than just the request: a timed-out
    /// request signals an unresponsive or grossly slow peer.
    async fn sweep_timeouts(&self, now: Instant) {
        let errors = {
            let mut inner = self.inner.lock();
            let timeout = self.config.request_timeout;
            let timed_out: Vec<(NodeId, Height)> = inner
                .requesters
                .values()
                .filter_map(|r| {
                    let since = r.pending_since()?;
                    let peer = r.assigned_peer()?;
                    (now.duration_since(since) > timeout).then_some((peer, r.height()))
                })
                .collect();

            let mut errors: Vec<PeerError> = Vec::new();
            for (peer, height) in timed_out {
                // One removal handles all of this peer's requesters.
                if inner.remove_peer(peer, now) > 0 {
                    warn!(%peer, height = height.0, "request timed out, removing peer");
                    errors.push(PeerError::new(peer, PeerErrorKind::Timeout { height }));
                }
            }
            if !errors.is_empty() {
                metrics::record_peer_count(inner.peers.len());
            }
            errors
        };

        let had_errors = !errors.is_empty();
        for error in errors {
            self.report_error(error).await;
        }
        if had_errors {
            self.wake.notify_one();
        }
    }

    /// Sample every peer's receive rate and drop the ones below
    /// `min_recv_rate` while they hold outstanding requests.
    async fn sample_rates(&self, now: Instant) {
        let errors = {
            let mut inner = self.inner.lock();
            let window = self.config.peer_sample_time;
            let min_rate = self.config.min_recv_rate;

            for record in inner.peers.values_mut() {
                record.sample_rate(now);
            }
            let slow: Vec<(NodeId, f64, u32)> = inner
                .peers
                .iter()
                .filter(|(_, record)| record.is_slow(min_rate, window, now))
                .map(|(id, record)| (*id, record.recv_rate(), record.num_pending()))
                .collect();

            let mut errors: Vec<PeerError> = Vec::new();
            for (peer, rate, in_flight) in slow {
                inner.remove_peer(peer, now);
                warn!(%peer, rate, min_rate, in_flight, "peer too slow, removing");
                errors.push(PeerError::new(
                    peer,
                    PeerErrorKind::TooSlow {
                        rate,
                        min: min_rate,
                    },
                ));
            }
            if !errors.is_empty() {
                metrics::record_peer_count(inner.peers.len());
            }
            errors
        };

        let had_errors = !errors.is_empty();
        for error in errors {
            self.report_error(error).await;
        }
        if had_errors {
            self.wake.notify_one();
        }
    }

    async fn report_error(&self, error: PeerError) {
        metrics::record_peer_error(error.kind.label());
        if self.error_tx.send(error).await.is_err() {
            trace!("peer error dropped, reactor gone");
        }
    }
}
