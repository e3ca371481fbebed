//! The block-sync reactor.
//!
//! Wires the [`BlockPool`] to the transport and drives the
//! verify-apply-persist loop:
//!
//! - an **inbound task** decodes each envelope and routes it to pool
//!   methods or direct replies (block requests are always answered, with
//!   the block or with `NoBlockResponse`);
//! - a **request pump** drains the pool's scheduled requests onto the
//!   wire, forwards pool peer errors to the transport, and broadcasts a
//!   `StatusRequest` every `status_update_interval`;
//! - a **peer-update task** translates transport peer-up/peer-down into
//!   pool membership and greets new peers with our own status;
//! - the **driver** peeks the lowest height, verifies it against the last
//!   trusted block, persists and applies it, and hands off to consensus
//!   once caught up or stalled.
//!
//! Handler panics are caught and converted into peer errors; they never
//! take the process down.

use crate::config::BlockSyncConfig;
use crate::error::{PeerError, PeerErrorKind, ReactorError};
use crate::events::BlockSyncStatus;
use crate::pool::{BlockPool, BlockRequest, PoolChannels};
use crate::store::{BlockExecutor, BlockStore, ConsensusHandoff, StateStore};
use crate::transport::{Transport, TransportError};
use crate::verify::verify_adjacent;
use futures::FutureExt;
use keystone_messages::{
    decode_message, encode_message, BlockSyncMessage, Envelope, PeerStatus, PeerUpdate,
};
use keystone_messages as messages;
use keystone_types::{Block, BlockId, ChainState, Commit, Height, NodeId, SignedHeader};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

/// Channels connecting the reactor to the embedding node.
pub struct ReactorChannels {
    /// Decoded-frame stream from the transport.
    pub inbound: mpsc::Receiver<Envelope>,
    /// Peer connect/disconnect notifications.
    pub peer_updates: mpsc::Receiver<PeerUpdate>,
    /// Peer errors for the transport to demote or ban on.
    pub peer_errors: mpsc::Sender<PeerError>,
    /// Optional event-bus sink for sync status events.
    pub status_events: Option<mpsc::Sender<BlockSyncStatus>>,
}

/// Handle for stopping a running reactor.
///
/// When dropped, signals the reactor to exit gracefully.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl ShutdownHandle {
    /// Trigger shutdown (consumes the handle).
    pub fn shutdown(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// The reactor. Construct with [`Reactor::new`], then [`run`](Reactor::run).
pub struct Reactor {
    config: BlockSyncConfig,
    state_store: Arc<dyn StateStore>,
    store: Arc<dyn BlockStore>,
    executor: Arc<dyn BlockExecutor>,
    handoff: Arc<dyn ConsensusHandoff>,
    transport: Arc<dyn Transport>,
    channels: ReactorChannels,
    /// True when state sync already ran; propagated into the handoff.
    state_synced: bool,
    shutdown_rx: oneshot::Receiver<()>,
}

impl Reactor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BlockSyncConfig,
        state_store: Arc<dyn StateStore>,
        store: Arc<dyn BlockStore>,
        executor: Arc<dyn BlockExecutor>,
        handoff: Arc<dyn ConsensusHandoff>,
        transport: Arc<dyn Transport>,
        channels: ReactorChannels,
        state_synced: bool,
    ) -> (Reactor, ShutdownHandle) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        (
            Reactor {
                config,
                state_store,
                store,
                executor,
                handoff,
                transport,
                channels,
                state_synced,
                shutdown_rx,
            },
            ShutdownHandle {
                tx: Some(shutdown_tx),
            },
        )
    }

    /// Run block sync to completion.
    ///
    /// Returns `Ok(())` after the consensus handoff (catch-up or stall) or
    /// an external shutdown; returns an error only for fatal conditions.
    pub async fn run(mut self) -> Result<(), ReactorError> {
        let state = self.state_store.load().map_err(ReactorError::StateLoad)?;

        let store_height = self.store.height();
        if state.last_block_height != store_height {
            return Err(ReactorError::StateStoreHeightMismatch {
                state: state.last_block_height,
                store: store_height,
            });
        }

        // Store and state agree, so this resumes after the last stored
        // block (or at the chain's initial height when both are empty).
        let start_height = state.sync_start_height();

        let (pool, pool_channels) = BlockPool::new(self.config.clone(), start_height);
        Arc::clone(&pool).start();

        info!(
            chain_id = %state.chain_id,
            start_height = start_height.0,
            "starting block sync"
        );
        publish_status(&self.channels.status_events, false, start_height.0).await;

        // Internal shutdown fans the external signal out to the tasks.
        let (task_shutdown_tx, _) = watch::channel(false);

        tokio::spawn(inbound_task(
            self.channels.inbound,
            Arc::clone(&pool),
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            self.channels.peer_errors.clone(),
            task_shutdown_tx.subscribe(),
        ));
        tokio::spawn(peer_update_task(
            self.channels.peer_updates,
            Arc::clone(&pool),
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            self.channels.peer_errors.clone(),
            task_shutdown_tx.subscribe(),
        ));
        tokio::spawn(request_pump_task(
            pool_channels,
            Arc::clone(&pool),
            Arc::clone(&self.transport),
            self.channels.peer_errors.clone(),
            self.config.status_update_interval,
            task_shutdown_tx.subscribe(),
        ));

        let result = drive(
            &self.config,
            &pool,
            self.store.as_ref(),
            self.executor.as_ref(),
            self.handoff.as_ref(),
            &self.channels.status_events,
            state,
            self.state_synced,
            &mut self.shutdown_rx,
        )
        .await;

        pool.stop();
        let _ = task_shutdown_tx.send(true);
        result
    }
}

async fn publish_status(
    status_events: &Option<mpsc::Sender<BlockSyncStatus>>,
    complete: bool,
    height: u64,
) {
    if let Some(tx) = status_events {
        let _ = tx.send(BlockSyncStatus { complete, height }).await;
    }
}

/// Encode and send, translating transport failures into peer handling.
async fn send_message(
    transport: &dyn Transport,
    pool: &BlockPool,
    peer_errors: &mpsc::Sender<PeerError>,
    envelope_to: Option<NodeId>,
    message: BlockSyncMessage,
) -> Result<(), TransportError> {
    let payload = match encode_message(&message) {
        Ok(payload) => payload,
        Err(err) => {
            error!(kind = message.type_name(), %err, "failed to encode outbound message");
            return Ok(());
        }
    };
    let envelope = match envelope_to {
        Some(peer) => Envelope::send_to(peer, payload),
        None => Envelope::broadcast(payload),
    };
    match transport.send(envelope) {
        Ok(()) => Ok(()),
        Err(TransportError::PeerUnreachable(peer)) => {
            warn!(%peer, "send failed, removing peer");
            pool.remove_peer(peer);
            let _ = peer_errors
                .send(PeerError::new(peer, PeerErrorKind::SendFailure))
                .await;
            Ok(())
        }
        Err(err @ TransportError::Closed) => Err(err),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Inbound dispatch
// ═══════════════════════════════════════════════════════════════════════

async fn inbound_task(
    mut inbound: mpsc::Receiver<Envelope>,
    pool: Arc<BlockPool>,
    store: Arc<dyn BlockStore>,
    transport: Arc<dyn Transport>,
    peer_errors: mpsc::Sender<PeerError>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let envelope = tokio::select! {
            _ = shutdown.changed() => break,
            maybe = inbound.recv() => match maybe {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let Some(from) = envelope.from else {
            warn!("dropping inbound envelope without a sender");
            continue;
        };

        let handled = AssertUnwindSafe(handle_inbound(
            from,
            &envelope.payload,
            &pool,
            store.as_ref(),
            transport.as_ref(),
            &peer_errors,
        ))
        .catch_unwind()
        .await;

        match handled {
            Ok(Ok(())) => {}
            Ok(Err(kind)) => {
                warn!(peer = %from, kind = kind.label(), "inbound message rejected");
                let _ = peer_errors.send(PeerError::new(from, kind)).await;
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(peer = %from, %reason, "recovering from panic in message handler");
                let _ = peer_errors
                    .send(PeerError::new(from, PeerErrorKind::HandlerPanic(reason)))
                    .await;
            }
        }
    }
    trace!("inbound task exited");
}

async fn handle_inbound(
    from: NodeId,
    payload: &[u8],
    pool: &BlockPool,
    store: &dyn BlockStore,
    transport: &dyn Transport,
    peer_errors: &mpsc::Sender<PeerError>,
) -> Result<(), PeerErrorKind> {
    let message =
        decode_message(payload).map_err(|err| PeerErrorKind::MalformedMessage(err.to_string()))?;
    trace!(peer = %from, kind = message.type_name(), "received message");

    match message {
        BlockSyncMessage::BlockRequest(request) => {
            respond_to_peer(from, request.height, pool, store, transport, peer_errors).await;
        }
        BlockSyncMessage::BlockResponse(response) => {
            let size = response.block.size_bytes();
            pool.add_block(from, response.block, response.commit, size)
                .await;
        }
        BlockSyncMessage::StatusRequest(_) => {
            let status = BlockSyncMessage::StatusResponse(messages::StatusResponse {
                height: store.height(),
                base: store.base(),
            });
            let _ = send_message(transport, pool, peer_errors, Some(from), status).await;
        }
        BlockSyncMessage::StatusResponse(status) => {
            pool.set_peer_range(from, status.base, status.height);
        }
        BlockSyncMessage::NoBlockResponse(no_block) => {
            debug!(peer = %from, height = no_block.height.0, "peer does not have the requested block");
        }
    }
    Ok(())
}

/// Serve a peer's block request from the local store, or say we don't
/// have it. Never drops the request silently.
async fn respond_to_peer(
    peer: NodeId,
    height: Height,
    pool: &BlockPool,
    store: &dyn BlockStore,
    transport: &dyn Transport,
    peer_errors: &mpsc::Sender<PeerError>,
) {
    let reply = match (store.load_block(height), store.load_commit(height)) {
        (Some(block), Some(commit)) => BlockSyncMessage::BlockResponse(Box::new(
            messages::BlockResponse {
                block: Block::clone(&block),
                commit: Commit::clone(&commit),
            },
        )),
        _ => {
            info!(%peer, height = height.0, "peer requesting a block we do not have");
            BlockSyncMessage::NoBlockResponse(messages::NoBlockResponse { height })
        }
    };
    let _ = send_message(transport, pool, peer_errors, Some(peer), reply).await;
}

// ═══════════════════════════════════════════════════════════════════════
// Peer updates
// ═══════════════════════════════════════════════════════════════════════

async fn peer_update_task(
    mut peer_updates: mpsc::Receiver<PeerUpdate>,
    pool: Arc<BlockPool>,
    store: Arc<dyn BlockStore>,
    transport: Arc<dyn Transport>,
    peer_errors: mpsc::Sender<PeerError>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let update = tokio::select! {
            _ = shutdown.changed() => break,
            maybe = peer_updates.recv() => match maybe {
                Some(update) => update,
                None => break,
            },
        };
        debug!(peer = %update.peer, status = ?update.status, "received peer update");

        match update.status {
            PeerStatus::Up => {
                pool.add_peer(update.peer);
                // Tell the new peer what we can serve.
                let status = BlockSyncMessage::StatusResponse(messages::StatusResponse {
                    height: store.height(),
                    base: store.base(),
                });
                if send_message(
                    transport.as_ref(),
                    &pool,
                    &peer_errors,
                    Some(update.peer),
                    status,
                )
                .await
                .is_err()
                {
                    break;
                }
            }
            PeerStatus::Down => pool.remove_peer(update.peer),
        }
    }
    trace!("peer update task exited");
}

// ═══════════════════════════════════════════════════════════════════════
// Request pump
// ═══════════════════════════════════════════════════════════════════════

async fn request_pump_task(
    mut pool_channels: PoolChannels,
    pool: Arc<BlockPool>,
    transport: Arc<dyn Transport>,
    peer_errors: mpsc::Sender<PeerError>,
    status_update_interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut status_tick = tokio::time::interval(status_update_interval);
    status_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(BlockRequest { height, peer }) = pool_channels.requests.recv() => {
                let request = BlockSyncMessage::BlockRequest(messages::BlockRequest { height });
                if send_message(transport.as_ref(), &pool, &peer_errors, Some(peer), request)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Some(error) = pool_channels.errors.recv() => {
                let _ = peer_errors.send(error).await;
            }
            _ = status_tick.tick() => {
                let request = BlockSyncMessage::StatusRequest(messages::StatusRequest);
                if send_message(transport.as_ref(), &pool, &peer_errors, None, request)
                    .await
                    .is_err()
                {
                    // Broadcast failure: the transport is gone.
                    break;
                }
            }
        }
    }
    trace!("request pump exited");
}

// ═══════════════════════════════════════════════════════════════════════
// Driver
// ═══════════════════════════════════════════════════════════════════════

/// Did one driver pass make progress?
enum Step {
    Advanced,
    Idle,
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    config: &BlockSyncConfig,
    pool: &Arc<BlockPool>,
    store: &dyn BlockStore,
    executor: &dyn BlockExecutor,
    handoff: &dyn ConsensusHandoff,
    status_events: &Option<mpsc::Sender<BlockSyncStatus>>,
    mut state: ChainState,
    state_synced: bool,
    shutdown: &mut oneshot::Receiver<()>,
) -> Result<(), ReactorError> {
    let sync_start = Instant::now();
    let mut trusted: Option<(Arc<Block>, Arc<Commit>)> = None;
    let mut blocks_synced: u64 = 0;
    let mut last_hundred = Instant::now();
    let mut last_rate = 0.0_f64;

    let mut try_tick = tokio::time::interval(config.try_sync_interval);
    try_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut switch_tick = tokio::time::interval(config.switch_to_consensus_interval);
    switch_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Self-signal so a run of filled requesters is consumed back to back
    // instead of once per tick.
    let (process_tx, mut process_rx) = mpsc::channel::<()>(1);

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                info!("block sync shutting down");
                return Ok(());
            }
            _ = switch_tick.tick() => {
                let status = pool.status();
                let last_advance = pool.last_advance();
                debug!(
                    height = status.height,
                    num_pending = status.num_pending,
                    total = status.num_requesters,
                    "consensus ticker"
                );

                if pool.is_caught_up() {
                    info!(height = status.height, "caught up, switching to consensus");
                } else if last_advance.elapsed() > config.sync_timeout {
                    error!(
                        last_advance_secs = last_advance.elapsed().as_secs(),
                        "no progress since last advance, switching to consensus"
                    );
                } else {
                    info!(
                        height = status.height,
                        max_peer_height = pool.max_peer_height().0,
                        timeout_in = ?(config.sync_timeout.saturating_sub(last_advance.elapsed())),
                        eta = ?pool.remaining_sync_time(),
                        "not caught up yet"
                    );
                    continue;
                }

                publish_status(status_events, true, status.height).await;
                info!(
                    blocks_synced,
                    elapsed = ?sync_start.elapsed(),
                    "block sync finished"
                );
                handoff.switch_to_consensus(state, blocks_synced > 0 || state_synced);
                return Ok(());
            }
            _ = try_tick.tick() => {
                let _ = process_tx.try_send(());
            }
            Some(()) = process_rx.recv() => {
                match process_next(config, pool, store, executor, &mut state, &mut trusted).await? {
                    Step::Advanced => {
                        blocks_synced += 1;
                        if blocks_synced % 100 == 0 {
                            let window = last_hundred.elapsed().as_secs_f64();
                            last_rate = 0.9 * last_rate + 0.1 * (100.0 / window);
                            pool.set_last_sync_rate(last_rate);
                            info!(
                                height = pool.status().height,
                                max_peer_height = pool.max_peer_height().0,
                                blocks_per_sec = last_rate,
                                "block sync rate"
                            );
                            last_hundred = Instant::now();
                        }
                        // Keep draining while blocks are ready.
                        let _ = process_tx.try_send(());
                    }
                    Step::Idle => {}
                }
            }
        }
    }
}

/// One verify-apply-persist pass over the block at the bottom of the
/// window.
async fn process_next(
    config: &BlockSyncConfig,
    pool: &Arc<BlockPool>,
    store: &dyn BlockStore,
    executor: &dyn BlockExecutor,
    state: &mut ChainState,
    trusted: &mut Option<(Arc<Block>, Arc<Commit>)>,
) -> Result<Step, ReactorError> {
    let Some(next) = pool.peek_block() else {
        return Ok(Step::Idle);
    };
    let height = next.block.height();

    // Recover the trusted anchor from the store when resuming a chain
    // with existing blocks.
    if trusted.is_none() && state.last_block_height.0 != 0 {
        let anchor_height = state.last_block_height;
        let block = store
            .load_block(anchor_height)
            .ok_or(ReactorError::MissingTrustedBlock {
                height: anchor_height,
            })?;
        let commit = store
            .load_commit(anchor_height)
            .ok_or(ReactorError::MissingTrustedBlock {
                height: anchor_height,
            })?;
        *trusted = Some((block, commit));
    }

    let parts = next
        .block
        .part_set(config.block_part_size)
        .map_err(|_| ReactorError::MakePartSet { height })?;
    let block_id = BlockId {
        hash: next.block.hash(),
        parts: parts.header(),
    };

    match trusted.as_ref() {
        Some((trusted_block, trusted_commit)) => {
            let trusted_header = SignedHeader::new(
                trusted_block.header.clone(),
                Commit::clone(trusted_commit),
            );
            let untrusted_header =
                SignedHeader::new(next.block.header.clone(), Commit::clone(&next.commit));

            if let Err(err) = verify_adjacent(&trusted_header, &untrusted_header, &state.next_validators)
            {
                warn!(
                    height = height.0,
                    peer = %next.peer,
                    peer_fault = err.is_peer_fault(),
                    %err,
                    "block failed adjacent verification"
                );
                pool.redo_request(
                    height,
                    PeerErrorKind::InvalidBlock {
                        height,
                        source: err,
                    },
                )
                .await;
                return Ok(Step::Idle);
            }
        }
        None => {
            // First block of a fresh chain: anchor trust on the validator
            // set recorded in local state.
            let expected = state.validators.hash();
            if expected != next.block.header.validators_hash {
                return Err(ReactorError::ValidatorSetMismatch {
                    expected,
                    got: next.block.header.validators_hash,
                });
            }
        }
    }

    store
        .save_block(&next.block, &parts, &next.commit)
        .map_err(|source| ReactorError::SaveBlock { height, source })?;

    *state = executor
        .apply_block(state.clone(), &block_id, &next.block)
        .map_err(|source| ReactorError::ApplyBlock { height, source })?;

    *trusted = Some((Arc::clone(&next.block), Arc::clone(&next.commit)));
    pool.pop_block();
    trace!(height = height.0, "block applied");
    Ok(Step::Advanced)
}
