//! In-memory doubles and a reactor harness for sync scenarios.
#![allow(dead_code)]

use keystone_blocksync::{
    ApplyError, BlockExecutor, BlockStore, BlockSyncConfig, BlockSyncStatus, ConsensusHandoff,
    PeerError, Reactor, ReactorChannels, ReactorError, ShutdownHandle, StateStore, StoreError,
    Transport, TransportError,
};
use keystone_messages::{
    decode_message, encode_message, BlockResponse, BlockSyncMessage, Envelope, PeerStatus,
    PeerUpdate, StatusResponse,
};
use keystone_types::{Block, BlockId, ChainState, Commit, Height, NodeId, PartSet};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Intervals tightened so scenarios complete in milliseconds.
pub fn fast_config() -> BlockSyncConfig {
    BlockSyncConfig {
        try_sync_interval: Duration::from_millis(2),
        switch_to_consensus_interval: Duration::from_millis(10),
        status_update_interval: Duration::from_millis(200),
        timeout_sweep_interval: Duration::from_millis(20),
        peer_mute_duration: Duration::from_millis(50),
        ..BlockSyncConfig::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Storage / executor / handoff doubles
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: Mutex<BTreeMap<u64, (Arc<Block>, Arc<Commit>)>>,
}

impl MemoryBlockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Preload a chain segment, e.g. to model a partially synced node.
    pub fn preload(&self, chain: &[(Block, Commit)]) {
        let mut blocks = self.blocks.lock();
        for (block, commit) in chain {
            blocks.insert(
                block.height().0,
                (Arc::new(block.clone()), Arc::new(commit.clone())),
            );
        }
    }
}

impl BlockStore for MemoryBlockStore {
    fn height(&self) -> Height {
        Height(self.blocks.lock().keys().next_back().copied().unwrap_or(0))
    }

    fn base(&self) -> Height {
        Height(self.blocks.lock().keys().next().copied().unwrap_or(0))
    }

    fn load_block(&self, height: Height) -> Option<Arc<Block>> {
        self.blocks.lock().get(&height.0).map(|(b, _)| Arc::clone(b))
    }

    fn load_commit(&self, height: Height) -> Option<Arc<Commit>> {
        self.blocks.lock().get(&height.0).map(|(_, c)| Arc::clone(c))
    }

    fn save_block(
        &self,
        block: &Block,
        _parts: &PartSet,
        commit: &Commit,
    ) -> Result<(), StoreError> {
        self.blocks.lock().insert(
            block.height().0,
            (Arc::new(block.clone()), Arc::new(commit.clone())),
        );
        Ok(())
    }
}

pub struct MemoryStateStore {
    state: Mutex<ChainState>,
}

impl MemoryStateStore {
    pub fn new(state: ChainState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<ChainState, StoreError> {
        Ok(self.state.lock().clone())
    }
}

/// Advances `last_block_height`; validator sets are stable in these
/// scenarios.
pub struct CountingExecutor {
    /// When set, applying this height fails (local corruption scenario).
    pub fail_at: Option<Height>,
}

impl CountingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { fail_at: None })
    }

    pub fn failing_at(height: Height) -> Arc<Self> {
        Arc::new(Self {
            fail_at: Some(height),
        })
    }
}

impl BlockExecutor for CountingExecutor {
    fn apply_block(
        &self,
        mut state: ChainState,
        _block_id: &BlockId,
        block: &Block,
    ) -> Result<ChainState, ApplyError> {
        if self.fail_at == Some(block.height()) {
            return Err(ApplyError("state machine rejected block".into()));
        }
        state.last_block_height = block.height();
        Ok(state)
    }
}

/// Captures the consensus handoff.
pub struct RecordingHandoff {
    tx: Mutex<Option<oneshot::Sender<(ChainState, bool)>>>,
}

impl RecordingHandoff {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<(ChainState, bool)>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }
}

impl ConsensusHandoff for RecordingHandoff {
    fn switch_to_consensus(&self, state: ChainState, skip_wal: bool) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send((state, skip_wal));
        }
    }
}

/// Transport double backed by an unbounded channel.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Transport for ChannelTransport {
    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.tx.send(envelope).map_err(|_| TransportError::Closed)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════════

pub struct Harness {
    pub inbound: mpsc::Sender<Envelope>,
    pub peer_updates: mpsc::Sender<PeerUpdate>,
    pub outbound: mpsc::UnboundedReceiver<Envelope>,
    pub peer_errors: mpsc::Receiver<PeerError>,
    pub status_events: mpsc::Receiver<BlockSyncStatus>,
    pub handoff: oneshot::Receiver<(ChainState, bool)>,
    pub store: Arc<MemoryBlockStore>,
    pub join: tokio::task::JoinHandle<Result<(), ReactorError>>,
    pub shutdown: ShutdownHandle,
}

pub fn spawn_reactor(
    config: BlockSyncConfig,
    state: ChainState,
    store: Arc<MemoryBlockStore>,
    executor: Arc<CountingExecutor>,
) -> Harness {
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let (peer_update_tx, peer_update_rx) = mpsc::channel(16);
    let (peer_error_tx, peer_error_rx) = mpsc::channel(64);
    let (status_tx, status_rx) = mpsc::channel(16);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (handoff, handoff_rx) = RecordingHandoff::new();

    let (reactor, shutdown) = Reactor::new(
        config,
        MemoryStateStore::new(state),
        Arc::clone(&store) as Arc<dyn BlockStore>,
        executor as Arc<dyn BlockExecutor>,
        handoff as Arc<dyn ConsensusHandoff>,
        Arc::new(ChannelTransport { tx: outbound_tx }),
        ReactorChannels {
            inbound: inbound_rx,
            peer_updates: peer_update_rx,
            peer_errors: peer_error_tx,
            status_events: Some(status_tx),
        },
        false,
    );

    let join = tokio::spawn(reactor.run());

    Harness {
        inbound: inbound_tx,
        peer_updates: peer_update_tx,
        outbound: outbound_rx,
        peer_errors: peer_error_rx,
        status_events: status_rx,
        handoff: handoff_rx,
        store,
        join,
        shutdown,
    }
}

impl Harness {
    pub async fn peer_up(&self, peer: NodeId) {
        self.peer_updates
            .send(PeerUpdate {
                peer,
                status: PeerStatus::Up,
            })
            .await
            .expect("reactor running");
    }

    pub async fn peer_down(&self, peer: NodeId) {
        self.peer_updates
            .send(PeerUpdate {
                peer,
                status: PeerStatus::Down,
            })
            .await
            .expect("reactor running");
    }

    pub async fn send_message(&self, from: NodeId, message: BlockSyncMessage) {
        let payload = encode_message(&message).expect("encodable message");
        self.inbound
            .send(Envelope::received_from(from, payload))
            .await
            .expect("reactor running");
    }

    pub async fn announce(&self, peer: NodeId, base: u64, top: u64) {
        self.send_message(
            peer,
            BlockSyncMessage::StatusResponse(StatusResponse {
                height: Height(top),
                base: Height(base),
            }),
        )
        .await;
    }

    pub async fn serve_block(&self, peer: NodeId, block: Block, commit: Commit) {
        self.send_message(
            peer,
            BlockSyncMessage::BlockResponse(Box::new(BlockResponse { block, commit })),
        )
        .await;
    }

    /// Next outbound envelope, decoded, within a deadline.
    pub async fn next_outbound(&mut self) -> (Envelope, BlockSyncMessage) {
        let envelope = tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("outbound message within deadline")
            .expect("transport open");
        let message = decode_message(&envelope.payload).expect("outbound messages are well-formed");
        (envelope, message)
    }

    /// Collect the next `n` outbound block requests as `height -> peer`,
    /// ignoring status chatter.
    pub async fn expect_block_requests(&mut self, n: usize) -> BTreeMap<u64, NodeId> {
        let mut requests = BTreeMap::new();
        while requests.len() < n {
            let (envelope, message) = self.next_outbound().await;
            if let BlockSyncMessage::BlockRequest(request) = message {
                let peer = envelope.to.expect("block requests are addressed");
                let previous = requests.insert(request.height.0, peer);
                assert!(
                    previous.is_none(),
                    "duplicate request for height {}",
                    request.height.0
                );
            }
        }
        requests
    }

    pub async fn expect_peer_error(&mut self) -> PeerError {
        tokio::time::timeout(Duration::from_secs(5), self.peer_errors.recv())
            .await
            .expect("peer error within deadline")
            .expect("reactor running")
    }

    pub async fn expect_handoff(&mut self) -> (ChainState, bool) {
        tokio::time::timeout(Duration::from_secs(5), &mut self.handoff)
            .await
            .expect("handoff within deadline")
            .expect("handoff recorded")
    }
}
