//! Block-sync metrics using the native Prometheus client.
//!
//! Metrics are domain-specific rather than generic event counters. Use
//! traces for event-level granularity during investigations.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Gauge, Histogram,
};
use std::sync::OnceLock;
use std::time::Duration;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Domain-specific block-sync metrics.
pub struct Metrics {
    /// Next height the driver will consume.
    pub height: Gauge,
    /// Best height advertised by any live peer.
    pub max_peer_height: Gauge,
    /// Peers currently tracked by the pool.
    pub peers: Gauge,
    /// Requesters in the sliding window.
    pub requesters: Gauge,
    /// Requesters assigned but not yet consumed.
    pub pending: Gauge,

    /// Blocks verified, applied and persisted.
    pub blocks_synced: Counter,
    /// Requests emitted to peers.
    pub requests_sent: Counter,
    /// Block payload bytes received from peers.
    pub bytes_received: Counter,
    /// Peer errors by kind.
    pub peer_errors: CounterVec,

    /// Assignment-to-delivery latency per block.
    pub fetch_latency: Histogram,
}

impl Metrics {
    fn new() -> Self {
        Self {
            height: register_gauge!("keystone_blocksync_height", "Next height to be consumed")
                .unwrap(),
            max_peer_height: register_gauge!(
                "keystone_blocksync_max_peer_height",
                "Best height advertised by any live peer"
            )
            .unwrap(),
            peers: register_gauge!(
                "keystone_blocksync_peers",
                "Peers currently tracked by the block pool"
            )
            .unwrap(),
            requesters: register_gauge!(
                "keystone_blocksync_requesters",
                "Requesters in the sliding window"
            )
            .unwrap(),
            pending: register_gauge!(
                "keystone_blocksync_pending_requests",
                "Requests assigned to peers and not yet consumed"
            )
            .unwrap(),
            blocks_synced: register_counter!(
                "keystone_blocksync_blocks_synced_total",
                "Blocks verified, applied and persisted by block sync"
            )
            .unwrap(),
            requests_sent: register_counter!(
                "keystone_blocksync_requests_sent_total",
                "Block requests emitted to peers"
            )
            .unwrap(),
            bytes_received: register_counter!(
                "keystone_blocksync_bytes_received_total",
                "Block payload bytes received from peers"
            )
            .unwrap(),
            peer_errors: register_counter_vec!(
                "keystone_blocksync_peer_errors_total",
                "Peer errors reported to the transport, by kind",
                &["kind"]
            )
            .unwrap(),
            fetch_latency: register_histogram!(
                "keystone_blocksync_fetch_latency_seconds",
                "Time from request assignment to block delivery",
                vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0]
            )
            .unwrap(),
        }
    }
}

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

pub fn record_pool_status(height: u64, max_peer_height: u64, requesters: usize, pending: u32) {
    let m = metrics();
    m.height.set(height as f64);
    m.max_peer_height.set(max_peer_height as f64);
    m.requesters.set(requesters as f64);
    m.pending.set(pending as f64);
}

pub fn record_peer_count(peers: usize) {
    metrics().peers.set(peers as f64);
}

pub fn record_block_synced() {
    metrics().blocks_synced.inc();
}

pub fn record_request_sent() {
    metrics().requests_sent.inc();
}

pub fn record_bytes_received(bytes: usize) {
    metrics().bytes_received.inc_by(bytes as f64);
}

pub fn record_peer_error(kind: &str) {
    metrics().peer_errors.with_label_values(&[kind]).inc();
}

pub fn record_fetch_latency(latency: Duration) {
    metrics().fetch_latency.observe(latency.as_secs_f64());
}
