//! Configuration for the block-sync subsystem.

use std::time::Duration;

/// Tunables for the block pool and reactor.
#[derive(Debug, Clone)]
pub struct BlockSyncConfig {
    /// Cap on the requester window (heights fetched concurrently).
    pub max_pending_requesters: usize,

    /// Per-peer fan-out: outstanding requests one peer may hold.
    pub max_pending_requests_per_peer: u32,

    /// A request Pending longer than this removes the serving peer.
    pub request_timeout: Duration,

    /// How often the timeout sweep scans pending requesters.
    pub timeout_sweep_interval: Duration,

    /// Window over which per-peer receive rates are sampled.
    pub peer_sample_time: Duration,

    /// Peers delivering below this rate (bytes/s) while holding requests
    /// are removed.
    pub min_recv_rate: f64,

    /// How long a misbehaving peer is excluded from assignment.
    pub peer_mute_duration: Duration,

    /// Interval between StatusRequest broadcasts.
    pub status_update_interval: Duration,

    /// Interval between catch-up / stall checks in the driver.
    pub switch_to_consensus_interval: Duration,

    /// Hand off to consensus after this long without progress.
    pub sync_timeout: Duration,

    /// Scheduler and driver wake-up interval.
    pub try_sync_interval: Duration,

    /// Size of one block part when computing part sets.
    pub block_part_size: usize,

    /// Capacity of the peer-error channel. Should exceed the peer count.
    pub peer_error_buffer: usize,
}

impl Default for BlockSyncConfig {
    fn default() -> Self {
        Self {
            max_pending_requesters: 600,
            max_pending_requests_per_peer: 20,
            request_timeout: Duration::from_secs(15),
            timeout_sweep_interval: Duration::from_secs(1),
            peer_sample_time: Duration::from_secs(5),
            min_recv_rate: 7_680.0,
            peer_mute_duration: Duration::from_secs(10),
            status_update_interval: Duration::from_secs(10),
            switch_to_consensus_interval: Duration::from_secs(1),
            sync_timeout: Duration::from_secs(60),
            try_sync_interval: Duration::from_millis(10),
            block_part_size: keystone_types::BLOCK_PART_SIZE,
            peer_error_buffer: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = BlockSyncConfig::default();
        assert_eq!(config.max_pending_requesters, 600);
        assert_eq!(config.max_pending_requests_per_peer, 20);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.sync_timeout, Duration::from_secs(60));
        assert_eq!(config.try_sync_interval, Duration::from_millis(10));
    }
}
