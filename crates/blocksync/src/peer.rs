//! Per-peer bookkeeping for the block pool.

use keystone_types::Height;
use std::time::{Duration, Instant};

/// Exponential moving average weight for the previous rate estimate.
const RATE_EWMA_KEEP: f64 = 0.8;
/// Weight for the newly observed rate.
const RATE_EWMA_NEW: f64 = 0.2;
/// Minimum window over which a rate observation is meaningful.
const MIN_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// State the pool tracks for one peer.
///
/// A record is created on the first status or peer-up event, updated on
/// every response and by the periodic rate sampler, and dropped on
/// peer-down, misbehavior or timeout. All mutation happens under the pool
/// lock; no method here fails.
#[derive(Debug)]
pub struct PeerRecord {
    /// Lowest height the peer claims to serve.
    base: Height,
    /// Highest height the peer claims to serve.
    top: Height,
    /// Requesters currently assigned to this peer (Pending or Filled).
    num_pending: u32,
    /// EWMA of delivered bytes per second. Starts at zero.
    recv_rate: f64,
    /// Bytes received since the last rate sample.
    recv_bytes: u64,
    /// When the current sample window started.
    sample_started_at: Instant,
    /// When the peer was first seen; slowness needs a full window first.
    first_seen_at: Instant,
    /// Assignment is suppressed until this deadline passes.
    mute_until: Option<Instant>,
}

impl PeerRecord {
    pub fn new(now: Instant) -> Self {
        PeerRecord {
            base: Height(0),
            top: Height(0),
            num_pending: 0,
            recv_rate: 0.0,
            recv_bytes: 0,
            sample_started_at: now,
            first_seen_at: now,
            mute_until: None,
        }
    }

    /// Replace the announced height range with the peer's latest claim.
    ///
    /// The claim is stored raw; validity is enforced at assignment time.
    pub fn set_range(&mut self, base: Height, top: Height) {
        self.base = base;
        self.top = top;
    }

    pub fn top(&self) -> Height {
        self.top
    }

    pub fn num_pending(&self) -> u32 {
        self.num_pending
    }

    pub fn increment_pending(&mut self) {
        self.num_pending += 1;
    }

    pub fn decrement_pending(&mut self) {
        debug_assert!(self.num_pending > 0, "pending count underflow");
        self.num_pending = self.num_pending.saturating_sub(1);
    }

    /// Account bytes delivered by this peer; consumed by the next sample.
    pub fn record_received(&mut self, bytes: usize) {
        self.recv_bytes += bytes as u64;
    }

    pub fn recv_rate(&self) -> f64 {
        self.recv_rate
    }

    /// Fold the bytes received since the last sample into the EWMA.
    ///
    /// Windows shorter than one second are left to accumulate.
    pub fn sample_rate(&mut self, now: Instant) {
        let window = now.duration_since(self.sample_started_at);
        if window < MIN_SAMPLE_WINDOW {
            return;
        }
        let observed = self.recv_bytes as f64 / window.as_secs_f64();
        self.recv_rate = RATE_EWMA_KEEP * self.recv_rate + RATE_EWMA_NEW * observed;
        self.recv_bytes = 0;
        self.sample_started_at = now;
    }

    /// True when the peer holds requests, has been observed for at least a
    /// full sample window, and delivers below `min_rate` bytes/s.
    pub fn is_slow(&self, min_rate: f64, sample_window: Duration, now: Instant) -> bool {
        self.num_pending > 0
            && now.duration_since(self.first_seen_at) >= sample_window
            && self.recv_rate < min_rate
    }

    /// Exclude the peer from assignment until `until`.
    pub fn mute(&mut self, until: Instant) {
        self.mute_until = Some(until);
    }

    pub fn is_muted(&self, now: Instant) -> bool {
        self.mute_until.is_some_and(|until| now < until)
    }

    /// Whether the scheduler may assign `height` to this peer.
    pub fn is_eligible(&self, height: Height, max_pending_per_peer: u32, now: Instant) -> bool {
        self.base <= height
            && height <= self.top
            && self.num_pending < max_pending_per_peer
            && !self.is_muted(now)
    }
}
