//! Liveness of the pipeline's parameter polling.
//!
//! Every poll through the pump records a heartbeat. The control surface reads
//! it to tell a pipeline that is still consuming updates from one that has
//! wedged inside its opaque run loop.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Time without a poll before the pipeline is considered stalled.
pub const HEARTBEAT_STALE_THRESHOLD_MS: u64 = 1_500;
/// Grace period at startup allowing the pipeline to warm up before monitoring.
pub(crate) const HEARTBEAT_STARTUP_GRACE_MS: u64 = 5_000;

#[derive(Debug)]
pub struct PumpHeartbeat {
    last_beat: AtomicU64,
    beats: AtomicU64,
}

impl PumpHeartbeat {
    /// Initialise the tracker with a startup grace period.
    pub(crate) fn new() -> Self {
        Self {
            last_beat: AtomicU64::new(grace_deadline()),
            beats: AtomicU64::new(0),
        }
    }

    /// Re-arm the grace period for a fresh run.
    pub(crate) fn reset(&self) {
        self.last_beat.store(grace_deadline(), Ordering::Relaxed);
        self.beats.store(0, Ordering::Relaxed);
    }

    /// Register a poll.
    pub(crate) fn beat(&self) {
        self.last_beat.store(current_millis(), Ordering::Relaxed);
        self.beats.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of polls since the run started.
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }

    /// How long the pipeline has gone without polling, if longer than `threshold`.
    pub fn stale_for(&self, threshold: Duration) -> Option<Duration> {
        self.stale_at(current_millis(), threshold)
    }

    fn stale_at(&self, now: u64, threshold: Duration) -> Option<Duration> {
        let silent = now.saturating_sub(self.last_beat.load(Ordering::Relaxed));
        (silent > threshold.as_millis() as u64).then(|| Duration::from_millis(silent))
    }
}

fn grace_deadline() -> u64 {
    current_millis().saturating_add(HEARTBEAT_STARTUP_GRACE_MS)
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
