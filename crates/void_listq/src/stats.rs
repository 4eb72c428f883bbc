//! Queue statistics and in-flight diagnostics

use crate::policy::DropReason;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Counters describing queue activity since creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Operations admitted to the pending queue
    pub enqueued: u64,
    /// Operations dropped without running
    pub dropped: u64,
    /// The subset of `dropped` evicted or rejected because the queue was full
    pub overflowed: u64,
    /// Operations taken off the queue and started
    pub started: u64,
    /// Operations that completed successfully
    pub completed: u64,
    /// Operations that failed during execution
    pub failed: u64,
    /// Largest pending queue size observed
    pub peak_pending: usize,
}

impl QueueStats {
    pub(crate) fn record_drops(&mut self, reasons: impl IntoIterator<Item = DropReason>) {
        for reason in reasons {
            self.dropped += 1;
            if reason.is_overflow() {
                self.overflowed += 1;
            }
        }
    }

    pub(crate) fn record_pending(&mut self, pending: usize) {
        if pending > self.peak_pending {
            self.peak_pending = pending;
        }
    }
}

/// The operation currently executing
#[derive(Debug, Clone)]
pub struct InFlight {
    /// Operation name
    pub name: String,
    /// When it was taken off the queue
    pub started_at: Instant,
}

impl InFlight {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            started_at: Instant::now(),
        }
    }

    /// Time spent so far; a commit that never completes keeps growing this
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
