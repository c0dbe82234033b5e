//! Stream health counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::debug;

/// Snapshot of the counters published by the real-time thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Periods fully written
    pub periods: u64,
    /// Frames accepted by the device
    pub frames_written: u64,
    /// Underruns recovered with `prepare`
    pub underruns: u64,
    /// Suspend events handled
    pub suspends: u64,
    /// Writes retried after `WouldBlock`
    pub would_block_retries: u64,
    /// Unrecoverable faults that ended the loop
    pub faults: u64,
}

/// Lifetime counters, written by the real-time thread and read by anyone
#[derive(Debug, Default)]
pub(crate) struct SharedStats {
    pub periods: AtomicU64,
    pub frames_written: AtomicU64,
    pub underruns: AtomicU64,
    pub suspends: AtomicU64,
    pub would_block_retries: AtomicU64,
    pub faults: AtomicU64,
}

impl SharedStats {
    pub fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            periods: self.periods.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            suspends: self.suspends.load(Ordering::Relaxed),
            would_block_retries: self.would_block_retries.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

/// Per-interval view kept on the real-time thread for the periodic log line
#[derive(Debug, Clone)]
pub(super) struct IntervalMetrics {
    pub periods: u64,
    pub frames: u64,
    pub partial_writes: u64,
    pub would_block: u64,
    pub recoveries: u64,
    /// Longest generator call this interval (microseconds)
    pub max_fill_us: u64,
    last_log_time: Instant,
}

impl IntervalMetrics {
    pub fn new() -> Self {
        Self {
            periods: 0,
            frames: 0,
            partial_writes: 0,
            would_block: 0,
            recoveries: 0,
            max_fill_us: 0,
            last_log_time: Instant::now(),
        }
    }

    pub fn record_fill(&mut self, started: Instant) {
        self.max_fill_us = self.max_fill_us.max(started.elapsed().as_micros() as u64);
    }

    /// Log metrics if enough time has passed (every 1 second)
    pub fn maybe_log(&mut self) {
        if self.last_log_time.elapsed().as_secs() < 1 {
            return;
        }

        debug!(
            "PCM METRICS [tid={:?}]: periods={}, frames={}, partial_writes={}, would_block={}, \
             recoveries={}, max_fill={}μs",
            std::thread::current().id(),
            self.periods,
            self.frames,
            self.partial_writes,
            self.would_block,
            self.recoveries,
            self.max_fill_us
        );

        // Reset counters for next interval (show per-second rates)
        *self = Self::new();
    }
}
