//! Session statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Counters shared by the session, its senders and the worker.
#[derive(Debug, Default)]
pub struct SessionStatistics {
    started_at: RwLock<Option<Instant>>,
    packets_queued: AtomicU64,
    packets_rejected: AtomicU64,
    packets_sent: AtomicU64,
    packets_flushed: AtomicU64,
    mux_failures: AtomicU64,
    bytes_written: AtomicU64,
}

impl SessionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of streaming.
    pub fn start(&self) {
        *self.started_at.write() = Some(Instant::now());
    }

    pub fn record_queued(&self) {
        self.packets_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.packets_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flushed(&self, count: u64) {
        self.packets_flushed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_mux_failure(&self) {
        self.mux_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get a snapshot. Queue depth and overflow drops come from the queue.
    pub fn snapshot(&self, queue_depth: usize, overflow_drops: u64) -> StatisticsSnapshot {
        let uptime = self.started_at.read().map(|start| start.elapsed());
        let bytes_written = self.bytes_written.load(Ordering::Relaxed);

        let bitrate_kbps = match uptime {
            Some(elapsed) if elapsed.as_secs_f64() > 0.0 => {
                ((bytes_written * 8) as f64 / elapsed.as_secs_f64() / 1000.0) as u32
            }
            _ => 0,
        };

        let packets_rejected = self.packets_rejected.load(Ordering::Relaxed);
        let packets_flushed = self.packets_flushed.load(Ordering::Relaxed);
        let mux_failures = self.mux_failures.load(Ordering::Relaxed);

        StatisticsSnapshot {
            packets_queued: self.packets_queued.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_dropped: packets_rejected + packets_flushed + mux_failures + overflow_drops,
            packets_rejected,
            packets_flushed,
            mux_failures,
            overflow_drops,
            queue_depth,
            bytes_written,
            bitrate_kbps,
            uptime_seconds: uptime.map(|elapsed| elapsed.as_secs()).unwrap_or(0),
        }
    }
}

/// Point-in-time session statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub packets_queued: u64,
    pub packets_sent: u64,
    /// Sum of every drop reason below.
    pub packets_dropped: u64,
    pub packets_rejected: u64,
    pub packets_flushed: u64,
    pub mux_failures: u64,
    pub overflow_drops: u64,
    pub queue_depth: usize,
    pub bytes_written: u64,
    pub bitrate_kbps: u32,
    pub uptime_seconds: u64,
}
