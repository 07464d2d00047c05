//! Transfer counters shared across sessions

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::TransferError;

#[derive(Debug, Default)]
pub struct TransferMetrics {
    completed: AtomicU64,
    failed: AtomicU64,
    bytes_received: AtomicU64,
    chunks_received: AtomicU64,
    last_failure: std::sync::Mutex<Option<&'static str>>,
}

impl TransferMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk(&self, bytes: usize) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, err: &TransferError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_failure.lock() {
            *last = Some(err.label());
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            last_failure: self.last_failure.lock().ok().and_then(|l| *l),
        }
    }
}

/// Snapshot of transfer metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub completed: u64,
    pub failed: u64,
    pub bytes_received: u64,
    pub chunks_received: u64,
    /// Label of the most recent failure
    pub last_failure: Option<&'static str>,
}
