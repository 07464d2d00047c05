//! Decode counters

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::DecodeError;

/// Per-feed decode metrics
#[derive(Debug, Default)]
pub struct CodecMetrics {
    frames_decoded: AtomicU64,
    samples_decoded: AtomicU64,
    missing_timestamp: AtomicU64,
    empty_values: AtomicU64,
    malformed: AtomicU64,
}

impl CodecMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_decoded(&self, samples: usize) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
        self.samples_decoded
            .fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, err: &DecodeError) {
        let counter = match err {
            DecodeError::MissingTimestamp => &self.missing_timestamp,
            DecodeError::EmptyValues => &self.empty_values,
            DecodeError::Malformed { .. } => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            samples_decoded: self.samples_decoded.load(Ordering::Relaxed),
            missing_timestamp: self.missing_timestamp.load(Ordering::Relaxed),
            empty_values: self.empty_values.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_decoded: u64,
    pub samples_decoded: u64,
    pub missing_timestamp: u64,
    pub empty_values: u64,
    pub malformed: u64,
}

impl MetricsSnapshot {
    pub fn failures(&self) -> u64 {
        self.missing_timestamp + self.empty_values + self.malformed
    }
}
