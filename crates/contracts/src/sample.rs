//! Sample clock types - SampleClockReconstructor input/output

use serde::{Deserialize, Serialize};

/// One reconstructed sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedSample {
    /// Wall-clock epoch milliseconds
    pub timestamp_ms: f64,

    /// Raw sample value
    pub value: f64,
}

/// Per-channel reconstruction state
///
/// Owned by exactly one channel's reconstructor and reset when the
/// live subscription restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleClockState {
    /// Timestamp given to the last sample of the previous batch
    pub last_assigned_timestamp: Option<f64>,

    /// Spacing used by the previous batch (ms)
    pub sample_interval_ms: f64,
}

impl SampleClockState {
    pub fn is_fresh(&self) -> bool {
        self.last_assigned_timestamp.is_none()
    }
}

/// Which rule chose the first sample time of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    /// Continued from the previous batch
    Continuity,
    /// Continuity candidate snapped to producer time
    Snapped,
    /// First batch, producer time trusted
    Producer,
    /// Local receipt time
    LocalFallback,
}

impl TimestampSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continuity => "continuity",
            Self::Snapped => "snapped",
            Self::Producer => "producer",
            Self::LocalFallback => "local_fallback",
        }
    }
}

/// Diagnostics for one reconstruction call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconstructOutcome {
    pub source: TimestampSource,

    /// `producer_first - continuity_candidate`, when both exist (ms)
    pub drift_ms: Option<f64>,
}
