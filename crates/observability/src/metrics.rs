//! Telemetry metrics
//!
//! `record_*` functions feed the `metrics` facade (exported to Prometheus when a
//! recorder is installed). `ClockMetricsAggregator` keeps an in-memory copy for
//! the CLI summary.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use contracts::{DecodeError, ReconstructOutcome, TimestampSource, TransferError};
use metrics::{counter, gauge, histogram};

/// Record one decoded scan frame
pub fn record_frame_decoded(subject: &str, samples: usize) {
    counter!("telemetry_frames_decoded_total").increment(1);
    histogram!("telemetry_frame_samples", "subject" => subject.to_string()).record(samples as f64);
}

/// Record a dropped scan frame
pub fn record_decode_failure(err: &DecodeError) {
    counter!("telemetry_decode_failures_total", "reason" => err.label()).increment(1);
}

/// Record one reconstructed batch
///
/// # Example
///
/// ```ignore
/// let samples = clocks.push(channel, &frame)?;
/// if let Some(outcome) = clocks.get(channel).and_then(|c| c.last_outcome()) {
///     observability::record_reconstruction(channel, &outcome, samples.len());
/// }
/// ```
pub fn record_reconstruction(channel: u32, outcome: &ReconstructOutcome, samples: usize) {
    counter!(
        "telemetry_samples_reconstructed_total",
        "channel" => channel.to_string(),
        "source" => outcome.source.as_str()
    )
    .increment(samples as u64);

    if let Some(drift) = outcome.drift_ms {
        gauge!("telemetry_clock_drift_ms", "channel" => channel.to_string()).set(drift);
        histogram!("telemetry_clock_drift_ms_hist").record(drift.abs());
    }
}

/// Record a chunk received during an export
pub fn record_transfer_bytes(bytes: u64) {
    counter!("telemetry_transfer_bytes_total").increment(bytes);
}

/// Record the end of an export; `Err` is labelled by failure kind
pub fn record_transfer_outcome<T>(outcome: &Result<T, TransferError>) {
    let label = match outcome {
        Ok(_) => "completed",
        Err(err) => err.label(),
    };
    counter!("telemetry_transfers_total", "outcome" => label).increment(1);
}

pub fn record_negotiation_latency(latency: Duration) {
    histogram!("telemetry_negotiation_latency_ms").record(latency.as_secs_f64() * 1000.0);
}

/// In-memory aggregate of the live feed
#[derive(Debug, Clone, Default)]
pub struct ClockMetricsAggregator {
    pub total_frames: u64,
    pub total_samples: u64,
    pub decode_failures: BTreeMap<&'static str, u64>,
    pub clock_errors: u64,
    pub source_counts: HashMap<TimestampSource, u64>,
    /// |drift| across all channels (ms)
    pub drift_stats: RunningStats,
    pub channel_drift: BTreeMap<u32, RunningStats>,
}

impl ClockMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, channel: u32, outcome: &ReconstructOutcome, samples: usize) {
        self.total_frames += 1;
        self.total_samples += samples as u64;
        *self.source_counts.entry(outcome.source).or_insert(0) += 1;

        if let Some(drift) = outcome.drift_ms {
            self.drift_stats.push(drift.abs());
            self.channel_drift.entry(channel).or_default().push(drift);
        }
    }

    pub fn record_decode_failure(&mut self, err: &DecodeError) {
        *self.decode_failures.entry(err.label()).or_insert(0) += 1;
    }

    pub fn record_clock_error(&mut self) {
        self.clock_errors += 1;
    }

    pub fn summary(&self) -> ClockSummary {
        let count = |source| self.source_counts.get(&source).copied().unwrap_or(0);
        let failures: u64 = self.decode_failures.values().sum();
        let attempted = self.total_frames + failures + self.clock_errors;

        ClockSummary {
            total_frames: self.total_frames,
            total_samples: self.total_samples,
            dropped_frames: failures + self.clock_errors,
            drop_rate: if attempted > 0 {
                (failures + self.clock_errors) as f64 / attempted as f64 * 100.0
            } else {
                0.0
            },
            producer_batches: count(TimestampSource::Producer),
            continuity_batches: count(TimestampSource::Continuity),
            snapped_batches: count(TimestampSource::Snapped),
            fallback_batches: count(TimestampSource::LocalFallback),
            drift_ms: StatsSummary::from(&self.drift_stats),
            decode_failures: self.decode_failures.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Live feed summary
#[derive(Debug, Clone, Default)]
pub struct ClockSummary {
    pub total_frames: u64,
    pub total_samples: u64,
    pub dropped_frames: u64,
    pub drop_rate: f64,
    pub producer_batches: u64,
    pub continuity_batches: u64,
    pub snapped_batches: u64,
    pub fallback_batches: u64,
    pub drift_ms: StatsSummary,
    pub decode_failures: BTreeMap<&'static str, u64>,
}

impl std::fmt::Display for ClockSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Live Feed Summary ===")?;
        writeln!(f, "Frames: {}", self.total_frames)?;
        writeln!(f, "Samples: {}", self.total_samples)?;
        writeln!(
            f,
            "Dropped frames: {} ({:.2}%)",
            self.dropped_frames, self.drop_rate
        )?;
        writeln!(
            f,
            "Batch timing: producer={} continuity={} snapped={} fallback={}",
            self.producer_batches,
            self.continuity_batches,
            self.snapped_batches,
            self.fallback_batches
        )?;
        writeln!(f, "Clock drift |ms|: {}", self.drift_ms)?;

        if !self.decode_failures.is_empty() {
            writeln!(f, "Decode failures:")?;
            for (reason, count) in &self.decode_failures {
                writeln!(f, "  {}: {}", reason, count)?;
            }
        }

        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(value);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = ClockMetricsAggregator::new();

        aggregator.update(
            1,
            &ReconstructOutcome {
                source: TimestampSource::Producer,
                drift_ms: None,
            },
            10,
        );
        aggregator.update(
            1,
            &ReconstructOutcome {
                source: TimestampSource::Snapped,
                drift_ms: Some(-4.0),
            },
            10,
        );
        aggregator.record_decode_failure(&DecodeError::EmptyValues);
        aggregator.record_decode_failure(&DecodeError::EmptyValues);

        let summary = aggregator.summary();
        assert_eq!(summary.total_frames, 2);
        assert_eq!(summary.total_samples, 20);
        assert_eq!(summary.producer_batches, 1);
        assert_eq!(summary.snapped_batches, 1);
        assert_eq!(summary.dropped_frames, 2);
        assert!((summary.drop_rate - 50.0).abs() < 1e-10);
        assert_eq!(summary.drift_ms.count, 1);
        assert!((summary.drift_ms.max - 4.0).abs() < 1e-10);
        assert_eq!(summary.decode_failures.get("empty_values"), Some(&2));
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = ClockMetricsAggregator::new();
        aggregator.update(
            3,
            &ReconstructOutcome {
                source: TimestampSource::Continuity,
                drift_ms: Some(40.0),
            },
            7,
        );
        aggregator.record_decode_failure(&DecodeError::MissingTimestamp);

        let output = aggregator.summary().to_string();
        assert!(output.contains("Frames: 1"));
        assert!(output.contains("continuity=1"));
        assert!(output.contains("missing_timestamp: 1"));
        assert!(output.contains("(50.00%)"));
    }

    #[test]
    fn test_recorders_without_installed_recorder() {
        // facade calls are no-ops without a recorder
        record_frame_decoded("ch01", 4);
        record_decode_failure(&DecodeError::malformed("short"));
        record_transfer_outcome::<()>(&Err(TransferError::StreamTimeout { idle_ms: 1 }));
        record_negotiation_latency(Duration::from_millis(3));
    }
}
