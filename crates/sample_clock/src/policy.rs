//! Timestamp policy
//!
//! The producer stamps a batch with the time of its *last* sample, so the
//! producer-implied first sample is `batch_ts - (N-1) * interval`.

use chrono::DateTime;
use contracts::{
    ClockConfig, ClockError, ReconstructOutcome, SampleClockState, TimedSample, TimestampSource,
};

/// Result of one reconstruction
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub samples: Vec<TimedSample>,
    /// State to carry into the next batch
    pub state: SampleClockState,
    pub outcome: ReconstructOutcome,
}

impl Reconstruction {
    pub fn first_timestamp(&self) -> Option<f64> {
        self.samples.first().map(|s| s.timestamp_ms)
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.samples.last().map(|s| s.timestamp_ms)
    }
}

/// Parse an RFC 3339 batch timestamp into epoch milliseconds
pub fn parse_batch_timestamp(raw: &str) -> Option<f64> {
    let dt = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    let sub_ms = f64::from(dt.timestamp_subsec_nanos() % 1_000_000) / 1_000_000.0;
    Some(dt.timestamp_millis() as f64 + sub_ms)
}

/// Assign a timestamp to every value of a batch
///
/// `now_ms` is the local receipt time in epoch milliseconds.
///
/// # Errors
/// `InvalidInput` when the rate is not a positive finite number, `values` is
/// empty, or the timestamp does not parse and `state` has no prior batch.
pub fn reconstruct(
    batch_timestamp: &str,
    values: &[f64],
    sampling_rate_hz: f64,
    state: &SampleClockState,
    now_ms: f64,
    config: &ClockConfig,
) -> Result<Reconstruction, ClockError> {
    if !sampling_rate_hz.is_finite() || sampling_rate_hz <= 0.0 {
        return Err(ClockError::invalid_input(format!(
            "sampling rate must be positive, got {sampling_rate_hz}"
        )));
    }
    if values.is_empty() {
        return Err(ClockError::invalid_input("batch has no values"));
    }

    let interval = 1000.0 / sampling_rate_hz;
    let span = (values.len() - 1) as f64 * interval;
    let producer_last = parse_batch_timestamp(batch_timestamp);
    let producer_first = producer_last.map(|p| p - span);
    let last = state.last_assigned_timestamp.filter(|t| t.is_finite());

    let (mut first, mut source, drift_ms) = match last {
        Some(last) => {
            let candidate = last + interval;
            let window = (config.snap_factor * interval).max(config.snap_floor_ms);
            let drift = producer_first.map(|p| p - candidate);
            match producer_first {
                Some(p) if (p - candidate).abs() <= window => {
                    (p.max(last), TimestampSource::Snapped, drift)
                }
                _ => (candidate, TimestampSource::Continuity, drift),
            }
        }
        None => {
            let Some(p_last) = producer_last else {
                return Err(ClockError::invalid_input(format!(
                    "unparsable batch timestamp '{batch_timestamp}' and no prior state"
                )));
            };
            if (p_last - now_ms).abs() > config.max_producer_skew_ms {
                (now_ms - span, TimestampSource::LocalFallback, None)
            } else {
                (p_last - span, TimestampSource::Producer, None)
            }
        }
    };

    if !first.is_finite() {
        (first, source) = match last {
            Some(last) => (last + interval, TimestampSource::Continuity),
            None => (now_ms - span, TimestampSource::LocalFallback),
        };
        if !first.is_finite() {
            return Err(ClockError::invalid_input("local clock is not finite"));
        }
    }

    let samples: Vec<TimedSample> = values
        .iter()
        .enumerate()
        .map(|(idx, &value)| TimedSample {
            timestamp_ms: first + idx as f64 * interval,
            value,
        })
        .collect();

    let state = SampleClockState {
        last_assigned_timestamp: Some(first + span),
        sample_interval_ms: interval,
    };

    Ok(Reconstruction {
        samples,
        state,
        outcome: ReconstructOutcome { source, drift_ms },
    })
}
