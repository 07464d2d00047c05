//! Stateful per-channel reconstructor

use chrono::Utc;
use contracts::{
    ClockConfig, ClockError, ReconstructOutcome, SampleClockState, ScanFrame, TimedSample,
    TimestampSource,
};
use tracing::{debug, instrument};

use crate::policy::reconstruct;

/// Reconstructor owning one channel's clock state
#[derive(Debug, Clone)]
pub struct SampleClockReconstructor {
    channel: String,
    sampling_rate_hz: f64,
    config: ClockConfig,
    state: SampleClockState,
    last_outcome: Option<ReconstructOutcome>,
    batches: u64,
}

impl SampleClockReconstructor {
    pub fn new(channel: impl Into<String>, sampling_rate_hz: f64, config: ClockConfig) -> Self {
        Self {
            channel: channel.into(),
            sampling_rate_hz,
            config,
            state: SampleClockState::default(),
            last_outcome: None,
            batches: 0,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn sampling_rate_hz(&self) -> f64 {
        self.sampling_rate_hz
    }

    pub fn state(&self) -> &SampleClockState {
        &self.state
    }

    pub fn last_outcome(&self) -> Option<ReconstructOutcome> {
        self.last_outcome
    }

    /// Batches reconstructed since creation or the last reset
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Reconstruct against the local wall clock
    pub fn push(&mut self, frame: &ScanFrame) -> Result<Vec<TimedSample>, ClockError> {
        let now_ms = Utc::now().timestamp_millis() as f64;
        self.push_at(frame, now_ms)
    }

    /// Reconstruct with an explicit receipt time (epoch ms)
    ///
    /// State is only advanced on success.
    #[instrument(
        level = "trace",
        name = "sample_clock_push",
        skip(self, frame),
        fields(channel = %self.channel, samples = frame.len())
    )]
    pub fn push_at(
        &mut self,
        frame: &ScanFrame,
        now_ms: f64,
    ) -> Result<Vec<TimedSample>, ClockError> {
        let out = reconstruct(
            &frame.batch_timestamp,
            &frame.values,
            self.sampling_rate_hz,
            &self.state,
            now_ms,
            &self.config,
        )?;

        if out.outcome.source == TimestampSource::LocalFallback {
            debug!(
                channel = %self.channel,
                batch_timestamp = %frame.batch_timestamp,
                "producer clock unusable, using local receipt time"
            );
        }

        self.state = out.state;
        self.last_outcome = Some(out.outcome);
        self.batches += 1;
        Ok(out.samples)
    }

    /// Forget prior batches (subscription restart)
    pub fn reset(&mut self) {
        self.state = SampleClockState::default();
        self.last_outcome = None;
        self.batches = 0;
    }
}
