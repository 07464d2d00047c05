//! Channel-keyed reconstructors
//!
//! Each channel owns its own state; nothing is shared between channels.

use std::collections::HashMap;

use contracts::{ClockConfig, ClockError, ScanFrame, TimedSample};

use crate::reconstructor::SampleClockReconstructor;

#[derive(Debug, Default)]
pub struct ChannelClocks {
    config: ClockConfig,
    clocks: HashMap<u32, SampleClockReconstructor>,
}

impl ChannelClocks {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            clocks: HashMap::new(),
        }
    }

    /// Register (or replace) a channel; replacing starts from fresh state
    pub fn register(&mut self, channel_id: u32, sampling_rate_hz: f64) {
        self.clocks.insert(
            channel_id,
            SampleClockReconstructor::new(format!("ch{channel_id:02}"), sampling_rate_hz, self.config),
        );
    }

    pub fn get(&self, channel_id: u32) -> Option<&SampleClockReconstructor> {
        self.clocks.get(&channel_id)
    }

    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Reconstruct one batch for a registered channel
    ///
    /// # Errors
    /// `InvalidInput` for an unregistered channel or bad batch
    pub fn push(&mut self, channel_id: u32, frame: &ScanFrame) -> Result<Vec<TimedSample>, ClockError> {
        self.clock_mut(channel_id)?.push(frame)
    }

    pub fn push_at(
        &mut self,
        channel_id: u32,
        frame: &ScanFrame,
        now_ms: f64,
    ) -> Result<Vec<TimedSample>, ClockError> {
        self.clock_mut(channel_id)?.push_at(frame, now_ms)
    }

    pub fn reset(&mut self, channel_id: u32) {
        if let Some(clock) = self.clocks.get_mut(&channel_id) {
            clock.reset();
        }
    }

    pub fn reset_all(&mut self) {
        self.clocks.values_mut().for_each(SampleClockReconstructor::reset);
    }

    fn clock_mut(&mut self, channel_id: u32) -> Result<&mut SampleClockReconstructor, ClockError> {
        self.clocks
            .get_mut(&channel_id)
            .ok_or_else(|| ClockError::invalid_input(format!("channel {channel_id} is not registered")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPOCH_2024: f64 = 1_704_067_200_000.0;

    #[test]
    fn test_channels_do_not_share_state() {
        let mut clocks = ChannelClocks::new(ClockConfig::default());
        clocks.register(1, 100.0);
        clocks.register(2, 100.0);

        clocks
            .push_at(1, &ScanFrame::new("2024-01-01T00:00:00Z", vec![1.0]), EPOCH_2024)
            .unwrap();
        assert!(clocks.get(1).unwrap().state().last_assigned_timestamp.is_some());
        assert!(clocks.get(2).unwrap().state().is_fresh());

        // channel 2 has no prior state, so an unparsable stamp is rejected
        assert!(clocks
            .push_at(2, &ScanFrame::new("bogus", vec![1.0]), EPOCH_2024)
            .is_err());
        assert!(clocks
            .push_at(1, &ScanFrame::new("bogus", vec![1.0]), EPOCH_2024)
            .is_ok());
    }

    #[test]
    fn test_unregistered_channel() {
        let mut clocks = ChannelClocks::default();
        assert!(clocks.is_empty());
        assert!(matches!(
            clocks.push(9, &ScanFrame::new("2024-01-01T00:00:00Z", vec![1.0])),
            Err(ClockError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_reset_all() {
        let mut clocks = ChannelClocks::new(ClockConfig::default());
        clocks.register(1, 10.0);
        clocks
            .push_at(1, &ScanFrame::new("2024-01-01T00:00:00Z", vec![1.0]), EPOCH_2024)
            .unwrap();
        clocks.reset_all();
        assert!(clocks.get(1).unwrap().state().is_fresh());
        assert_eq!(clocks.len(), 1);
    }
}
