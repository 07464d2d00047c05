//! Synthetic scan-frame producer for `live --demo`

use std::f64::consts::TAU;
use std::time::Duration;

use chrono::{SecondsFormat, TimeDelta, Utc};
use contracts::{BusMessage, ChannelConfig, MessageBus, ScanFrame};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Publishes encoded frames on every configured subject in real time
pub struct DemoProducer {
    tasks: Vec<JoinHandle<()>>,
}

impl DemoProducer {
    /// Start one publishing task per channel
    ///
    /// Each frame carries `batch` samples; its timestamp marks the last one and
    /// is shifted by `skew_ms` to imitate a drifting producer clock.
    pub fn spawn<B>(bus: B, channels: &[ChannelConfig], batch: usize, skew_ms: i64) -> Self
    where
        B: MessageBus + Clone + Sync + 'static,
    {
        let batch = batch.max(1);
        let tasks = channels
            .iter()
            .map(|channel| {
                let bus = bus.clone();
                let subject = channel.subject.clone();
                let rate = channel.sampling_rate_hz;
                let channel_id = channel.id;
                tokio::spawn(async move {
                    let period = Duration::from_secs_f64(batch as f64 / rate);
                    let mut ticker = tokio::time::interval(period);
                    let mut index = 0u64;
                    loop {
                        ticker.tick().await;
                        let values: Vec<f64> = (0..batch)
                            .map(|i| {
                                let t = (index + i as u64) as f64 / rate;
                                (TAU * t + f64::from(channel_id)).sin()
                            })
                            .collect();
                        index += batch as u64;

                        let stamp = Utc::now() + TimeDelta::milliseconds(skew_ms);
                        let frame = ScanFrame::new(
                            stamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                            values,
                        );
                        let message = BusMessage::new(subject.as_str(), frame_codec::encode(&frame));
                        if let Err(err) = bus.publish(message).await {
                            warn!(channel = channel_id, error = %err, "demo producer stopped");
                            break;
                        }
                    }
                    debug!(channel = channel_id, "demo producer finished");
                })
            })
            .collect::<Vec<_>>();

        info!(channels = tasks.len(), batch, skew_ms, "demo producer started");
        Self { tasks }
    }

    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for DemoProducer {
    fn drop(&mut self) {
        self.stop();
    }
}
