//! Live pipeline orchestrator - bus → decode → clock → calibrated samples.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bus::{BusClient, ConnectionRegistry};
use contracts::{ChannelConfig, Identity, TelemetryConfig, TransferError};
use frame_codec::FrameDecoder;
use observability::{record_decode_failure, record_frame_decoded, record_reconstruction};
use sample_clock::ChannelClocks;
use tracing::{debug, info, warn};

use super::{DemoProducer, LiveFeed, LiveStats};

/// Synthetic producer settings
#[derive(Debug, Clone, Copy)]
pub struct DemoSettings {
    pub batch: usize,
    pub skew_ms: i64,
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub config: TelemetryConfig,

    /// Channels to follow
    pub channels: Vec<ChannelConfig>,

    /// Maximum number of frames (None = unlimited)
    pub max_frames: Option<u64>,

    /// Run timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Fan-in queue capacity
    pub buffer_size: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    pub demo: Option<DemoSettings>,

    pub print_samples: bool,
}

/// Live feed orchestrator
pub struct LivePipeline {
    config: PipelineConfig,
}

impl LivePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until the frame limit, the timeout or the feed ends
    pub async fn run(self) -> Result<LiveStats> {
        let start_time = Instant::now();
        let settings = &self.config.config;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!(port, "metrics endpoint available");
        }

        let registry = ConnectionRegistry::<BusClient>::new();
        let identity = Identity::new(&settings.bus.identity);
        let endpoint = settings.bus.endpoint.as_str();
        let handle = registry
            .get_or_create(&identity, || async move {
                BusClient::connect(endpoint, settings.bus.connect_timeout())
                    .await
                    .map_err(|e| TransferError::from_negotiation(e, endpoint))
            })
            .await
            .context("failed to connect to bus")?;
        let bus = handle.clone();

        let mut producer = self
            .config
            .demo
            .map(|demo| DemoProducer::spawn(bus.clone(), &self.config.channels, demo.batch, demo.skew_ms));
        if producer.is_none() && handle.connection()?.is_memory() {
            warn!("no producer attached to the in-process bus; pass --demo to generate frames");
        }

        let mut feed = LiveFeed::new(self.config.buffer_size);
        let mut clocks = ChannelClocks::new(settings.clock);
        let mut decoders = HashMap::new();
        for channel in &self.config.channels {
            feed.subscribe(&bus, channel.id, &channel.subject)
                .await
                .with_context(|| format!("failed to subscribe to {}", channel.subject))?;
            clocks.register(channel.id, channel.sampling_rate_hz);
            decoders.insert(channel.id, FrameDecoder::new(channel.subject.clone()));
        }
        let calibrations: HashMap<u32, _> = self
            .config
            .channels
            .iter()
            .map(|c| (c.id, c.calibration.clone().unwrap_or_default()))
            .collect();

        let rx = feed.take_receiver().context("live feed receiver already taken")?;
        info!(channels = feed.channel_count(), max_frames = ?self.config.max_frames, "live feed running");

        let max_frames = self.config.max_frames;
        let print_samples = self.config.print_samples;
        if print_samples {
            println!("channel,timestamp_ms,raw_value,calibrated_value");
        }

        let mut stats = LiveStats {
            active_channels: feed.channel_count(),
            ..Default::default()
        };

        let processing = async {
            while let Ok(message) = rx.recv().await {
                let Some(decoder) = decoders.get(&message.channel_id) else {
                    continue;
                };
                let frame = match decoder.decode(&message.payload) {
                    Ok(frame) => frame,
                    Err(err) => {
                        record_decode_failure(&err);
                        stats.clock_metrics.record_decode_failure(&err);
                        continue;
                    }
                };
                record_frame_decoded(decoder.subject(), frame.len());

                let samples = match clocks.push(message.channel_id, &frame) {
                    Ok(samples) => samples,
                    Err(err) => {
                        warn!(channel = message.channel_id, error = %err, "batch dropped");
                        stats.clock_metrics.record_clock_error();
                        continue;
                    }
                };

                if let Some(outcome) = clocks.get(message.channel_id).and_then(|c| c.last_outcome()) {
                    record_reconstruction(message.channel_id, &outcome, samples.len());
                    stats.clock_metrics.update(message.channel_id, &outcome, samples.len());
                    debug!(
                        channel = message.channel_id,
                        samples = samples.len(),
                        source = outcome.source.as_str(),
                        drift_ms = ?outcome.drift_ms,
                        "batch reconstructed"
                    );
                }

                if print_samples {
                    let calibration = calibrations.get(&message.channel_id).cloned().unwrap_or_default();
                    for sample in &samples {
                        println!(
                            "{},{:.3},{},{}",
                            message.channel_id,
                            sample.timestamp_ms,
                            sample.value,
                            calibration.apply(sample.value)
                        );
                    }
                }

                stats.frames += 1;
                stats.samples += samples.len() as u64;

                if let Some(max) = max_frames {
                    if stats.frames >= max {
                        info!(frames = stats.frames, "reached max frames limit");
                        break;
                    }
                }
            }
        };

        match self.config.timeout {
            Some(timeout) => {
                if tokio::time::timeout(timeout, processing).await.is_err() {
                    info!(timeout_secs = timeout.as_secs(), "live run timed out");
                }
            }
            None => processing.await,
        }

        info!("shutting down live feed");
        if let Some(producer) = producer.as_mut() {
            producer.stop();
        }
        feed.stop_all();
        registry.close_all().await;

        stats.queue_dropped = feed.dropped();
        stats.duration = start_time.elapsed();

        info!(
            frames = stats.frames,
            samples = stats.samples,
            duration_secs = stats.duration.as_secs_f64(),
            "live feed stopped"
        );
        Ok(stats)
    }
}
