//! `live` command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::load_config;
use crate::cli::LiveArgs;
use crate::pipeline::{DemoSettings, LivePipeline, PipelineConfig};

/// Execute the `live` command
pub async fn run_live(args: &LiveArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");
    let config = load_config(&args.config)?;

    let channels = if args.channels.is_empty() {
        config.channels.clone()
    } else {
        args.channels
            .iter()
            .map(|id| {
                config
                    .channel(*id)
                    .cloned()
                    .with_context(|| format!("channel {id} is not configured"))
            })
            .collect::<Result<Vec<_>>>()?
    };
    if channels.is_empty() {
        anyhow::bail!("no channels configured in {}", args.config.display());
    }

    info!(
        bus = %config.bus.endpoint,
        channels = channels.len(),
        demo = args.demo,
        "Configuration loaded"
    );

    let pipeline_config = PipelineConfig {
        config,
        channels,
        max_frames: (args.max_frames > 0).then_some(args.max_frames),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        buffer_size: args.buffer_size,
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
        demo: args.demo.then_some(DemoSettings {
            batch: args.demo_batch,
            skew_ms: args.demo_skew_ms,
        }),
        print_samples: args.print_samples,
    };

    let pipeline = LivePipeline::new(pipeline_config);

    tokio::select! {
        result = pipeline.run() => {
            let stats = result.context("live feed failed")?;
            if !args.print_samples {
                stats.print_summary();
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Received Ctrl+C, shutting down"),
                Err(e) => warn!(error = %e, "failed to listen for Ctrl+C"),
            }
        }
    }

    Ok(())
}
