//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{CalibrationFormula, CalibrationSpec, TelemetryConfig};
use serde::Serialize;
use tracing::info;

use super::load_config;
use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    bus: BusInfo,
    export: ExportInfo,
    clock: ClockInfo,
    channel_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    channels: Vec<ChannelInfo>,
}

#[derive(Serialize)]
struct BusInfo {
    endpoint: String,
    identity: String,
    request_timeout_ms: u64,
}

#[derive(Serialize)]
struct ExportInfo {
    subject: String,
    websocket_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_idle_timeout_ms: Option<u64>,
}

#[derive(Serialize)]
struct ClockInfo {
    snap_factor: f64,
    snap_floor_ms: f64,
    max_producer_skew_ms: f64,
}

#[derive(Serialize)]
struct ChannelInfo {
    id: u32,
    subject: String,
    sampling_rate_hz: f64,
    sample_interval_ms: f64,
    calibration: String,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    let config = load_config(&args.config)?;

    if args.json {
        let info = build_config_info(&config, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&config, args);
    }

    Ok(())
}

fn describe_calibration(spec: Option<&CalibrationSpec>) -> String {
    let Some(spec) = spec else {
        return "none".to_string();
    };
    let formula = match &spec.formula {
        CalibrationFormula::Identity => "identity".to_string(),
        CalibrationFormula::Linear { a, b } => format!("{a} * x + {b}"),
        CalibrationFormula::Polynomial { coeffs } => format!("polynomial {coeffs:?}"),
    };
    match &spec.id {
        Some(id) => format!("{formula} [{id}]"),
        None => formula,
    }
}

fn build_config_info(config: &TelemetryConfig, args: &InfoArgs) -> ConfigInfo {
    let channels = if args.channels {
        config
            .channels
            .iter()
            .map(|c| ChannelInfo {
                id: c.id,
                subject: c.subject.clone(),
                sampling_rate_hz: c.sampling_rate_hz,
                sample_interval_ms: 1000.0 / c.sampling_rate_hz,
                calibration: describe_calibration(c.calibration.as_ref()),
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", config.version),
        bus: BusInfo {
            endpoint: config.bus.endpoint.clone(),
            identity: config.bus.identity.clone(),
            request_timeout_ms: config.bus.request_timeout_ms,
        },
        export: ExportInfo {
            subject: config.export.subject.clone(),
            websocket_url: config.export.websocket_url.clone(),
            stream_idle_timeout_ms: config
                .export
                .stream_idle_timeout()
                .map(|d| d.as_millis() as u64),
        },
        clock: ClockInfo {
            snap_factor: config.clock.snap_factor,
            snap_floor_ms: config.clock.snap_floor_ms,
            max_producer_skew_ms: config.clock.max_producer_skew_ms,
        },
        channel_count: config.channels.len(),
        channels,
    }
}

fn print_config_info(config: &TelemetryConfig, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 Telemetry Configuration                      ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("🔌 Bus");
    println!("   ├─ Version: {:?}", config.version);
    println!("   ├─ Endpoint: {}", config.bus.endpoint);
    println!("   ├─ Identity: {}", config.bus.identity);
    println!("   └─ Request timeout: {} ms", config.bus.request_timeout_ms);

    println!("\n📦 Export");
    println!("   ├─ Subject: {}", config.export.subject);
    println!("   ├─ WebSocket: {}", config.export.websocket_url);
    match config.export.stream_idle_timeout() {
        Some(idle) => println!("   └─ Idle timeout: {} ms", idle.as_millis()),
        None => println!("   └─ Idle timeout: disabled"),
    }

    let clock = &config.clock;
    println!("\n⏱️  Clock");
    println!("   ├─ Snap window: {} intervals (floor {} ms)", clock.snap_factor, clock.snap_floor_ms);
    println!("   └─ Max producer skew: {} ms", clock.max_producer_skew_ms);

    println!("\n📈 Channels ({})", config.channels.len());
    for (i, channel) in config.channels.iter().enumerate() {
        let is_last = i == config.channels.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        if args.channels {
            println!(
                "   {} ch{:02} {} ({} Hz, {})",
                prefix,
                channel.id,
                channel.subject,
                channel.sampling_rate_hz,
                describe_calibration(channel.calibration.as_ref())
            );
        } else {
            println!("   {} ch{:02} {}", prefix, channel.id, channel.subject);
        }
    }

    println!();
}
