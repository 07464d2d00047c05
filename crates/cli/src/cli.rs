//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Telemetry - live scan-frame reconstruction and bulk exports
#[derive(Parser, Debug)]
#[command(
    name = "telemetry",
    author,
    version,
    about = "Telemetry transport and reconstruction toolkit",
    long_about = "Decodes batched scan frames into per-sample timestamps and runs \n\
                  on-demand bulk exports over a messaging bus or a WebSocket."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TELEMETRY_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TELEMETRY_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Subscribe to live channels and reconstruct sample timestamps
    Live(LiveArgs),

    /// Request a bulk export and write it to disk
    Export(ExportArgs),

    /// Decode a single scan frame file
    Decode(DecodeArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `live` command
#[derive(Args, Debug, Clone)]
pub struct LiveArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "telemetry.toml", env = "TELEMETRY_CONFIG")]
    pub config: PathBuf,

    /// Only follow these channel ids (repeatable; default: all configured)
    #[arg(long = "channel", value_name = "ID")]
    pub channels: Vec<u32>,

    /// Stop after this many frames (0 = unlimited)
    #[arg(long, default_value = "0", env = "TELEMETRY_MAX_FRAMES")]
    pub max_frames: u64,

    /// Stop after this many seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "TELEMETRY_TIMEOUT")]
    pub timeout: u64,

    /// Fan-in queue capacity
    #[arg(long, default_value = "256", env = "TELEMETRY_BUFFER_SIZE")]
    pub buffer_size: usize,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "TELEMETRY_METRICS_PORT")]
    pub metrics_port: u16,

    /// Publish synthetic frames on the configured subjects
    #[arg(long)]
    pub demo: bool,

    /// Samples per synthetic frame
    #[arg(long, default_value = "100", requires = "demo")]
    pub demo_batch: usize,

    /// Offset added to synthetic producer timestamps (ms)
    #[arg(long, default_value = "0", allow_hyphen_values = true, requires = "demo")]
    pub demo_skew_ms: i64,

    /// Print every reconstructed sample as CSV
    #[arg(long)]
    pub print_samples: bool,
}

/// Arguments for the `export` command
#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "telemetry.toml", env = "TELEMETRY_CONFIG")]
    pub config: PathBuf,

    /// Asset id
    #[arg(long)]
    pub asset: u32,

    /// Channel id (repeatable)
    #[arg(long = "channel", value_name = "ID", required = true)]
    pub channels: Vec<u32>,

    /// Range start (RFC 3339)
    #[arg(long)]
    pub start: String,

    /// Range end (RFC 3339)
    #[arg(long)]
    pub end: String,

    /// File name requested from the exporter
    #[arg(long)]
    pub download_name: Option<String>,

    /// Output directory or file (default: exporter's file name in the current directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Use the WebSocket exporter instead of the bus
    #[arg(long)]
    pub ws: bool,

    /// Override the WebSocket URL from configuration
    #[arg(long, env = "TELEMETRY_EXPORT_URL", requires = "ws")]
    pub url: Option<String>,

    /// Serve the export locally (parquet files when a root is set, synthetic data otherwise)
    #[arg(long)]
    pub serve_demo: bool,

    /// Parquet tree served by `--serve-demo` (overrides `export.parquet_root`)
    #[arg(long, requires = "serve_demo")]
    pub parquet_root: Option<PathBuf>,

    /// Override negotiation timeout (ms)
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,

    /// Override stream idle timeout (ms, 0 = none)
    #[arg(long)]
    pub idle_timeout_ms: Option<u64>,
}

/// Arguments for the `decode` command
#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Binary scan frame file
    #[arg(required_unless_present = "hex")]
    pub file: Option<PathBuf>,

    /// Hex-encoded frame instead of a file
    #[arg(long, conflicts_with = "file")]
    pub hex: Option<String>,

    /// Reconstruct timestamps at this sampling rate (Hz)
    #[arg(long)]
    pub rate: Option<f64>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `validate` command
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "telemetry.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "telemetry.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show per-channel details
    #[arg(long)]
    pub channels: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}
