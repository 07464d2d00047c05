//! `export` command implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bulk_transfer::{
    serve_ws_listener, BulkTransferSession, ExportResponder, ExportSource, ParquetSource,
    ResponderOptions, SeriesStream, SessionOptions, SyntheticSource, TransferObserver,
    WsExportClient,
};
use chrono::{DateTime, Utc};
use bus::{BusClient, ConnectionRegistry};
use contracts::{
    ExportPayload, ExportRequest, Identity, MetaFrame, TelemetryConfig, TransferError,
};
use observability::{record_negotiation_latency, record_transfer_bytes, record_transfer_outcome};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::load_config;
use crate::cli::ExportArgs;

/// Synthetic rows per second served by `--serve-demo`
const DEMO_RATE_HZ: f64 = 10.0;

const PROGRESS_LOG_STEP: u64 = 1024 * 1024;

/// Execute the `export` command
pub async fn run_export(args: &ExportArgs) -> Result<()> {
    let config = load_config(&args.config)?;

    let mut request = ExportRequest::new(
        args.asset,
        args.channels.iter().copied(),
        args.start.clone(),
        args.end.clone(),
    )?;
    if let Some(name) = &args.download_name {
        request = request.with_filename(name.clone());
    }

    info!(
        asset = request.asset_id,
        channels = ?request.channel_ids,
        ws = args.ws,
        "Requesting export"
    );

    let started = Instant::now();
    let outcome = if args.ws {
        export_ws(args, &config, &request).await
    } else {
        export_bus(args, &config, &request).await
    };
    record_transfer_outcome(&outcome);
    let payload = outcome?;

    let path = output_path(args.output.as_deref(), &payload.file_name);
    tokio::fs::write(&path, &payload.bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!(
        "✓ Export written: {} ({} bytes, {}, {:.2}s)",
        path.display(),
        payload.size,
        payload.content_type,
        started.elapsed().as_secs_f64()
    );
    if !payload.missing_channel_ids.is_empty() {
        let missing: Vec<String> = payload
            .missing_channel_ids
            .iter()
            .map(|id| format!("ch{id:02}"))
            .collect();
        println!("⚠ No data for: {}", missing.join(", "));
    }

    Ok(())
}

async fn export_bus(
    args: &ExportArgs,
    config: &TelemetryConfig,
    request: &ExportRequest,
) -> Result<ExportPayload, TransferError> {
    let registry = ConnectionRegistry::<BusClient>::new();
    let identity = Identity::new(&config.bus.identity);
    let endpoint = config.bus.endpoint.as_str();
    let handle = registry
        .get_or_create(&identity, || async move {
            BusClient::connect(endpoint, config.bus.connect_timeout())
                .await
                .map_err(|e| TransferError::from_negotiation(e, endpoint))
        })
        .await?;

    let responder = if args.serve_demo {
        Some(
            ExportResponder::spawn(
                handle.clone(),
                config.export.subject.clone(),
                Arc::new(local_source(args, config)),
                ResponderOptions::default(),
            )
            .await
            .map_err(|e| TransferError::from_negotiation(e, endpoint))?,
        )
    } else {
        if handle.connection()?.is_memory() {
            warn!("no exporter attached to the in-process bus; pass --serve-demo to serve one");
        }
        None
    };

    let outcome = {
        let _lease = handle.lease()?;
        let mut options = SessionOptions::from_config(&config.bus, &config.export);
        if let Some(ms) = args.request_timeout_ms {
            options = options.with_request_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = args.idle_timeout_ms {
            options = options.with_stream_idle_timeout((ms > 0).then(|| Duration::from_millis(ms)));
        }

        let mut session = BulkTransferSession::new(handle.clone(), options);
        let mut progress = ProgressLogger::default();
        let outcome = session.export(request, &mut progress).await;
        if let Some(latency) = session.negotiation_latency() {
            record_negotiation_latency(latency);
        }
        outcome
    };

    if let Some(responder) = responder {
        responder.shutdown().await;
    }
    registry.close_all().await;
    outcome
}

async fn export_ws(
    args: &ExportArgs,
    config: &TelemetryConfig,
    request: &ExportRequest,
) -> Result<ExportPayload, TransferError> {
    let mut server = None;
    let url = if args.serve_demo {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| TransferError::NegotiationTransport {
                endpoint: "127.0.0.1:0".to_string(),
                message: e.to_string(),
            })?;
        let addr = listener
            .local_addr()
            .map_err(|e| TransferError::NegotiationTransport {
                endpoint: "127.0.0.1:0".to_string(),
                message: e.to_string(),
            })?;
        server = Some(tokio::spawn(serve_ws_listener(
            listener,
            Arc::new(local_source(args, config)),
            ResponderOptions::default(),
        )));
        format!("ws://{addr}/export")
    } else {
        args.url
            .clone()
            .unwrap_or_else(|| config.export.websocket_url.clone())
    };

    let mut client = WsExportClient::new(url).with_idle_timeout(config.export.stream_idle_timeout());
    if let Some(ms) = args.idle_timeout_ms {
        client = client.with_idle_timeout((ms > 0).then(|| Duration::from_millis(ms)));
    }
    if let Some(ms) = args.request_timeout_ms {
        client = client.with_connect_timeout(Duration::from_millis(ms));
    }

    let mut progress = ProgressLogger::default();
    let started = Instant::now();
    let outcome = client.export(request, &mut progress).await;
    if let Some(first) = progress.first_frame_after(started) {
        record_negotiation_latency(first);
    }

    if let Some(server) = server {
        server.abort();
    }
    outcome
}

/// Exporter served in-process by `--serve-demo`
enum LocalSource {
    Parquet(ParquetSource),
    Synthetic(SyntheticSource),
}

impl ExportSource for LocalSource {
    async fn channel_series(
        &self,
        asset: u32,
        channel: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<SeriesStream>, String> {
        match self {
            Self::Parquet(source) => source.channel_series(asset, channel, start, end).await,
            Self::Synthetic(source) => source.channel_series(asset, channel, start, end).await,
        }
    }
}

/// Stored parquet tree when one is configured, synthetic rows otherwise
fn local_source(args: &ExportArgs, config: &TelemetryConfig) -> LocalSource {
    let root = args
        .parquet_root
        .clone()
        .or_else(|| config.export.parquet_root.clone().map(Into::into));
    match root {
        Some(root) => {
            info!(root = %root.display(), "serving export from parquet files");
            LocalSource::Parquet(ParquetSource::new(root))
        }
        None => LocalSource::Synthetic(demo_source(config)),
    }
}

/// Serve every configured channel with its calibration
fn demo_source(config: &TelemetryConfig) -> SyntheticSource {
    config
        .channels
        .iter()
        .fold(SyntheticSource::new(DEMO_RATE_HZ), |source, channel| {
            match &channel.calibration {
                Some(calibration) => source.with_calibration(channel.id, calibration.clone()),
                None => source,
            }
        })
}

/// Resolve where the payload lands; the remote name never escapes the target directory
fn output_path(output: Option<&Path>, file_name: &str) -> PathBuf {
    let name = Path::new(file_name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("export.bin"));
    match output {
        Some(path) if path.is_dir() => path.join(name),
        Some(path) => path.to_path_buf(),
        None => name,
    }
}

/// Logs progress and feeds the byte counter
#[derive(Default)]
struct ProgressLogger {
    received: u64,
    next_log: u64,
    first_frame: Option<Instant>,
}

impl ProgressLogger {
    fn first_frame_after(&self, started: Instant) -> Option<Duration> {
        self.first_frame.map(|at| at.saturating_duration_since(started))
    }
}

impl TransferObserver for ProgressLogger {
    fn on_meta(&mut self, meta: &MetaFrame) {
        self.first_frame.get_or_insert_with(Instant::now);
        info!(
            file = meta.file_name.as_deref().unwrap_or("-"),
            content_type = meta.content_type.as_deref().unwrap_or("-"),
            "export started"
        );
    }

    fn on_progress(&mut self, received_bytes: u64) {
        self.first_frame.get_or_insert_with(Instant::now);
        record_transfer_bytes(received_bytes.saturating_sub(self.received));
        self.received = received_bytes;
        if received_bytes >= self.next_log {
            info!(received_bytes, "export progress");
            self.next_log = received_bytes + PROGRESS_LOG_STEP;
        } else {
            debug!(received_bytes, "chunk received");
        }
    }

    fn on_summary(&mut self, missing_channel_ids: &[u32]) {
        if !missing_channel_ids.is_empty() {
            warn!(missing = ?missing_channel_ids, "exporter had no data for some channels");
        }
    }
}
