//! Export data sources and CSV rendering
//!
//! Sources hand out row batches per channel. `stream_csv` turns them into
//! fixed-size CSV chunks as they arrive; `render_csv` collects the same
//! chunks when the whole body must be known up front.

use std::collections::HashMap;
use std::f64::consts::TAU;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use contracts::{CalibrationSpec, ExportRequest, TransferError};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::protocol::CHUNK_SIZE;

pub const CSV_HEADER: &str = "timestamp,channel,raw_value,calibrated_value,calibration_id\n";

/// Chunks buffered between the CSV writer and the sender
const CHUNK_QUEUE_DEPTH: usize = 4;

/// Stored rows of one channel sharing a calibration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSeries {
    pub calibration: CalibrationSpec,
    /// `(RFC 3339 timestamp, raw value)` in time order
    pub rows: Vec<(String, f64)>,
}

/// Batches of one channel, in time order
pub type SeriesStream = BoxStream<'static, Result<ChannelSeries, String>>;

/// Where exported rows come from
#[trait_variant::make(ExportSource: Send)]
pub trait LocalExportSource {
    /// Row batches of `channel` for `asset`; `Ok(None)` when the channel has no data
    async fn channel_series(
        &self,
        asset: u32,
        channel: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<SeriesStream>, String>;
}

/// What a streamed render produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvSummary {
    /// Body bytes handed out, header included
    pub bytes: u64,
    pub missing_channel_ids: Vec<u32>,
}

/// Fully rendered export, ready to be chunked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedExport {
    pub body: Bytes,
    pub file_name: String,
    pub content_type: String,
    pub missing_channel_ids: Vec<u32>,
}

/// Accumulates CSV lines and hands out full chunks
struct CsvStreamer {
    chunk: BytesMut,
    chunk_size: usize,
    bytes: u64,
    tx: mpsc::Sender<Bytes>,
}

impl CsvStreamer {
    fn new(chunk_size: usize, tx: mpsc::Sender<Bytes>) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut chunk = BytesMut::with_capacity(chunk_size + 256);
        chunk.extend_from_slice(CSV_HEADER.as_bytes());
        Self {
            chunk,
            chunk_size,
            bytes: 0,
            tx,
        }
    }

    async fn push_record(
        &mut self,
        timestamp: &str,
        channel: u32,
        raw: f64,
        calibrated: f64,
        calibration_id: &str,
    ) -> Result<(), TransferError> {
        let line = format!("{timestamp},ch{channel:02},{raw},{calibrated},{calibration_id}\n");
        self.chunk.extend_from_slice(line.as_bytes());
        while self.chunk.len() >= self.chunk_size {
            let full = self.chunk.split_to(self.chunk_size).freeze();
            self.send(full).await?;
        }
        Ok(())
    }

    async fn send(&mut self, chunk: Bytes) -> Result<(), TransferError> {
        self.bytes += chunk.len() as u64;
        self.tx
            .send(chunk)
            .await
            .map_err(|_| TransferError::ChannelClosed {
                channel: "export body".to_string(),
            })
    }

    async fn finish(mut self) -> Result<u64, TransferError> {
        if !self.chunk.is_empty() {
            let rest = self.chunk.split().freeze();
            self.send(rest).await?;
        }
        Ok(self.bytes)
    }
}

/// Stream `request` as CSV chunks of at most `chunk_size` bytes into `tx`
///
/// Rows outside `[start, end]` or with an unparsable timestamp are skipped.
/// A channel that contributes no row is reported missing. `tx` is dropped on
/// return, which ends the receiving side.
///
/// # Errors
/// `InvalidRequest` when the request does not validate, `RemoteError` when the
/// source fails, `ChannelClosed` when the receiver went away
pub async fn stream_csv<S>(
    source: &S,
    request: &ExportRequest,
    chunk_size: usize,
    tx: mpsc::Sender<Bytes>,
) -> Result<CsvSummary, TransferError>
where
    S: ExportSource + Sync,
{
    request.validate()?;
    let (start, end) = request.range()?;

    let mut out = CsvStreamer::new(chunk_size, tx);
    let mut missing = Vec::new();

    for &channel in &request.channel_ids {
        let remote = |message: String| TransferError::RemoteError {
            message: format!("channel {channel:02}: {message}"),
        };

        let Some(mut batches) = source
            .channel_series(request.asset_id, channel, start, end)
            .await
            .map_err(remote)?
        else {
            missing.push(channel);
            continue;
        };

        let mut found = false;
        while let Some(batch) = batches.next().await {
            let series = batch.map_err(remote)?;
            let calibration_id = series.calibration.id_or_default();
            for (timestamp, raw) in &series.rows {
                let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) else {
                    continue;
                };
                let parsed = parsed.with_timezone(&Utc);
                if parsed < start || parsed > end {
                    continue;
                }
                found = true;
                let calibrated = series.calibration.apply(*raw);
                out.push_record(timestamp, channel, *raw, calibrated, calibration_id)
                    .await?;
            }
        }
        if !found {
            missing.push(channel);
        }
    }

    let bytes = out.finish().await?;
    Ok(CsvSummary {
        bytes,
        missing_channel_ids: missing,
    })
}

/// Render `request` as one CSV body
///
/// Same rows and errors as `stream_csv`; used where the size must be
/// announced before the first chunk.
pub async fn render_csv<S>(source: &S, request: &ExportRequest) -> Result<RenderedExport, TransferError>
where
    S: ExportSource + Sync,
{
    let (tx, mut rx) = mpsc::channel::<Bytes>(CHUNK_QUEUE_DEPTH);
    let collect = async move {
        let mut body = BytesMut::new();
        while let Some(chunk) = rx.recv().await {
            body.extend_from_slice(&chunk);
        }
        body.freeze()
    };
    let (summary, body) = tokio::join!(stream_csv(source, request, CHUNK_SIZE, tx), collect);
    let summary = summary?;

    Ok(RenderedExport {
        body,
        file_name: request.file_name(),
        content_type: request.format.content_type().to_string(),
        missing_channel_ids: summary.missing_channel_ids,
    })
}

/// Channel capacity for `stream_csv` callers
pub fn chunk_channel() -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    mpsc::channel(CHUNK_QUEUE_DEPTH)
}

/// Deterministic sine-wave source for demos and tests
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    rate_hz: f64,
    max_rows: usize,
    calibrations: HashMap<u32, CalibrationSpec>,
    missing: Vec<u32>,
    failures: HashMap<u32, String>,
}

impl SyntheticSource {
    pub fn new(rate_hz: f64) -> Self {
        Self {
            rate_hz,
            max_rows: 100_000,
            calibrations: HashMap::new(),
            missing: Vec::new(),
            failures: HashMap::new(),
        }
    }

    /// Cap on rows generated per channel
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_calibration(mut self, channel: u32, calibration: CalibrationSpec) -> Self {
        self.calibrations.insert(channel, calibration);
        self
    }

    /// Channel that has no stored data
    pub fn with_missing(mut self, channel: u32) -> Self {
        self.missing.push(channel);
        self
    }

    /// Channel whose read fails with `message`
    pub fn with_failure(mut self, channel: u32, message: impl Into<String>) -> Self {
        self.failures.insert(channel, message.into());
        self
    }

    fn generate(&self, channel: u32, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(String, f64)> {
        if !(self.rate_hz.is_finite() && self.rate_hz > 0.0) {
            return Vec::new();
        }
        let step_us = (1_000_000.0 / self.rate_hz).max(1.0) as i64;
        let step = ChronoDuration::microseconds(step_us);

        let mut rows = Vec::new();
        let mut at = start;
        let mut idx = 0u64;
        while at <= end && rows.len() < self.max_rows {
            let seconds = idx as f64 / self.rate_hz;
            let value = (TAU * 0.5 * seconds + f64::from(channel)).sin();
            rows.push((at.to_rfc3339_opts(SecondsFormat::Micros, true), value));
            at += step;
            idx += 1;
        }
        rows
    }
}

impl ExportSource for SyntheticSource {
    async fn channel_series(
        &self,
        _asset: u32,
        channel: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<SeriesStream>, String> {
        if let Some(message) = self.failures.get(&channel) {
            return Err(message.clone());
        }
        if self.missing.contains(&channel) {
            return Ok(None);
        }
        let series = ChannelSeries {
            calibration: self.calibrations.get(&channel).cloned().unwrap_or_default(),
            rows: self.generate(channel, start, end),
        };
        Ok(Some(stream::iter([Ok(series)]).boxed()))
    }
}
