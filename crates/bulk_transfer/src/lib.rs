//! # Bulk Transfer
//!
//! On-demand export transfer module.
//!
//! Responsibilities:
//! - Negotiate an export over bus request/reply
//! - Subscribe to the data channel before the start handshake
//! - Reassemble ordered chunks into an `ExportPayload`
//! - Speak the same frame vocabulary over a WebSocket
//! - Serve exports from an `ExportSource`: stored parquet files or a
//!   synthetic generator for demos and tests
//!
//! ## Usage Example
//!
//! ```ignore
//! use bulk_transfer::{BulkTransferSession, NoopObserver, SessionOptions};
//!
//! let mut session = BulkTransferSession::new(bus, SessionOptions::default());
//! let payload = session.export(&request, &mut NoopObserver).await?;
//! std::fs::write(&payload.file_name, &payload.bytes)?;
//! ```

pub mod assembler;
pub mod metrics;
pub mod observer;
pub mod parquet_source;
pub mod protocol;
pub mod responder;
pub mod session;
pub mod source;
pub mod ws;
pub mod ws_server;

pub use assembler::{AssemblyStep, TransferAssembler};
pub use contracts::{ExportPayload, ExportRequest, TransferError, TransferFrame, TransferState};
pub use metrics::{MetricsSnapshot, TransferMetrics};
pub use observer::{NoopObserver, TransferObserver};
pub use parquet_source::ParquetSource;
pub use protocol::CHUNK_SIZE;
pub use responder::{ExportResponder, ResponderHandle, ResponderOptions};
pub use session::{BulkTransferSession, SessionOptions};
pub use source::{
    chunk_channel, render_csv, stream_csv, ChannelSeries, CsvSummary, ExportSource,
    LocalExportSource, RenderedExport, SeriesStream, SyntheticSource,
};
pub use ws::WsExportClient;
pub use ws_server::{serve_ws_export, serve_ws_listener};
