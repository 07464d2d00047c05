//! Progress callbacks

use contracts::MetaFrame;

/// Receives transfer progress
///
/// All methods default to no-ops.
pub trait TransferObserver: Send {
    fn on_meta(&mut self, _meta: &MetaFrame) {}

    /// Cumulative bytes received so far
    fn on_progress(&mut self, _received_bytes: u64) {}

    /// Requested channels that had no data
    fn on_summary(&mut self, _missing_channel_ids: &[u32]) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}
