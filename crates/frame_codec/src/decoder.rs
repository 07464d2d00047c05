//! Feed-level decoder
//!
//! Wraps `decode` with counters and logging. A bad frame is dropped with a
//! warning; it never stops the feed.

use std::sync::Arc;

use contracts::{DecodeError, ScanFrame};
use tracing::{trace, warn};

use crate::layout::decode;
use crate::stats::CodecMetrics;

/// Decoder bound to one live subject
pub struct FrameDecoder {
    subject: String,
    metrics: Arc<CodecMetrics>,
}

impl FrameDecoder {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            metrics: Arc::new(CodecMetrics::new()),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn metrics(&self) -> Arc<CodecMetrics> {
        self.metrics.clone()
    }

    /// Decode and record; the error is returned so callers can label it
    pub fn decode(&self, payload: &[u8]) -> Result<ScanFrame, DecodeError> {
        match decode(payload) {
            Ok(frame) => {
                self.metrics.record_decoded(frame.len());
                trace!(
                    subject = %self.subject,
                    samples = frame.len(),
                    batch_timestamp = %frame.batch_timestamp,
                    "scan frame decoded"
                );
                Ok(frame)
            }
            Err(err) => {
                self.metrics.record_failure(&err);
                warn!(
                    subject = %self.subject,
                    bytes = payload.len(),
                    reason = err.label(),
                    error = %err,
                    "dropping undecodable scan frame"
                );
                Err(err)
            }
        }
    }
}
