//! Frame state machine shared by the bus and socket variants
//!
//! Pure: no I/O, no clock. Feed frames in arrival order and act on the returned
//! step.

use bytes::{Bytes, BytesMut};
use contracts::{ExportPayload, MetaFrame, TransferError, TransferFrame};

/// Fallback name when neither meta nor the caller supplies one
pub const DEFAULT_FILE_NAME: &str = "labjack_export.csv";

/// Outcome of pushing one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyStep {
    Meta(MetaFrame),
    /// Cumulative bytes after a chunk
    Progress(u64),
    /// Missing channel ids from the summary
    Summary(Vec<u32>),
    /// Unknown frame kind
    Ignored,
    Complete(ExportPayload),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingData,
    Receiving,
    Finished,
}

/// Reassembles ordered chunks into an `ExportPayload`
#[derive(Debug)]
pub struct TransferAssembler {
    buffer: BytesMut,
    phase: Phase,
    meta: Option<MetaFrame>,
    summary_bytes: Option<u64>,
    missing: Vec<u32>,
    chunks: u64,

    // Caller-side hints, overridden by meta/summary
    file_name_hint: Option<String>,
    content_type_hint: Option<String>,
    expected_size: Option<u64>,
}

impl Default for TransferAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferAssembler {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            phase: Phase::AwaitingData,
            meta: None,
            summary_bytes: None,
            missing: Vec::new(),
            chunks: 0,
            file_name_hint: None,
            content_type_hint: None,
            expected_size: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name_hint = Some(name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type_hint = Some(content_type.into());
        self
    }

    /// Size announced during negotiation
    pub fn with_expected_size(mut self, size: Option<u64>) -> Self {
        self.expected_size = size;
        self
    }

    /// Missing ids announced during negotiation; a summary replaces them
    pub fn with_missing(mut self, missing: impl IntoIterator<Item = u32>) -> Self {
        self.missing = missing.into_iter().collect();
        self
    }

    pub fn received_bytes(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Push the next frame
    ///
    /// # Errors
    /// - `RemoteError` on an `error` frame
    /// - `MalformedFrame` on a duplicate meta or a meta after data
    /// - `SizeMismatch` on `complete` when a declared size disagrees
    /// - `InvalidState` once the assembler has finished
    pub fn push(&mut self, frame: TransferFrame) -> Result<AssemblyStep, TransferError> {
        if self.phase == Phase::Finished {
            return Err(TransferError::InvalidState {
                operation: "push",
                state: "finished".to_string(),
            });
        }

        match frame {
            TransferFrame::Meta(meta) => {
                if self.meta.is_some() {
                    return Err(self.fail(TransferError::malformed("duplicate meta frame")));
                }
                if self.phase == Phase::Receiving {
                    return Err(self.fail(TransferError::malformed("meta frame after data")));
                }
                self.meta = Some(meta.clone());
                Ok(AssemblyStep::Meta(meta))
            }
            TransferFrame::Chunk(bytes) => Ok(AssemblyStep::Progress(self.append(bytes))),
            TransferFrame::Summary(summary) => {
                self.phase = Phase::Receiving;
                self.summary_bytes = summary.bytes_sent;
                self.missing = summary.missing_channels;
                Ok(AssemblyStep::Summary(self.missing.clone()))
            }
            TransferFrame::Complete => self.finish().map(AssemblyStep::Complete),
            TransferFrame::Error { message } => Err(self.fail(TransferError::RemoteError { message })),
            TransferFrame::Unknown(_) => Ok(AssemblyStep::Ignored),
        }
    }

    fn append(&mut self, bytes: Bytes) -> u64 {
        self.phase = Phase::Receiving;
        self.chunks += 1;
        self.buffer.extend_from_slice(&bytes);
        self.received_bytes()
    }

    fn fail(&mut self, err: TransferError) -> TransferError {
        self.phase = Phase::Finished;
        err
    }

    fn finish(&mut self) -> Result<ExportPayload, TransferError> {
        let received = self.received_bytes();

        // Summary is authoritative, then meta, then negotiation
        let declared = self
            .summary_bytes
            .or_else(|| self.meta.as_ref().and_then(|m| m.size))
            .or(self.expected_size);
        if let Some(expected) = declared {
            if expected != received {
                return Err(self.fail(TransferError::SizeMismatch { expected, received }));
            }
        }

        let meta = self.meta.take().unwrap_or_default();
        let file_name = meta
            .file_name
            .or_else(|| self.file_name_hint.take())
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
        let content_type = meta
            .content_type
            .or_else(|| self.content_type_hint.take())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        self.phase = Phase::Finished;
        Ok(ExportPayload {
            bytes: std::mem::take(&mut self.buffer).freeze(),
            file_name,
            content_type,
            size: received,
            missing_channel_ids: std::mem::take(&mut self.missing),
        })
    }
}
