//! ScanFrame - FrameCodec output
//!
//! One decoded batch of samples for a single channel.

use serde::{Deserialize, Serialize};

/// Decoded scan frame
///
/// Values are consecutive samples of one channel, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFrame {
    /// Producer wall-clock time of the *last* sample (RFC 3339)
    pub batch_timestamp: String,

    /// Sample values in acquisition order
    pub values: Vec<f64>,
}

impl ScanFrame {
    pub fn new(batch_timestamp: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            batch_timestamp: batch_timestamp.into(),
            values,
        }
    }

    /// Number of samples in the batch
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
