//! # Frame Codec
//!
//! Scan frame decoding module.
//!
//! Responsibilities:
//! - Decode one binary scan frame into `ScanFrame`
//! - Encode `ScanFrame` as a FlatBuffers `Scan` table (producers, replay, tests)
//! - Count decoded frames and failures per feed
//!
//! ## Usage Example
//!
//! ```
//! use contracts::ScanFrame;
//!
//! let frame = ScanFrame::new("2024-01-01T00:00:00Z", vec![1.0, 2.0, 3.0]);
//! let bytes = frame_codec::encode(&frame);
//! assert_eq!(frame_codec::decode(&bytes).unwrap(), frame);
//! ```

mod decoder;
mod layout;
mod scan_generated;
mod stats;

pub use decoder::FrameDecoder;
pub use layout::{decode, encode};
pub use stats::{CodecMetrics, MetricsSnapshot};
