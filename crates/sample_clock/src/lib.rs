//! # Sample Clock
//!
//! Per-sample timestamp reconstruction for batched telemetry.
//!
//! Responsibilities:
//! - Spread a batch over `1000 / rate` ms steps ending at the producer time
//! - Keep each channel monotonic across batches
//! - Snap back to producer time when the continuity estimate drifts a little
//! - Fall back to local time when the producer clock is far off
//!
//! ## Usage Example
//!
//! ```
//! use contracts::{ClockConfig, ScanFrame};
//! use sample_clock::ChannelClocks;
//!
//! let mut clocks = ChannelClocks::new(ClockConfig::default());
//! clocks.register(1, 100.0);
//!
//! let frame = ScanFrame::new("2024-01-01T00:00:00Z", vec![0.1, 0.2]);
//! let samples = clocks.push(1, &frame).unwrap();
//! assert_eq!(samples.len(), 2);
//! ```

mod channels;
mod policy;
mod reconstructor;

pub use channels::ChannelClocks;
pub use contracts::{ClockConfig, ReconstructOutcome, SampleClockState, TimedSample, TimestampSource};
pub use policy::{parse_batch_timestamp, reconstruct, Reconstruction};
pub use reconstructor::SampleClockReconstructor;
