//! # Contracts
//!
//! Frozen interface contracts shared by every crate in the workspace.
//! Business crates depend on this crate only, never on each other's internals.
//!
//! ## Time Model
//! - All reconstructed timestamps are wall-clock epoch milliseconds (`f64`)
//! - Producer batch timestamps travel as RFC 3339 strings and mark the *last*
//!   sample of a batch

mod bus;
mod calibration;
mod config;
mod error;
mod export;
mod frame;
mod identity;
mod sample;
mod scan;

pub use bus::{BusMessage, LocalMessageBus, MessageBus, Subscription, EVENT_HEADER};
pub use calibration::{CalibrationFormula, CalibrationSpec};
pub use config::*;
pub use error::*;
pub use export::*;
pub use frame::{MetaFrame, SummaryFrame, TransferFrame};
pub use identity::Identity;
pub use sample::{ReconstructOutcome, SampleClockState, TimedSample, TimestampSource};
pub use scan::ScanFrame;
