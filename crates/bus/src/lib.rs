//! # Bus
//!
//! Messaging bus plumbing.
//!
//! Responsibilities:
//! - In-process `MessageBus` with request/reply and ordered subscriptions
//! - NATS-backed `MessageBus`, chosen by endpoint scheme (`BusClient`)
//! - One live connection per identity (`ConnectionRegistry`)
//! - Key/value collaborator with filtered keys and watches
//!
//! Subjects are dot-separated tokens; subscriptions and key filters accept
//! `*` (one token) and `>` (remaining tokens).

pub mod client;
pub mod kv;
pub mod memory;
pub mod nats;
pub mod registry;
pub mod sensor;
pub mod subject;

pub use client::BusClient;
pub use contracts::{BusMessage, MessageBus, Subscription};
pub use kv::{watch_first, InMemoryKv, KvOperation, KvUpdate, KvWatcher};
pub use memory::InMemoryBus;
pub use nats::NatsBus;
pub use registry::{ConnectionHandle, ConnectionRegistry, SessionLease};
pub use sensor::{SensorField, SensorRecord};
