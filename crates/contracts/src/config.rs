//! TelemetryConfig - Config Loader output
//!
//! Bus connection, export defaults, clock tuning and the live channel list.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::CalibrationSpec;

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete workspace configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub version: ConfigVersion,

    #[serde(default)]
    #[validate(nested)]
    pub bus: BusConfig,

    #[serde(default)]
    #[validate(nested)]
    pub export: ExportConfig,

    #[serde(default)]
    #[validate(nested)]
    pub clock: ClockConfig,

    /// Live channels
    #[serde(default)]
    #[validate(nested)]
    pub channels: Vec<ChannelConfig>,
}

impl TelemetryConfig {
    pub fn channel(&self, id: u32) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.id == id)
    }
}

/// Messaging bus connection
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BusConfig {
    /// Server URL, e.g. `nats://127.0.0.1:4222`
    #[serde(default = "default_endpoint")]
    #[validate(length(min = 1, message = "endpoint cannot be empty"))]
    pub endpoint: String,

    /// Registry key for the shared connection
    #[serde(default = "default_identity")]
    #[validate(length(min = 1, message = "identity cannot be empty"))]
    pub identity: String,

    /// Request/reply timeout (negotiation and start handshake)
    #[serde(default = "default_request_timeout_ms")]
    #[validate(range(min = 1, message = "request_timeout_ms must be > 0"))]
    pub request_timeout_ms: u64,

    /// Initial connect timeout for `nats://` endpoints
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1, message = "connect_timeout_ms must be > 0"))]
    pub connect_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            identity: default_identity(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl BusConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_endpoint() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_identity() -> String {
    "telemetry".to_string()
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

/// Export defaults
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExportConfig {
    /// Negotiation subject
    #[serde(default = "default_export_subject")]
    #[validate(length(min = 1, message = "export subject cannot be empty"))]
    pub subject: String,

    /// Socket-framed exporter URL
    #[serde(default = "default_websocket_url")]
    #[validate(length(min = 1, message = "websocket_url cannot be empty"))]
    pub websocket_url: String,

    /// Max silence between frames; 0 disables
    #[serde(default = "default_stream_idle_timeout_ms")]
    pub stream_idle_timeout_ms: u64,

    /// Stored parquet tree served by a local exporter
    /// (`<root>/asset<NNN>/<YYYY-MM-DD>/ch<NN>/*.parquet`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parquet_root: Option<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            subject: default_export_subject(),
            websocket_url: default_websocket_url(),
            stream_idle_timeout_ms: default_stream_idle_timeout_ms(),
            parquet_root: None,
        }
    }
}

impl ExportConfig {
    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        (self.stream_idle_timeout_ms > 0).then(|| Duration::from_millis(self.stream_idle_timeout_ms))
    }
}

fn default_export_subject() -> String {
    "export.request".to_string()
}

fn default_websocket_url() -> String {
    "ws://127.0.0.1:9001/export".to_string()
}

fn default_stream_idle_timeout_ms() -> u64 {
    120_000
}

/// Sample clock tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct ClockConfig {
    /// Snap window in sample intervals
    #[serde(default = "default_snap_factor")]
    #[validate(range(exclusive_min = 0.0, message = "snap_factor must be > 0"))]
    pub snap_factor: f64,

    /// Lower bound of the snap window (ms)
    #[serde(default = "default_snap_floor_ms")]
    #[validate(range(min = 0.0, message = "snap_floor_ms must be >= 0"))]
    pub snap_floor_ms: f64,

    /// Producer/local skew beyond which a fresh channel ignores producer time (ms)
    #[serde(default = "default_max_producer_skew_ms")]
    #[validate(range(exclusive_min = 0.0, message = "max_producer_skew_ms must be > 0"))]
    pub max_producer_skew_ms: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            snap_factor: default_snap_factor(),
            snap_floor_ms: default_snap_floor_ms(),
            max_producer_skew_ms: default_max_producer_skew_ms(),
        }
    }
}

fn default_snap_factor() -> f64 {
    4.0
}

fn default_snap_floor_ms() -> f64 {
    25.0
}

fn default_max_producer_skew_ms() -> f64 {
    600_000.0
}

/// One live telemetry channel
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChannelConfig {
    pub id: u32,

    /// Bus subject carrying scan frames
    #[validate(length(min = 1, message = "subject cannot be empty"))]
    pub subject: String,

    #[validate(range(exclusive_min = 0.0, message = "sampling_rate_hz must be > 0"))]
    pub sampling_rate_hz: f64,

    #[serde(default)]
    pub calibration: Option<CalibrationSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.bus.request_timeout(), Duration::from_secs(60));
        assert_eq!(
            config.export.stream_idle_timeout(),
            Some(Duration::from_secs(120))
        );
        assert_eq!(config.clock.snap_factor, 4.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_idle_timeout_disables() {
        let export = ExportConfig {
            stream_idle_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(export.stream_idle_timeout(), None);
    }

    #[test]
    fn test_derive_rules_reject_bad_channel() {
        let mut config = TelemetryConfig::default();
        config.channels.push(ChannelConfig {
            id: 1,
            subject: String::new(),
            sampling_rate_hz: 0.0,
            calibration: None,
        });
        assert!(config.validate().is_err());
    }
}
