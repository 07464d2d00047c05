//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Generate `TelemetryConfig`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("telemetry.toml")).unwrap();
//! println!("Bus: {}", config.bus.endpoint);
//! ```

mod parser;
mod validator;

pub use contracts::TelemetryConfig;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Format is detected from the extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<TelemetryConfig, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<TelemetryConfig, ContractError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }

    /// Serialize TelemetryConfig to TOML string
    pub fn to_toml(config: &TelemetryConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize TelemetryConfig to JSON string
    pub fn to_json(config: &TelemetryConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::CalibrationFormula;

    const SAMPLE_TOML: &str = r#"
version = "V1"

[bus]
endpoint = "nats://10.0.0.5:4222"
identity = "bench-7"
request_timeout_ms = 30000

[export]
subject = "export.request"
stream_idle_timeout_ms = 0

[clock]
snap_factor = 4.0
snap_floor_ms = 25.0

[[channels]]
id = 1
subject = "avenabox.001.data.ch01"
sampling_rate_hz = 7000.0
[channels.calibration]
type = "linear"
a = 2.0
b = 0.5

[[channels]]
id = 2
subject = "avenabox.001.data.ch02"
sampling_rate_hz = 100.0
"#;

    #[test]
    fn test_load_from_str_toml() {
        let result = ConfigLoader::load_from_str(SAMPLE_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.bus.identity, "bench-7");
        assert_eq!(config.export.stream_idle_timeout(), None);
        assert_eq!(config.clock.max_producer_skew_ms, 600_000.0);
        let ch1 = config.channel(1).unwrap();
        assert_eq!(
            ch1.calibration.as_ref().unwrap().formula,
            CalibrationFormula::Linear { a: 2.0, b: 0.5 }
        );
        assert!(config.channel(2).unwrap().calibration.is_none());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ConfigLoader::load_from_str("", ConfigFormat::Toml).unwrap();
        assert_eq!(config.bus.endpoint, "nats://127.0.0.1:4222");
        assert_eq!(config.export.websocket_url, "ws://127.0.0.1:9001/export");
        assert!(config.channels.is_empty());
    }

    #[test]
    fn test_round_trip_toml() {
        let config = ConfigLoader::load_from_str(SAMPLE_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&config).unwrap();
        let again = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(config.bus.endpoint, again.bus.endpoint);
        assert_eq!(config.channels.len(), again.channels.len());
    }

    #[test]
    fn test_round_trip_json() {
        let config = ConfigLoader::load_from_str(SAMPLE_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&config).unwrap();
        let again = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(config.channels[0].subject, again.channels[0].subject);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = r#"
[[channels]]
id = 3
subject = "a"
sampling_rate_hz = 10.0

[[channels]]
id = 3
subject = "b"
sampling_rate_hz = 10.0
"#;
        let result = ConfigLoader::load_from_str(content, ConfigFormat::Toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = ConfigLoader::load_from_path(Path::new("telemetry.yaml")).unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }
}
