//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{CalibrationFormula, TelemetryConfig};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    bus_endpoint: String,
    export_subject: String,
    channel_count: usize,
    calibrated_channels: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    version: format!("{:?}", config.version),
                    bus_endpoint: config.bus.endpoint.clone(),
                    export_subject: config.export.subject.clone(),
                    channel_count: config.channels.len(),
                    calibrated_channels: config
                        .channels
                        .iter()
                        .filter(|c| c.calibration.is_some())
                        .count(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Non-fatal issues
fn collect_warnings(config: &TelemetryConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.channels.is_empty() {
        warnings.push("No channels configured - `live` has nothing to follow".to_string());
    }

    if config.export.stream_idle_timeout_ms == 0 {
        warnings.push("export.stream_idle_timeout_ms is 0 - a stalled export never times out".to_string());
    }

    for channel in &config.channels {
        if let Some(calibration) = &channel.calibration {
            if matches!(&calibration.formula, CalibrationFormula::Polynomial { coeffs } if coeffs.is_empty()) {
                warnings.push(format!(
                    "Channel {} has an empty polynomial - calibrated values are always 0",
                    channel.id
                ));
            }
        }
        if channel.sampling_rate_hz > 100_000.0 {
            warnings.push(format!(
                "Channel {} samples at {} Hz - sub-10µs spacing",
                channel.id, channel.sampling_rate_hz
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Bus: {}", summary.bus_endpoint);
            println!("  Export subject: {}", summary.export_subject);
            println!(
                "  Channels: {} ({} calibrated)",
                summary.channel_count, summary.calibrated_channels
            );
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_valid_config_with_warnings() {
        let file = write_config(
            r#"
[export]
stream_idle_timeout_ms = 0

[[channels]]
id = 1
subject = "dev.data.ch01"
sampling_rate_hz = 1000.0
calibration = { type = "polynomial", coeffs = [] }
"#,
        );
        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        });

        assert!(result.valid);
        let summary = result.summary.unwrap();
        assert_eq!(summary.channel_count, 1);
        assert_eq!(summary.calibrated_channels, 1);
        assert_eq!(result.warnings.unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_channel_is_invalid() {
        let file = write_config(
            r#"
[[channels]]
id = 1
subject = "a"
sampling_rate_hz = 10.0

[[channels]]
id = 1
subject = "b"
sampling_rate_hz = 10.0
"#,
        );
        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: false,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("duplicate channel id"));
    }

    #[test]
    fn test_missing_file() {
        let result = validate_config(&ValidateArgs {
            config: "does/not/exist.toml".into(),
            json: false,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().starts_with("File not found"));
    }
}
