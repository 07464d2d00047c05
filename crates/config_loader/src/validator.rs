//! Config validation
//!
//! Field rules come from the `validator` derive on the config types.
//! Cross-field rules live here:
//! - channel ids unique
//! - channel subjects unique
//! - sampling rates finite

use std::collections::HashSet;

use ::validator::{Validate, ValidationErrors, ValidationErrorsKind};
use contracts::{ContractError, TelemetryConfig};

/// Validate a TelemetryConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &TelemetryConfig) -> Result<(), ContractError> {
    if let Err(errors) = config.validate() {
        return Err(first_violation(&errors));
    }
    validate_channel_ids(config)?;
    validate_channel_subjects(config)?;
    validate_sampling_rates(config)?;
    Ok(())
}

fn validate_channel_ids(config: &TelemetryConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for channel in &config.channels {
        if !seen.insert(channel.id) {
            return Err(ContractError::config_validation(
                format!("channels[id={}]", channel.id),
                "duplicate channel id",
            ));
        }
    }
    Ok(())
}

fn validate_channel_subjects(config: &TelemetryConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for channel in &config.channels {
        if !seen.insert(channel.subject.as_str()) {
            return Err(ContractError::config_validation(
                format!("channels[id={}].subject", channel.id),
                format!("duplicate subject '{}'", channel.subject),
            ));
        }
    }
    Ok(())
}

fn validate_sampling_rates(config: &TelemetryConfig) -> Result<(), ContractError> {
    for channel in &config.channels {
        if !channel.sampling_rate_hz.is_finite() {
            return Err(ContractError::config_validation(
                format!("channels[id={}].sampling_rate_hz", channel.id),
                format!("sampling_rate_hz must be finite, got {}", channel.sampling_rate_hz),
            ));
        }
    }
    Ok(())
}

/// Flatten derive errors into the first `(path, message)` in path order
fn first_violation(errors: &ValidationErrors) -> ContractError {
    let mut flat = Vec::new();
    collect(errors, String::new(), &mut flat);
    flat.sort();
    match flat.into_iter().next() {
        Some((field, message)) => ContractError::config_validation(field, message),
        None => ContractError::config_validation("<root>", "invalid configuration"),
    }
}

fn collect(errors: &ValidationErrors, prefix: String, out: &mut Vec<(String, String)>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                for err in list {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed rule '{}'", err.code));
                    out.push((path.clone(), message));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect(inner, path, out),
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    collect(inner, format!("{path}[{idx}]"), out);
                }
            }
        }
    }
}
