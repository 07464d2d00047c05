//! Channel calibration
//!
//! Maps raw sensor readings to engineering units.

use serde::{Deserialize, Serialize};

/// Calibration formula, tagged by `type` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CalibrationFormula {
    Identity,
    /// `a * raw + b`
    Linear { a: f64, b: f64 },
    /// `sum(coeffs[i] * raw^i)`
    Polynomial { coeffs: Vec<f64> },
}

/// Calibration attached to a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(flatten)]
    pub formula: CalibrationFormula,
}

impl Default for CalibrationSpec {
    fn default() -> Self {
        Self {
            id: None,
            formula: CalibrationFormula::Identity,
        }
    }
}

impl CalibrationSpec {
    /// Apply the formula; non-finite readings pass through untouched
    pub fn apply(&self, raw: f64) -> f64 {
        if !raw.is_finite() {
            return raw;
        }
        match &self.formula {
            CalibrationFormula::Identity => raw,
            CalibrationFormula::Linear { a, b } => a * raw + b,
            CalibrationFormula::Polynomial { coeffs } => coeffs
                .iter()
                .enumerate()
                .map(|(idx, coeff)| coeff * raw.powi(idx as i32))
                .sum(),
        }
    }

    pub fn id_or_default(&self) -> &str {
        self.id.as_deref().unwrap_or("identity")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_and_polynomial() {
        let linear = CalibrationSpec {
            id: Some("lin".into()),
            formula: CalibrationFormula::Linear { a: 2.0, b: 0.5 },
        };
        assert_eq!(linear.apply(3.0), 6.5);

        let poly = CalibrationSpec {
            id: None,
            formula: CalibrationFormula::Polynomial {
                coeffs: vec![1.0, 0.0, 2.0],
            },
        };
        // 1 + 0*x + 2*x^2
        assert_eq!(poly.apply(3.0), 19.0);
        assert_eq!(poly.id_or_default(), "identity");
    }

    #[test]
    fn test_non_finite_passthrough() {
        let linear = CalibrationSpec {
            id: None,
            formula: CalibrationFormula::Linear { a: 2.0, b: 1.0 },
        };
        assert!(linear.apply(f64::NAN).is_nan());
        assert_eq!(linear.apply(f64::INFINITY), f64::INFINITY);
    }

    #[test]
    fn test_wire_format_is_type_tagged() {
        let spec: CalibrationSpec =
            serde_json::from_str(r#"{"id":"cal-7","type":"linear","a":1.5,"b":-2.0}"#).unwrap();
        assert_eq!(spec.id.as_deref(), Some("cal-7"));
        assert_eq!(spec.formula, CalibrationFormula::Linear { a: 1.5, b: -2.0 });

        let identity: CalibrationSpec = serde_json::from_str(r#"{"type":"identity"}"#).unwrap();
        assert_eq!(identity, CalibrationSpec::default());
    }
}
