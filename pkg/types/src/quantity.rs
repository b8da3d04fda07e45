use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity as ApiQuantity;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,
    #[error("quantity '{0}' is negative")]
    Negative(String),
    #[error("'{0}' is not a number")]
    InvalidNumber(String),
    #[error("unknown unit suffix '{0}'")]
    UnknownSuffix(String),
    #[error("quantity '{0}' is out of range")]
    OutOfRange(String),
}

/// A Kubernetes resource quantity such as `500m`, `128Mi` or `1.5e9`.
///
/// The original text is kept verbatim so that the object written to the
/// API server carries exactly what the operator configured; `value` is the
/// magnitude in base units (cores or bytes), used for validation only.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    raw: String,
    value: f64,
}

impl Quantity {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Magnitude in base units.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0.0
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(QuantityError::Empty);
        }

        let unsigned = if let Some(rest) = raw.strip_prefix('+') {
            rest
        } else if raw.starts_with('-') {
            return Err(QuantityError::Negative(raw.to_string()));
        } else {
            raw
        };

        let split = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(split);

        if !number.chars().any(|c| c.is_ascii_digit()) {
            return Err(QuantityError::InvalidNumber(raw.to_string()));
        }
        let magnitude: f64 = number
            .parse()
            .map_err(|_| QuantityError::InvalidNumber(raw.to_string()))?;

        let value = magnitude * multiplier(suffix)?;
        // A non-zero literal must not collapse to zero or overflow.
        let nonzero = number.chars().any(|c| matches!(c, '1'..='9'));
        if !value.is_finite() || (nonzero && value == 0.0) {
            return Err(QuantityError::OutOfRange(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            value,
        })
    }
}

/// Scale factor for a unit suffix: binary SI, decimal SI or `e<n>` exponent.
fn multiplier(suffix: &str) -> Result<f64, QuantityError> {
    let factor = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => {
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))
                .and_then(|digits| digits.parse::<i32>().ok())
                .ok_or_else(|| QuantityError::UnknownSuffix(suffix.to_string()))?;
            10f64.powi(exponent)
        }
    };
    Ok(factor)
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&Quantity> for ApiQuantity {
    fn from(q: &Quantity) -> Self {
        ApiQuantity(q.raw.clone())
    }
}
