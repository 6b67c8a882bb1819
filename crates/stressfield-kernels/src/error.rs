//! Error taxonomy for the numeric kernels.
//!
//! Domain violations (non-finite or out-of-range inputs) and configuration
//! errors (unknown regime, unstable dynamical parameters) are reported here.
//! Warm-up conditions are not errors: the systemic indices return `0.0` while
//! their windows fill.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("{field} must be finite, got {value}")]
    NonFinite { field: &'static str, value: f64 },
    #[error("volatility must be >= 0, got {value}")]
    NegativeVolatility { value: f64 },
    #[error("unknown regime: {0}")]
    UnknownRegime(String),
    #[error("stability violated: rho + |beta| = {sum:.3} >= 1 (rho={rho}, beta={beta})")]
    StabilityViolation { rho: f64, beta: f64, sum: f64 },
    #[error("window {window} is below the minimum of {minimum}")]
    InvalidWindow { window: usize, minimum: usize },
    #[error("{field}={value} outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Reject NaN and infinities before they reach a recurrence.
pub(crate) fn ensure_finite(field: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(KernelError::NonFinite { field, value })
    }
}

/// Reject finite values outside `[min, max]`.
pub(crate) fn ensure_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64> {
    let value = ensure_finite(field, value)?;
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(KernelError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}
