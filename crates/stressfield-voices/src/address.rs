//! Address validation and the deterministic address profile.
//!
//! The profile is a stand-in for on-chain data: every field is sliced out of
//! the SHA-256 hex of the address, so the same address always maps to the
//! same numbers. It carries no information about any real ledger.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::voices::sha256_hex;

pub const MIN_ADDRESS_LEN: usize = 10;
pub const MAX_ADDRESS_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is required")]
    Required,
    #[error("address too short ({len} < {MIN_ADDRESS_LEN})")]
    TooShort { len: usize },
    #[error("address too long ({len} > {MAX_ADDRESS_LEN})")]
    TooLong { len: usize },
    #[error("invalid address format")]
    InvalidFormat,
}

/// Trim `raw` and check length and charset `[0-9A-Za-z._-]`.
pub fn validate_address(raw: &str) -> Result<&str, AddressError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(AddressError::Required);
    }
    let len = s.chars().count();
    if len < MIN_ADDRESS_LEN {
        return Err(AddressError::TooShort { len });
    }
    if len > MAX_ADDRESS_LEN {
        return Err(AddressError::TooLong { len });
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(AddressError::InvalidFormat);
    }
    Ok(s)
}

/// Hash-derived pseudo on-chain summary of an address.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AddressProfile {
    pub tx_count: u32,
    pub avg_value: f64,
    pub age_days: u32,
    /// In `[0.02, 0.069]`.
    pub volatility_proxy: f64,
    /// Comparison volatility, in `[0.12, 0.21]`.
    pub benchmark: f64,
}

impl AddressProfile {
    #[must_use]
    pub fn derive(address: &str) -> Self {
        let hex = sha256_hex(address.as_bytes());
        let head = hex_word(&hex, 0);
        Self {
            tx_count: head % 1000,
            avg_value: f64::from(hex_word(&hex, 4) % 10_000) / 100.0,
            age_days: hex_word(&hex, 8) % 2000,
            volatility_proxy: f64::from(hex_word(&hex, 12) % 50) / 1000.0 + 0.02,
            benchmark: 0.12 + f64::from(head % 10) / 100.0,
        }
    }
}

/// Four hex digits starting at `at`, as an integer.
fn hex_word(hex: &str, at: usize) -> u32 {
    hex.get(at..at + 4)
        .and_then(|w| u32::from_str_radix(w, 16).ok())
        .unwrap_or(0)
}
