//! Runner, proof gate and CLI support for stressfield.
//!
//! This crate provides:
//! - Structured logging: JSONL log entries, emitters and schema validation
//! - Series fixtures: named price series loaded from JSON or generated from a seed
//! - Market runner: fixture → volatility → BEAST or dynamical engine → report
//! - Determinism proofs: every kernel driven twice and checked for exact
//!   agreement and documented output ranges

#![forbid(unsafe_code)]

pub mod determinism_proofs;
pub mod error;
pub mod fixtures;
pub mod runner;
pub mod structured_log;

use std::path::Path;

use stressfield_kernels::KernelConfig;

pub use error::{HarnessError, Result};
pub use fixtures::SeriesFixture;
pub use runner::{Engine, MarketReport, MarketRunner};

/// Load a validated config: from a JSON file when given (missing fields take
/// defaults), otherwise from defaults plus `STRESSFIELD_*` overrides.
pub fn load_config(path: Option<&Path>) -> Result<KernelConfig> {
    let config = match path {
        Some(p) => serde_json::from_str(&std::fs::read_to_string(p)?)?,
        None => KernelConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}
