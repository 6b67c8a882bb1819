//! Kernel configuration.
//!
//! Every tunable of the numeric core lives in [`KernelConfig`]. Defaults match
//! the structural constants the kernels were designed around; overrides come
//! from `STRESSFIELD_<FIELD>` environment variables:
//! - `STRESSFIELD_VOL_WINDOW`, `STRESSFIELD_VOL_OFFSET`, `STRESSFIELD_RANK_WINDOW`,
//!   `STRESSFIELD_HISTORY_CAPACITY`: unsigned integers.
//! - `STRESSFIELD_INSTABILITY_BASELINE`, `STRESSFIELD_GAMMA`, `STRESSFIELD_ETA`,
//!   `STRESSFIELD_RHO`, `STRESSFIELD_BETA`, `STRESSFIELD_ALPHA`,
//!   `STRESSFIELD_NASH_STRENGTH`, `STRESSFIELD_LAMBDA_MACRO`: floats.
//! - `STRESSFIELD_VARIANCE`: `population` (default) or `sample`.
//!
//! Unparseable values are ignored and the default is kept; [`KernelConfig::validate`]
//! is where bad combinations get rejected.

use serde::{Deserialize, Serialize};

use crate::beast::BeastParams;
use crate::dynamical::DynamicalParams;
use crate::error::{KernelError, Result, ensure_finite, ensure_range};
use crate::rolling::VarianceEstimator;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "STRESSFIELD_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Rolling window (in returns) for volatility.
    pub vol_window: usize,
    /// Offset between the price index and the volatility index.
    pub vol_offset: usize,
    /// Trailing window used by the oracle rank.
    pub rank_window: usize,
    /// Per-regime history capacity of the oracle buffer.
    pub history_capacity: usize,
    /// Volatility that maps to an instability index of 25.
    pub instability_baseline: f64,
    pub variance: VarianceEstimator,
    /// BEAST interaction strength.
    pub gamma: f64,
    /// BEAST acceleration strength.
    pub eta: f64,
    /// Dynamical state persistence.
    pub rho: f64,
    /// Dynamical volatility-stress feedback.
    pub beta: f64,
    /// Dynamical convex shock amplification.
    pub alpha: f64,
    pub nash_strength: f64,
    /// Convex weight of the macro score against systemic stress.
    pub lambda_macro: f64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            vol_window: 20,
            vol_offset: 20,
            rank_window: 252,
            history_capacity: 500,
            instability_baseline: 0.02,
            variance: VarianceEstimator::Population,
            gamma: 0.4,
            eta: 0.25,
            rho: 0.85,
            beta: 0.08,
            alpha: 0.3,
            nash_strength: 0.25,
            lambda_macro: 0.5,
        }
    }
}

impl KernelConfig {
    /// Defaults overlaid with `STRESSFIELD_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from an arbitrary lookup.
    ///
    /// `lookup` receives the full variable name (e.g. `STRESSFIELD_GAMMA`).
    #[must_use]
    pub fn from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut cfg = Self::default();

        override_parsed(&mut cfg.vol_window, get("VOL_WINDOW"));
        override_parsed(&mut cfg.vol_offset, get("VOL_OFFSET"));
        override_parsed(&mut cfg.rank_window, get("RANK_WINDOW"));
        override_parsed(&mut cfg.history_capacity, get("HISTORY_CAPACITY"));
        override_parsed(&mut cfg.instability_baseline, get("INSTABILITY_BASELINE"));
        override_parsed(&mut cfg.gamma, get("GAMMA"));
        override_parsed(&mut cfg.eta, get("ETA"));
        override_parsed(&mut cfg.rho, get("RHO"));
        override_parsed(&mut cfg.beta, get("BETA"));
        override_parsed(&mut cfg.alpha, get("ALPHA"));
        override_parsed(&mut cfg.nash_strength, get("NASH_STRENGTH"));
        override_parsed(&mut cfg.lambda_macro, get("LAMBDA_MACRO"));
        if let Some(raw) = get("VARIANCE") {
            cfg.variance = VarianceEstimator::from_str_loose(&raw);
        }
        cfg
    }

    /// Reject configurations the kernels cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.vol_window < self.variance.min_window() {
            return Err(KernelError::InvalidWindow {
                window: self.vol_window,
                minimum: self.variance.min_window(),
            });
        }
        if self.rank_window == 0 {
            return Err(KernelError::InvalidWindow {
                window: 0,
                minimum: 1,
            });
        }
        if self.history_capacity == 0 {
            return Err(KernelError::InvalidConfig(
                "history_capacity must be > 0".to_string(),
            ));
        }
        if !(self.instability_baseline.is_finite() && self.instability_baseline > 0.0) {
            return Err(KernelError::InvalidConfig(format!(
                "instability_baseline must be > 0, got {}",
                self.instability_baseline
            )));
        }
        ensure_range("lambda_macro", self.lambda_macro, 0.0, 1.0)?;
        BeastParams::new(self.gamma, self.eta, None)?;
        ensure_finite("nash_strength", self.nash_strength)?;
        self.dynamical_params().map(|_| ())
    }

    /// Dynamical parameters, checked against the stability condition.
    pub fn dynamical_params(&self) -> Result<DynamicalParams> {
        DynamicalParams::new(self.rho, self.beta, self.alpha)
    }
}

fn override_parsed<T: std::str::FromStr>(slot: &mut T, raw: Option<String>) {
    if let Some(v) = raw.and_then(|s| s.trim().parse::<T>().ok()) {
        *slot = v;
    }
}
