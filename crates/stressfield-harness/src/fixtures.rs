//! Series fixture loading.
//!
//! A fixture is one named price series, optionally with a precomputed
//! volatility series, plus the macro factors the market pipeline scores it
//! under.

use std::path::Path;

use serde::{Deserialize, Serialize};
use stressfield_kernels::{KernelConfig, KernelError, MacroFactors, rolling_volatility};

use crate::error::{HarnessError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesFixture {
    pub name: String,
    pub prices: Vec<f64>,
    /// Precomputed volatility aligned `vol_offset` prices into the series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vols: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vol_window: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vol_offset: Option<usize>,
    #[serde(default)]
    pub macro_factors: MacroFactors,
}

/// Volatility series ready for the market runners.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVols {
    pub vols: Vec<f64>,
    pub vol_offset: usize,
}

impl SeriesFixture {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Geometric random walk with a volatility burst in its last third.
    ///
    /// Deterministic in `seed`; used for proofs, benches and demos.
    #[must_use]
    pub fn synthetic(name: &str, n: usize, seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        let mut price = 100.0_f64;
        let prices = (0..n)
            .map(|i| {
                let u = (next_u64(&mut state) >> 11) as f64 / (1u64 << 53) as f64;
                let scale = if i * 3 >= n * 2 { 0.06 } else { 0.015 };
                price *= ((u * 2.0 - 1.0) * scale).exp();
                price
            })
            .collect();
        Self {
            name: name.to_string(),
            prices,
            vols: None,
            vol_window: None,
            vol_offset: None,
            macro_factors: MacroFactors::tariff_shock(),
        }
    }

    /// Fail with [`HarnessError::EmptySeries`] unless there are at least two prices.
    pub fn check_prices(&self) -> Result<()> {
        if self.prices.len() < 2 {
            return Err(HarnessError::EmptySeries {
                name: self.name.clone(),
                len: self.prices.len(),
            });
        }
        Ok(())
    }

    /// The fixture's volatility series, computing it when absent.
    ///
    /// Supplied vols keep `vol_offset` (falling back to `vol_window`, then
    /// the config). Computed vols use `vol_window` (or the config's) and
    /// offset by that window unless `vol_offset` says otherwise. An offset
    /// past the end of the price series is rejected.
    pub fn resolve_vols(&self, config: &KernelConfig) -> Result<ResolvedVols> {
        self.check_prices()?;
        let resolved = match &self.vols {
            Some(vols) => ResolvedVols {
                vols: vols.clone(),
                vol_offset: self
                    .vol_offset
                    .or(self.vol_window)
                    .unwrap_or(config.vol_offset),
            },
            None => {
                let window = self.vol_window.unwrap_or(config.vol_window);
                ResolvedVols {
                    vols: rolling_volatility(&self.prices, window, config.variance)?,
                    vol_offset: self.vol_offset.unwrap_or(window),
                }
            }
        };
        if resolved.vol_offset > self.prices.len() {
            return Err(KernelError::InvalidConfig(format!(
                "fixture '{}': vol_offset {} exceeds {} prices",
                self.name,
                resolved.vol_offset,
                self.prices.len()
            ))
            .into());
        }
        Ok(resolved)
    }
}

fn next_u64(state: &mut u64) -> u64 {
    // PCG-style LCG.
    *state = state
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407);
    *state
}
