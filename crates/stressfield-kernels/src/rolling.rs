//! Rolling statistics over price series.
//!
//! Every caller that needs log returns, realized volatility or a percentile
//! rank goes through this module. The only knob that historically varied
//! between callers, the variance divisor, is an explicit
//! [`VarianceEstimator`] argument.
//!
//! Index alignment: `rolling_volatility(prices, w, _)[k]` is computed from
//! `returns[k .. k + w]`, i.e. it trails price index `k + w`. Callers carry
//! that offset as `vol_offset`.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// Trading days per year used to annualize daily volatility.
pub const TRADING_DAYS: f64 = 252.0;

/// Lower clamp for percentile ranks so the probit stays finite.
pub const RANK_MIN: f64 = 0.001;

/// Upper clamp for percentile ranks.
pub const RANK_MAX: f64 = 0.999;

/// Rank reported when there is no history to compare against.
pub const RANK_NEUTRAL: f64 = 0.5;

/// Annualized volatility above which a window is classified as a tail event.
pub const TAIL_VOL_THRESHOLD: f64 = 0.85;

/// Minimum price count before [`TailRegime::detect`] leaves `Normal`.
const TAIL_MIN_PRICES: usize = 21;

/// Minimum valid return count before [`TailRegime::detect`] leaves `Normal`.
const TAIL_MIN_RETURNS: usize = 10;

/// Divisor used for the variance of a return window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarianceEstimator {
    /// Divide by `n`.
    #[default]
    Population,
    /// Divide by `n - 1` (Bessel-corrected).
    Sample,
}

impl VarianceEstimator {
    /// Parse from string (case-insensitive). Unknown values fall back to
    /// `Population`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "sample" | "bessel" | "unbiased" | "n-1" => Self::Sample,
            _ => Self::Population,
        }
    }

    /// Smallest window the estimator is defined for.
    #[must_use]
    pub const fn min_window(self) -> usize {
        match self {
            Self::Population => 1,
            Self::Sample => 2,
        }
    }

    fn variance(self, chunk: &[f64]) -> f64 {
        let n = chunk.len() as f64;
        let mean = chunk.iter().sum::<f64>() / n;
        let ss = chunk.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>();
        match self {
            Self::Population => ss / n,
            Self::Sample => ss / (n - 1.0),
        }
    }
}

/// Log returns of consecutive price pairs.
///
/// A pair contributes only when both prices are strictly positive and finite;
/// other pairs are dropped, so the output can be shorter than
/// `prices.len() - 1`.
#[must_use]
pub fn log_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| valid_price(w[0]) && valid_price(w[1]))
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

#[inline]
fn valid_price(p: f64) -> bool {
    p.is_finite() && p > 0.0
}

/// Rolling annualized volatility of log returns.
///
/// For each `i` in `window..returns.len()` the std-dev of
/// `returns[i - window .. i]` is taken and multiplied by √252. Output length is
/// `returns.len() - window` (empty when there are not enough returns).
pub fn rolling_volatility(
    prices: &[f64],
    window: usize,
    estimator: VarianceEstimator,
) -> Result<Vec<f64>> {
    if window < estimator.min_window() {
        return Err(KernelError::InvalidWindow {
            window,
            minimum: estimator.min_window(),
        });
    }
    let returns = log_returns(prices);
    if returns.len() <= window {
        return Ok(Vec::new());
    }
    let annualize = TRADING_DAYS.sqrt();
    Ok((window..returns.len())
        .map(|i| estimator.variance(&returns[i - window..i]).max(0.0).sqrt() * annualize)
        .collect())
}

/// Whole-sample annualized volatility of a return slice (population variance).
///
/// Returns `0.0` for fewer than two returns.
#[must_use]
pub fn realized_volatility(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    VarianceEstimator::Population
        .variance(returns)
        .max(0.0)
        .sqrt()
        * TRADING_DAYS.sqrt()
}

/// Fraction of the trailing `window` of `history` strictly below `value`.
///
/// Ties do not count as below. The result is clamped to
/// `[RANK_MIN, RANK_MAX]`; an empty history (or a zero window) yields
/// `RANK_NEUTRAL`.
#[must_use]
pub fn percentile_rank(value: f64, history: &[f64], window: usize) -> f64 {
    let start = history.len().saturating_sub(window);
    let recent = &history[start..];
    if recent.is_empty() {
        return RANK_NEUTRAL;
    }
    let below = recent.iter().filter(|&&v| v < value).count();
    (below as f64 / recent.len() as f64).clamp(RANK_MIN, RANK_MAX)
}

/// Coarse volatility regime of a recent price window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TailRegime {
    Normal,
    TailEvent,
}

impl TailRegime {
    /// Classify a recent price window by its realized annualized volatility.
    ///
    /// Short windows (fewer than 21 prices or 10 valid returns) are always
    /// `Normal`.
    #[must_use]
    pub fn detect(recent_prices: &[f64]) -> Self {
        if recent_prices.len() < TAIL_MIN_PRICES {
            return Self::Normal;
        }
        let returns = log_returns(recent_prices);
        if returns.len() < TAIL_MIN_RETURNS {
            return Self::Normal;
        }
        if realized_volatility(&returns) > TAIL_VOL_THRESHOLD {
            Self::TailEvent
        } else {
            Self::Normal
        }
    }

    /// Expected win rate used by drift monitoring for this regime.
    #[must_use]
    pub const fn win_rate_threshold(self) -> f64 {
        match self {
            Self::Normal => 0.77,
            Self::TailEvent => 0.20,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::TailEvent => "TAIL_EVENT",
        }
    }
}
