//! # Dynamical Stress Engine
//!
//! Alternative to BEAST: a single persistent state driven by the normalized
//! oracle level and the systemic-blended macro score.
//!
//! ```text
//! O_t = tanh(u_t + e_t)
//! S_t = clamp(ρ·S_{t-1} + (1 - ρ)·O_t + β·u_t·S_{t-1})
//! K_t = S_t·|S_t|
//! X_t = tanh(S_t + α·K_t)
//! ```
//!
//! with `u_t` the rank-normalized volatility in (-1, 1) and `e_t` the extended
//! macro score.
//!
//! ## Stability
//!
//! With |u_t| < 1 the state map is a contraction in S_{t-1} whenever
//! `ρ + |β| < 1`. [`DynamicalParams::new`] refuses anything else, so an
//! unstable run is rejected before a single step is computed.

use serde::{Deserialize, Serialize};

use crate::beast::{MARKET_BASE_VOL, MARKET_WARMUP};
use crate::error::{KernelError, Result, ensure_finite};
use crate::macro_layer::{
    DEFAULT_LAMBDA_MACRO, DEFAULT_NASH_STRENGTH, DEFAULT_RANK, MacroFactors, predict_macro_systemic,
};
use crate::probit::probit;
use crate::rolling::{RANK_MAX, RANK_MIN};
use crate::systemic::systemic_stress_full;

pub const RHO_DEFAULT: f64 = 0.85;
pub const BETA_DEFAULT: f64 = 0.08;
pub const ALPHA_DEFAULT: f64 = 0.3;

/// Default number of trailing delta-energies inspected by [`pre_crisis_signal`].
pub const PRE_CRISIS_WINDOW: usize = 5;

/// Volatility lookback for the rank normalization in the market runner.
const NORM_LOOKBACK: usize = 60;

/// Validated engine parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DynamicalParams {
    rho: f64,
    beta: f64,
    alpha: f64,
}

impl DynamicalParams {
    /// Fails with [`KernelError::StabilityViolation`] unless `rho + |beta| < 1`.
    pub fn new(rho: f64, beta: f64, alpha: f64) -> Result<Self> {
        let rho = ensure_finite("rho", rho)?;
        let beta = ensure_finite("beta", beta)?;
        let alpha = ensure_finite("alpha", alpha)?;
        let sum = rho + beta.abs();
        if sum >= 1.0 {
            return Err(KernelError::StabilityViolation { rho, beta, sum });
        }
        Ok(Self { rho, beta, alpha })
    }

    #[must_use]
    pub const fn rho(&self) -> f64 {
        self.rho
    }

    #[must_use]
    pub const fn beta(&self) -> f64 {
        self.beta
    }

    #[must_use]
    pub const fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Default for DynamicalParams {
    fn default() -> Self {
        Self {
            rho: RHO_DEFAULT,
            beta: BETA_DEFAULT,
            alpha: ALPHA_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicalStepRecord {
    pub oracle: f64,
    pub state: f64,
    pub shock_amplifier: f64,
    pub system_index: f64,
    pub energy: f64,
    pub delta_energy: f64,
}

/// Rank-normalized volatility in (-1, 1).
///
/// `tanh(probit(rank) / 2)` with the strict-below rank over the whole
/// `history`; `0.0` when the history is empty.
#[must_use]
pub fn uvrk_norm(vol: f64, history: &[f64]) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let below = history.iter().filter(|&&v| v < vol).count();
    let rank = (below as f64 / history.len() as f64).clamp(RANK_MIN, RANK_MAX);
    (probit(rank) / 2.0).tanh()
}

fn dynamical_step(
    uvrk_norm: f64,
    extended: f64,
    s_prev: f64,
    params: &DynamicalParams,
) -> (f64, f64, f64, f64) {
    let oracle = (uvrk_norm + extended).tanh();
    let state = (params.rho * s_prev + (1.0 - params.rho) * oracle + params.beta * uvrk_norm * s_prev)
        .clamp(-1.0, 1.0);
    let shock = state * state.abs();
    let system_index = (state + params.alpha * shock).tanh();
    (oracle, state, shock, system_index)
}

/// Run the engine over the common prefix of the two input series.
pub fn run_dynamical(
    uvrk_norms: &[f64],
    extended_scores: &[f64],
    params: &DynamicalParams,
    s_init: f64,
) -> Result<Vec<DynamicalStepRecord>> {
    let s_init = ensure_finite("s_init", s_init)?;
    let n = uvrk_norms.len().min(extended_scores.len());
    let mut out = Vec::with_capacity(n);
    let mut state = s_init;
    let mut e_prev = s_init * s_init;

    for (&u, &e) in uvrk_norms.iter().zip(extended_scores).take(n) {
        let u = ensure_finite("uvrk_norm", u)?;
        let e = ensure_finite("extended_score", e)?;
        let (oracle, s, shock_amplifier, system_index) = dynamical_step(u, e, state, params);
        let energy = s * s;
        out.push(DynamicalStepRecord {
            oracle,
            state: s,
            shock_amplifier,
            system_index,
            energy,
            delta_energy: energy - e_prev,
        });
        e_prev = energy;
        state = s;
    }
    Ok(out)
}

/// Dynamical engine over a price series, its volatility and macro factors.
///
/// Steps cover volatility indices `vol_offset + 30 .. vols.len() - 1`. The
/// extended score blends in the systemic reading when the aligned price
/// exists and falls back to macro-only otherwise.
pub fn dynamical_from_market(
    prices: &[f64],
    vols: &[f64],
    factors: &MacroFactors,
    vol_offset: usize,
    params: &DynamicalParams,
) -> Result<Vec<DynamicalStepRecord>> {
    let start = vol_offset.saturating_add(MARKET_WARMUP);
    let end = vols.len().saturating_sub(1);
    let mut norms = Vec::with_capacity(end.saturating_sub(start));
    let mut extended = Vec::with_capacity(end.saturating_sub(start));

    for i in start..end {
        let hist = &vols[i.saturating_sub(NORM_LOOKBACK)..=i];
        norms.push(uvrk_norm(vols[i], hist));

        let systemic = (vol_offset.saturating_add(i) < prices.len())
            .then(|| systemic_stress_full(prices, vols, i, vol_offset));
        let reading = predict_macro_systemic(
            MARKET_BASE_VOL,
            factors,
            DEFAULT_NASH_STRENGTH,
            DEFAULT_RANK,
            systemic,
            DEFAULT_LAMBDA_MACRO,
        )?;
        extended.push(reading.reading.score);
    }

    run_dynamical(&norms, &extended, params, 0.0)
}

/// True when the last `window` delta-energies are all positive and strictly
/// increasing (and at least `window + 1` steps exist).
#[must_use]
pub fn pre_crisis_signal(steps: &[DynamicalStepRecord], window: usize) -> bool {
    if window == 0 || steps.len() < window + 1 {
        return false;
    }
    let tail = &steps[steps.len() - window..];
    tail.iter().all(|s| s.delta_energy > 0.0)
        && tail
            .windows(2)
            .all(|w| w[1].delta_energy > w[0].delta_energy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stability_precondition() {
        let err = DynamicalParams::new(0.9, 0.2, 0.3).unwrap_err();
        assert!(matches!(err, KernelError::StabilityViolation { .. }));
        assert!(DynamicalParams::new(0.9, -0.2, 0.3).is_err());
        assert!(DynamicalParams::new(0.85, 0.08, 0.3).is_ok());
        assert!(DynamicalParams::new(f64::NAN, 0.0, 0.3).is_err());
    }

    #[test]
    fn defaults_are_stable() {
        let p = DynamicalParams::default();
        assert!(p.rho() + p.beta().abs() < 1.0);
        assert_eq!(p, DynamicalParams::new(0.85, 0.08, 0.3).unwrap());
    }

    #[test]
    fn uvrk_norm_is_signed_rank() {
        assert_eq!(uvrk_norm(0.5, &[]), 0.0);
        let hist: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        assert!(uvrk_norm(0.99, &hist) > 0.5);
        assert!(uvrk_norm(0.0, &hist) < -0.5);
        assert!(uvrk_norm(0.5, &hist).abs() < 0.01);
    }

    #[test]
    fn zero_drive_stays_at_rest() {
        let run = run_dynamical(&[0.0; 10], &[0.0; 10], &DynamicalParams::default(), 0.0).unwrap();
        assert!(run.iter().all(|s| s.state == 0.0 && s.system_index == 0.0));
    }

    #[test]
    fn state_relaxes_toward_oracle() {
        let run = run_dynamical(&[0.0; 200], &[0.8; 200], &DynamicalParams::default(), 0.0).unwrap();
        let target = 0.8f64.tanh();
        assert!((run.last().unwrap().state - target).abs() < 1e-6);
        assert!(run.windows(2).all(|w| w[1].state >= w[0].state));
    }

    #[test]
    fn energy_bookkeeping() {
        let u = [0.3, -0.2, 0.5, 0.9];
        let e = [0.1, 0.4, -0.3, 0.2];
        let run = run_dynamical(&u, &e, &DynamicalParams::default(), 0.5).unwrap();
        assert!((run[0].delta_energy - (run[0].energy - 0.25)).abs() < 1e-15);
        for t in 1..run.len() {
            assert!((run[t].delta_energy - (run[t].energy - run[t - 1].energy)).abs() < 1e-15);
            assert_eq!(run[t].energy, run[t].state * run[t].state);
        }
    }

    #[test]
    fn common_prefix_and_non_finite() {
        let run = run_dynamical(&[0.1; 5], &[0.1; 3], &DynamicalParams::default(), 0.0).unwrap();
        assert_eq!(run.len(), 3);
        assert!(run_dynamical(&[f64::NAN], &[0.0], &DynamicalParams::default(), 0.0).is_err());
    }

    fn with_deltas(deltas: &[f64]) -> Vec<DynamicalStepRecord> {
        deltas
            .iter()
            .map(|&d| DynamicalStepRecord {
                oracle: 0.0,
                state: 0.0,
                shock_amplifier: 0.0,
                system_index: 0.0,
                energy: 0.0,
                delta_energy: d,
            })
            .collect()
    }

    #[test]
    fn market_offset_past_the_series_yields_no_steps() {
        let prices = vec![100.0; 80];
        let vols = vec![0.1; 60];
        let params = DynamicalParams::default();
        let factors = MacroFactors::default();
        let steps = dynamical_from_market(&prices, &vols, &factors, usize::MAX, &params).unwrap();
        assert!(steps.is_empty());
    }

    #[test]
    fn pre_crisis_needs_accelerating_energy() {
        let rising = with_deltas(&[0.0, 0.01, 0.02, 0.03, 0.04, 0.05]);
        assert!(pre_crisis_signal(&rising, PRE_CRISIS_WINDOW));
        let flat = with_deltas(&[0.0, 0.01, 0.01, 0.01, 0.01, 0.01]);
        assert!(!pre_crisis_signal(&flat, PRE_CRISIS_WINDOW));
        let negative = with_deltas(&[0.0, -0.01, 0.02, 0.03, 0.04, 0.05]);
        assert!(!pre_crisis_signal(&negative, PRE_CRISIS_WINDOW));
        let short = with_deltas(&[0.01, 0.02, 0.03, 0.04, 0.05]);
        assert!(!pre_crisis_signal(&short, PRE_CRISIS_WINDOW));
    }
}
