//! # Systemic Stress Indices
//!
//! Four structural stress readings over a price series and its rolling
//! volatility, each bounded in [-1, 1] and computed from trailing windows only:
//!
//! ```text
//! LCI  leverage cycle     (1 - v̄_l)·m + (v̄_s - v̄_l)        long window 30
//! LSI  liquidity spiral   j·a + (1 - p)·j                  jump window 5
//! CSI  credit stress      (d - u)·d                        window 30
//! FSI  funding stress     clamp(5·Δv)·clamp(20·|Δr|)       7 vs 30
//! ```
//!
//! `systemic_stress` is the clamped equal-weight mean of the four. No weights
//! are fitted.
//!
//! ## Alignment
//!
//! `vols[i]` trails `prices[vol_offset + i]`. The return at price index `k`
//! is `returns[k - 1]`, so the return aligned with `vols[i]` is
//! `returns[vol_offset + i - 1]`.
//!
//! ## Warm-up
//!
//! Each index returns exactly `0.0` until its window has filled. Warm-up is
//! not an error.

use serde::{Deserialize, Serialize};

use crate::rolling::log_returns;

const WINDOW_SHORT: usize = 7;
const WINDOW_LONG: usize = 30;
const WINDOW_JUMP: usize = 5;
/// Lookback used to min/max-normalize volatility in LCI.
const NORM_LOOKBACK: usize = 60;
/// Lookback of the participation proxy in LSI.
const PARTICIPATION_LOOKBACK: usize = 30;
/// Lookback of return acceleration in FSI.
const FSI_RETURN_LOOKBACK: usize = 3;

#[inline]
fn bound(x: f64) -> f64 {
    x.clamp(-1.0, 1.0)
}

fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}

fn max_of(xs: &[f64]) -> Option<f64> {
    xs.iter().copied().reduce(f64::max)
}

fn min_of(xs: &[f64]) -> Option<f64> {
    xs.iter().copied().reduce(f64::min)
}

/// Inclusive trailing slice `xs[i - back ..= i]`, clipped to the slice bounds.
fn trailing_inclusive(xs: &[f64], i: usize, back: usize) -> &[f64] {
    let hi = i.saturating_add(1).min(xs.len());
    let lo = i.saturating_sub(back).min(hi);
    &xs[lo..hi]
}

/// All four indices plus their combination at one time step.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemicReading {
    pub lci: f64,
    pub lsi: f64,
    pub csi: f64,
    pub fsi: f64,
    pub systemic_stress: f64,
}

impl SystemicReading {
    fn combine(lci: f64, lsi: f64, csi: f64, fsi: f64) -> Self {
        Self {
            lci,
            lsi,
            csi,
            fsi,
            systemic_stress: bound((lci + lsi + csi + fsi) / 4.0),
        }
    }
}

/// Leverage cycle index at volatility index `i`.
#[must_use]
pub fn leverage_cycle_index(prices: &[f64], vols: &[f64], i: usize, vol_offset: usize) -> f64 {
    if i < WINDOW_LONG
        || vols.len() < WINDOW_LONG
        || prices.len() < vol_offset.saturating_add(WINDOW_LONG + 1)
    {
        return 0.0;
    }

    let v_s = vols[i.min(vols.len() - 1)];
    let hist_long = &vols[(i - WINDOW_LONG).min(vols.len())..i.min(vols.len())];
    let v_l = mean(hist_long).unwrap_or(v_s);

    let idx_now = vol_offset.saturating_add(i);
    let idx_prev = idx_now - WINDOW_LONG;
    let m = match (prices.get(idx_now), prices.get(idx_prev)) {
        (Some(&now), Some(&prev)) if now > 0.0 && prev > 0.0 => bound((now / prev - 1.0) * 5.0),
        _ => 0.0,
    };

    let vol_hist = trailing_inclusive(vols, i, NORM_LOOKBACK);
    let v_max = max_of(vol_hist).unwrap_or(0.5);
    let v_min = min_of(vol_hist).unwrap_or(0.01);
    let range = if v_max > v_min { v_max - v_min } else { 0.01 };
    let v_s_norm = (v_s - v_min) / range;
    let v_l_norm = (v_l - v_min) / range;

    bound((1.0 - v_l_norm) * m + (v_s_norm - v_l_norm))
}

/// Liquidity spiral index.
///
/// `ret_idx` defaults to the return aligned with `vols[vol_idx]`.
#[must_use]
pub fn liquidity_spiral_index(
    prices: &[f64],
    vols: &[f64],
    vol_idx: usize,
    ret_idx: Option<usize>,
    vol_offset: usize,
) -> f64 {
    if prices.len() < WINDOW_JUMP + 2 {
        return 0.0;
    }
    let returns = log_returns(prices);
    let r_idx = ret_idx.unwrap_or_else(|| vol_offset.saturating_add(vol_idx).saturating_sub(1));
    lsi_from_returns(&returns, vols, vol_idx, r_idx)
}

fn lsi_from_returns(returns: &[f64], vols: &[f64], vol_idx: usize, r_idx: usize) -> f64 {
    if vol_idx < WINDOW_SHORT || vols.len() < WINDOW_SHORT || r_idx >= returns.len() {
        return 0.0;
    }
    let v_s = vols[vol_idx.min(vols.len() - 1)];
    let r_slice = trailing_inclusive(returns, r_idx, WINDOW_JUMP);
    if r_slice.len() < 2 {
        return 0.0;
    }

    let mut abs_r: Vec<f64> = r_slice.iter().map(|r| r.abs()).collect();
    abs_r.sort_by(f64::total_cmp);
    let median = abs_r[abs_r.len() / 2];
    let thresh = if median > 0.0 { 2.0 * median } else { 0.02 };
    let jumps = r_slice.iter().filter(|r| r.abs() > thresh).count();
    let j = bound(jumps as f64 / r_slice.len() as f64 * 2.0);

    let last = r_slice[r_slice.len() - 1];
    let prev = r_slice[r_slice.len() - 2];
    let a = bound((last - prev).abs() * 20.0);

    let vol_hist = trailing_inclusive(vols, vol_idx, PARTICIPATION_LOOKBACK);
    let p = match max_of(vol_hist) {
        Some(mx) if mx > 0.0 => bound(1.0 - v_s / mx),
        _ => 0.5,
    };

    bound(j * a + (1.0 - p) * j)
}

/// Credit stress index over `returns[i - 30 ..= i]`.
#[must_use]
pub fn credit_stress_index(returns: &[f64], i: usize) -> f64 {
    if i < WINDOW_LONG || returns.len() < WINDOW_LONG {
        return 0.0;
    }
    let r_slice = trailing_inclusive(returns, i, WINDOW_LONG);

    let d_raw = rms(r_slice.iter().copied().filter(|r| *r < 0.0));
    let u_raw = rms(r_slice.iter().copied().filter(|r| *r >= 0.0));

    let max_sq = max_of(&r_slice.iter().map(|r| r * r).collect::<Vec<_>>()).unwrap_or(0.01);
    let scale = max_sq.sqrt() + 0.01;
    let d = (d_raw / scale).clamp(0.0, 1.0);
    let u = (u_raw / scale).clamp(0.0, 1.0);

    bound((d - u) * d)
}

fn rms(it: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = it.fold((0.0, 0usize), |(s, n), r| (s + r * r, n + 1));
    if n == 0 { 0.0 } else { (sum / n as f64).sqrt() }
}

/// Funding stress index.
///
/// `ret_idx` defaults to `vol_idx`.
#[must_use]
pub fn funding_stress_index(
    vols: &[f64],
    returns: &[f64],
    vol_idx: usize,
    ret_idx: Option<usize>,
) -> f64 {
    if vol_idx < WINDOW_LONG || vols.len() < WINDOW_LONG || returns.len() < 2 {
        return 0.0;
    }
    let r_idx = ret_idx.unwrap_or(vol_idx);
    let fallback = vols[vol_idx.min(vols.len() - 1)];

    let rv_short = mean(trailing_inclusive(vols, vol_idx, WINDOW_SHORT)).unwrap_or(fallback);
    let rv_long = mean(trailing_inclusive(vols, vol_idx, WINDOW_LONG)).unwrap_or(fallback);
    let dv = rv_short - rv_long;

    let r_slice = trailing_inclusive(returns, r_idx, FSI_RETURN_LOOKBACK);
    let a = match r_slice {
        [.., prev, last] => (last - prev).abs(),
        _ => 0.0,
    };

    bound(bound(dv * 5.0) * bound(a * 20.0))
}

/// All four indices and their combination at volatility index `i`.
///
/// Empty `vols` yields an all-zero reading.
#[must_use]
pub fn systemic_stress_full(
    prices: &[f64],
    vols: &[f64],
    i: usize,
    vol_offset: usize,
) -> SystemicReading {
    if vols.is_empty() {
        return SystemicReading::default();
    }
    let returns = log_returns(prices);
    let vol_idx = i.min(vols.len() - 1);
    let ret_idx = vol_offset
        .saturating_add(i)
        .saturating_sub(1)
        .min(returns.len().saturating_sub(1));

    SystemicReading::combine(
        leverage_cycle_index(prices, vols, vol_idx, vol_offset),
        if prices.len() < WINDOW_JUMP + 2 {
            0.0
        } else {
            lsi_from_returns(&returns, vols, vol_idx, ret_idx)
        },
        credit_stress_index(&returns, ret_idx),
        funding_stress_index(vols, &returns, vol_idx, Some(ret_idx)),
    )
}

/// Combined systemic stress at volatility index `i`.
#[must_use]
pub fn systemic_stress(prices: &[f64], vols: &[f64], i: usize, vol_offset: usize) -> f64 {
    systemic_stress_full(prices, vols, i, vol_offset).systemic_stress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rolling::{VarianceEstimator, rolling_volatility};

    fn xorshift(state: &mut u64) -> f64 {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        (*state >> 11) as f64 / (1u64 << 53) as f64
    }

    fn random_walk(n: usize, seed: u64, step: f64) -> Vec<f64> {
        let mut s = seed;
        let mut p = 100.0;
        (0..n)
            .map(|_| {
                p *= 1.0 + step * (xorshift(&mut s) - 0.5);
                p
            })
            .collect()
    }

    fn market(n: usize, seed: u64, step: f64) -> (Vec<f64>, Vec<f64>) {
        let prices = random_walk(n, seed, step);
        let vols = rolling_volatility(&prices, 20, VarianceEstimator::Population).unwrap();
        (prices, vols)
    }

    #[test]
    fn warm_up_returns_zero() {
        let (prices, vols) = market(200, 3, 0.04);
        assert_eq!(leverage_cycle_index(&prices, &vols, 29, 20), 0.0);
        assert_eq!(liquidity_spiral_index(&prices, &vols, 6, None, 20), 0.0);
        assert_eq!(credit_stress_index(&log_returns(&prices), 29), 0.0);
        assert_eq!(funding_stress_index(&vols, &log_returns(&prices), 29, None), 0.0);
    }

    #[test]
    fn empty_vols_give_zero_reading() {
        let prices = random_walk(100, 5, 0.02);
        assert_eq!(
            systemic_stress_full(&prices, &[], 50, 20),
            SystemicReading::default()
        );
    }

    #[test]
    fn short_prices_give_zero_reading() {
        let reading = systemic_stress_full(&[100.0, 101.0], &[0.1; 40], 35, 20);
        assert_eq!(reading, SystemicReading::default());
    }

    #[test]
    fn extreme_offsets_and_indices_do_not_overflow() {
        let (prices, vols) = market(200, 17, 0.03);
        let returns = log_returns(&prices);
        for (i, off) in [(60, usize::MAX), (usize::MAX, 20), (usize::MAX, usize::MAX)] {
            let r = systemic_stress_full(&prices, &vols, i, off);
            if off == usize::MAX {
                assert_eq!(r.lci, 0.0, "i={i}");
            }
            assert!((-1.0..=1.0).contains(&r.systemic_stress), "i={i} off={off}");
        }
        assert_eq!(leverage_cycle_index(&prices, &vols, 60, usize::MAX), 0.0);
        assert!(liquidity_spiral_index(&prices, &vols, 60, None, usize::MAX).is_finite());
        assert!(credit_stress_index(&returns, usize::MAX).is_finite());
        assert!(funding_stress_index(&vols, &returns, 60, Some(usize::MAX)).is_finite());
    }

    #[test]
    fn all_indices_bounded_on_random_markets() {
        for seed in 1..20u64 {
            let (prices, vols) = market(300, seed * 7919, 0.02 + seed as f64 * 0.01);
            for i in 0..vols.len() + 5 {
                let r = systemic_stress_full(&prices, &vols, i, 20);
                for v in [r.lci, r.lsi, r.csi, r.fsi, r.systemic_stress] {
                    assert!((-1.0..=1.0).contains(&v), "seed={seed} i={i} value={v}");
                }
            }
        }
    }

    #[test]
    fn combined_is_mean_of_components() {
        let (prices, vols) = market(250, 11, 0.05);
        let r = systemic_stress_full(&prices, &vols, 120, 20);
        let expected = ((r.lci + r.lsi + r.csi + r.fsi) / 4.0).clamp(-1.0, 1.0);
        assert!((r.systemic_stress - expected).abs() < 1e-12);
        assert_eq!(systemic_stress(&prices, &vols, 120, 20), r.systemic_stress);
    }

    #[test]
    fn persistent_selloff_raises_credit_stress() {
        let returns: Vec<f64> = (0..40)
            .map(|i| if i % 4 == 0 { 0.001 } else { -0.03 })
            .collect();
        assert!(credit_stress_index(&returns, 35) > 0.0);
        let rally: Vec<f64> = returns.iter().map(|r| -r).collect();
        assert!(credit_stress_index(&rally, 35) <= 0.0);
    }

    #[test]
    fn rising_vol_with_jerky_returns_raises_funding_stress() {
        let vols: Vec<f64> = (0..40).map(|i| 0.1 + i as f64 * 0.02).collect();
        let returns: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 0.05 } else { -0.05 })
            .collect();
        assert!(funding_stress_index(&vols, &returns, 35, None) > 0.0);
    }

    #[test]
    fn flat_market_has_no_leverage_tension() {
        let prices = vec![100.0; 120];
        let vols = vec![0.0; 80];
        assert_eq!(leverage_cycle_index(&prices, &vols, 50, 20), 0.0);
    }

    #[test]
    fn rally_momentum_feeds_leverage_index() {
        // Steady exponential rally with constant vol: v_s == v_l, range floor
        // applies, so LCI reduces to (1 - v_l_norm)·m with v_l_norm == 0.
        let prices: Vec<f64> = (0..120).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let vols = vec![0.2; 80];
        let lci = leverage_cycle_index(&prices, &vols, 50, 20);
        let expected = ((1.01f64.powi(30) - 1.0) * 5.0).clamp(-1.0, 1.0);
        assert!((lci - expected).abs() < 1e-9, "lci={lci} expected={expected}");
    }
}
