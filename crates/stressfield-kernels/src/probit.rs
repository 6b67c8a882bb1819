//! # Inverse Normal CDF (probit)
//!
//! Rational approximation of Φ⁻¹(p) after Acklam, evaluated piecewise:
//!
//! ```text
//! p <  p_low          q = sqrt(-2 ln p)        Φ⁻¹ =  C(q) / D(q)
//! p_low ≤ p ≤ p_high  q = p - 0.5, r = q²      Φ⁻¹ =  q·A(r) / B(r)
//! p >  p_high         q = sqrt(-2 ln(1 - p))   Φ⁻¹ = -C(q) / D(q)
//! ```
//!
//! with `p_low = 0.02425`, `p_high = 1 - p_low`. Relative error is well below
//! 0.1% on [0.01, 0.99], which is all the oracle needs: ranks are clamped to
//! [0.001, 0.999] before they get here.

/// Lower clamp applied to `p` before evaluation.
pub const P_MIN: f64 = 0.0001;

/// Upper clamp applied to `p` before evaluation.
pub const P_MAX: f64 = 0.9999;

const P_LOW: f64 = 0.02425;
const P_HIGH: f64 = 1.0 - P_LOW;

const A: [f64; 6] = [
    -3.969_683_028_665_376e1,
    2.209_460_984_245_205e2,
    -2.759_285_104_469_687e2,
    1.383_577_518_672_690e2,
    -3.066_479_806_614_716e1,
    2.506_628_277_459_239e0,
];

const B: [f64; 5] = [
    -5.447_609_879_822_406e1,
    1.615_858_368_580_409e2,
    -1.556_989_798_598_866e2,
    6.680_131_188_771_972e1,
    -1.328_068_155_288_572e1,
];

const C: [f64; 6] = [
    -7.784_894_002_430_293e-3,
    -3.223_964_580_411_365e-1,
    -2.400_758_277_161_838e0,
    -2.549_732_539_343_734e0,
    4.374_664_141_464_968e0,
    2.938_163_982_698_783e0,
];

const D: [f64; 4] = [
    7.784_695_709_041_462e-3,
    3.224_671_290_700_398e-1,
    2.445_134_137_142_996e0,
    3.754_408_661_907_416e0,
];

/// Saturation value of [`tail_accelerated_probit`] outside `[P_MIN, P_MAX]`.
const TAIL_SATURATION: f64 = 3.8;

/// Weight of the tail correction term in [`tail_accelerated_probit`].
const TAIL_ACCEL_WEIGHT: f64 = 0.07;

/// Inverse standard normal CDF.
///
/// `p` is clamped into `[P_MIN, P_MAX]` (NaN maps to `P_MIN`), so the result
/// is always finite and within roughly ±3.72.
#[must_use]
pub fn probit(p: f64) -> f64 {
    let p = if p.is_nan() { P_MIN } else { p.clamp(P_MIN, P_MAX) };

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        tail_ratio(q)
    } else if p <= P_HIGH {
        let q = p - 0.5;
        let r = q * q;
        let num = ((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5];
        let den = ((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0;
        num * q / den
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -tail_ratio(q)
    }
}

#[inline]
fn tail_ratio(q: f64) -> f64 {
    let num = ((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5];
    let den = (((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0;
    num / den
}

/// Probit with a smooth correction that pushes mass further into the tails.
///
/// Saturates at ±3.8 outside `[P_MIN, P_MAX]`. Inside, adds
/// `sin(πp)·exp(-t²/2)·0.07` (with `t = sqrt(-2 ln min(p, 1-p))`) away from
/// the median.
#[must_use]
pub fn tail_accelerated_probit(p: f64) -> f64 {
    if p.is_nan() || p < P_MIN {
        return -TAIL_SATURATION;
    }
    if p > P_MAX {
        return TAIL_SATURATION;
    }
    let base = probit(p);
    let t = (-2.0 * p.min(1.0 - p).ln()).sqrt();
    let accel = (std::f64::consts::PI * p).sin() * (-t * t / 2.0).exp() * TAIL_ACCEL_WEIGHT;
    if p < 0.5 { base + accel } else { base - accel }
}

/// Standard normal CDF Φ(x) from its Taylor series
/// `Φ(x) = 1/2 + φ(x)·Σ x^(2n+1) / (2n+1)!!`.
///
/// Independent of the rational approximation above, so it serves as the
/// reference `probit` is checked against. Absolute error is near machine
/// epsilon for `|x| ≤ 8`; beyond that the result saturates to 0 or 1.
#[must_use]
pub fn normal_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x.abs() > 8.0 {
        return if x > 0.0 { 1.0 } else { 0.0 };
    }
    let x2 = x * x;
    let mut term = x;
    let mut sum = x;
    let mut k = 1.0;
    while term.abs() > f64::EPSILON * sum.abs() * 1e-3 && k < 1_000.0 {
        k += 2.0;
        term *= x2 / k;
        sum += term;
    }
    let density = (-x2 / 2.0).exp() / (2.0 * std::f64::consts::PI).sqrt();
    (0.5 + density * sum).clamp(0.0, 1.0)
}
