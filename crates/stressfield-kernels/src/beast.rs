//! # BEAST Crisis Field
//!
//! Bounded nonlinear recurrence over the four systemic indices and a macro
//! stress score. One scalar of state (the previous stress) is carried between
//! steps.
//!
//! ```text
//! C_t = (LCI + LSI + CSI + FSI) / 4
//! I_t = (LCI·LSI + CSI·FSI + LCI·CSI) / 3
//! S_t = tanh(C_t + γ·I_t)
//! λ_t = λ_static  or  (1 + |M_t|) / 2
//! E_t = clamp(λ_t·M_t + (1 - λ_t)·S_t)
//! A_t = clamp((S_t - S_{t-1})·|S_t|)
//! F_t = tanh(E_t + η·A_t)
//! ```
//!
//! γ and η are structural constants. They are never fitted to data.
//!
//! ## Bounds
//!
//! Inputs are clamped to [-1, 1], so |C_t| ≤ 1 and |I_t| ≤ 1. Every output is
//! a tanh, a clamp, or a mean/product of bounded terms: `stress`,
//! `extended_nash`, `acceleration`, `crisis_field` lie in [-1, 1]; `energy`
//! and `aligned_magnitude` lie in [0, 1]; `delta_energy` and `build_rate` are
//! differences of energies and lie in [-1, 1].
//!
//! The interaction term is convex in alignment: four indices pushing the same
//! way produce a larger |I_t| than four small ones, which is what makes the
//! field amplify coordinated stress.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ensure_finite, ensure_range};
use crate::macro_layer::{DEFAULT_NASH_STRENGTH, DEFAULT_RANK, MacroFactors, predict_macro};
use crate::systemic::systemic_stress_full;

pub const GAMMA_DEFAULT: f64 = 0.4;
pub const ETA_DEFAULT: f64 = 0.25;

/// Crisis field level below which a step counts toward the tail lift.
pub const TAIL_FIELD_THRESHOLD: f64 = -0.7;

const TRIGGER_INTERACTION: f64 = 0.5;
const TRIGGER_STRESS: f64 = 0.6;
/// Lag of the energy build rate.
const BUILD_LAG: usize = 3;
/// Warm-up (in volatility steps past `vol_offset`) before the market runner
/// starts emitting steps. Shared by both market runners.
pub const MARKET_WARMUP: usize = 30;
/// Base volatility fed to the macro layer by the market runners.
pub(crate) const MARKET_BASE_VOL: f64 = 0.04;

#[inline]
fn bound(x: f64) -> f64 {
    x.clamp(-1.0, 1.0)
}

/// Structural parameters of the recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeastParams {
    pub gamma: f64,
    pub eta: f64,
    /// Fixed macro weight. `None` selects the adaptive `(1 + |M|) / 2`.
    pub static_lambda: Option<f64>,
}

impl Default for BeastParams {
    fn default() -> Self {
        Self {
            gamma: GAMMA_DEFAULT,
            eta: ETA_DEFAULT,
            static_lambda: None,
        }
    }
}

impl BeastParams {
    pub fn new(gamma: f64, eta: f64, static_lambda: Option<f64>) -> Result<Self> {
        let params = Self {
            gamma,
            eta,
            static_lambda,
        };
        params.check()?;
        Ok(params)
    }

    fn check(&self) -> Result<()> {
        ensure_finite("gamma", self.gamma)?;
        ensure_finite("eta", self.eta)?;
        if let Some(lambda) = self.static_lambda {
            ensure_range("static_lambda", lambda, 0.0, 1.0)?;
        }
        Ok(())
    }
}

/// One time step of systemic and macro inputs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressInputs {
    pub lci: f64,
    pub lsi: f64,
    pub csi: f64,
    pub fsi: f64,
    pub macro_stress: f64,
}

impl StressInputs {
    #[must_use]
    pub const fn new(lci: f64, lsi: f64, csi: f64, fsi: f64, macro_stress: f64) -> Self {
        Self {
            lci,
            lsi,
            csi,
            fsi,
            macro_stress,
        }
    }

    fn checked(&self) -> Result<Self> {
        Ok(Self {
            lci: bound(ensure_finite("lci", self.lci)?),
            lsi: bound(ensure_finite("lsi", self.lsi)?),
            csi: bound(ensure_finite("csi", self.csi)?),
            fsi: bound(ensure_finite("fsi", self.fsi)?),
            macro_stress: bound(ensure_finite("macro_stress", self.macro_stress)?),
        })
    }
}

/// Output of a single step, before sequence bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeastStep {
    pub core: f64,
    pub interaction: f64,
    pub stress: f64,
    pub lambda_t: f64,
    pub extended_nash: f64,
    pub acceleration: f64,
    pub crisis_field: f64,
    pub energy: f64,
    pub aligned_magnitude: f64,
    /// `|interaction| > 0.5` and `|stress| > 0.6`.
    pub trigger: bool,
}

/// One element of a BEAST run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressStepRecord {
    #[serde(flatten)]
    pub step: BeastStep,
    /// `energy[t] - energy[t-1]`.
    pub delta_energy: f64,
    /// `energy[t] - energy[t-3]`.
    pub build_rate: f64,
}

/// Advance the recurrence one step from `s_prev`.
pub fn beast_step(inputs: StressInputs, s_prev: f64, params: &BeastParams) -> Result<BeastStep> {
    params.check()?;
    let s_prev = ensure_finite("s_prev", s_prev)?;
    let StressInputs {
        lci,
        lsi,
        csi,
        fsi,
        macro_stress,
    } = inputs.checked()?;

    let core = (lci + lsi + csi + fsi) / 4.0;
    let interaction = (lci * lsi + csi * fsi + lci * csi) / 3.0;
    let stress = (core + params.gamma * interaction).tanh();

    let lambda_t = params
        .static_lambda
        .unwrap_or((1.0 + macro_stress.abs()) / 2.0);
    let extended_nash = bound(lambda_t * macro_stress + (1.0 - lambda_t) * stress);
    let acceleration = bound((stress - s_prev) * stress.abs());
    let crisis_field = (extended_nash + params.eta * acceleration).tanh();

    Ok(BeastStep {
        core,
        interaction,
        stress,
        lambda_t,
        extended_nash,
        acceleration,
        crisis_field,
        energy: stress * stress,
        aligned_magnitude: (lci.abs() + lsi.abs() + csi.abs() + fsi.abs()) / 4.0,
        trigger: interaction.abs() > TRIGGER_INTERACTION && stress.abs() > TRIGGER_STRESS,
    })
}

/// Run the recurrence over the common prefix of the five input series.
pub fn beast_run(
    lci: &[f64],
    lsi: &[f64],
    csi: &[f64],
    fsi: &[f64],
    macro_stress: &[f64],
    params: &BeastParams,
    s_init: f64,
) -> Result<Vec<StressStepRecord>> {
    let n = [lci.len(), lsi.len(), csi.len(), fsi.len(), macro_stress.len()]
        .into_iter()
        .min()
        .unwrap_or(0);
    let inputs = (0..n).map(|t| StressInputs::new(lci[t], lsi[t], csi[t], fsi[t], macro_stress[t]));
    beast_run_inputs(inputs, params, s_init)
}

/// Run the recurrence over an iterator of per-step inputs.
pub fn beast_run_inputs<I>(inputs: I, params: &BeastParams, s_init: f64) -> Result<Vec<StressStepRecord>>
where
    I: IntoIterator<Item = StressInputs>,
{
    params.check()?;
    let s_init = ensure_finite("s_init", s_init)?;
    let e_init = s_init * s_init;

    let mut out: Vec<StressStepRecord> = Vec::new();
    let mut s_prev = s_init;
    let mut e_prev = e_init;
    for input in inputs {
        let step = beast_step(input, s_prev, params)?;
        let lagged = out
            .len()
            .checked_sub(BUILD_LAG)
            .map_or(e_init, |k| out[k].step.energy);
        out.push(StressStepRecord {
            step,
            delta_energy: step.energy - e_prev,
            build_rate: step.energy - lagged,
        });
        s_prev = step.stress;
        e_prev = step.energy;
    }
    Ok(out)
}

/// BEAST over a price series, its volatility and a macro factor vector.
///
/// Steps cover volatility indices `vol_offset + 30 .. vols.len() - 1`.
pub fn beast_from_market(
    prices: &[f64],
    vols: &[f64],
    factors: &MacroFactors,
    vol_offset: usize,
    params: &BeastParams,
) -> Result<Vec<StressStepRecord>> {
    let macro_stress =
        predict_macro(MARKET_BASE_VOL, factors, DEFAULT_NASH_STRENGTH, DEFAULT_RANK)?.raw_score;
    let start = vol_offset.saturating_add(MARKET_WARMUP);
    let end = vols.len().saturating_sub(1);

    let inputs = (start..end).map(|i| {
        let s = systemic_stress_full(prices, vols, i, vol_offset);
        StressInputs::new(s.lci, s.lsi, s.csi, s.fsi, macro_stress)
    });
    beast_run_inputs(inputs, params, 0.0)
}

/// Mean future volatility over steps with `crisis_field < f_thresh`, relative
/// to `baseline`, minus one.
///
/// Returns `0.0` on length mismatch, non-positive baseline, or when no step
/// crosses the threshold.
#[must_use]
pub fn tail_lift(
    steps: &[StressStepRecord],
    future_vols: &[f64],
    baseline: f64,
    f_thresh: f64,
) -> f64 {
    if steps.len() != future_vols.len() || baseline <= 0.0 {
        return 0.0;
    }
    let (sum, n) = steps
        .iter()
        .zip(future_vols)
        .filter(|(s, _)| s.step.crisis_field < f_thresh)
        .fold((0.0, 0usize), |(sum, n), (_, v)| (sum + v, n + 1));
    if n == 0 {
        return 0.0;
    }
    (sum / n as f64) / baseline - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;

    fn step(l: f64, s: f64, c: f64, f: f64, m: f64, prev: f64) -> BeastStep {
        beast_step(StressInputs::new(l, s, c, f, m), prev, &BeastParams::default()).unwrap()
    }

    #[test]
    fn aligned_crisis_amplifies_interaction() {
        let crisis = step(-0.9, -0.9, -0.9, -0.9, -0.5, 0.0);
        let calm = step(0.1, 0.1, 0.1, 0.1, -0.5, 0.0);
        assert!(crisis.interaction.abs() > calm.interaction.abs());
        assert!(crisis.stress < calm.stress);
    }

    #[test]
    fn trigger_scenario_on_aligned_crisis() {
        // Aligned negative indices give a positive interaction that damps
        // stress to about -0.48: the interaction leg clears, the stress leg
        // does not.
        let s = step(-0.8, -0.8, -0.7, -0.7, -0.5, -0.5);
        assert!(s.interaction > TRIGGER_INTERACTION);
        assert!((s.stress + 0.481).abs() < 1e-3);
        assert!(!s.trigger);
    }

    #[test]
    fn trigger_fires_when_both_legs_clear() {
        let s = step(0.9, 0.9, 0.9, 0.9, 0.0, 0.0);
        assert!(s.interaction > TRIGGER_INTERACTION);
        assert!(s.stress > TRIGGER_STRESS);
        assert!(s.trigger);
    }

    #[test]
    fn trigger_quiet_on_small_inputs() {
        let s = step(0.1, 0.1, 0.1, 0.1, 0.0, 0.0);
        assert!(!s.trigger);
    }

    #[test]
    fn zero_inputs_give_zero_field() {
        let s = step(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(s.stress, 0.0);
        assert_eq!(s.crisis_field, 0.0);
        assert_eq!(s.lambda_t, 0.5);
    }

    #[test]
    fn inputs_are_clamped() {
        let wild = step(40.0, -40.0, 3.0, -2.0, 9.0, 0.0);
        let tame = step(1.0, -1.0, 1.0, -1.0, 1.0, 0.0);
        assert_eq!(wild, tame);
    }

    #[test]
    fn static_lambda_overrides_adaptive_weight() {
        let params = BeastParams::new(0.4, 0.25, Some(1.0)).unwrap();
        let s = beast_step(StressInputs::new(0.3, 0.3, 0.3, 0.3, -0.2), 0.0, &params).unwrap();
        assert_eq!(s.lambda_t, 1.0);
        assert_eq!(s.extended_nash, -0.2);
        assert!(BeastParams::new(0.4, 0.25, Some(1.5)).is_err());
    }

    #[test]
    fn non_finite_rejected() {
        let err = beast_step(
            StressInputs::new(f64::NAN, 0.0, 0.0, 0.0, 0.0),
            0.0,
            &BeastParams::default(),
        );
        assert!(matches!(err, Err(KernelError::NonFinite { field: "lci", .. })));
        assert!(BeastParams::new(f64::INFINITY, 0.25, None).is_err());
    }

    #[test]
    fn run_chains_previous_stress() {
        let lci = [0.2, -0.4, -0.8, -0.9, -0.9, 0.1];
        let other = [0.1, -0.3, -0.7, -0.8, -0.6, 0.0];
        let macro_stress = [-0.1; 6];
        let params = BeastParams::default();
        let run = beast_run(&lci, &other, &other, &other, &macro_stress, &params, 0.0).unwrap();
        assert_eq!(run.len(), 6);

        let mut prev = 0.0;
        for (t, rec) in run.iter().enumerate() {
            let expected = beast_step(
                StressInputs::new(lci[t], other[t], other[t], other[t], macro_stress[t]),
                prev,
                &params,
            )
            .unwrap();
            assert_eq!(rec.step, expected);
            prev = rec.step.stress;
        }
    }

    #[test]
    fn run_energy_bookkeeping() {
        let xs = [0.5, -0.2, 0.9, -0.7, 0.3, 0.6, -0.4];
        let run = beast_run(&xs, &xs, &xs, &xs, &xs, &BeastParams::default(), 0.3).unwrap();
        let e_init = 0.09;
        for t in 0..run.len() {
            let e = run[t].step.energy;
            let prev = if t == 0 { e_init } else { run[t - 1].step.energy };
            let lag = if t < 3 { e_init } else { run[t - 3].step.energy };
            assert!((run[t].delta_energy - (e - prev)).abs() < 1e-15);
            assert!((run[t].build_rate - (e - lag)).abs() < 1e-15);
        }
    }

    #[test]
    fn run_uses_common_prefix() {
        let run = beast_run(
            &[0.1; 8],
            &[0.1; 3],
            &[0.1; 9],
            &[0.1; 5],
            &[0.0; 4],
            &BeastParams::default(),
            0.0,
        )
        .unwrap();
        assert_eq!(run.len(), 3);
        let empty = beast_run(&[], &[], &[], &[], &[], &BeastParams::default(), 0.0).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn tail_lift_measures_future_vol_in_tail() {
        let field = |f: f64| StressStepRecord {
            step: BeastStep {
                core: 0.0,
                interaction: 0.0,
                stress: 0.0,
                lambda_t: 0.5,
                extended_nash: 0.0,
                acceleration: 0.0,
                crisis_field: f,
                energy: 0.0,
                aligned_magnitude: 0.0,
                trigger: false,
            },
            delta_energy: 0.0,
            build_rate: 0.0,
        };
        let steps = [field(-0.9), field(0.0), field(-0.8)];
        let future = [0.6, 0.1, 0.4];
        // mean(0.6, 0.4) / 0.25 - 1 = 1.0
        assert!((tail_lift(&steps, &future, 0.25, TAIL_FIELD_THRESHOLD) - 1.0).abs() < 1e-12);
        assert_eq!(tail_lift(&steps, &future[..2], 0.25, TAIL_FIELD_THRESHOLD), 0.0);
        assert_eq!(tail_lift(&steps, &future, 0.0, TAIL_FIELD_THRESHOLD), 0.0);
        assert_eq!(tail_lift(&steps[1..2], &future[1..2], 0.25, TAIL_FIELD_THRESHOLD), 0.0);
    }

    #[test]
    fn market_offset_past_the_series_yields_no_steps() {
        let prices = vec![100.0; 80];
        let vols = vec![0.1; 60];
        let params = BeastParams::default();
        let factors = MacroFactors::default();
        let steps = beast_from_market(&prices, &vols, &factors, usize::MAX, &params).unwrap();
        assert!(steps.is_empty());
    }

    #[test]
    fn record_flattens_into_single_object() {
        let run = beast_run(&[0.2], &[0.2], &[0.2], &[0.2], &[0.0], &BeastParams::default(), 0.0)
            .unwrap();
        let json = serde_json::to_value(run[0]).unwrap();
        for key in [
            "core",
            "interaction",
            "stress",
            "crisis_field",
            "trigger",
            "delta_energy",
            "build_rate",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
