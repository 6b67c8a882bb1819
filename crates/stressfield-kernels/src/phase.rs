//! Phase sweep of the BEAST field over (γ, η).
//!
//! Four synthetic stress series (clamped `N(0, 0.4)` draws from seeded
//! `StdRng`s) and a constant macro stress of -0.2 are pushed through BEAST for
//! every grid point. Same grid and seed, same numbers.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::beast::{BeastParams, StressInputs, beast_run_inputs};
use crate::error::Result;
use crate::oracle::standard_normal;

/// |F| above which a step counts as a tail event.
pub const TAIL_FIELD: f64 = 0.8;

const SYNTHETIC_SIGMA: f64 = 0.4;
const SYNTHETIC_MACRO: f64 = -0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhasePoint {
    pub gamma: f64,
    pub eta: f64,
    /// Mean |crisis_field|.
    pub mean_abs_field: f64,
    /// Fraction of steps with |crisis_field| > 0.8.
    pub tail_frequency: f64,
    /// Population variance of stress.
    pub stress_variance: f64,
}

/// `n` clamped `N(0, 0.4)` draws from `StdRng::seed_from_u64(seed)`.
#[must_use]
pub fn synthetic_stress(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (SYNTHETIC_SIGMA * standard_normal(&mut rng)).clamp(-1.0, 1.0))
        .collect()
}

struct SyntheticInputs {
    lci: Vec<f64>,
    lsi: Vec<f64>,
    csi: Vec<f64>,
    fsi: Vec<f64>,
}

impl SyntheticInputs {
    fn generate(n: usize, seed: u64) -> Self {
        Self {
            lci: synthetic_stress(n, seed),
            lsi: synthetic_stress(n, seed.wrapping_add(1)),
            csi: synthetic_stress(n, seed.wrapping_add(2)),
            fsi: synthetic_stress(n, seed.wrapping_add(3)),
        }
    }

    fn evaluate(&self, gamma: f64, eta: f64) -> Result<PhasePoint> {
        let params = BeastParams::new(gamma, eta, None)?;
        let inputs = (0..self.lci.len()).map(|t| {
            StressInputs::new(
                self.lci[t],
                self.lsi[t],
                self.csi[t],
                self.fsi[t],
                SYNTHETIC_MACRO,
            )
        });
        let steps = beast_run_inputs(inputs, &params, 0.0)?;
        if steps.is_empty() {
            return Ok(PhasePoint {
                gamma,
                eta,
                mean_abs_field: 0.0,
                tail_frequency: 0.0,
                stress_variance: 0.0,
            });
        }

        let n = steps.len() as f64;
        let mean_abs_field = steps.iter().map(|s| s.step.crisis_field.abs()).sum::<f64>() / n;
        let tails = steps
            .iter()
            .filter(|s| s.step.crisis_field.abs() > TAIL_FIELD)
            .count();
        let stress_variance = if steps.len() > 1 {
            let mean = steps.iter().map(|s| s.step.stress).sum::<f64>() / n;
            steps
                .iter()
                .map(|s| (s.step.stress - mean).powi(2))
                .sum::<f64>()
                / n
        } else {
            0.0
        };

        Ok(PhasePoint {
            gamma,
            eta,
            mean_abs_field,
            tail_frequency: tails as f64 / n,
            stress_variance,
        })
    }
}

/// Evaluate BEAST over the `gammas × etas` grid on `n` synthetic steps.
///
/// Points are returned gamma-major, in input order.
pub fn phase_sweep(gammas: &[f64], etas: &[f64], n: usize, seed: u64) -> Result<Vec<PhasePoint>> {
    let inputs = SyntheticInputs::generate(n, seed);
    let mut out = Vec::with_capacity(gammas.len() * etas.len());
    for &gamma in gammas {
        for &eta in etas {
            out.push(inputs.evaluate(gamma, eta)?);
        }
    }
    Ok(out)
}

/// Smallest γ in `{k / n_points : k = 1..=n_points}` whose tail frequency
/// exceeds `tail_thresh` at the given η, or `None`.
pub fn critical_gamma(
    eta: f64,
    tail_thresh: f64,
    n_points: usize,
    n: usize,
    seed: u64,
) -> Result<Option<f64>> {
    let inputs = SyntheticInputs::generate(n, seed);
    for k in 1..=n_points {
        let gamma = k as f64 / n_points as f64;
        if inputs.evaluate(gamma, eta)?.tail_frequency > tail_thresh {
            return Ok(Some(gamma));
        }
    }
    Ok(None)
}
