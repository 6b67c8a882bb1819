//! Determinism + boundedness proof gate.
//!
//! Every kernel is driven twice from the same seeded inputs and the two runs
//! must match exactly; every output is then checked against its documented
//! range. No wall-clock value enters any compared quantity (prediction
//! timestamps are excluded from the oracle comparison). Each check also
//! records the SHA-256 of its serialized outputs so reports from separate
//! processes can be diffed by digest alone.
//!
//! One JSONL line per check is emitted, followed by a `proofs.finish` line,
//! and the full report is written as pretty JSON.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use stressfield_kernels::{
    BeastParams, DynamicalParams, HistoryBuffer, KernelConfig, OracleEngine, PredictionRecord,
    SystemicReading, beast_run, normal_cdf, phase_sweep, probit, rolling_volatility,
    run_dynamical, systemic_stress_full,
};
use stressfield_voices::{CANONICAL_PHRASE, signature_fingerprint, verify};

use crate::error::Result;
use crate::fixtures::SeriesFixture;
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome, now_utc};

pub const RUN_ID: &str = "stressfield-proofs";
const STAGE: &str = "proofs";

pub const DEFAULT_SEED: u64 = 0xDEAD_BEEF;
pub const DEFAULT_STEPS: usize = 2_000;

/// Output slack for tanh/clamp bounds.
const SLACK: f64 = 1e-12;
/// Largest `|Φ(probit(p)) - p|` accepted on the percent grid.
const PROBIT_CDF_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, Serialize)]
pub struct ProofCheck {
    pub proof_id: String,
    pub kernel: &'static str,
    pub ok: bool,
    pub output_sha256: String,
    pub failures: Vec<String>,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProofSummary {
    pub checks: usize,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProofReport {
    pub schema_version: &'static str,
    pub generated_at: String,
    pub seed: u64,
    pub steps: usize,
    pub summary: ProofSummary,
    pub checks: Vec<ProofCheck>,
}

impl ProofReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }
}

/// Run the gate, logging to `log_path` and writing the report to `report_path`.
pub fn run_and_write(
    log_path: &Path,
    report_path: &Path,
    seed: u64,
    steps: usize,
) -> Result<ProofReport> {
    let mut emitter = LogEmitter::to_file(log_path, RUN_ID, STAGE)?;
    let report = run(&mut emitter, seed, steps)?;
    emitter.flush()?;
    if let Some(parent) = report_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(report_path, serde_json::to_string_pretty(&report)?)?;
    Ok(report)
}

/// Run every check, emitting one log line per check.
pub fn run(emitter: &mut LogEmitter, seed: u64, steps: usize) -> Result<ProofReport> {
    let checks = vec![
        beast_check(seed, steps)?,
        dynamical_check(seed, steps)?,
        oracle_check(seed, steps)?,
        systemic_check(seed, steps)?,
        phase_check(seed)?,
        probit_check()?,
        voices_check()?,
    ];

    for check in &checks {
        emitter.emit_entry(
            LogEntry::new(
                "",
                if check.ok { LogLevel::Info } else { LogLevel::Error },
                "proofs.check",
            )
            .with_kernel(check.kernel)
            .with_outcome(if check.ok { Outcome::Pass } else { Outcome::Fail })
            .with_details(serde_json::json!({
                "proof_id": check.proof_id,
                "failures": check.failures,
                "details": check.details,
            })),
        )?;
    }

    let passed = checks.iter().filter(|c| c.ok).count();
    let summary = ProofSummary {
        checks: checks.len(),
        passed,
        failed: checks.len() - passed,
    };
    emitter.emit_entry(
        LogEntry::new("", LogLevel::Info, "proofs.finish")
            .with_outcome(if summary.failed == 0 {
                Outcome::Pass
            } else {
                Outcome::Fail
            })
            .with_details(serde_json::to_value(&summary)?),
    )?;

    Ok(ProofReport {
        schema_version: "v1",
        generated_at: now_utc(),
        seed,
        steps,
        summary,
        checks,
    })
}

fn finish(
    proof_id: &str,
    kernel: &'static str,
    outputs: &impl Serialize,
    failures: Vec<String>,
    details: serde_json::Value,
) -> Result<ProofCheck> {
    Ok(ProofCheck {
        proof_id: proof_id.to_string(),
        kernel,
        ok: failures.is_empty(),
        output_sha256: output_digest(outputs)?,
        failures,
        details,
    })
}

fn output_digest(outputs: &impl Serialize) -> Result<String> {
    let bytes = serde_json::to_vec(outputs)?;
    Ok(hex_lower(&Sha256::digest(&bytes)))
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn check_range(failures: &mut Vec<String>, name: &str, t: usize, v: f64, lo: f64, hi: f64) {
    if !v.is_finite() || v < lo - SLACK || v > hi + SLACK {
        failures.push(format!("{name} out of [{lo}, {hi}] at t={t}: {v}"));
    }
}

fn beast_check(seed: u64, steps: usize) -> Result<ProofCheck> {
    let mut rng = seed ^ 0xBEA5;
    let series: Vec<Vec<f64>> = (0..5)
        .map(|_| (0..steps).map(|_| signed(&mut rng, 1.5)).collect())
        .collect();
    let params = BeastParams::default();
    let run = || beast_run(&series[0], &series[1], &series[2], &series[3], &series[4], &params, 0.0);
    let (a, b) = (run()?, run()?);

    let mut failures = Vec::new();
    if a != b {
        failures.push("identically-driven BEAST runs diverged".to_string());
    }
    for (t, r) in a.iter().enumerate() {
        let s = &r.step;
        for (name, v) in [
            ("core", s.core),
            ("interaction", s.interaction),
            ("stress", s.stress),
            ("extended_nash", s.extended_nash),
            ("acceleration", s.acceleration),
            ("crisis_field", s.crisis_field),
            ("delta_energy", r.delta_energy),
            ("build_rate", r.build_rate),
        ] {
            check_range(&mut failures, name, t, v, -1.0, 1.0);
        }
        check_range(&mut failures, "energy", t, s.energy, 0.0, 1.0);
        check_range(&mut failures, "aligned_magnitude", t, s.aligned_magnitude, 0.0, 1.0);
    }
    finish(
        "beast.deterministic_and_bounded",
        "beast",
        &a,
        failures,
        serde_json::json!({
            "steps": a.len(),
            "triggers": a.iter().filter(|r| r.step.trigger).count(),
        }),
    )
}

fn dynamical_check(seed: u64, steps: usize) -> Result<ProofCheck> {
    let mut rng = seed ^ 0xD7A;
    let norms: Vec<f64> = (0..steps).map(|_| signed(&mut rng, 0.99)).collect();
    let extended: Vec<f64> = (0..steps).map(|_| signed(&mut rng, 2.0)).collect();
    let params = DynamicalParams::default();
    let a = run_dynamical(&norms, &extended, &params, 0.0)?;
    let b = run_dynamical(&norms, &extended, &params, 0.0)?;

    let mut failures = Vec::new();
    if a != b {
        failures.push("identically-driven dynamical runs diverged".to_string());
    }
    for (t, r) in a.iter().enumerate() {
        for (name, v) in [
            ("oracle", r.oracle),
            ("state", r.state),
            ("shock_amplifier", r.shock_amplifier),
            ("system_index", r.system_index),
            ("delta_energy", r.delta_energy),
        ] {
            check_range(&mut failures, name, t, v, -1.0, 1.0);
        }
        check_range(&mut failures, "energy", t, r.energy, 0.0, 1.0);
    }
    finish(
        "dynamical.deterministic_and_bounded",
        "dynamical",
        &a,
        failures,
        serde_json::json!({
            "steps": a.len(),
            "rho": params.rho(),
            "beta": params.beta(),
        }),
    )
}

/// Comparable part of a prediction (no timestamp).
fn prediction_key(p: &PredictionRecord) -> (u64, u8, u64) {
    (p.predicted_volatility.to_bits(), p.instability, p.regime_score.to_bits())
}

fn oracle_check(seed: u64, steps: usize) -> Result<ProofCheck> {
    let cfg = KernelConfig::default();
    let engines = [
        OracleEngine::with_history(&cfg, Arc::new(HistoryBuffer::new(cfg.history_capacity))),
        OracleEngine::with_history(&cfg, Arc::new(HistoryBuffer::new(cfg.history_capacity))),
    ];
    let mut rng = seed ^ 0x0AC1E;
    let mut failures = Vec::new();
    let mut max_pred = f64::MIN;
    let mut predicted = Vec::with_capacity(steps);

    for t in 0..steps {
        let vol = 0.005 + unit(&mut rng) * 0.08;
        let a = engines[0].predict("bitcoin", vol)?;
        let b = engines[1].predict("bitcoin", vol)?;
        if prediction_key(&a) != prediction_key(&b) || a.direction != b.direction {
            failures.push(format!("oracle predictions diverged at t={t}"));
            break;
        }
        let rank = engines[0].history().rank("bitcoin", vol, cfg.rank_window);
        check_range(&mut failures, "rank", t, rank, 0.001, 0.999);
        max_pred = max_pred.max(a.predicted_volatility);
        predicted.push(a.predicted_volatility);
        for e in &engines {
            e.observe("bitcoin", vol)?;
        }
    }
    let len = engines[0].history().len("bitcoin");
    if len != steps.min(cfg.history_capacity) {
        failures.push(format!("history length {len} ignores capacity"));
    }
    finish(
        "oracle.deterministic_and_rank_clamped",
        "oracle",
        &predicted,
        failures,
        serde_json::json!({
            "history_len": len,
            "max_predicted": max_pred,
        }),
    )
}

fn systemic_check(seed: u64, steps: usize) -> Result<ProofCheck> {
    let fixture = SeriesFixture::synthetic("proof", steps.max(200), seed);
    let cfg = KernelConfig::default();
    let resolved = fixture.resolve_vols(&cfg)?;
    let (vols, off) = (&resolved.vols, resolved.vol_offset);

    let mut failures = Vec::new();
    let mut readings = Vec::with_capacity(vols.len());
    for i in 0..vols.len() {
        let a: SystemicReading = systemic_stress_full(&fixture.prices, vols, i, off);
        let b = systemic_stress_full(&fixture.prices, vols, i, off);
        if a != b {
            failures.push(format!("systemic readings diverged at i={i}"));
            break;
        }
        for (name, v) in [
            ("lci", a.lci),
            ("lsi", a.lsi),
            ("csi", a.csi),
            ("fsi", a.fsi),
            ("systemic_stress", a.systemic_stress),
        ] {
            check_range(&mut failures, name, i, v, -1.0, 1.0);
        }
        readings.push(a);
    }
    let vols_again = rolling_volatility(&fixture.prices, cfg.vol_window, cfg.variance)?;
    if &vols_again != vols {
        failures.push("rolling volatility is not reproducible".to_string());
    }
    finish(
        "systemic.deterministic_and_bounded",
        "systemic",
        &readings,
        failures,
        serde_json::json!({ "readings": readings.len() }),
    )
}

fn phase_check(seed: u64) -> Result<ProofCheck> {
    let gammas = [0.0, 0.4, 0.8];
    let etas = [0.1, 0.25];
    let a = phase_sweep(&gammas, &etas, 400, seed)?;
    let b = phase_sweep(&gammas, &etas, 400, seed)?;
    let mut failures = Vec::new();
    if a != b {
        failures.push("phase sweep is not reproducible for a fixed seed".to_string());
    }
    for (t, p) in a.iter().enumerate() {
        check_range(&mut failures, "mean_abs_field", t, p.mean_abs_field, 0.0, 1.0);
        check_range(&mut failures, "tail_frequency", t, p.tail_frequency, 0.0, 1.0);
    }
    finish(
        "phase.reproducible",
        "phase",
        &a,
        failures,
        serde_json::json!({ "points": a.len() }),
    )
}

fn probit_check() -> Result<ProofCheck> {
    let mut failures = Vec::new();
    let grid: Vec<f64> = (1..100).map(|k| probit(f64::from(k) / 100.0)).collect();
    if probit(0.5).abs() >= 1e-3 {
        failures.push(format!("probit(0.5) = {}", probit(0.5)));
    }
    let mut max_cdf_error = 0.0_f64;
    for (k, &x) in (1..100u32).zip(&grid) {
        let p = f64::from(k) / 100.0;
        let asym = x + probit(1.0 - p);
        if asym.abs() >= 0.01 {
            failures.push(format!("probit asymmetric at p={p}: {asym}"));
        }
        let err = (normal_cdf(x) - p).abs();
        max_cdf_error = max_cdf_error.max(err);
        if err >= PROBIT_CDF_TOLERANCE {
            failures.push(format!("probit inaccurate at p={p}: Φ(probit(p)) off by {err}"));
        }
    }
    finish(
        "probit.symmetric_and_accurate",
        "oracle",
        &grid,
        failures,
        serde_json::json!({
            "probit_0_975": probit(0.975),
            "max_cdf_error": max_cdf_error,
        }),
    )
}

fn voices_check() -> Result<ProofCheck> {
    let mut failures = Vec::new();
    let a = signature_fingerprint(CANONICAL_PHRASE);
    if a != signature_fingerprint(CANONICAL_PHRASE) {
        failures.push("fingerprint is not reproducible".to_string());
    }
    if !verify(CANONICAL_PHRASE).passed {
        failures.push("canonical phrase failed verification".to_string());
    }
    if verify("the mirror protocol").passed {
        failures.push("non-canonical phrase verified".to_string());
    }
    finish(
        "voices.deterministic",
        "voices",
        &a,
        failures,
        serde_json::json!({ "fingerprint": a }),
    )
}

fn next_u64(state: &mut u64) -> u64 {
    // PCG-style LCG; deterministic and cheap.
    *state = state
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407);
    *state
}

fn unit(state: &mut u64) -> f64 {
    (next_u64(state) >> 11) as f64 / (1u64 << 53) as f64
}

fn signed(state: &mut u64, scale: f64) -> f64 {
    (unit(state) * 2.0 - 1.0) * scale
}
