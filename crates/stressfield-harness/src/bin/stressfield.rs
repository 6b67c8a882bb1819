//! CLI entrypoint for stressfield.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use stressfield_harness::structured_log::LogEmitter;
use stressfield_harness::{
    Engine, MarketRunner, Result, SeriesFixture, determinism_proofs, load_config,
};
use stressfield_kernels::{
    KernelConfig, MacroFactors, OracleEngine, critical_gamma, phase_sweep, predict_macro,
};
use stressfield_voices::{Verifier, all_voices, signature_fingerprint, verify};

/// Bounded stress-field kernels over price and volatility series.
#[derive(Debug, Parser)]
#[command(name = "stressfield")]
#[command(about = "Volatility oracle, systemic stress indices and crisis-field recurrences")]
struct Cli {
    /// JSON config file. Without it, defaults plus `STRESSFIELD_*` env overrides apply.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// One-step UVRK volatility forecast for a regime.
    Predict {
        /// Regime id (bitcoin, oil, fed_funds, hurricane, geopolitical, covid, copper).
        #[arg(long)]
        regime: String,
        /// Current volatility.
        #[arg(long)]
        vol: f64,
        /// JSON array of past volatilities observed before forecasting.
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Macro factor score and adjusted volatility.
    Macro {
        #[arg(long, default_value_t = 0.04)]
        base_vol: f64,
        #[arg(long, default_value_t = 0.5, allow_negative_numbers = true)]
        sentiment: f64,
        #[arg(long, default_value_t = 0.5, allow_negative_numbers = true)]
        spending: f64,
        #[arg(long, default_value_t = 0.5, allow_negative_numbers = true)]
        geo: f64,
        #[arg(long, default_value_t = 0.5, allow_negative_numbers = true)]
        materials: f64,
        /// Defaults to the configured `nash_strength`.
        #[arg(long)]
        nash_strength: Option<f64>,
        #[arg(long, default_value_t = 0.5)]
        rank: f64,
    },
    /// Run the market pipeline on a series fixture.
    Market {
        /// Fixture JSON path.
        #[arg(long)]
        fixture: PathBuf,
        /// `beast` or `dynamical`.
        #[arg(long, default_value = "beast")]
        engine: Engine,
        /// Output report path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Structured JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Verify an address and print the verification record.
    Verify {
        #[arg(long)]
        address: String,
    },
    /// Print the 33 Voices of a text.
    Voices {
        #[arg(long)]
        text: String,
        /// Also print the SHA-256 fingerprint.
        #[arg(long)]
        fingerprint: bool,
    },
    /// Sweep BEAST over a (gamma, eta) grid on synthetic stress.
    PhaseSweep {
        #[arg(long, default_value_t = 1000)]
        steps: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Run the determinism + boundedness proof gate.
    Proofs {
        #[arg(long, default_value = "target/stressfield/proofs.log.jsonl")]
        log: PathBuf,
        #[arg(long, default_value = "target/stressfield/proofs.report.json")]
        report: PathBuf,
        #[arg(long, default_value_t = determinism_proofs::DEFAULT_SEED)]
        seed: u64,
        #[arg(long, default_value_t = determinism_proofs::DEFAULT_STEPS)]
        steps: usize,
    },
}

const PHASE_GAMMAS: usize = 10;
const PHASE_ETAS: [f64; 3] = [0.1, 0.25, 0.5];
const PHASE_TAIL_THRESH: f64 = 0.05;

#[derive(Debug, Serialize)]
struct VoicesOutput {
    voices: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
    verdict: stressfield_voices::VoiceVerdict,
}

#[derive(Debug, Serialize)]
struct CriticalGamma {
    eta: f64,
    critical_gamma: Option<f64>,
}

#[derive(Debug, Serialize)]
struct PhaseOutput {
    points: Vec<stressfield_kernels::PhasePoint>,
    critical: Vec<CriticalGamma>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("stressfield: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Predict {
            regime,
            vol,
            history,
        } => {
            let engine = OracleEngine::new(&config);
            if let Some(path) = history {
                let past: Vec<f64> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
                for v in past {
                    engine.observe(&regime, v)?;
                }
            }
            print_json(&engine.predict(&regime, vol)?)?;
        }
        Command::Macro {
            base_vol,
            sentiment,
            spending,
            geo,
            materials,
            nash_strength,
            rank,
        } => {
            let factors = MacroFactors::new(sentiment, spending, geo, materials);
            let strength = nash_strength.unwrap_or(config.nash_strength);
            print_json(&predict_macro(base_vol, &factors, strength, rank)?)?;
        }
        Command::Market {
            fixture,
            engine,
            output,
            log,
        } => {
            let fixture = SeriesFixture::from_file(&fixture)?;
            let runner = MarketRunner::new(config)?;
            let mut emitter = log
                .map(|p| LogEmitter::to_file(&p, &fixture.name, "market"))
                .transpose()?;
            let report = runner.run(&fixture, engine, emitter.as_mut())?;
            let json = serde_json::to_string_pretty(&report)?;
            match output {
                Some(path) => write_file(&path, &json)?,
                None => println!("{json}"),
            }
        }
        Command::Verify { address } => {
            let record = Verifier::new(&config).verify_address(&address);
            print_json(&record)?;
            if !record.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Voices { text, fingerprint } => {
            print_json(&VoicesOutput {
                voices: all_voices(&text),
                fingerprint: fingerprint.then(|| signature_fingerprint(&text)),
                verdict: verify(&text),
            })?;
        }
        Command::PhaseSweep { steps, seed } => print_json(&phase(&config, steps, seed)?)?,
        Command::Proofs {
            log,
            report,
            seed,
            steps,
        } => {
            let r = determinism_proofs::run_and_write(&log, &report, seed, steps)?;
            eprintln!(
                "proofs: {}/{} checks passed; report at {}",
                r.summary.passed,
                r.summary.checks,
                report.display()
            );
            if !r.all_passed() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn phase(config: &KernelConfig, steps: usize, seed: u64) -> Result<PhaseOutput> {
    let gammas: Vec<f64> = (0..=PHASE_GAMMAS)
        .map(|k| k as f64 / PHASE_GAMMAS as f64)
        .collect();
    let mut etas = PHASE_ETAS.to_vec();
    if !etas.contains(&config.eta) {
        etas.push(config.eta);
    }
    let points = phase_sweep(&gammas, &etas, steps, seed)?;
    let critical = etas
        .iter()
        .map(|&eta| {
            Ok(CriticalGamma {
                eta,
                critical_gamma: critical_gamma(eta, PHASE_TAIL_THRESH, 20, steps, seed)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(PhaseOutput { points, critical })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}
