//! Market pipeline runner.
//!
//! Fixture → volatility → BEAST or dynamical engine → report. Each run emits
//! `market.start`, one warn line per BEAST trigger, and `market.finish` when
//! a [`LogEmitter`] is attached.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use stressfield_kernels::{
    BeastParams, DynamicalParams, DynamicalStepRecord, KernelConfig, MARKET_WARMUP,
    PRE_CRISIS_WINDOW, StressStepRecord, TAIL_FIELD_THRESHOLD, TailRegime, beast_from_market,
    dynamical_from_market, pre_crisis_signal, tail_lift,
};

use crate::error::Result;
use crate::fixtures::SeriesFixture;
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};

/// Prices inspected by the tail-regime classifier at the end of a series.
const TAIL_WINDOW: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Beast,
    Dynamical,
}

impl Engine {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Beast => "beast",
            Self::Dynamical => "dynamical",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beast" => Ok(Self::Beast),
            "dynamical" | "dynamic" => Ok(Self::Dynamical),
            other => Err(format!("unknown engine '{other}' (expected beast|dynamical)")),
        }
    }
}

/// Per-step output of whichever engine ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "engine", content = "steps", rename_all = "lowercase")]
pub enum MarketSeries {
    Beast(Vec<StressStepRecord>),
    Dynamical(Vec<DynamicalStepRecord>),
}

impl MarketSeries {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Beast(s) => s.len(),
            Self::Dynamical(s) => s.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn engine(&self) -> Engine {
        match self {
            Self::Beast(_) => Engine::Beast,
            Self::Dynamical(_) => Engine::Dynamical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub steps: usize,
    /// BEAST trigger count; always 0 for the dynamical engine.
    pub triggers: usize,
    /// Lowest crisis field (BEAST) or system index (dynamical); 0 when empty.
    pub min_signal: f64,
    pub mean_energy: f64,
    /// Dynamical engine only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_crisis: Option<bool>,
    /// BEAST only: next-step volatility after deep-field steps, relative to
    /// the mean volatility, minus one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tail_lift: Option<f64>,
    pub tail_regime: TailRegime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketReport {
    pub name: String,
    pub vol_offset: usize,
    pub vol_count: usize,
    pub summary: MarketSummary,
    #[serde(flatten)]
    pub series: MarketSeries,
}

/// Runs fixtures through the market pipeline under one validated config.
#[derive(Debug, Clone)]
pub struct MarketRunner {
    config: KernelConfig,
    beast: BeastParams,
    dynamical: DynamicalParams,
}

impl MarketRunner {
    pub fn new(config: KernelConfig) -> Result<Self> {
        config.validate()?;
        let beast = BeastParams::new(config.gamma, config.eta, None)?;
        let dynamical = config.dynamical_params()?;
        Ok(Self {
            config,
            beast,
            dynamical,
        })
    }

    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn run(
        &self,
        fixture: &SeriesFixture,
        engine: Engine,
        mut log: Option<&mut LogEmitter>,
    ) -> Result<MarketReport> {
        let started = Instant::now();
        let resolved = fixture.resolve_vols(&self.config)?;
        let (vols, vol_offset) = (resolved.vols, resolved.vol_offset);

        if let Some(em) = log.as_deref_mut() {
            em.emit_entry(
                LogEntry::new("", LogLevel::Info, "market.start")
                    .with_kernel(engine.as_str())
                    .with_details(serde_json::json!({
                        "fixture": fixture.name,
                        "prices": fixture.prices.len(),
                        "vols": vols.len(),
                        "vol_offset": vol_offset,
                    })),
            )?;
        }

        let series = match engine {
            Engine::Beast => MarketSeries::Beast(beast_from_market(
                &fixture.prices,
                &vols,
                &fixture.macro_factors,
                vol_offset,
                &self.beast,
            )?),
            Engine::Dynamical => MarketSeries::Dynamical(dynamical_from_market(
                &fixture.prices,
                &vols,
                &fixture.macro_factors,
                vol_offset,
                &self.dynamical,
            )?),
        };

        let tail_start = fixture.prices.len().saturating_sub(TAIL_WINDOW);
        let tail_regime = TailRegime::detect(&fixture.prices[tail_start..]);
        let summary = summarize(&series, &vols, vol_offset, tail_regime);

        if let (Some(em), MarketSeries::Beast(steps)) = (log.as_deref_mut(), &series) {
            for (t, rec) in steps.iter().enumerate().filter(|(_, r)| r.step.trigger) {
                em.emit_entry(
                    LogEntry::new("", LogLevel::Warn, "beast.trigger")
                        .with_kernel("beast")
                        .with_step(t as u64)
                        .with_details(serde_json::json!({
                            "crisis_field": rec.step.crisis_field,
                            "interaction": rec.step.interaction,
                            "stress": rec.step.stress,
                        })),
                )?;
            }
        }

        if let Some(em) = log {
            em.emit_entry(
                LogEntry::new("", LogLevel::Info, "market.finish")
                    .with_kernel(engine.as_str())
                    .with_outcome(if series.is_empty() {
                        Outcome::Skip
                    } else {
                        Outcome::Pass
                    })
                    .with_duration_ms(started.elapsed().as_millis() as u64)
                    .with_details(serde_json::to_value(&summary)?),
            )?;
            em.flush()?;
        }

        Ok(MarketReport {
            name: fixture.name.clone(),
            vol_offset,
            vol_count: vols.len(),
            summary,
            series,
        })
    }
}

fn summarize(
    series: &MarketSeries,
    vols: &[f64],
    vol_offset: usize,
    tail_regime: TailRegime,
) -> MarketSummary {
    let steps = series.len();
    match series {
        MarketSeries::Beast(s) => {
            // Step k sits at vol index vol_offset + MARKET_WARMUP + k; the runner
            // stops one short of the end so the next vol always exists.
            let first_future = vol_offset + MARKET_WARMUP + 1;
            let future = vols.get(first_future..first_future + steps).unwrap_or(&[]);
            MarketSummary {
                steps,
                triggers: s.iter().filter(|r| r.step.trigger).count(),
                min_signal: min_or_zero(s.iter().map(|r| r.step.crisis_field)),
                mean_energy: mean_or_zero(s.iter().map(|r| r.step.energy)),
                pre_crisis: None,
                tail_lift: Some(tail_lift(
                    s,
                    future,
                    mean_or_zero(vols.iter().copied()),
                    TAIL_FIELD_THRESHOLD,
                )),
                tail_regime,
            }
        }
        MarketSeries::Dynamical(s) => MarketSummary {
            steps,
            triggers: 0,
            min_signal: min_or_zero(s.iter().map(|r| r.system_index)),
            mean_energy: mean_or_zero(s.iter().map(|r| r.energy)),
            pre_crisis: Some(pre_crisis_signal(s, PRE_CRISIS_WINDOW)),
            tail_lift: None,
            tail_regime,
        },
    }
}

fn mean_or_zero(it: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = it.fold((0.0, 0usize), |(sum, n), x| (sum + x, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

fn min_or_zero(it: impl Iterator<Item = f64>) -> f64 {
    it.reduce(f64::min).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structured_log::validate_log_str;

    #[test]
    fn engine_parses_loosely() {
        assert_eq!("BEAST".parse::<Engine>(), Ok(Engine::Beast));
        assert_eq!(" dynamic ".parse::<Engine>(), Ok(Engine::Dynamical));
        assert!("garch".parse::<Engine>().is_err());
        assert_eq!(Engine::Dynamical.to_string(), "dynamical");
    }

    #[test]
    fn beast_run_reports_and_logs() {
        let runner = MarketRunner::new(KernelConfig::default()).unwrap();
        let fixture = SeriesFixture::synthetic("walk", 400, 11);
        let mut em = LogEmitter::to_buffer("t", "market");
        let report = runner.run(&fixture, Engine::Beast, Some(&mut em)).unwrap();

        assert_eq!(report.vol_offset, 20);
        assert_eq!(report.vol_count, 399 - 20);
        assert_eq!(report.summary.steps, report.vol_count - 1 - 50);
        assert_eq!(report.series.engine(), Engine::Beast);
        assert!(report.summary.tail_lift.is_some());
        assert!(report.summary.pre_crisis.is_none());
        assert!((-1.0..=1.0).contains(&report.summary.min_signal));
        assert!(report.summary.mean_energy >= 0.0);

        let log = em.buffer_contents().unwrap();
        let (lines, errors) = validate_log_str(&log);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(lines, 2 + report.summary.triggers);
        assert!(log.lines().last().unwrap().contains("market.finish"));
    }

    #[test]
    fn dynamical_report_serializes_engine_tag() {
        let runner = MarketRunner::new(KernelConfig::default()).unwrap();
        let fixture = SeriesFixture::synthetic("walk", 300, 2);
        let report = runner.run(&fixture, Engine::Dynamical, None).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["engine"], "dynamical");
        assert!(json["steps"].is_array());
        assert_eq!(json["summary"]["triggers"], 0);
        assert!(json["summary"]["pre_crisis"].is_boolean());
        assert!(json["summary"].get("tail_lift").is_none());
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let cfg = KernelConfig {
            rho: 0.9,
            beta: 0.2,
            ..KernelConfig::default()
        };
        assert!(MarketRunner::new(cfg).is_err());
    }
}
