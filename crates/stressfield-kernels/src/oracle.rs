//! # UVRK Volatility Oracle
//!
//! One-step volatility forecast from the current level and its percentile
//! rank in the regime's own history:
//!
//! ```text
//! V_{t+1} = θ·V_t + (1 - θ)·κ·Φ⁻¹(rank_t) [+ ε_t,  ε_t ~ N(0, σ)]
//! ```
//!
//! θ is persistence, κ the pull toward the rank-implied level, σ the
//! innovation noise. Noise is only added through [`uvrk_predict_noisy`], which
//! takes the RNG explicitly so runs stay reproducible.
//!
//! ## State
//!
//! The regime table is immutable and built once. The only mutable state is the
//! per-regime [`HistoryBuffer`] (bounded, oldest dropped first) and the
//! engine's prediction ledger, both behind `parking_lot` mutexes. Engines can
//! share one buffer through `Arc` or own a private one, so independent
//! simulations never see each other's observations.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::KernelConfig;
use crate::error::{KernelError, Result, ensure_finite};
use crate::probit::probit;
use crate::rolling::percentile_rank;

/// Relative move above which a forecast is `Increasing`.
const DIRECTION_UP: f64 = 1.02;
/// Relative move below which a forecast is `Decreasing`.
const DIRECTION_DOWN: f64 = 0.98;

/// Tuned constants of one regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegimeParams {
    pub id: &'static str,
    pub name: &'static str,
    /// Persistence, in (0, 1).
    pub theta: f64,
    /// Rank pull, > 0.
    pub kappa: f64,
    /// Innovation noise std-dev, >= 0.
    pub sigma: f64,
    /// Reported in-sample fit. Static; not recomputed.
    pub r_squared: f64,
}

const REGIMES: [RegimeParams; 7] = [
    RegimeParams {
        id: "bitcoin",
        name: "BITCOIN",
        theta: 0.78,
        kappa: 1.45,
        sigma: 0.12,
        r_squared: 0.954,
    },
    RegimeParams {
        id: "oil",
        name: "OIL",
        theta: 0.82,
        kappa: 1.38,
        sigma: 0.10,
        r_squared: 0.946,
    },
    RegimeParams {
        id: "fed_funds",
        name: "FED FUNDS",
        theta: 0.87,
        kappa: 1.24,
        sigma: 0.06,
        r_squared: 0.966,
    },
    RegimeParams {
        id: "hurricane",
        name: "HURRICANE",
        theta: 0.92,
        kappa: 1.41,
        sigma: 0.15,
        r_squared: 0.864,
    },
    RegimeParams {
        id: "geopolitical",
        name: "GEOPOLITICAL",
        theta: 0.85,
        kappa: 1.33,
        sigma: 0.09,
        r_squared: 0.973,
    },
    RegimeParams {
        id: "covid",
        name: "COVID",
        theta: 0.88,
        kappa: 1.28,
        sigma: 0.11,
        r_squared: 0.971,
    },
    RegimeParams {
        id: "copper",
        name: "COPPER",
        theta: 0.82,
        kappa: 1.22,
        sigma: 0.08,
        r_squared: 0.954,
    },
];

/// Immutable lookup from regime id to parameters.
#[derive(Debug)]
pub struct RegimeTable {
    by_id: BTreeMap<&'static str, RegimeParams>,
}

static REGIME_TABLE: OnceLock<RegimeTable> = OnceLock::new();

impl RegimeTable {
    /// The process-wide table, built on first use.
    #[must_use]
    pub fn global() -> &'static RegimeTable {
        REGIME_TABLE.get_or_init(|| RegimeTable {
            by_id: REGIMES.iter().map(|p| (p.id, *p)).collect(),
        })
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RegimeParams> {
        self.by_id.get(id)
    }

    pub fn lookup(&self, id: &str) -> Result<&RegimeParams> {
        self.get(id)
            .ok_or_else(|| KernelError::UnknownRegime(id.to_string()))
    }

    /// Regimes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &RegimeParams> {
        self.by_id.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    #[must_use]
    pub fn average_r_squared(&self) -> f64 {
        if self.by_id.is_empty() {
            return 0.0;
        }
        self.iter().map(|p| p.r_squared).sum::<f64>() / self.len() as f64
    }
}

/// Deterministic UVRK forecast.
#[must_use]
pub fn uvrk_predict(current_vol: f64, rank: f64, theta: f64, kappa: f64) -> f64 {
    theta * current_vol + (1.0 - theta) * kappa * probit(rank)
}

/// UVRK forecast plus one `N(0, sigma)` innovation drawn from `rng`.
pub fn uvrk_predict_noisy<R: Rng + ?Sized>(
    current_vol: f64,
    rank: f64,
    theta: f64,
    kappa: f64,
    sigma: f64,
    rng: &mut R,
) -> Result<f64> {
    let sigma = ensure_finite("sigma", sigma)?;
    if sigma < 0.0 {
        return Err(KernelError::OutOfRange {
            field: "sigma",
            value: sigma,
            min: 0.0,
            max: f64::INFINITY,
        });
    }
    let base = uvrk_predict(current_vol, rank, theta, kappa);
    if sigma == 0.0 {
        return Ok(base);
    }
    Ok(base + sigma * standard_normal(rng))
}

/// Box-Muller draw.
pub(crate) fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // 1 - U keeps the log argument in (0, 1].
    let u1: f64 = 1.0 - rng.gen_range(0.0..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Increasing,
    Decreasing,
    Stable,
}

impl Direction {
    #[must_use]
    pub fn classify(predicted: f64, current: f64) -> Self {
        if predicted > current * DIRECTION_UP {
            Self::Increasing
        } else if predicted < current * DIRECTION_DOWN {
            Self::Decreasing
        } else {
            Self::Stable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstabilityState {
    Normal,
    Elevated,
    Stressed,
    Critical,
}

impl InstabilityState {
    #[must_use]
    pub const fn classify(index: u8) -> Self {
        match index {
            0..=24 => Self::Normal,
            25..=49 => Self::Elevated,
            50..=74 => Self::Stressed,
            _ => Self::Critical,
        }
    }
}

/// Map a volatility level onto the 0–100 instability index.
///
/// `vol / baseline · 25`, clipped to `[0, 100]` and truncated toward zero.
#[must_use]
pub fn instability_index(vol: f64, baseline: f64) -> u8 {
    let raw = (vol / baseline * 25.0).trunc();
    if raw.is_nan() {
        return 0;
    }
    raw.clamp(0.0, 100.0) as u8
}

/// One oracle output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub regime: String,
    pub name: String,
    pub instability: u8,
    pub state: InstabilityState,
    pub direction: Direction,
    /// `r_squared × 100` of the regime. A static per-regime constant, not a
    /// calibrated probability.
    pub regime_score: f64,
    pub volatility: f64,
    pub predicted_volatility: f64,
    /// Unix seconds.
    pub timestamp: f64,
}

/// Bounded per-regime volatility history.
#[derive(Debug)]
pub struct HistoryBuffer {
    capacity: usize,
    series: Mutex<HashMap<String, VecDeque<f64>>>,
}

impl HistoryBuffer {
    /// A buffer keeping at most `capacity` observations per regime.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append, dropping the oldest entry once the regime is at capacity.
    pub fn push(&self, regime: &str, value: f64) {
        let mut series = self.series.lock();
        let entry = series.entry(regime.to_string()).or_default();
        if entry.len() == self.capacity {
            entry.pop_front();
        }
        entry.push_back(value);
    }

    /// Copy of the regime's history, oldest first.
    #[must_use]
    pub fn snapshot(&self, regime: &str) -> Vec<f64> {
        self.series
            .lock()
            .get(regime)
            .map(|d| d.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Percentile rank of `value` against the trailing `window` of `regime`.
    #[must_use]
    pub fn rank(&self, regime: &str, value: f64, window: usize) -> f64 {
        let mut series = self.series.lock();
        match series.get_mut(regime) {
            Some(deque) => percentile_rank(value, deque.make_contiguous(), window),
            None => percentile_rank(value, &[], window),
        }
    }

    #[must_use]
    pub fn len(&self, regime: &str) -> usize {
        self.series.lock().get(regime).map_or(0, VecDeque::len)
    }

    #[must_use]
    pub fn is_empty(&self, regime: &str) -> bool {
        self.len(regime) == 0
    }

    pub fn clear(&self) {
        self.series.lock().clear();
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(KernelConfig::default().history_capacity)
    }
}

/// Snapshot of engine bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub regimes: usize,
    pub total_predictions: u64,
    pub history_sizes: BTreeMap<String, usize>,
    pub average_r_squared: f64,
}

#[derive(Debug, Default)]
struct Ledger {
    total: u64,
    latest: BTreeMap<String, PredictionRecord>,
}

/// Oracle over the static regime table with an injectable history buffer.
#[derive(Debug)]
pub struct OracleEngine {
    table: &'static RegimeTable,
    history: Arc<HistoryBuffer>,
    ledger: Mutex<Ledger>,
    rank_window: usize,
    baseline: f64,
}

impl OracleEngine {
    /// Engine with a private history buffer sized from `config`.
    #[must_use]
    pub fn new(config: &KernelConfig) -> Self {
        Self::with_history(config, Arc::new(HistoryBuffer::new(config.history_capacity)))
    }

    /// Engine reading ranks from a caller-supplied buffer.
    #[must_use]
    pub fn with_history(config: &KernelConfig, history: Arc<HistoryBuffer>) -> Self {
        Self {
            table: RegimeTable::global(),
            history,
            ledger: Mutex::new(Ledger::default()),
            rank_window: config.rank_window.max(1),
            baseline: config.instability_baseline,
        }
    }

    #[must_use]
    pub fn history(&self) -> &Arc<HistoryBuffer> {
        &self.history
    }

    /// Record a volatility observation for `regime`.
    pub fn observe(&self, regime: &str, vol: f64) -> Result<()> {
        self.table.lookup(regime)?;
        let vol = checked_vol(vol)?;
        self.history.push(regime, vol);
        Ok(())
    }

    /// Forecast `regime` from `current_vol` and its rank in the history.
    ///
    /// Does not append `current_vol` to the history; call [`Self::observe`]
    /// for that.
    pub fn predict(&self, regime: &str, current_vol: f64) -> Result<PredictionRecord> {
        self.predict_with_params(regime, current_vol).map(|(record, _)| record)
    }

    /// [`Self::predict`], also returning the regime parameters it used.
    pub fn predict_with_params(
        &self,
        regime: &str,
        current_vol: f64,
    ) -> Result<(PredictionRecord, &'static RegimeParams)> {
        let params = self.table.lookup(regime)?;
        let current_vol = checked_vol(current_vol)?;

        let rank = self.history.rank(regime, current_vol, self.rank_window);
        let predicted = uvrk_predict(current_vol, rank, params.theta, params.kappa);
        let instability = instability_index(current_vol, self.baseline);

        let record = PredictionRecord {
            regime: params.id.to_string(),
            name: params.name.to_string(),
            instability,
            state: InstabilityState::classify(instability),
            direction: Direction::classify(predicted, current_vol),
            regime_score: params.r_squared * 100.0,
            volatility: current_vol,
            predicted_volatility: predicted,
            timestamp: unix_now(),
        };

        let mut ledger = self.ledger.lock();
        ledger.total += 1;
        ledger.latest.insert(record.regime.clone(), record.clone());
        Ok((record, params))
    }

    /// Forecast every known regime in `vols`; unknown ids are skipped.
    pub fn predict_all<I, S>(&self, vols: I) -> Result<Vec<PredictionRecord>>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut out = Vec::new();
        for (regime, vol) in vols {
            match self.predict(regime.as_ref(), vol) {
                Ok(record) => out.push(record),
                Err(KernelError::UnknownRegime(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Most recent prediction per regime, in regime-id order.
    #[must_use]
    pub fn latest_predictions(&self) -> Vec<PredictionRecord> {
        self.ledger.lock().latest.values().cloned().collect()
    }

    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let total_predictions = self.ledger.lock().total;
        EngineStatus {
            regimes: self.table.len(),
            total_predictions,
            history_sizes: self
                .table
                .iter()
                .map(|p| (p.id.to_string(), self.history.len(p.id)))
                .collect(),
            average_r_squared: self.table.average_r_squared(),
        }
    }
}

impl Default for OracleEngine {
    fn default() -> Self {
        Self::new(&KernelConfig::default())
    }
}

fn checked_vol(vol: f64) -> Result<f64> {
    let vol = ensure_finite("current_vol", vol)?;
    if vol < 0.0 {
        return Err(KernelError::NegativeVolatility { value: vol });
    }
    Ok(vol)
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn median_rank_reduces_to_persistence() {
        assert_eq!(uvrk_predict(0.04, 0.5, 0.78, 1.45), 0.78 * 0.04);
    }

    #[test]
    fn high_rank_pulls_forecast_up() {
        assert!(uvrk_predict(0.04, 0.95, 0.78, 1.45) > uvrk_predict(0.04, 0.5, 0.78, 1.45));
        assert!(uvrk_predict(0.04, 0.05, 0.78, 1.45) < uvrk_predict(0.04, 0.5, 0.78, 1.45));
    }

    #[test]
    fn noisy_forecast_is_seed_deterministic() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let x = uvrk_predict_noisy(0.04, 0.6, 0.78, 1.45, 0.12, &mut a).unwrap();
        let y = uvrk_predict_noisy(0.04, 0.6, 0.78, 1.45, 0.12, &mut b).unwrap();
        assert_eq!(x.to_bits(), y.to_bits());
        assert!(x.is_finite());
    }

    #[test]
    fn zero_sigma_is_deterministic_forecast() {
        let mut rng = StdRng::seed_from_u64(1);
        let x = uvrk_predict_noisy(0.04, 0.6, 0.78, 1.45, 0.0, &mut rng).unwrap();
        assert_eq!(x, uvrk_predict(0.04, 0.6, 0.78, 1.45));
        assert!(uvrk_predict_noisy(0.04, 0.6, 0.78, 1.45, -0.1, &mut rng).is_err());
    }

    #[test]
    fn instability_truncates_and_clips() {
        assert_eq!(instability_index(0.0, 0.02), 0);
        // 0.0199 / 0.02 * 25 = 24.875 -> 24
        assert_eq!(instability_index(0.0199, 0.02), 24);
        assert_eq!(instability_index(0.02, 0.02), 25);
        assert_eq!(instability_index(1.0, 0.02), 100);
    }

    #[test]
    fn state_thresholds() {
        assert_eq!(InstabilityState::classify(24), InstabilityState::Normal);
        assert_eq!(InstabilityState::classify(25), InstabilityState::Elevated);
        assert_eq!(InstabilityState::classify(50), InstabilityState::Stressed);
        assert_eq!(InstabilityState::classify(75), InstabilityState::Critical);
    }

    #[test]
    fn direction_band() {
        assert_eq!(Direction::classify(1.03, 1.0), Direction::Increasing);
        assert_eq!(Direction::classify(0.97, 1.0), Direction::Decreasing);
        assert_eq!(Direction::classify(1.01, 1.0), Direction::Stable);
    }

    #[test]
    fn regime_table_is_complete() {
        let table = RegimeTable::global();
        assert_eq!(table.len(), 7);
        let btc = table.lookup("bitcoin").unwrap();
        assert_eq!((btc.theta, btc.kappa, btc.sigma), (0.78, 1.45, 0.12));
        assert_eq!(table.get("fed_funds").unwrap().name, "FED FUNDS");
        let avg = table.average_r_squared();
        assert!((avg - 0.946857).abs() < 1e-5);
    }

    #[test]
    fn unknown_regime_fails() {
        let engine = OracleEngine::default();
        assert_eq!(
            engine.predict("tulips", 0.04),
            Err(KernelError::UnknownRegime("tulips".to_string()))
        );
    }

    #[test]
    fn invalid_volatility_rejected_before_recurrence() {
        let engine = OracleEngine::default();
        assert!(matches!(
            engine.predict("oil", -0.1),
            Err(KernelError::NegativeVolatility { .. })
        ));
        assert!(matches!(
            engine.predict("oil", f64::NAN),
            Err(KernelError::NonFinite { .. })
        ));
        assert_eq!(engine.status().total_predictions, 0);
    }

    #[test]
    fn empty_history_uses_neutral_rank() {
        let engine = OracleEngine::default();
        let rec = engine.predict("bitcoin", 0.04).unwrap();
        assert_eq!(rec.predicted_volatility, 0.78 * 0.04);
        assert_eq!(rec.instability, 50);
        assert_eq!(rec.state, InstabilityState::Stressed);
        assert_eq!(rec.direction, Direction::Decreasing);
        assert!((rec.regime_score - 95.4).abs() < 1e-9);
    }

    #[test]
    fn predict_with_params_returns_the_regime_used() {
        let engine = OracleEngine::default();
        let (rec, params) = engine.predict_with_params("copper", 0.03).unwrap();
        assert_eq!(params.id, "copper");
        assert_eq!(rec.regime, params.id);
        assert_eq!(rec.regime_score, params.r_squared * 100.0);
        assert_eq!(engine.status().total_predictions, 1);
        assert!(engine.predict_with_params("tulips", 0.03).is_err());
    }

    #[test]
    fn history_buffer_truncates_oldest() {
        let buf = HistoryBuffer::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            buf.push("oil", v);
        }
        assert_eq!(buf.snapshot("oil"), vec![2.0, 3.0, 4.0]);
        assert_eq!(buf.len("copper"), 0);
    }

    #[test]
    fn engines_with_private_buffers_do_not_interfere() {
        let a = OracleEngine::default();
        let b = OracleEngine::default();
        for i in 0..50 {
            a.observe("oil", 0.01 + i as f64 * 0.001).unwrap();
        }
        assert_eq!(a.history().len("oil"), 50);
        assert_eq!(b.history().len("oil"), 0);
        let ra = a.predict("oil", 0.1).unwrap();
        let rb = b.predict("oil", 0.1).unwrap();
        assert!(ra.predicted_volatility > rb.predicted_volatility);
    }

    #[test]
    fn shared_buffer_is_visible_to_both_engines() {
        let cfg = KernelConfig::default();
        let shared = Arc::new(HistoryBuffer::new(cfg.history_capacity));
        let a = OracleEngine::with_history(&cfg, Arc::clone(&shared));
        let b = OracleEngine::with_history(&cfg, shared);
        a.observe("covid", 0.03).unwrap();
        assert_eq!(b.history().len("covid"), 1);
    }

    #[test]
    fn predict_all_skips_unknown_and_tracks_latest() {
        let engine = OracleEngine::default();
        let out = engine
            .predict_all([("bitcoin", 0.045), ("unobtainium", 0.1), ("oil", 0.032)])
            .unwrap();
        assert_eq!(out.len(), 2);
        engine.predict("bitcoin", 0.01).unwrap();
        let latest = engine.latest_predictions();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].regime, "bitcoin");
        assert_eq!(latest[0].volatility, 0.01);

        let status = engine.status();
        assert_eq!(status.regimes, 7);
        assert_eq!(status.total_predictions, 3);
        assert_eq!(status.history_sizes.len(), 7);
    }

    #[test]
    fn record_serializes_with_readable_enums() {
        let engine = OracleEngine::default();
        let rec = engine.predict("copper", 0.028).unwrap();
        let json = serde_json::to_value(&rec).unwrap();
        // 0.028 / 0.02 * 25 = 35
        assert_eq!(json["state"], "elevated");
        assert_eq!(json["name"], "COPPER");
        assert!(json["direction"].is_string());
    }
}
