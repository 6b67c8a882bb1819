//! Numeric core of stressfield.
//!
//! A family of bounded nonlinear recurrences over a price series and its
//! rolling volatility. Every kernel is a pure function of its inputs except
//! the oracle's history buffer, which is an explicit, injectable value.
//!
//! # Architecture
//!
//! Leaves first:
//! - **Probit** (`probit`): Acklam inverse normal CDF plus a tail-accelerated variant
//! - **Rolling statistics** (`rolling`): log returns, rolling volatility, percentile rank, tail regime
//! - **Oracle** (`oracle`): UVRK one-step volatility forecast over a static regime table
//! - **Systemic indices** (`systemic`): LCI, LSI, CSI, FSI and their combination
//! - **Macro layer** (`macro_layer`): macro factor score, optionally blended with systemic stress
//! - **BEAST** (`beast`): crisis-field recurrence with interaction and acceleration terms
//! - **Dynamical engine** (`dynamical`): persistent-state alternative with a stability precondition
//! - **Phase sweep** (`phase`): BEAST behavior over a (γ, η) grid
//! - **Configuration** (`config`): tunables with `STRESSFIELD_*` overrides
//!
//! Confidence-like outputs (`regime_score`, `score_confidence`) are
//! deterministic functions of the inputs, not calibrated probabilities.

#![forbid(unsafe_code)]

pub mod beast;
pub mod config;
pub mod dynamical;
pub mod error;
pub mod macro_layer;
pub mod oracle;
pub mod phase;
pub mod probit;
pub mod rolling;
pub mod systemic;

pub use beast::{
    BeastParams, BeastStep, MARKET_WARMUP, StressInputs, StressStepRecord, TAIL_FIELD_THRESHOLD,
    beast_from_market, beast_run, beast_run_inputs, beast_step, tail_lift,
};
pub use config::KernelConfig;
pub use dynamical::{
    DynamicalParams, DynamicalStepRecord, PRE_CRISIS_WINDOW, dynamical_from_market, pre_crisis_signal,
    run_dynamical, uvrk_norm,
};
pub use error::{KernelError, Result};
pub use macro_layer::{
    MacroFactors, MacroLabel, MacroReading, MacroSystemicReading, predict_macro,
    predict_macro_systemic,
};
pub use oracle::{
    Direction, EngineStatus, HistoryBuffer, InstabilityState, OracleEngine, PredictionRecord,
    RegimeParams, RegimeTable, uvrk_predict, uvrk_predict_noisy,
};
pub use phase::{PhasePoint, critical_gamma, phase_sweep};
pub use probit::{normal_cdf, probit, tail_accelerated_probit};
pub use rolling::{
    TailRegime, VarianceEstimator, log_returns, percentile_rank, realized_volatility,
    rolling_volatility,
};
pub use systemic::{SystemicReading, systemic_stress, systemic_stress_full};
