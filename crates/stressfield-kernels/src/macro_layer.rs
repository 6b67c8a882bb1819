//! # Macro Stress Layer
//!
//! Scores four macro factors into a signed stress reading and scales a base
//! volatility by it:
//!
//! ```text
//! score = (sentiment·geo + (1 - spending)·materials) · nash_strength
//!
//! score <  0:  adjusted = base · (1 + |score| · shock_coef(score, geo))
//! score >= 0:  adjusted = base · (1 + score)
//! ```
//!
//! followed by fixed multiplicative bumps for extreme rank, high geopolitical
//! risk and weak spending. The label and `score_confidence` are deterministic
//! functions of the inputs; neither is a calibrated probability.
//!
//! The extended variant first blends the macro score with the combined
//! systemic stress through a convex weight `lambda_macro`, then applies the
//! same shock, bump and label logic to the blend.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ensure_finite, ensure_range};
use crate::systemic::SystemicReading;

pub const DEFAULT_NASH_STRENGTH: f64 = 0.25;
pub const DEFAULT_RANK: f64 = 0.5;
pub const DEFAULT_LAMBDA_MACRO: f64 = 0.5;

/// Floor applied to the adjusted volatility.
const MIN_ADJUSTED_VOL: f64 = 0.001;
/// Label thresholds on the score.
const CRISIS_THRESHOLD: f64 = -0.35;
const STEADY_THRESHOLD: f64 = 0.35;

fn neutral() -> f64 {
    0.5
}

/// Per-call macro factor vector. Missing fields deserialize to 0.5.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroFactors {
    #[serde(default = "neutral")]
    pub media_sentiment: f64,
    #[serde(default = "neutral")]
    pub spending_habits: f64,
    #[serde(default = "neutral")]
    pub war_conflict: f64,
    #[serde(default = "neutral")]
    pub materials_avail: f64,
}

impl Default for MacroFactors {
    fn default() -> Self {
        Self {
            media_sentiment: 0.5,
            spending_habits: 0.5,
            war_conflict: 0.5,
            materials_avail: 0.5,
        }
    }
}

impl MacroFactors {
    #[must_use]
    pub const fn new(
        media_sentiment: f64,
        spending_habits: f64,
        war_conflict: f64,
        materials_avail: f64,
    ) -> Self {
        Self {
            media_sentiment,
            spending_habits,
            war_conflict,
            materials_avail,
        }
    }

    /// Tariff-shock scenario: negative media, soft spending, elevated conflict.
    #[must_use]
    pub const fn tariff_shock() -> Self {
        Self::new(-0.65, 0.42, 0.72, 0.55)
    }

    /// Acute stress scenario: strongly negative media and high conflict.
    #[must_use]
    pub const fn acute_stress() -> Self {
        Self::new(-0.80, 0.40, 0.75, 0.52)
    }

    /// Raw game score before strength scaling is applied.
    #[must_use]
    pub fn interaction(&self) -> f64 {
        self.media_sentiment * self.war_conflict
            + (1.0 - self.spending_habits) * self.materials_avail
    }

    fn check(&self) -> Result<()> {
        ensure_finite("media_sentiment", self.media_sentiment)?;
        ensure_finite("spending_habits", self.spending_habits)?;
        ensure_finite("war_conflict", self.war_conflict)?;
        ensure_finite("materials_avail", self.materials_avail)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MacroLabel {
    #[serde(rename = "CRISIS BREWING")]
    CrisisBrewing,
    #[serde(rename = "NEUTRAL")]
    Neutral,
    #[serde(rename = "STEADY")]
    Steady,
}

impl MacroLabel {
    #[must_use]
    pub fn classify(score: f64) -> Self {
        if score < CRISIS_THRESHOLD {
            Self::CrisisBrewing
        } else if score > STEADY_THRESHOLD {
            Self::Steady
        } else {
            Self::Neutral
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CrisisBrewing => "CRISIS BREWING",
            Self::Neutral => "NEUTRAL",
            Self::Steady => "STEADY",
        }
    }
}

/// Output of the macro layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroReading {
    pub adjusted_vol: f64,
    /// Score the shock, bump and label logic ran on.
    pub score: f64,
    /// `0.70 + 0.30·|score|`, +0.05 (capped at 0.99) under high conflict.
    pub score_confidence: f64,
    pub label: MacroLabel,
    /// Macro-only score. Equal to `score` for the plain layer.
    pub raw_score: f64,
}

/// Output of the systemic-blended macro layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroSystemicReading {
    #[serde(flatten)]
    pub reading: MacroReading,
    pub lambda_macro: f64,
    /// Systemic reading blended in; `None` means macro-only fallback.
    pub systemic: Option<SystemicReading>,
}

fn shock_coef(score: f64, geo: f64) -> f64 {
    if score < -0.38 {
        0.75
    } else if score < -0.35 && geo > 0.7 {
        0.72
    } else if score < -0.30 {
        0.65
    } else {
        0.5
    }
}

fn apply_score(base_vol: f64, factors: &MacroFactors, rank: f64, score: f64, raw: f64) -> MacroReading {
    let geo = factors.war_conflict;
    let mut adjusted = if score < 0.0 {
        base_vol * (1.0 + score.abs() * shock_coef(score, geo))
    } else {
        base_vol * (1.0 + score)
    };

    if (rank - 0.5).abs() > 0.4 {
        adjusted *= 1.25;
    }
    if geo > 0.75 {
        adjusted *= 1.15;
    }
    if factors.spending_habits < 0.45 {
        adjusted *= 1.06;
    }

    let mut confidence = 0.70 + 0.30 * score.abs();
    if geo >= 0.75 {
        confidence = (confidence + 0.05).min(0.99);
    }

    MacroReading {
        adjusted_vol: adjusted.max(MIN_ADJUSTED_VOL),
        score,
        score_confidence: confidence,
        label: MacroLabel::classify(score),
        raw_score: raw,
    }
}

/// Macro-only stress reading.
pub fn predict_macro(
    base_vol: f64,
    factors: &MacroFactors,
    nash_strength: f64,
    rank: f64,
) -> Result<MacroReading> {
    let base_vol = ensure_finite("base_vol", base_vol)?;
    let nash_strength = ensure_finite("nash_strength", nash_strength)?;
    let rank = ensure_finite("rank", rank)?;
    factors.check()?;

    let score = factors.interaction() * nash_strength;
    Ok(apply_score(base_vol, factors, rank, score, score))
}

/// Macro reading with the score blended against systemic stress.
///
/// With `systemic = None` this is [`predict_macro`] plus bookkeeping.
pub fn predict_macro_systemic(
    base_vol: f64,
    factors: &MacroFactors,
    nash_strength: f64,
    rank: f64,
    systemic: Option<SystemicReading>,
    lambda_macro: f64,
) -> Result<MacroSystemicReading> {
    let lambda_macro = ensure_range("lambda_macro", lambda_macro, 0.0, 1.0)?;
    let macro_only = predict_macro(base_vol, factors, nash_strength, rank)?;
    let raw = macro_only.raw_score;

    let reading = match systemic {
        Some(s) => {
            let blended =
                (lambda_macro * raw + (1.0 - lambda_macro) * s.systemic_stress).clamp(-1.0, 1.0);
            apply_score(base_vol, factors, rank, blended, raw)
        }
        None => macro_only,
    };

    Ok(MacroSystemicReading {
        reading,
        lambda_macro,
        systemic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acute_stress_literal_is_crisis_brewing() {
        let f = MacroFactors::new(-0.8, 0.4, 0.75, 0.52);
        let r = predict_macro(0.04, &f, 1.25, 0.5).unwrap();
        // (-0.6 + 0.312) · 1.25 = -0.36
        assert!((r.score + 0.36).abs() < 1e-12);
        assert_eq!(r.label, MacroLabel::CrisisBrewing);
        assert_eq!(r.score, r.raw_score);
        assert_eq!(f, MacroFactors::acute_stress());
    }

    #[test]
    fn strongly_positive_inputs_are_steady() {
        let f = MacroFactors::new(0.9, 0.1, 0.9, 0.9);
        let r = predict_macro(0.04, &f, 1.0, 0.5).unwrap();
        assert!(r.score > 0.35);
        assert_eq!(r.label, MacroLabel::Steady);
        assert!(r.adjusted_vol > 0.04);
    }

    #[test]
    fn defaults_are_neutral() {
        let r = predict_macro(0.04, &MacroFactors::default(), DEFAULT_NASH_STRENGTH, DEFAULT_RANK)
            .unwrap();
        // (0.25 + 0.25) · 0.25 = 0.125
        assert!((r.score - 0.125).abs() < 1e-12);
        assert_eq!(r.label, MacroLabel::Neutral);
        assert!((r.adjusted_vol - 0.04 * 1.125).abs() < 1e-12);
        assert!((r.score_confidence - (0.70 + 0.30 * 0.125)).abs() < 1e-12);
    }

    #[test]
    fn shock_tiers() {
        assert_eq!(shock_coef(-0.40, 0.0), 0.75);
        assert_eq!(shock_coef(-0.36, 0.71), 0.72);
        assert_eq!(shock_coef(-0.36, 0.50), 0.65);
        assert_eq!(shock_coef(-0.31, 0.90), 0.65);
        assert_eq!(shock_coef(-0.10, 0.90), 0.5);
    }

    #[test]
    fn bumps_multiply() {
        // score = 0 so only bumps move the base.
        let f = MacroFactors::new(0.0, 1.0, 0.8, 0.0);
        let r = predict_macro(1.0, &f, 1.0, 0.95).unwrap();
        assert!((r.adjusted_vol - 1.25 * 1.15).abs() < 1e-12);
        let f = MacroFactors::new(0.0, 0.4, 0.5, 0.0);
        let r = predict_macro(1.0, &f, 1.0, 0.5).unwrap();
        assert!((r.adjusted_vol - 1.06).abs() < 1e-12);
    }

    #[test]
    fn adjusted_vol_is_floored() {
        let r = predict_macro(0.0, &MacroFactors::default(), 0.25, 0.5).unwrap();
        assert_eq!(r.adjusted_vol, MIN_ADJUSTED_VOL);
    }

    #[test]
    fn confidence_caps_at_099() {
        let f = MacroFactors::new(-1.0, 0.0, 1.0, 0.0);
        let r = predict_macro(0.04, &f, 5.0, 0.5).unwrap();
        assert_eq!(r.score_confidence, 0.99);
    }

    #[test]
    fn non_finite_inputs_rejected() {
        let f = MacroFactors::new(f64::NAN, 0.5, 0.5, 0.5);
        assert!(predict_macro(0.04, &f, 0.25, 0.5).is_err());
        assert!(predict_macro(f64::INFINITY, &MacroFactors::default(), 0.25, 0.5).is_err());
    }

    #[test]
    fn systemic_blend_is_convex() {
        let f = MacroFactors::acute_stress();
        let systemic = SystemicReading {
            systemic_stress: 0.4,
            ..SystemicReading::default()
        };
        let r = predict_macro_systemic(0.04, &f, 1.25, 0.5, Some(systemic), 0.5).unwrap();
        assert!((r.reading.raw_score + 0.36).abs() < 1e-12);
        assert!((r.reading.score - 0.02).abs() < 1e-12);
        assert_eq!(r.reading.label, MacroLabel::Neutral);
        assert_eq!(r.systemic, Some(systemic));
    }

    #[test]
    fn missing_systemic_falls_back_to_macro_only() {
        let f = MacroFactors::tariff_shock();
        let plain = predict_macro(0.04, &f, 0.25, 0.5).unwrap();
        let ext = predict_macro_systemic(0.04, &f, 0.25, 0.5, None, 0.5).unwrap();
        assert_eq!(ext.reading, plain);
        assert!(ext.systemic.is_none());
    }

    #[test]
    fn lambda_endpoints() {
        let f = MacroFactors::acute_stress();
        let s = SystemicReading {
            systemic_stress: -0.9,
            ..SystemicReading::default()
        };
        let all_macro = predict_macro_systemic(0.04, &f, 1.25, 0.5, Some(s), 1.0).unwrap();
        assert!((all_macro.reading.score + 0.36).abs() < 1e-12);
        let all_sys = predict_macro_systemic(0.04, &f, 1.25, 0.5, Some(s), 0.0).unwrap();
        assert!((all_sys.reading.score + 0.9).abs() < 1e-12);
        assert!(predict_macro_systemic(0.04, &f, 1.25, 0.5, Some(s), 1.2).is_err());
    }

    #[test]
    fn missing_factor_fields_default_to_half() {
        let f: MacroFactors = serde_json::from_str(r#"{"war_conflict": 0.9}"#).unwrap();
        assert_eq!(f.media_sentiment, 0.5);
        assert_eq!(f.war_conflict, 0.9);
        let label = serde_json::to_string(&MacroLabel::CrisisBrewing).unwrap();
        assert_eq!(label, "\"CRISIS BREWING\"");
    }
}
