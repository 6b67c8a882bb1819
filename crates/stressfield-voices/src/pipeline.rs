//! Address verification pipeline.
//!
//! validate → derive profile → bitcoin oracle forecast → 33 Voices verdict →
//! serializable record. The record's JSON field names are the external
//! contract; Rust field names may differ where the JSON name would mislead
//! (`confidence` carries the voice match ratio).

use serde::{Deserialize, Serialize};
use stressfield_kernels::{KernelConfig, OracleEngine};

use crate::address::{AddressProfile, validate_address};
use crate::voices;

/// Regime the pipeline forecasts under.
pub const PIPELINE_REGIME: &str = "bitcoin";
/// Forecast volatility above which the address is reported as tail.
pub const TAIL_VOLATILITY: f64 = 0.85;
/// Characters of the address echoed back before truncation.
const ADDRESS_ECHO: usize = 12;

pub const METHOD: &str = "33_voices_real";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolRegime {
    Normal,
    Tail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSuccess {
    pub address: String,
    /// Forecast volatility rounded to 4 decimals.
    pub volatility: f64,
    #[serde(rename = "confidence")]
    pub match_ratio: f64,
    /// `(vol - benchmark) / benchmark` rendered as `{:+.2}σ`.
    pub outperformance_vs_stoch_vol_levy: String,
    pub r_squared: f64,
    pub verified: bool,
    pub method: String,
    pub status: RecordStatus,
    pub regime: VolRegime,
    pub is_tail: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationFailure {
    pub address: String,
    pub error: String,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerificationRecord {
    Success(VerificationSuccess),
    Failure(VerificationFailure),
}

impl VerificationRecord {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn status(&self) -> RecordStatus {
        match self {
            Self::Success(s) => s.status,
            Self::Failure(f) => f.status,
        }
    }

    fn failure(address: String, error: impl ToString) -> Self {
        Self::Failure(VerificationFailure {
            address,
            error: error.to_string(),
            status: RecordStatus::Error,
        })
    }
}

/// Runs the verification pipeline against its own oracle engine.
#[derive(Debug, Default)]
pub struct Verifier {
    oracle: OracleEngine,
}

impl Verifier {
    #[must_use]
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            oracle: OracleEngine::new(config),
        }
    }

    #[must_use]
    pub fn with_oracle(oracle: OracleEngine) -> Self {
        Self { oracle }
    }

    #[must_use]
    pub fn oracle(&self) -> &OracleEngine {
        &self.oracle
    }

    /// Verify one address. Never panics; failures come back as
    /// [`VerificationRecord::Failure`].
    ///
    /// Validation looks at the trimmed address, but the profile hash, the
    /// echo and the voices all see `raw` as given.
    #[must_use]
    pub fn verify_address(&self, raw: &str) -> VerificationRecord {
        if let Err(e) = validate_address(raw) {
            return VerificationRecord::failure("unknown".to_string(), e);
        }
        let address = raw;
        let echo = echo_address(address);

        let profile = AddressProfile::derive(address);
        let (prediction, params) = match self
            .oracle
            .predict_with_params(PIPELINE_REGIME, profile.volatility_proxy)
        {
            Ok(p) => p,
            Err(e) => return VerificationRecord::failure(echo, e),
        };
        let r_squared = params.r_squared;

        let vol = prediction.predicted_volatility;
        let outperformance = (vol - profile.benchmark) / profile.benchmark;
        let verdict = voices::verify(address);
        let is_tail = vol > TAIL_VOLATILITY;

        VerificationRecord::Success(VerificationSuccess {
            address: echo,
            volatility: (vol * 1e4).round() / 1e4,
            match_ratio: verdict.match_ratio,
            outperformance_vs_stoch_vol_levy: format!("{outperformance:+.2}σ"),
            r_squared,
            verified: verdict.passed,
            method: METHOD.to_string(),
            status: RecordStatus::Success,
            regime: if is_tail { VolRegime::Tail } else { VolRegime::Normal },
            is_tail,
        })
    }
}

fn echo_address(address: &str) -> String {
    if address.chars().count() > ADDRESS_ECHO {
        let head: String = address.chars().take(ADDRESS_ECHO).collect();
        format!("{head}...")
    } else {
        address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETH: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    #[test]
    fn success_record_shape() {
        let v = Verifier::default();
        let rec = v.verify_address(ETH);
        let VerificationRecord::Success(s) = &rec else {
            panic!("expected success, got {rec:?}");
        };
        assert_eq!(s.address, "0x742d35Cc66...");
        assert_eq!(s.r_squared, 0.954);
        assert!(!s.verified);
        assert_eq!(s.match_ratio, 0.0);
        assert_eq!(s.method, METHOD);
        assert!(!s.is_tail);
        assert_eq!(s.regime, VolRegime::Normal);

        // Empty history: rank 0.5, so the forecast is θ·proxy.
        let proxy = AddressProfile::derive(ETH).volatility_proxy;
        assert!((s.volatility - (0.78 * proxy * 1e4).round() / 1e4).abs() < 1e-12);
        assert!(s.outperformance_vs_stoch_vol_levy.ends_with('σ'));
        assert!(s.outperformance_vs_stoch_vol_levy.starts_with('-'));
    }

    #[test]
    fn json_uses_contract_field_names() {
        let rec = Verifier::default().verify_address(ETH);
        let json = serde_json::to_value(&rec).unwrap();
        for key in [
            "address",
            "volatility",
            "confidence",
            "outperformance_vs_stoch_vol_levy",
            "r_squared",
            "verified",
            "method",
            "status",
            "regime",
            "is_tail",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["status"], "success");
        assert_eq!(json["regime"], "normal");
        assert!(json.get("match_ratio").is_none());
    }

    #[test]
    fn invalid_address_yields_error_record() {
        let rec = Verifier::default().verify_address("short");
        assert_eq!(rec.status(), RecordStatus::Error);
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["address"], "unknown");
        assert_eq!(json["status"], "error");
        assert!(json["error"].as_str().unwrap().contains("too short"));
    }

    #[test]
    fn padded_address_is_hashed_as_given() {
        let padded = format!("  {ETH} ");
        let v = Verifier::default();
        let VerificationRecord::Success(s) = v.verify_address(&padded) else {
            panic!("padded address should validate");
        };
        let proxy = AddressProfile::derive(&padded).volatility_proxy;
        assert!((s.volatility - (0.78 * proxy * 1e4).round() / 1e4).abs() < 1e-12);
        assert_eq!(s.address, "  0x742d35Cc...");
        assert_ne!(
            AddressProfile::derive(&padded),
            AddressProfile::derive(ETH)
        );
    }

    #[test]
    fn short_valid_address_is_echoed_whole() {
        assert_eq!(echo_address("abcdefghij"), "abcdefghij");
        assert_eq!(echo_address("abcdefghijklm"), "abcdefghijkl...");
    }

    #[test]
    fn pipeline_does_not_grow_history() {
        let v = Verifier::default();
        v.verify_address(ETH);
        v.verify_address(ETH);
        assert_eq!(v.oracle().history().len(PIPELINE_REGIME), 0);
        assert_eq!(v.oracle().status().total_predictions, 2);
    }
}
