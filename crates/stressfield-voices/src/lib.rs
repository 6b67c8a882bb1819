//! 33 Voices transforms and the address verification pipeline.
//!
//! - **Voices** (`voices`): 33 deterministic string transforms, fingerprint, verdict
//! - **Address** (`address`): address validation and the hash-derived profile
//! - **Pipeline** (`pipeline`): validate → forecast → verdict → [`VerificationRecord`]
//!
//! Nothing in this crate is an authentication or integrity mechanism.

#![forbid(unsafe_code)]

pub mod address;
pub mod pipeline;
pub mod voices;

pub use address::{AddressError, AddressProfile, validate_address};
pub use pipeline::{
    RecordStatus, VerificationFailure, VerificationRecord, VerificationSuccess, Verifier,
    VolRegime,
};
pub use voices::{
    CANONICAL_PHRASE, VOICE_COUNT, VoiceVerdict, all_voices, signature_fingerprint, transform,
    verify,
};
