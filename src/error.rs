use thiserror::Error;

/// Specialisation of `std::Result`.
pub type Result<T, E = BlindSignatureError> = std::result::Result<T, E>;
pub type Error = BlindSignatureError;

#[derive(Error, Debug)]
/// error variants.
pub enum BlindSignatureError {
    #[error("key generation failed: {0}")]
    KeyGenerationFailure(String),

    #[error("authority key material unavailable: {0}")]
    KeyMaterial(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// No blinding factor coprime to `n` was found. Only possible when `n`
    /// is not a valid RSA modulus.
    #[error("no blinding factor coprime to the modulus after {0} attempts")]
    KeyInvariantViolation(usize),

    #[error("blinding factor has no inverse modulo n")]
    NonInvertibleBlindingFactor,

    #[error("{0} is not reduced modulo n")]
    OutOfRange(&'static str),

    #[error("{field} is not valid hex: {source}")]
    InvalidHex {
        field: &'static str,
        source: hex::FromHexError,
    },

    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("eligibility denied for {0}")]
    EligibilityDenied(String),

    #[error("identity {0} is already provisioned")]
    AlreadyProvisioned(String),

    #[error("An error occured when signing {0}")]
    SigningFailure(String),

    #[error("signature does not verify")]
    VerificationFailure,

    #[error("ballot already cast")]
    DuplicateBallot,

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
