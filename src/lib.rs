mod authority;
mod ballot_box;
mod blind_sigs;
mod config;
mod digest;
mod eligibility;
mod error;
mod keys;
mod utils;

pub use crate::authority::Authority;
pub use crate::ballot_box::{AnonymousBallot, AuditReport, BallotBox};
pub use crate::blind_sigs::{
    blind, unblind, verify, verify_bytes, BallotPreparer, BlindSignature, BlindSigner,
    BlindedDigest, BlindingFactor, PreparedBallot, Signature,
};
pub use crate::config::Config;
pub use crate::digest::Digest;
pub use crate::eligibility::{
    EligibilityGate, EligibilityRecord, EligibilityState, EligibilityStore,
    FileEligibilityStore, IdentityProof, MemoryEligibilityStore,
};
pub use crate::error::{Error, Result};
pub use crate::keys::{
    load_public_key, parse_private_key, parse_public_key, AuthorityKeyPair, PrivateKeyEncoding, PublicKeyEncoding,
    PublicParams, MIN_MODULUS_BITS,
};
