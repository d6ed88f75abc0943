use crate::error::Result;
use crate::keys::MIN_MODULUS_BITS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Authority settings, read from JSON. Every field has a default, so an
/// empty object is a valid configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub public_key_path: PathBuf,
    pub private_key_path: PathBuf,
    /// Modulus size for newly generated keys.
    pub key_bits: usize,
    /// Directory holding one eligibility record file per identity.
    pub eligibility_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            public_key_path: PathBuf::from("authority_public.pem"),
            private_key_path: PathBuf::from("authority_private.pem"),
            key_bits: MIN_MODULUS_BITS,
            eligibility_path: PathBuf::from("eligibility"),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let config = serde_json::from_slice(&fs::read(path)?)?;
        tracing::debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }
}
