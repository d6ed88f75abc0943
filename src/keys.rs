use crate::error::{Error, Result};
use crate::utils::{self, serde_biguint};
use num_bigint_dig::BigUint;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::der::pem;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, LineEnding};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use zeroize::{Zeroize, Zeroizing};

/// Smallest modulus `AuthorityKeyPair::generate` will produce.
pub const MIN_MODULUS_BITS: usize = 2048;

/// The half of the authority key that may leave the authority: `(n, e)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicParams {
    #[serde(with = "serde_biguint")]
    n: BigUint,
    #[serde(with = "serde_biguint")]
    e: BigUint,
}

impl PublicParams {
    pub fn new(n: BigUint, e: BigUint) -> Result<Self> {
        // [2, n-1] must hold at least one candidate blinding factor
        if n <= BigUint::from(3u8) {
            return Err(Error::InvalidKey("modulus is too small".into()));
        }
        if e <= BigUint::from(1u8) || e >= n {
            return Err(Error::InvalidKey("public exponent out of range".into()));
        }
        Ok(Self { n, e })
    }

    pub fn n(&self) -> &BigUint {
        &self.n
    }

    pub fn e(&self) -> &BigUint {
        &self.e
    }

    /// Width in bytes of every digest and signature under these parameters.
    pub fn modulus_len(&self) -> usize {
        utils::modulus_len(&self.n)
    }
}

impl From<&RsaPublicKey> for PublicParams {
    fn from(key: &RsaPublicKey) -> Self {
        Self {
            n: key.n().clone(),
            e: key.e().clone(),
        }
    }
}

/// Container format of a PEM-encoded public key, taken from the parsed PEM
/// label rather than from the text around it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublicKeyEncoding {
    /// `RSA PUBLIC KEY`
    Pkcs1,
    /// `PUBLIC KEY`
    Spki,
}

impl PublicKeyEncoding {
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self> {
        match pem::decode_label(pem_bytes).map_err(pem_error)? {
            "RSA PUBLIC KEY" => Ok(Self::Pkcs1),
            "PUBLIC KEY" => Ok(Self::Spki),
            other => Err(Error::KeyMaterial(format!(
                "unsupported public key label {}",
                other
            ))),
        }
    }
}

/// Container format of a PEM-encoded private key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrivateKeyEncoding {
    /// `RSA PRIVATE KEY`
    Pkcs1,
    /// `PRIVATE KEY`
    Pkcs8,
}

impl PrivateKeyEncoding {
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self> {
        match pem::decode_label(pem_bytes).map_err(pem_error)? {
            "RSA PRIVATE KEY" => Ok(Self::Pkcs1),
            "PRIVATE KEY" => Ok(Self::Pkcs8),
            other => Err(Error::KeyMaterial(format!(
                "unsupported private key label {}",
                other
            ))),
        }
    }
}

fn pem_error(e: pem::Error) -> Error {
    Error::KeyMaterial(format!("malformed pem: {}", e))
}

fn pem_text(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| Error::KeyMaterial("pem is not utf-8".into()))
}

pub fn parse_public_key(pem_bytes: &[u8]) -> Result<(PublicKeyEncoding, RsaPublicKey)> {
    let encoding = PublicKeyEncoding::from_pem(pem_bytes)?;
    let text = pem_text(pem_bytes)?;
    let key = match encoding {
        PublicKeyEncoding::Pkcs1 => RsaPublicKey::from_pkcs1_pem(text)
            .map_err(|e| Error::KeyMaterial(e.to_string()))?,
        PublicKeyEncoding::Spki => RsaPublicKey::from_public_key_pem(text)
            .map_err(|e| Error::KeyMaterial(e.to_string()))?,
    };
    Ok((encoding, key))
}

pub fn parse_private_key(pem_bytes: &[u8]) -> Result<(PrivateKeyEncoding, RsaPrivateKey)> {
    let encoding = PrivateKeyEncoding::from_pem(pem_bytes)?;
    let text = pem_text(pem_bytes)?;
    let key = match encoding {
        PrivateKeyEncoding::Pkcs1 => RsaPrivateKey::from_pkcs1_pem(text)
            .map_err(|e| Error::KeyMaterial(e.to_string()))?,
        PrivateKeyEncoding::Pkcs8 => RsaPrivateKey::from_pkcs8_pem(text)
            .map_err(|e| Error::KeyMaterial(e.to_string()))?,
    };
    Ok((encoding, key))
}

/// Reads and parses a public key file. A missing or unreadable file is
/// `KeyMaterial`, like the authority's own key files.
pub fn load_public_key(path: &Path) -> Result<(PublicKeyEncoding, RsaPublicKey)> {
    parse_public_key(&read_key_file(path)?)
}

/// Private exponent, wiped from memory when dropped.
struct PrivateExponent(BigUint);

impl Drop for PrivateExponent {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// The authority's RSA key for one epoch.
///
/// `d` never leaves this type: it is not serializable, it is redacted from
/// `Debug`, and only the crate's signer reads it.
pub struct AuthorityKeyPair {
    public: PublicParams,
    d: PrivateExponent,
    // kept for keys that came with their primes, so they can be exported
    source: Option<RsaPrivateKey>,
}

impl AuthorityKeyPair {
    pub fn generate(bits: usize) -> Result<Self> {
        Self::generate_with_rng(&mut OsRng, bits)
    }

    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R, bits: usize) -> Result<Self> {
        if bits < MIN_MODULUS_BITS {
            return Err(Error::KeyGenerationFailure(format!(
                "modulus of {} bits requested, at least {} required",
                bits, MIN_MODULUS_BITS
            )));
        }
        let key = RsaPrivateKey::new(rng, bits)
            .map_err(|e| Error::KeyGenerationFailure(e.to_string()))?;
        tracing::info!(bits, "generated authority key pair");
        Self::from_rsa(key)
    }

    /// Builds a key pair from raw integers. Fails unless `(n, e, d)` round
    /// trips a probe value.
    pub fn from_components(n: BigUint, e: BigUint, d: BigUint) -> Result<Self> {
        let public = PublicParams::new(n, e)?;
        if d <= BigUint::from(1u8) || &d >= public.n() {
            return Err(Error::InvalidKey("private exponent out of range".into()));
        }
        let probe = BigUint::from(2u8);
        let c = utils::modpow(&probe, public.e(), public.n());
        if utils::modpow(&c, &d, public.n()) != probe {
            return Err(Error::InvalidKey(
                "private exponent does not invert the public exponent".into(),
            ));
        }
        Ok(Self {
            public,
            d: PrivateExponent(d),
            source: None,
        })
    }

    fn from_rsa(key: RsaPrivateKey) -> Result<Self> {
        key.validate()
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        let public = PublicParams::new(key.n().clone(), key.e().clone())?;
        Ok(Self {
            public,
            d: PrivateExponent(key.d().clone()),
            source: Some(key),
        })
    }

    /// Loads the key pair from its public and private PEM blobs. The two
    /// blobs must describe the same key.
    pub fn from_pem(public_pem: &[u8], private_pem: &[u8]) -> Result<Self> {
        if public_pem.is_empty() {
            return Err(Error::KeyMaterial("public key is empty".into()));
        }
        if private_pem.is_empty() {
            return Err(Error::KeyMaterial("private key is empty".into()));
        }
        let (public_encoding, public_key) = parse_public_key(public_pem)?;
        let (private_encoding, private_key) = parse_private_key(private_pem)?;
        tracing::debug!(?public_encoding, ?private_encoding, "parsed authority key material");

        if PublicParams::from(&public_key) != PublicParams::from(&private_key.to_public_key()) {
            return Err(Error::KeyMaterial(
                "public and private key do not belong together".into(),
            ));
        }
        Self::from_rsa(private_key)
    }

    pub fn load_files(public_path: &Path, private_path: &Path) -> Result<Self> {
        let public_pem = read_key_file(public_path)?;
        let private_pem = Zeroizing::new(read_key_file(private_path)?);
        let key = Self::from_pem(&public_pem, &private_pem)?;
        tracing::info!(
            public = %public_path.display(),
            bits = key.public.n().bits(),
            "loaded authority key pair"
        );
        Ok(key)
    }

    /// PKCS#1 PEM encodings of the public and private key.
    pub fn to_pem(&self) -> Result<(String, Zeroizing<String>)> {
        let key = self.source.as_ref().ok_or_else(|| {
            Error::KeyMaterial("key pair built from raw components cannot be exported".into())
        })?;
        let public = key
            .to_public_key()
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| Error::KeyMaterial(e.to_string()))?;
        let private = key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| Error::KeyMaterial(e.to_string()))?;
        Ok((public, private))
    }

    pub fn store_files(&self, public_path: &Path, private_path: &Path) -> Result<()> {
        let (public, private) = self.to_pem()?;
        fs::write(public_path, public.as_bytes())?;
        fs::write(private_path, private.as_bytes())?;
        tracing::info!(
            public = %public_path.display(),
            private = %private_path.display(),
            "stored authority key pair"
        );
        Ok(())
    }

    pub fn public_params(&self) -> &PublicParams {
        &self.public
    }

    pub(crate) fn d(&self) -> &BigUint {
        &self.d.0
    }
}

impl fmt::Debug for AuthorityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityKeyPair")
            .field("public", &self.public)
            .field("d", &"<redacted>")
            .finish()
    }
}

fn read_key_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        Error::KeyMaterial(format!("cannot read {}: {}", path.display(), e))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};

    /// The textbook key: p = 61, q = 53.
    pub(crate) fn toy_key() -> AuthorityKeyPair {
        AuthorityKeyPair::from_components(
            BigUint::from(3233u32),
            BigUint::from(17u32),
            BigUint::from(2753u32),
        )
        .unwrap()
    }

    #[test]
    fn public_params_hide_private_exponent() {
        let key = toy_key();
        let params = key.public_params();
        assert_eq!(params.n(), &BigUint::from(3233u32));
        assert_eq!(params.e(), &BigUint::from(17u32));
        assert_eq!(params.modulus_len(), 2);

        let json = serde_json::to_string(params).unwrap();
        assert_eq!(json, r#"{"n":"3233","e":"17"}"#);
        assert!(!format!("{:?}", key).contains("2753"));
    }

    #[test]
    fn from_components_rejects_mismatched_exponent() {
        let r = AuthorityKeyPair::from_components(
            BigUint::from(3233u32),
            BigUint::from(17u32),
            BigUint::from(2751u32),
        );
        assert!(matches!(r, Err(Error::InvalidKey(_))));

        let r = PublicParams::new(BigUint::from(3u32), BigUint::from(2u32));
        assert!(matches!(r, Err(Error::InvalidKey(_))));
    }

    #[test]
    fn generate_refuses_short_modulus() {
        let r = AuthorityKeyPair::generate(1024);
        assert!(matches!(r, Err(Error::KeyGenerationFailure(_))));
    }

    #[test]
    fn toy_key_cannot_be_exported() {
        assert!(matches!(toy_key().to_pem(), Err(Error::KeyMaterial(_))));
    }

    #[test]
    fn encoding_comes_from_pem_label() {
        let cert = b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        assert!(matches!(
            PublicKeyEncoding::from_pem(cert),
            Err(Error::KeyMaterial(_))
        ));
        assert!(matches!(
            PrivateKeyEncoding::from_pem(b"RSA PUBLIC KEY"),
            Err(Error::KeyMaterial(_))
        ));

        let spki = b"-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n";
        assert_eq!(PublicKeyEncoding::from_pem(spki).unwrap(), PublicKeyEncoding::Spki);
    }

    #[test]
    fn missing_key_material_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let r = AuthorityKeyPair::load_files(
            &dir.path().join("authority_public.pem"),
            &dir.path().join("authority_private.pem"),
        );
        assert!(matches!(r, Err(Error::KeyMaterial(_))));
        assert!(matches!(
            load_public_key(&dir.path().join("authority_public.pem")),
            Err(Error::KeyMaterial(_))
        ));
        assert!(matches!(
            AuthorityKeyPair::from_pem(b"", b""),
            Err(Error::KeyMaterial(_))
        ));
    }

    #[test]
    fn generated_key_round_trips_through_pem() -> Result<()> {
        let key = AuthorityKeyPair::generate(MIN_MODULUS_BITS)?;
        assert!(key.public_params().n().bits() >= MIN_MODULUS_BITS);
        assert_eq!(key.public_params().modulus_len(), 256);

        let dir = tempfile::tempdir()?;
        let public_path = dir.path().join("authority_public.pem");
        let private_path = dir.path().join("authority_private.pem");
        key.store_files(&public_path, &private_path)?;

        let (public, private) = key.to_pem()?;
        assert_eq!(
            PublicKeyEncoding::from_pem(public.as_bytes())?,
            PublicKeyEncoding::Pkcs1
        );
        assert_eq!(
            PrivateKeyEncoding::from_pem(private.as_bytes())?,
            PrivateKeyEncoding::Pkcs1
        );

        let loaded = AuthorityKeyPair::load_files(&public_path, &private_path)?;
        assert_eq!(loaded.public_params(), key.public_params());
        let (encoding, public_key) = load_public_key(&public_path)?;
        assert_eq!(encoding, PublicKeyEncoding::Pkcs1);
        assert_eq!(&PublicParams::from(&public_key), key.public_params());
        assert_eq!(loaded.d(), key.d());

        // SPKI public key next to a PKCS#8 private key
        let source = key.source.as_ref().unwrap();
        let spki = source
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let pkcs8 = source.to_pkcs8_pem(LineEnding::LF).unwrap();
        assert_eq!(
            PublicKeyEncoding::from_pem(spki.as_bytes())?,
            PublicKeyEncoding::Spki
        );
        assert_eq!(
            PrivateKeyEncoding::from_pem(pkcs8.as_bytes())?,
            PrivateKeyEncoding::Pkcs8
        );
        let reloaded = AuthorityKeyPair::from_pem(spki.as_bytes(), pkcs8.as_bytes())?;
        assert_eq!(reloaded.public_params(), key.public_params());

        // a private key from another epoch is rejected
        let other = RsaPrivateKey::new(&mut OsRng, 512).unwrap();
        let other_private = other.to_pkcs1_pem(LineEnding::LF).unwrap();
        assert!(matches!(
            AuthorityKeyPair::from_pem(public.as_bytes(), other_private.as_bytes()),
            Err(Error::KeyMaterial(_))
        ));
        Ok(())
    }
}
