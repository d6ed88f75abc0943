use crate::ballot_box::AnonymousBallot;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::keys::{AuthorityKeyPair, PublicParams};
use crate::utils::{self, modinv, modmul, modpow};
use num_bigint_dig::BigUint;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroize;

/// The random mask `r` the requester multiplies into its digest.
///
/// Never sent to the signer. Consumed by [`unblind`], so one factor can
/// not serve two blind operations, and wiped when dropped.
pub struct BlindingFactor(BigUint);

impl BlindingFactor {
    pub fn sample<R: RngCore + CryptoRng>(params: &PublicParams, rng: &mut R) -> Result<Self> {
        utils::sample_coprime(rng, params.n()).map(Self)
    }

    pub(crate) fn from_biguint(r: BigUint, params: &PublicParams) -> Result<Self> {
        let n = params.n();
        if r < BigUint::from(2u8) || &r >= n || !utils::is_coprime(&r, n) {
            return Err(Error::NonInvertibleBlindingFactor);
        }
        Ok(Self(r))
    }
}

impl Drop for BlindingFactor {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for BlindingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlindingFactor(<redacted>)")
    }
}

/// `digest * r^e mod n`, the only form of the digest the signer sees.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlindedDigest(BigUint);

impl BlindedDigest {
    /// Only the width is checked here; the signer rejects values `>= n`.
    pub fn from_bytes(bytes: &[u8], params: &PublicParams) -> Result<Self> {
        utils::from_be_bytes_exact(bytes, params.modulus_len()).map(Self)
    }

    pub fn to_bytes(&self, params: &PublicParams) -> Result<Vec<u8>> {
        utils::to_be_bytes_padded(&self.0, params.modulus_len())
    }
}

/// `blinded^d mod n`, as returned by the signer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlindSignature(BigUint);

impl BlindSignature {
    pub fn from_bytes(bytes: &[u8], params: &PublicParams) -> Result<Self> {
        let value = utils::from_be_bytes_exact(bytes, params.modulus_len())?;
        if &value >= params.n() {
            return Err(Error::OutOfRange("blind signature"));
        }
        Ok(Self(value))
    }

    pub fn to_bytes(&self, params: &PublicParams) -> Result<Vec<u8>> {
        utils::to_be_bytes_padded(&self.0, params.modulus_len())
    }
}

/// An ordinary RSA signature over a digest: `digest^d mod n`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(BigUint);

impl Signature {
    pub fn from_bytes(bytes: &[u8], params: &PublicParams) -> Result<Self> {
        let value = utils::from_be_bytes_exact(bytes, params.modulus_len())?;
        if &value >= params.n() {
            return Err(Error::OutOfRange("signature"));
        }
        Ok(Self(value))
    }

    pub fn to_bytes(&self, params: &PublicParams) -> Result<Vec<u8>> {
        utils::to_be_bytes_padded(&self.0, params.modulus_len())
    }
}

/// Blinds `digest` under a freshly sampled factor. The caller keeps the
/// factor until [`unblind`] and must never send it with the blinded digest.
pub fn blind<R: RngCore + CryptoRng>(
    digest: &Digest,
    params: &PublicParams,
    rng: &mut R,
) -> Result<(BlindedDigest, BlindingFactor)> {
    let factor = BlindingFactor::sample(params, rng)?;
    let blinded = blind_with_factor(digest, &factor, params)?;
    Ok((blinded, factor))
}

// y = m * r^e
pub(crate) fn blind_with_factor(
    digest: &Digest,
    factor: &BlindingFactor,
    params: &PublicParams,
) -> Result<BlindedDigest> {
    let n = params.n();
    // a digest derived under another modulus would break unblinding
    if digest.as_biguint() >= n {
        return Err(Error::OutOfRange("digest"));
    }
    let mask = modpow(&factor.0, params.e(), n);
    Ok(BlindedDigest(modmul(digest.as_biguint(), &mask, n)))
}

// s = s' * 1/r
pub fn unblind(
    blind_signature: &BlindSignature,
    factor: BlindingFactor,
    params: &PublicParams,
) -> Result<Signature> {
    let n = params.n();
    let r_inv = modinv(&factor.0, n).ok_or(Error::NonInvertibleBlindingFactor)?;
    Ok(Signature(modmul(&blind_signature.0, &r_inv, n)))
}

/// `signature^e mod n == digest`, compared as fixed-width byte strings.
pub fn verify(digest: &Digest, signature: &Signature, params: &PublicParams) -> bool {
    match (digest.to_bytes(params), signature.to_bytes(params)) {
        (Ok(d), Ok(s)) => verify_bytes(&d, &s, params),
        _ => false,
    }
}

/// Same as [`verify`] over wire encodings. Anything that is not exactly
/// `modulus_len` bytes, or not reduced mod `n`, fails.
pub fn verify_bytes(digest: &[u8], signature: &[u8], params: &PublicParams) -> bool {
    let k = params.modulus_len();
    if digest.len() != k {
        return false;
    }
    let s = match utils::from_be_bytes_exact(signature, k) {
        Ok(s) if &s < params.n() => s,
        _ => return false,
    };
    match utils::to_be_bytes_padded(&modpow(&s, params.e(), params.n()), k) {
        Ok(recovered) => utils::ct_eq(&recovered, digest),
        Err(_) => false,
    }
}

/// Represents the party that signs a blinded digest
/// without seeing the digest inside.
///
/// Signing is only reachable through [`crate::Authority`], which ties
/// every signature to one eligibility consumption.
#[derive(Clone, Debug)]
pub struct BlindSigner {
    key: Arc<AuthorityKeyPair>,
}

impl BlindSigner {
    pub fn new(key: Arc<AuthorityKeyPair>) -> Self {
        Self { key }
    }

    pub fn public_params(&self) -> &PublicParams {
        self.key.public_params()
    }

    /// `blinded^d mod n`.
    ///
    /// The private exponentiation runs on `blinded * rho^e` for a fresh
    /// `rho`, and the result is checked against the public exponent before
    /// it is released.
    pub(crate) fn sign_blinded<R: RngCore + CryptoRng>(
        &self,
        blinded: &BlindedDigest,
        rng: &mut R,
    ) -> Result<BlindSignature> {
        let params = self.key.public_params();
        let (n, e) = (params.n(), params.e());
        let c = &blinded.0;
        if c >= n {
            return Err(Error::SigningFailure(
                "blinded digest not reduced modulo n".into(),
            ));
        }

        let rho = utils::sample_coprime(rng, n)?;
        let rho_inv = modinv(&rho, n).ok_or_else(|| {
            Error::SigningFailure("internal mask is not invertible".into())
        })?;
        let masked = modmul(c, &modpow(&rho, e, n), n);
        let s = modmul(&modpow(&masked, self.key.d(), n), &rho_inv, n);

        if &modpow(&s, e, n) != c {
            return Err(Error::SigningFailure(
                "signature failed its consistency check".into(),
            ));
        }
        tracing::debug!("signed blinded digest");
        Ok(BlindSignature(s))
    }
}

impl From<AuthorityKeyPair> for BlindSigner {
    fn from(key: AuthorityKeyPair) -> Self {
        Self::new(Arc::new(key))
    }
}

/// Represents the party that prepares a ballot and has it
/// signed without revealing it.
#[derive(Clone, Debug)]
pub struct BallotPreparer {
    params: PublicParams,
}

impl BallotPreparer {
    pub fn new(params: PublicParams) -> Self {
        Self { params }
    }

    pub fn public_params(&self) -> &PublicParams {
        &self.params
    }

    pub fn prepare(&self, message: &[u8]) -> Result<PreparedBallot> {
        self.prepare_with_rng(message, &mut OsRng)
    }

    pub fn prepare_with_rng<R: RngCore + CryptoRng>(
        &self,
        message: &[u8],
        rng: &mut R,
    ) -> Result<PreparedBallot> {
        let digest = Digest::derive(message, &self.params);
        let (blinded, factor) = blind(&digest, &self.params, rng)?;
        tracing::debug!("blinded ballot digest");
        Ok(PreparedBallot {
            params: self.params.clone(),
            digest,
            blinded,
            factor,
        })
    }
}

/// A ballot waiting for the authority's signature. Holds the blinding
/// factor, so it is the only thing able to finish the ballot.
#[derive(Debug)]
pub struct PreparedBallot {
    params: PublicParams,
    digest: Digest,
    blinded: BlindedDigest,
    factor: BlindingFactor,
}

impl PreparedBallot {
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn blinded_digest(&self) -> &BlindedDigest {
        &self.blinded
    }

    /// What gets sent to the authority.
    pub fn blinded_bytes(&self) -> Result<Vec<u8>> {
        self.blinded.to_bytes(&self.params)
    }

    /// Unblinds the authority's answer and checks the result before
    /// handing out the anonymous ballot.
    pub fn finish(self, blind_signature: &[u8]) -> Result<AnonymousBallot> {
        let PreparedBallot {
            params,
            digest,
            factor,
            ..
        } = self;
        let blind_signature = BlindSignature::from_bytes(blind_signature, &params)?;
        let signature = unblind(&blind_signature, factor, &params)?;
        if !verify(&digest, &signature, &params) {
            return Err(Error::VerificationFailure);
        }
        Ok(AnonymousBallot::new(
            digest.to_bytes(&params)?,
            signature.to_bytes(&params)?,
        ))
    }
}
