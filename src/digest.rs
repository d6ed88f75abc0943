use crate::error::{Error, Result};
use crate::keys::PublicParams;
use crate::utils;
use num_bigint_dig::BigUint;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;

/// Bytes squeezed beyond the modulus width, so the reduction mod `n` is
/// close to uniform.
const OVERSAMPLE_BYTES: usize = 16;

/// The RSA plaintext derived from a message: SHAKE256 output read as a
/// big-endian integer and reduced modulo `n`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Digest(BigUint);

impl Digest {
    pub fn derive(message: &[u8], params: &PublicParams) -> Self {
        let mut hasher = Shake256::default();
        hasher.update(message);
        let mut reader = hasher.finalize_xof();

        let mut out = vec![0u8; params.modulus_len() + OVERSAMPLE_BYTES];
        reader.read(&mut out);

        Self(BigUint::from_bytes_be(&out) % params.n())
    }

    pub fn from_biguint(value: BigUint, params: &PublicParams) -> Result<Self> {
        if &value >= params.n() {
            return Err(Error::OutOfRange("digest"));
        }
        Ok(Self(value))
    }

    /// Decodes a fixed-width digest as produced by [`Digest::to_bytes`].
    pub fn from_bytes(bytes: &[u8], params: &PublicParams) -> Result<Self> {
        let value = utils::from_be_bytes_exact(bytes, params.modulus_len())?;
        Self::from_biguint(value, params)
    }

    pub fn to_bytes(&self, params: &PublicParams) -> Result<Vec<u8>> {
        utils::to_be_bytes_padded(&self.0, params.modulus_len())
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::tests::toy_key;

    #[test]
    fn derive_is_deterministic_and_reduced() -> Result<()> {
        let key = toy_key();
        let params = key.public_params();
        for msg in [&b""[..], &b"Candidate A"[..], &b"Candidate B"[..], &[0xffu8; 300][..]] {
            let a = Digest::derive(msg, params);
            let b = Digest::derive(msg, params);
            assert_eq!(a, b);
            assert!(a.as_biguint() < params.n());
            assert_eq!(a.to_bytes(params)?.len(), params.modulus_len());
        }
        assert_ne!(
            Digest::derive(b"Candidate A", params),
            Digest::derive(b"Candidate B", params)
        );
        Ok(())
    }

    #[test]
    fn digest_must_be_below_modulus() {
        let key = toy_key();
        let params = key.public_params();
        assert!(matches!(
            Digest::from_biguint(BigUint::from(3233u32), params),
            Err(Error::OutOfRange("digest"))
        ));
        assert!(matches!(
            Digest::from_bytes(&[0x41], params),
            Err(Error::InvalidLength { expected: 2, actual: 1 })
        ));
        assert_eq!(
            Digest::from_bytes(&[0x00, 0x41], params).unwrap().as_biguint(),
            &BigUint::from(65u32)
        );
    }
}
