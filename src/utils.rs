use crate::error::{Error, Result};
use num_bigint_dig::{BigInt, BigUint, ModInverse, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Signed};
use rand::{CryptoRng, RngCore};

/// Resampling bound for blinding factors. For a real RSA modulus the chance
/// of a single non-coprime sample is about 2^-1000, so running out of
/// attempts means `n` is not a product of two large primes.
pub(crate) const MAX_BLINDING_ATTEMPTS: usize = 64;

// x^y mod n
pub(crate) fn modpow(base: &BigUint, exp: &BigUint, n: &BigUint) -> BigUint {
    base.modpow(exp, n)
}

// x * y mod n
pub(crate) fn modmul(x: &BigUint, y: &BigUint, n: &BigUint) -> BigUint {
    (x * y) % n
}

// 1/x mod n, if gcd(x, n) = 1
pub(crate) fn modinv(x: &BigUint, n: &BigUint) -> Option<BigUint> {
    let inv: BigInt = x.mod_inverse(n)?;
    // mod_inverse may hand back a negative representative
    let inv = if inv.is_negative() {
        inv.mod_floor(&BigInt::from_biguint(Sign::Plus, n.clone()))
    } else {
        inv
    };
    inv.to_biguint()
}

pub(crate) fn gcd(x: &BigUint, y: &BigUint) -> BigUint {
    x.gcd(y)
}

pub(crate) fn is_coprime(x: &BigUint, n: &BigUint) -> bool {
    gcd(x, n).is_one()
}

/// Samples `r` uniformly from `[2, n-1]` until `gcd(r, n) = 1`.
pub(crate) fn sample_coprime<R>(rng: &mut R, n: &BigUint) -> Result<BigUint>
where
    R: RngCore + CryptoRng + ?Sized,
{
    let low = BigUint::from(2u8);
    for _ in 0..MAX_BLINDING_ATTEMPTS {
        let r = rng.gen_biguint_range(&low, n);
        if is_coprime(&r, n) {
            return Ok(r);
        }
    }
    Err(Error::KeyInvariantViolation(MAX_BLINDING_ATTEMPTS))
}

/// Byte length of the modulus, i.e. the fixed width of every wire value.
pub(crate) fn modulus_len(n: &BigUint) -> usize {
    (n.bits() + 7) / 8
}

/// Big-endian encoding left-padded with zeros to exactly `len` bytes.
pub(crate) fn to_be_bytes_padded(x: &BigUint, len: usize) -> Result<Vec<u8>> {
    let raw = x.to_bytes_be();
    if raw.len() > len {
        return Err(Error::InvalidLength {
            expected: len,
            actual: raw.len(),
        });
    }
    let mut out = vec![0u8; len];
    out[len - raw.len()..].copy_from_slice(&raw);
    Ok(out)
}

/// Decodes a big-endian value that must be exactly `len` bytes wide.
pub(crate) fn from_be_bytes_exact(bytes: &[u8], len: usize) -> Result<BigUint> {
    if bytes.len() != len {
        return Err(Error::InvalidLength {
            expected: len,
            actual: bytes.len(),
        });
    }
    Ok(BigUint::from_bytes_be(bytes))
}

/// Equality over the full width of both slices, without early exit on the
/// first differing byte.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// see electionguard serialize/big_uint.rs
pub(crate) mod serde_biguint {
    use num_bigint_dig::BigUint;
    use num_traits::Num;
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_str_radix(10).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BigUint, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BigUint::from_str_radix(&s, 10).map_err(de::Error::custom)
    }
}

pub(crate) mod serde_hex {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn big(x: u64) -> BigUint {
        BigUint::from(x)
    }

    #[test]
    fn modular_helpers() {
        let n = big(3233);
        assert_eq!(modpow(&big(65), &big(17), &n), big(2790));
        assert_eq!(modmul(&big(3000), &big(3000), &n), big(3_000 * 3_000 % 3233));
        assert_eq!(gcd(&big(61 * 7), &n), big(61));

        let inv = modinv(&big(8), &n).unwrap();
        assert_eq!(modmul(&inv, &big(8), &n), big(1));
        assert!(modinv(&big(61), &n).is_none());
    }

    #[test]
    fn padding_keeps_leading_zeros() -> Result<()> {
        let n = big(3233);
        let k = modulus_len(&n);
        assert_eq!(k, 2);

        let bytes = to_be_bytes_padded(&big(65), k)?;
        assert_eq!(bytes, vec![0x00, 0x41]);
        assert_eq!(from_be_bytes_exact(&bytes, k)?, big(65));

        // a short encoding of the same number is a different wire value
        assert!(from_be_bytes_exact(&[0x41], k).is_err());
        assert!(to_be_bytes_padded(&big(0x1_0000), k).is_err());
        Ok(())
    }

    #[test]
    fn sampled_factors_are_coprime() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        // 15 and 21 make non-coprime draws common, so resampling is exercised
        for n in [15u64, 21, 77, 221, 3233, 1_000_003 * 999_983] {
            let n = big(n);
            for _ in 0..500 {
                let r = sample_coprime(&mut rng, &n)?;
                assert!(r >= big(2) && r < n);
                assert!(is_coprime(&r, &n));
            }
        }
        Ok(())
    }

    #[test]
    fn ct_eq_compares_full_width() {
        assert!(ct_eq(&[0, 1, 2], &[0, 1, 2]));
        assert!(!ct_eq(&[0, 1, 2], &[0, 1, 3]));
        assert!(!ct_eq(&[1, 2], &[0, 1, 2]));
    }
}
