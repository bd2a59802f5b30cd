//! Shamir 3-pass commutative encryption.
//!
//! Lets the client and the relay cooperatively lock/unlock a key-encryption
//! key without either party seeing the other's exponent.
//!
//! Registration:
//! 1. Client generates a random KEK and AEAD-encrypts the VRF keypair with it
//! 2. Client adds a temporary lock to the KEK → KEK_c
//! 3. Server adds its lock → KEK_cs
//! 4. Client removes its lock → KEK_s (stored)
//!
//! Unlock:
//! 1. Client adds a new temporary lock to KEK_s → KEK_st
//! 2. Server removes its lock → KEK_t
//! 3. Client removes its lock → KEK
//! 4. Client AEAD-decrypts the VRF keypair with the KEK

use base64ct::{Base64UrlUnpadded, Encoding};
use getrandom::getrandom;
use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};

use crate::config::{
    DEFAULT_SHAMIR_P_B64U, SHAMIR_AEAD_HKDF_INFO, SHAMIR_MIN_PRIME_BITS,
    SHAMIR_RANDOM_BYTES_OVERHEAD, SHAMIR_REJECTION_SAMPLING_MAX_ATTEMPTS,
};
use crate::crypto::{aead_open, aead_seal, hkdf_sha256};

#[derive(Debug, Clone, PartialEq)]
pub enum Shamir3PassError {
    InvalidPrime(String),
    PrimeTooSmall { bits: usize, min_bits: usize },
    ModularInverseNotFound,
    RandomGenerationFailed,
    EncryptionFailed(String),
    DecryptionFailed(String),
}

impl std::fmt::Display for Shamir3PassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Shamir3Pass error: {:?}", self)
    }
}

impl std::error::Error for Shamir3PassError {}

/// Lock keys: `e` adds a lock, `d = e⁻¹ (mod p-1)` removes it.
#[derive(Clone, Debug)]
pub struct LockKeys {
    pub e: BigUint,
    pub d: BigUint,
}

#[derive(Clone, Debug)]
pub struct Shamir3Pass {
    p: BigUint,
    p_minus_1: BigUint,
    min_k: BigUint,
    max_k: BigUint,
}

impl Shamir3Pass {
    /// Create an instance with the given prime (base64url big-endian).
    pub fn new(p_b64u: &str) -> Result<Self, Shamir3PassError> {
        let p = decode_biguint_b64u(p_b64u)
            .map_err(|_| Shamir3PassError::InvalidPrime("Invalid base64url encoding".to_string()))?;
        Self::new_with_biguint(p)
    }

    /// Create an instance with the default hardcoded prime.
    pub fn new_default() -> Self {
        let p = decode_biguint_b64u(DEFAULT_SHAMIR_P_B64U).expect("Invalid default prime");
        Self::new_with_biguint_unchecked(p)
    }

    fn new_with_biguint(p: BigUint) -> Result<Self, Shamir3PassError> {
        let bits = p.bits();
        if bits < SHAMIR_MIN_PRIME_BITS as u64 {
            return Err(Shamir3PassError::PrimeTooSmall {
                bits: bits as usize,
                min_bits: SHAMIR_MIN_PRIME_BITS,
            });
        }
        Ok(Self::new_with_biguint_unchecked(p))
    }

    fn new_with_biguint_unchecked(p: BigUint) -> Self {
        let one = BigUint::one();
        let two = &one + &one;
        let p_minus_1 = &p - &one;
        let p_minus_2 = &p - &two;

        // Security bound on random exponents.
        let min_k = if p.bits() >= 1024 {
            BigUint::from(1u128 << 64)
        } else {
            BigUint::from(1u64 << 32)
        };

        Shamir3Pass {
            p,
            p_minus_1,
            min_k,
            max_k: p_minus_2,
        }
    }

    pub fn p(&self) -> &BigUint {
        &self.p
    }

    pub fn p_b64u(&self) -> String {
        encode_biguint_b64u(&self.p)
    }

    pub fn modexp(&self, base: &BigUint, exp: &BigUint) -> BigUint {
        if self.p.is_zero() {
            return BigUint::zero();
        }
        base.modpow(exp, &self.p)
    }

    /// Modular inverse in the exponent group (mod p-1).
    pub fn modinv(&self, a: &BigUint) -> Option<BigUint> {
        let a_bigint = BigInt::from_biguint(Sign::Plus, a.clone());
        let m_bigint = BigInt::from_biguint(Sign::Plus, self.p_minus_1.clone());

        let (gcd, x, _) = extended_gcd(a_bigint, m_bigint.clone());
        if gcd != BigInt::one() {
            return None;
        }

        let mut x_mod = x % &m_bigint;
        if x_mod.sign() == Sign::Minus {
            x_mod += &m_bigint;
        }
        x_mod.to_biguint()
    }

    /// Random exponent in `[min_k, p-2]` with `gcd(k, p-1) = 1`, via
    /// rejection sampling.
    pub fn random_k(&self) -> Result<BigUint, Shamir3PassError> {
        let range = &self.max_k - &self.min_k;
        let bytes_needed = ((range.bits() + 7) / 8 + SHAMIR_RANDOM_BYTES_OVERHEAD as u64) as usize;

        for _ in 0..SHAMIR_REJECTION_SAMPLING_MAX_ATTEMPTS {
            let mut buf = vec![0u8; bytes_needed];
            getrandom(&mut buf).map_err(|_| Shamir3PassError::RandomGenerationFailed)?;

            let candidate = BigUint::from_bytes_be(&buf) % &range;
            let k = &self.min_k + candidate;

            if k.gcd(&self.p_minus_1) == BigUint::one() {
                return Ok(k);
            }
        }

        Err(Shamir3PassError::RandomGenerationFailed)
    }

    /// Generate lock keys `(e, d)` with `e·d ≡ 1 (mod p-1)`.
    pub fn generate_lock_keys(&self) -> Result<LockKeys, Shamir3PassError> {
        let e = self.random_k()?;
        let d = self
            .modinv(&e)
            .ok_or(Shamir3PassError::ModularInverseNotFound)?;
        Ok(LockKeys { e, d })
    }

    /// AEAD-encrypt `plaintext` under a fresh random KEK.
    /// Returns `(nonce-prefixed ciphertext, kek)`.
    pub fn encrypt_with_random_kek(
        &self,
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, BigUint), Shamir3PassError> {
        let kek = self.random_k()?;
        let ciphertext = self.encrypt_with_kek(&kek, plaintext)?;
        Ok((ciphertext, kek))
    }

    /// AEAD-decrypt a nonce-prefixed ciphertext with the provided KEK.
    pub fn decrypt_with_kek(
        &self,
        ciphertext: &[u8],
        kek: &BigUint,
    ) -> Result<Vec<u8>, Shamir3PassError> {
        if ciphertext.len() < 12 {
            return Err(Shamir3PassError::DecryptionFailed(
                "Ciphertext too short".to_string(),
            ));
        }
        let (nonce, ct) = ciphertext.split_at(12);
        let key = self.derive_aead_key(&kek.to_bytes_be())?;
        aead_open(&key, nonce, &[], ct).map_err(Shamir3PassError::DecryptionFailed)
    }

    /// Add a lock: `base^exponent mod p`.
    pub fn add_lock(&self, base: &BigUint, exponent: &BigUint) -> BigUint {
        self.modexp(base, exponent)
    }

    /// Remove a lock: same operation with the inverse exponent.
    pub fn remove_lock(&self, base: &BigUint, exponent: &BigUint) -> BigUint {
        self.modexp(base, exponent)
    }

    fn derive_aead_key(&self, kek_bytes: &[u8]) -> Result<[u8; 32], Shamir3PassError> {
        let mut key = [0u8; 32];
        hkdf_sha256(kek_bytes, None, SHAMIR_AEAD_HKDF_INFO, &mut key)
            .map_err(Shamir3PassError::EncryptionFailed)?;
        Ok(key)
    }

    fn encrypt_with_kek(
        &self,
        kek: &BigUint,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Shamir3PassError> {
        let key = self.derive_aead_key(&kek.to_bytes_be())?;
        let (nonce, ciphertext) =
            aead_seal(&key, &[], plaintext).map_err(Shamir3PassError::EncryptionFailed)?;
        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }
}

/// Server-side key material for the relay's half of the protocol. Also used
/// by tests to run the full round trip in-process.
#[derive(Clone, Debug)]
pub struct ShamirServerKeypair {
    pub key_id: String,
    pub lock_keys: LockKeys,
}

impl ShamirServerKeypair {
    pub fn generate(shamir: &Shamir3Pass, key_id: impl Into<String>) -> Result<Self, Shamir3PassError> {
        Ok(Self {
            key_id: key_id.into(),
            lock_keys: shamir.generate_lock_keys()?,
        })
    }

    /// Apply the server lock: `KEK_c → KEK_cs`.
    pub fn apply_lock(&self, shamir: &Shamir3Pass, kek_c: &BigUint) -> BigUint {
        shamir.add_lock(kek_c, &self.lock_keys.e)
    }

    /// Remove the server lock: `KEK_st → KEK_t`.
    pub fn remove_lock(&self, shamir: &Shamir3Pass, kek_st: &BigUint) -> BigUint {
        shamir.remove_lock(kek_st, &self.lock_keys.d)
    }
}

fn extended_gcd(a: BigInt, b: BigInt) -> (BigInt, BigInt, BigInt) {
    if b.is_zero() {
        return (a, BigInt::one(), BigInt::zero());
    }
    let (gcd, x1, y1) = extended_gcd(b.clone(), &a % &b);
    let x = y1.clone();
    let y = x1 - (&a / &b) * y1;
    (gcd, x, y)
}

pub fn encode_biguint_b64u(x: &BigUint) -> String {
    Base64UrlUnpadded::encode_string(&x.to_bytes_be())
}

pub fn decode_biguint_b64u(s: &str) -> Result<BigUint, String> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| "Invalid base64url".to_string())?;
    Ok(BigUint::from_bytes_be(&bytes))
}
