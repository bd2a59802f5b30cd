//! Crypto primitives adapter: a uniform surface over SHA-256, HKDF,
//! ChaCha20-Poly1305 AEAD and PRF-based Ed25519 key derivation.
//!
//! AEAD nonces are 12 bytes and always freshly drawn from the system CSPRNG;
//! a nonce is never reused with the same key.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use getrandom::getrandom;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{
    CHACHA20_KEY_SIZE, CHACHA20_NONCE_SIZE, ED25519_SEED_SIZE, HKDF_NEAR_SEED_SALT, HKDF_WRAP_INFO,
};
use crate::encoders::{base64_url_decode, base64_url_encode};
use crate::errors::{SignerError, WalletError};

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// SHA-256 over the concatenation of several byte slices.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// HKDF-SHA256 expand into `out.len()` bytes.
pub fn hkdf_sha256(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], out: &mut [u8]) -> Result<(), String> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, out)
        .map_err(|_| "HKDF key derivation failed".to_string())
}

/// Fill a buffer with CSPRNG bytes.
pub fn random_bytes(out: &mut [u8]) -> Result<(), String> {
    getrandom(out).map_err(|e| format!("Failed to gather entropy: {}", e))
}

/// Fresh random 32-byte value, base64url-encoded. Used for wrap-key salts and
/// one-shot WebAuthn challenges.
pub fn random_salt_b64u() -> Result<String, String> {
    let mut bytes = [0u8; 32];
    random_bytes(&mut bytes)?;
    Ok(base64_url_encode(&bytes))
}

/// Authenticated encryption. Returns `(nonce, ciphertext)` with a fresh
/// CSPRNG nonce per call.
pub fn aead_seal(
    key: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<([u8; CHACHA20_NONCE_SIZE], Vec<u8>), String> {
    if key.len() != CHACHA20_KEY_SIZE {
        return Err("Invalid key size for ChaCha20Poly1305".to_string());
    }
    let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key));

    let mut nonce_bytes = [0u8; CHACHA20_NONCE_SIZE];
    random_bytes(&mut nonce_bytes)?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| format!("Encryption error: {}", e))?;

    Ok((nonce_bytes, ciphertext))
}

/// Authenticated decryption. Fails on any auth-tag mismatch.
pub fn aead_open(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, String> {
    if key.len() != CHACHA20_KEY_SIZE {
        return Err("Invalid key size for ChaCha20Poly1305".to_string());
    }
    if nonce.len() != CHACHA20_NONCE_SIZE {
        return Err(format!(
            "AEAD nonce must be {} bytes, got {}",
            CHACHA20_NONCE_SIZE,
            nonce.len()
        ));
    }
    let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|e| format!("Decryption error: {}", e))
}

/// Ephemeral NEAR-key wrap key: `HKDF(prf_first, salt = wrap_key_salt,
/// info = "wrap")`. Derived in the VRF worker when a signing session is
/// minted and handed to the signer worker over the dedicated channel; it is
/// zeroized on drop and never persisted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WrapKey {
    key: [u8; CHACHA20_KEY_SIZE],
    #[zeroize(skip)]
    wrap_key_salt_b64u: String,
}

impl WrapKey {
    pub fn derive(prf_first: &[u8], wrap_key_salt_b64u: &str) -> Result<Self, String> {
        if prf_first.is_empty() {
            return Err("Empty PRF output".to_string());
        }
        let salt = base64_url_decode(wrap_key_salt_b64u)?;
        let mut key = [0u8; CHACHA20_KEY_SIZE];
        hkdf_sha256(prf_first, Some(&salt), HKDF_WRAP_INFO, &mut key)?;
        Ok(Self {
            key,
            wrap_key_salt_b64u: wrap_key_salt_b64u.to_string(),
        })
    }

    pub fn key_bytes(&self) -> &[u8; CHACHA20_KEY_SIZE] {
        &self.key
    }

    pub fn salt_b64u(&self) -> &str {
        &self.wrap_key_salt_b64u
    }

    /// Seal a private-key string under this wrap key.
    pub fn seal_private_key(&self, plaintext: &str) -> Result<(String, String), String> {
        let (nonce, ciphertext) = aead_seal(&self.key, &[], plaintext.as_bytes())?;
        Ok((base64_url_encode(&ciphertext), base64_url_encode(&nonce)))
    }

    /// Open a private-key string sealed with [`Self::seal_private_key`].
    pub fn open_private_key(
        &self,
        ciphertext_b64u: &str,
        nonce_b64u: &str,
    ) -> Result<String, String> {
        let ciphertext = base64_url_decode(ciphertext_b64u)?;
        let nonce = base64_url_decode(nonce_b64u)?;
        let plaintext = aead_open(&self.key, &nonce, &[], &ciphertext)?;
        String::from_utf8(plaintext).map_err(|e| format!("UTF-8 decoding error: {}", e))
    }
}

impl std::fmt::Debug for WrapKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapKey")
            .field("wrap_key_salt_b64u", &self.wrap_key_salt_b64u)
            .finish_non_exhaustive()
    }
}

/// Deterministic Ed25519 key derivation from PRF.second.
///
/// `sk_seed = HKDF(prf_second, salt = "ed25519-v1", info = account_id)`.
/// Returns `(private_key, public_key)` in NEAR format: the private key is the
/// 64-byte seed‖pubkey concatenation, both base58 with an `ed25519:` prefix.
pub fn derive_ed25519_key_from_prf_output(
    prf_second_b64u: &str,
    account_id: &str,
) -> Result<(String, String), SignerError> {
    let prf_output = base64_url_decode(prf_second_b64u).map_err(SignerError::Kdf)?;
    if prf_output.is_empty() {
        return Err(SignerError::InvalidInput("Empty PRF output".to_string()));
    }

    let mut seed = [0u8; ED25519_SEED_SIZE];
    hkdf_sha256(
        &prf_output,
        Some(HKDF_NEAR_SEED_SALT),
        account_id.as_bytes(),
        &mut seed,
    )
    .map_err(SignerError::Kdf)?;

    let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
    let verifying_key = signing_key.verifying_key();

    let mut near_private_key_bytes = Vec::with_capacity(64);
    near_private_key_bytes.extend_from_slice(&signing_key.to_bytes());
    near_private_key_bytes.extend_from_slice(&verifying_key.to_bytes());

    let near_private_key = format!("ed25519:{}", bs58::encode(&near_private_key_bytes).into_string());
    let near_public_key = format!(
        "ed25519:{}",
        bs58::encode(verifying_key.to_bytes()).into_string()
    );
    seed.zeroize();
    near_private_key_bytes.zeroize();

    Ok((near_private_key, near_public_key))
}

/// Parse a NEAR-format `ed25519:` private key into a signing key.
pub fn signing_key_from_near_private_key(
    private_key: &str,
) -> Result<ed25519_dalek::SigningKey, String> {
    let payload = private_key
        .strip_prefix("ed25519:")
        .ok_or_else(|| "Private key must be in ed25519: format".to_string())?;
    let bytes = bs58::decode(payload)
        .into_vec()
        .map_err(|e| format!("Failed to decode private key: {}", e))?;
    if bytes.len() != 64 {
        return Err(format!(
            "Invalid private key length: expected 64 bytes, got {}",
            bytes.len()
        ));
    }
    let seed: [u8; 32] = bytes[0..32]
        .try_into()
        .map_err(|_| "Failed to extract seed from private key".to_string())?;
    Ok(ed25519_dalek::SigningKey::from_bytes(&seed))
}

/// Generate a fresh random Ed25519 keypair in NEAR format. Used for the
/// device-linking temporary key.
pub fn generate_near_keypair() -> Result<(String, String), WalletError> {
    let mut seed = [0u8; 32];
    random_bytes(&mut seed).map_err(WalletError::internal)?;
    let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
    let verifying_key = signing_key.verifying_key();
    let mut private = Vec::with_capacity(64);
    private.extend_from_slice(&signing_key.to_bytes());
    private.extend_from_slice(&verifying_key.to_bytes());
    let sk = format!("ed25519:{}", bs58::encode(&private).into_string());
    let pk = format!("ed25519:{}", bs58::encode(verifying_key.to_bytes()).into_string());
    seed.zeroize();
    private.zeroize();
    Ok((sk, pk))
}
