//! Deterministic NEAR-key recovery from an authentication credential's PRF
//! outputs. Honors the vault's stored wrap-key salt when one exists so the
//! re-encrypted key stays decryptable by existing sessions; otherwise mints a
//! fresh salt (new device).

use crate::config::ENCRYPTED_NEAR_KEY_KIND;
use crate::crypto::{derive_ed25519_key_from_prf_output, random_salt_b64u, WrapKey};
use crate::encoders::base64_url_decode;
use crate::errors::SignerError;
use crate::signer_worker::DerivedNearKey;
use crate::types::webauthn::SerializedCredential;
use crate::vault::EncryptedNearKey;
use zeroize::Zeroize;

pub fn handle(
    credential: &SerializedCredential,
    account_id: &str,
    stored_wrap_key_salt_b64u: Option<&str>,
) -> Result<DerivedNearKey, SignerError> {
    let (prf_first, prf_second) = credential
        .require_prf_outputs()
        .map_err(|e| SignerError::InvalidInput(e.to_string()))?;

    let (mut private_key, public_key) =
        derive_ed25519_key_from_prf_output(&prf_second, account_id)?;

    let wrap_key_salt_b64u = match stored_wrap_key_salt_b64u {
        Some(salt) if !salt.trim().is_empty() => salt.to_string(),
        _ => random_salt_b64u().map_err(SignerError::Kdf)?,
    };

    let prf_first_bytes = base64_url_decode(&prf_first).map_err(SignerError::Kdf)?;
    let wrap_key =
        WrapKey::derive(&prf_first_bytes, &wrap_key_salt_b64u).map_err(SignerError::Kdf)?;
    let (ciphertext_b64u, nonce_b64u) = wrap_key
        .seal_private_key(&private_key)
        .map_err(SignerError::Kdf)?;
    private_key.zeroize();

    Ok(DerivedNearKey {
        public_key,
        encrypted_near_key: EncryptedNearKey {
            kind: ENCRYPTED_NEAR_KEY_KIND.to_string(),
            encrypted_private_key_data_b64u: ciphertext_b64u,
            chacha20_nonce_b64u: nonce_b64u,
            wrap_key_salt_b64u,
        },
    })
}
