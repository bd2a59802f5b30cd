//! Derive the NEAR signing key from a registration credential's PRF outputs
//! and encrypt it under a fresh wrap-key salt.

use crate::config::ENCRYPTED_NEAR_KEY_KIND;
use crate::crypto::{derive_ed25519_key_from_prf_output, random_salt_b64u, WrapKey};
use crate::encoders::base64_url_decode;
use crate::errors::SignerError;
use crate::signer_worker::DerivedNearKey;
use crate::types::webauthn::SerializedRegistrationCredential;
use crate::vault::EncryptedNearKey;
use zeroize::Zeroize;

pub fn handle(
    credential: &SerializedRegistrationCredential,
    account_id: &str,
) -> Result<DerivedNearKey, SignerError> {
    let (prf_first, prf_second) = credential
        .require_prf_outputs()
        .map_err(|e| SignerError::InvalidInput(e.to_string()))?;

    let (mut private_key, public_key) =
        derive_ed25519_key_from_prf_output(&prf_second, account_id)?;

    let wrap_key_salt_b64u = random_salt_b64u().map_err(SignerError::Kdf)?;
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
