pub mod handle_derive_near_keypair_and_encrypt;
pub mod handle_recover_keypair_from_passkey;
pub mod handle_register_device2_with_derived_key;
pub mod handle_sign_add_key_threshold_public_key_no_prompt;
pub mod handle_sign_delegate_action;
pub mod handle_sign_nep413_message;
pub mod handle_sign_transaction_with_keypair;
pub mod handle_sign_transactions_with_actions;

use crate::crypto::WrapKey;
use crate::encoders::base64_url_decode;
use crate::errors::SignerError;
use crate::types::webauthn::SerializedRegistrationCredential;

/// Derive the threshold client verifying share from the PRF-derived wrap key
/// for this account. Used during registration to enroll a threshold key.
pub fn derive_threshold_client_verifying_share(
    credential: &SerializedRegistrationCredential,
    account_id: &str,
    wrap_key_salt_b64u: &str,
) -> Result<String, SignerError> {
    let (prf_first, _prf_second) = credential
        .require_prf_outputs()
        .map_err(|e| SignerError::InvalidInput(e.to_string()))?;
    let prf_first_bytes = base64_url_decode(&prf_first).map_err(SignerError::Kdf)?;
    let wrap_key =
        WrapKey::derive(&prf_first_bytes, wrap_key_salt_b64u).map_err(SignerError::Kdf)?;
    crate::threshold::client_share::derive_client_verifying_share_b64u(&wrap_key, account_id)
        .map_err(SignerError::Threshold)
}
