//! Threshold enrollment AddKey.
//!
//! Signs `AddKey(threshold group public key)` with the local key re-derived
//! from the PRF output captured during registration, so enrollment costs no
//! extra biometric prompt.

use zeroize::Zeroize;

use crate::actions::ActionParams;
use crate::crypto::derive_ed25519_key_from_prf_output;
use crate::errors::SignerError;
use crate::signer_worker::SignedTransactionResult;
use crate::types::webauthn::SerializedRegistrationCredential;

pub struct AddKeyThresholdRequest {
    /// Registration credential with the PRF outputs still attached.
    pub credential: SerializedRegistrationCredential,
    pub account_id: String,
    /// Group public key to enroll, NEAR format.
    pub threshold_public_key: String,
    pub nonce: u64,
    pub block_hash: String,
}

pub fn handle(request: AddKeyThresholdRequest) -> Result<SignedTransactionResult, SignerError> {
    let (_prf_first, prf_second) = request
        .credential
        .require_prf_outputs()
        .map_err(|e| SignerError::InvalidInput(e.to_string()))?;

    let (mut private_key, _public_key) =
        derive_ed25519_key_from_prf_output(&prf_second, &request.account_id)?;

    let result = super::handle_sign_transaction_with_keypair::handle(
        super::handle_sign_transaction_with_keypair::SignWithKeypairRequest {
            private_key: private_key.clone(),
            signer_account_id: request.account_id.clone(),
            receiver_id: request.account_id.clone(),
            nonce: request.nonce,
            block_hash: request.block_hash.clone(),
            actions: vec![ActionParams::AddKey {
                public_key: request.threshold_public_key.clone(),
                access_key: r#"{"nonce":0,"permission":"FullAccess"}"#.to_string(),
            }],
        },
    );
    private_key.zeroize();
    result
}
