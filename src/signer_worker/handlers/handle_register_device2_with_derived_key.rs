//! Device registration transaction signing.
//!
//! Signs the `link_device_register_user` function call with the NEAR key
//! re-derived from PRF outputs the caller already captured, so a new device
//! registers without an extra biometric prompt. Used by the link-device and
//! email-recovery flows.

use zeroize::Zeroize;

use crate::actions::ActionParams;
use crate::config::{DEVICE_REGISTER_USER_METHOD, DEVICE_REGISTRATION_GAS};
use crate::crypto::derive_ed25519_key_from_prf_output;
use crate::errors::SignerError;
use crate::signer_worker::SignedTransactionResult;
use crate::types::vrf::VrfData;
use crate::types::webauthn::{
    AuthenticatorOptions, SerializedCredential, SerializedRegistrationCredential,
    WebAuthnRegistrationCredential,
};

/// Where the PRF outputs come from: the attestation minted on this device,
/// or a later assertion over the same credential.
pub enum PrfSource {
    Registration(SerializedRegistrationCredential),
    Assertion(SerializedCredential),
}

impl PrfSource {
    fn prf_second(&self) -> Result<String, SignerError> {
        let (_, second) = match self {
            PrfSource::Registration(c) => c.require_prf_outputs(),
            PrfSource::Assertion(c) => c.require_prf_outputs(),
        }
        .map_err(|e| SignerError::InvalidInput(e.to_string()))?;
        Ok(second)
    }
}

pub struct RegisterDeviceRequest {
    pub prf_source: PrfSource,
    pub account_id: String,
    pub contract_id: String,
    pub vrf_data: VrfData,
    pub deterministic_vrf_public_key: Vec<u8>,
    pub registration_credential: WebAuthnRegistrationCredential,
    pub authenticator_options: Option<AuthenticatorOptions>,
    pub nonce: u64,
    pub block_hash: String,
}

pub fn handle(request: RegisterDeviceRequest) -> Result<SignedTransactionResult, SignerError> {
    let prf_second = request.prf_source.prf_second()?;
    let (mut private_key, _public_key) =
        derive_ed25519_key_from_prf_output(&prf_second, &request.account_id)?;

    let args = serde_json::json!({
        "vrf_data": request.vrf_data,
        "webauthn_registration": request.registration_credential,
        "deterministic_vrf_public_key": request.deterministic_vrf_public_key,
        "authenticator_options": request.authenticator_options,
    })
    .to_string();

    let result = super::handle_sign_transaction_with_keypair::handle(
        super::handle_sign_transaction_with_keypair::SignWithKeypairRequest {
            private_key: private_key.clone(),
            signer_account_id: request.account_id.clone(),
            receiver_id: request.contract_id.clone(),
            nonce: request.nonce,
            block_hash: request.block_hash.clone(),
            actions: vec![ActionParams::FunctionCall {
                method_name: DEVICE_REGISTER_USER_METHOD.to_string(),
                args,
                gas: DEVICE_REGISTRATION_GAS.to_string(),
                deposit: "0".to_string(),
            }],
        },
    );
    private_key.zeroize();
    result
}
