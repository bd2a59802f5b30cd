//! NEP-413 off-chain message signing.

use serde::Serialize;
use zeroize::Zeroize;

use crate::crypto::WrapKey;
use crate::encoders::{base64_standard_decode, base64_standard_encode};
use crate::errors::SignerError;
use crate::signer_worker::DecryptionPayload;
use crate::transaction::{hash_nep413_payload, Nep413Payload};
use ed25519_dalek::Signer;

pub struct SignNep413Request {
    pub session_id: String,
    pub account_id: String,
    pub message: String,
    pub recipient: String,
    /// Standard base64 of a 32-byte nonce.
    pub nonce: String,
    pub state: Option<String>,
    pub decryption: DecryptionPayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignNep413Result {
    pub account_id: String,
    /// `ed25519:`-prefixed base58 public key.
    pub public_key: String,
    /// Standard base64 signature.
    pub signature: String,
    /// Standard base64 nonce, echoed back.
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

pub fn handle(request: SignNep413Request, wrap_key: WrapKey) -> Result<SignNep413Result, SignerError> {
    let nonce_bytes = base64_standard_decode(&request.nonce)
        .map_err(|e| SignerError::InvalidInput(format!("Failed to decode nonce: {}", e)))?;
    let nonce_array: [u8; 32] = nonce_bytes.try_into().map_err(|v: Vec<u8>| {
        SignerError::InvalidInput(format!(
            "Invalid nonce length: expected 32 bytes, got {}",
            v.len()
        ))
    })?;

    let mut private_key = wrap_key
        .open_private_key(
            &request.decryption.encrypted_private_key_data_b64u,
            &request.decryption.chacha20_nonce_b64u,
        )
        .map_err(SignerError::Decryption)?;
    let signing_key = crate::crypto::signing_key_from_near_private_key(&private_key)
        .map_err(SignerError::Decryption)?;
    private_key.zeroize();

    let payload = Nep413Payload {
        message: request.message,
        recipient: request.recipient,
        nonce: nonce_array,
        state: request.state.clone(),
    };
    let hash = hash_nep413_payload(&payload).map_err(SignerError::InvalidInput)?;

    let signature = signing_key.sign(&hash);
    let public_key = format!(
        "ed25519:{}",
        bs58::encode(signing_key.verifying_key().to_bytes()).into_string()
    );

    Ok(SignNep413Result {
        account_id: request.account_id,
        public_key,
        signature: base64_standard_encode(&signature.to_bytes()),
        nonce: request.nonce,
        state: request.state,
    })
}
