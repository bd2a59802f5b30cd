//! NEP-461 delegate action signing.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::actions::{build_actions_from_params, ActionParams};
use crate::crypto::WrapKey;
use crate::encoders::base64_url_encode;
use crate::errors::SignerError;
use crate::signer_worker::{DecryptionPayload, SignedDelegateResult};
use crate::transaction::hash_delegate_action;
use crate::types::near::{DelegateAction, PublicKey, Signature, SignedDelegate};
use ed25519_dalek::Signer;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatePayload {
    pub sender_id: String,
    pub receiver_id: String,
    pub actions: Vec<ActionParams>,
    pub nonce: u64,
    pub max_block_height: u64,
    pub public_key: String,
}

pub struct SignDelegateRequest {
    pub session_id: String,
    pub delegate: DelegatePayload,
    pub decryption: DecryptionPayload,
}

pub fn handle(
    request: SignDelegateRequest,
    wrap_key: WrapKey,
) -> Result<SignedDelegateResult, SignerError> {
    let actions = build_actions_from_params(&request.delegate.actions)
        .map_err(SignerError::TransactionBuild)?;

    let delegate_action = DelegateAction {
        sender_id: request
            .delegate
            .sender_id
            .parse()
            .map_err(|e| SignerError::InvalidInput(format!("Invalid senderId: {}", e)))?,
        receiver_id: request
            .delegate
            .receiver_id
            .parse()
            .map_err(|e| SignerError::InvalidInput(format!("Invalid receiverId: {}", e)))?,
        actions,
        nonce: request.delegate.nonce,
        max_block_height: request.delegate.max_block_height,
        public_key: PublicKey::from_near_format(&request.delegate.public_key)
            .map_err(SignerError::InvalidInput)?,
    };

    let hash = hash_delegate_action(&delegate_action).map_err(SignerError::InvalidInput)?;

    let mut private_key = wrap_key
        .open_private_key(
            &request.decryption.encrypted_private_key_data_b64u,
            &request.decryption.chacha20_nonce_b64u,
        )
        .map_err(SignerError::Decryption)?;
    let signing_key = crate::crypto::signing_key_from_near_private_key(&private_key)
        .map_err(SignerError::Decryption)?;
    private_key.zeroize();

    let signature = signing_key.sign(&hash);

    Ok(SignedDelegateResult {
        delegate_hash_b64u: base64_url_encode(&hash),
        signed_delegate: SignedDelegate {
            delegate_action,
            signature: Signature::from_ed25519_bytes(&signature.to_bytes()),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::base64_url_encode as b64u;
    use ed25519_dalek::Verifier;

    #[test]
    fn delegate_signature_verifies_over_the_prefixed_hash() {
        let wrap_key = WrapKey::derive(&[1u8; 32], &b64u(&[9u8; 32])).unwrap();
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&[3u8; 32]);
        let mut private = Vec::with_capacity(64);
        private.extend_from_slice(&signing_key.to_bytes());
        private.extend_from_slice(&signing_key.verifying_key().to_bytes());
        let near_sk = format!("ed25519:{}", bs58::encode(&private).into_string());
        let (ct, nonce) = wrap_key.seal_private_key(&near_sk).unwrap();

        let pk = format!(
            "ed25519:{}",
            bs58::encode(signing_key.verifying_key().to_bytes()).into_string()
        );
        let result = handle(
            SignDelegateRequest {
                session_id: "sess".to_string(),
                delegate: DelegatePayload {
                    sender_id: "alice.near".to_string(),
                    receiver_id: "bob.near".to_string(),
                    actions: vec![ActionParams::Transfer {
                        deposit: "1".to_string(),
                    }],
                    nonce: 5,
                    max_block_height: 1000,
                    public_key: pk,
                },
                decryption: DecryptionPayload {
                    encrypted_private_key_data_b64u: ct,
                    chacha20_nonce_b64u: nonce,
                },
            },
            wrap_key,
        )
        .unwrap();

        let hash = hash_delegate_action(&result.signed_delegate.delegate_action).unwrap();
        assert_eq!(result.delegate_hash_b64u, b64u(&hash));
        let signature = ed25519_dalek::Signature::from_bytes(
            &result.signed_delegate.signature.signature_data,
        );
        signing_key.verifying_key().verify(&hash, &signature).unwrap();
    }
}
