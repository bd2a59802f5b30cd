//! Raw-keypair transaction signing. Only used for the device-linking
//! temporary-key swap and bootstrap registration transactions, where no
//! encrypted vault entry exists yet.

use crate::actions::{build_actions_from_params, ActionParams};
use crate::errors::SignerError;
use crate::signer_worker::SignedTransactionResult;
use crate::transaction::{
    build_transaction_with_actions, calculate_transaction_hash, sign_transaction,
};
use crate::types::near::{PublicKey, SignedTransaction};

pub struct SignWithKeypairRequest {
    /// NEAR-format private key (`ed25519:<base58 64 bytes>`).
    pub private_key: String,
    pub signer_account_id: String,
    pub receiver_id: String,
    pub nonce: u64,
    /// base58 block hash.
    pub block_hash: String,
    pub actions: Vec<ActionParams>,
}

pub fn handle(request: SignWithKeypairRequest) -> Result<SignedTransactionResult, SignerError> {
    let signing_key = crate::crypto::signing_key_from_near_private_key(&request.private_key)
        .map_err(SignerError::InvalidInput)?;
    let public_key = PublicKey::from_ed25519_bytes(&signing_key.verifying_key().to_bytes());

    let block_hash =
        crate::encoders::bs58_decode_32(&request.block_hash).map_err(SignerError::InvalidInput)?;
    let actions =
        build_actions_from_params(&request.actions).map_err(SignerError::TransactionBuild)?;

    let transaction = build_transaction_with_actions(
        &request.signer_account_id,
        &request.receiver_id,
        request.nonce,
        &block_hash,
        &public_key,
        actions,
    )
    .map_err(SignerError::TransactionBuild)?;

    let signed_tx_bytes =
        sign_transaction(transaction, &signing_key).map_err(SignerError::TransactionBuild)?;
    let transaction_hash = calculate_transaction_hash(&signed_tx_bytes);
    let signed_transaction = SignedTransaction::from_borsh_bytes(&signed_tx_bytes)
        .map_err(SignerError::TransactionBuild)?;

    Ok(SignedTransactionResult {
        transaction_hash,
        signed_transaction,
        signed_transaction_borsh: signed_tx_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_with_a_raw_near_format_key() {
        let (sk, pk) = crate::crypto::generate_near_keypair().unwrap();
        let result = handle(SignWithKeypairRequest {
            private_key: sk,
            signer_account_id: "alice.near".to_string(),
            receiver_id: "bob.near".to_string(),
            nonce: 1,
            block_hash: bs58::encode([0u8; 32]).into_string(),
            actions: vec![ActionParams::Transfer {
                deposit: "1".to_string(),
            }],
        })
        .unwrap();
        assert_eq!(
            result.signed_transaction.transaction.public_key.to_near_format(),
            pk
        );
        assert!(!result.transaction_hash.is_empty());
    }

    #[test]
    fn rejects_non_near_format_keys() {
        let result = handle(SignWithKeypairRequest {
            private_key: "not-a-key".to_string(),
            signer_account_id: "alice.near".to_string(),
            receiver_id: "bob.near".to_string(),
            nonce: 1,
            block_hash: bs58::encode([0u8; 32]).into_string(),
            actions: vec![],
        });
        assert!(result.is_err());
    }
}
