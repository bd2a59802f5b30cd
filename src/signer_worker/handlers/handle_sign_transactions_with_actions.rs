//! Batch transaction signing. All transactions in a batch share one warm
//! signing session (one WebAuthn prompt); nonces increase monotonically from
//! the reserved base nonce in caller-provided order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::actions::{build_actions_from_params, ActionParams};
use crate::config::SignerMode;
use crate::crypto::WrapKey;
use crate::errors::SignerError;
use crate::relay_client::RelayClient;
use crate::signer_worker::{
    DecryptionPayload, SignedTransactionResult, ThresholdSignerContext,
};
use crate::transaction::{
    build_transaction_with_actions, calculate_transaction_hash, sign_transaction,
};
use crate::types::near::{PublicKey, Signature, SignedTransaction};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    pub near_account_id: String,
    pub receiver_id: String,
    pub actions: Vec<ActionParams>,
}

/// Block context and base nonce computed by the nonce manager before signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContext {
    pub near_public_key_str: String,
    pub next_nonce: u64,
    pub tx_block_height: u64,
    pub tx_block_hash: String,
}

pub struct SignTransactionsRequest {
    pub session_id: String,
    pub tx_signing_requests: Vec<TransactionPayload>,
    pub transaction_context: TransactionContext,
    pub decryption: DecryptionPayload,
    /// Present when the caller resolved a threshold enrollment for this
    /// account and device.
    pub threshold: Option<ThresholdSignerContext>,
}

pub async fn handle(
    request: SignTransactionsRequest,
    wrap_key: WrapKey,
    relay: Option<Arc<dyn RelayClient>>,
    signer_mode: SignerMode,
) -> Result<Vec<SignedTransactionResult>, SignerError> {
    if request.tx_signing_requests.is_empty() {
        return Err(SignerError::InvalidInput(
            "No transactions provided".to_string(),
        ));
    }

    // All transactions in a batch must share one signer account.
    let signer_account_id = request.tx_signing_requests[0].near_account_id.clone();
    for tx in &request.tx_signing_requests {
        if tx.near_account_id != signer_account_id {
            return Err(SignerError::InvalidInput(
                "All transactions must use the same NEAR account ID".to_string(),
            ));
        }
    }

    let use_threshold =
        matches!(signer_mode, SignerMode::ThresholdSigner { .. }) && request.threshold.is_some();

    if use_threshold {
        let threshold = request.threshold.as_ref().expect("checked above");
        let relay = relay.ok_or_else(|| {
            SignerError::Threshold("threshold-signer: no relay client configured".to_string())
        })?;
        sign_batch_threshold(&request, threshold, relay.as_ref(), &wrap_key).await
    } else {
        sign_batch_local(&request, &wrap_key)
    }
}

fn sign_batch_local(
    request: &SignTransactionsRequest,
    wrap_key: &WrapKey,
) -> Result<Vec<SignedTransactionResult>, SignerError> {
    let mut private_key = wrap_key
        .open_private_key(
            &request.decryption.encrypted_private_key_data_b64u,
            &request.decryption.chacha20_nonce_b64u,
        )
        .map_err(SignerError::Decryption)?;
    let signing_key = crate::crypto::signing_key_from_near_private_key(&private_key)
        .map_err(SignerError::Decryption)?;
    private_key.zeroize();

    let public_key = PublicKey::from_ed25519_bytes(&signing_key.verifying_key().to_bytes());
    let block_hash = crate::encoders::bs58_decode_32(&request.transaction_context.tx_block_hash)
        .map_err(SignerError::InvalidInput)?;

    let mut results = Vec::with_capacity(request.tx_signing_requests.len());
    let mut current_nonce = request.transaction_context.next_nonce;

    for tx_data in &request.tx_signing_requests {
        let actions = build_actions_from_params(&tx_data.actions)
            .map_err(SignerError::TransactionBuild)?;
        let transaction = build_transaction_with_actions(
            &tx_data.near_account_id,
            &tx_data.receiver_id,
            current_nonce,
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

        results.push(SignedTransactionResult {
            transaction_hash,
            signed_transaction,
            signed_transaction_borsh: signed_tx_bytes,
        });
        current_nonce = current_nonce.saturating_add(1);
    }

    Ok(results)
}

/// Threshold path: the transaction key is the group public key; each signing
/// digest is authorized with the relay and signed in one 2-party round.
async fn sign_batch_threshold(
    request: &SignTransactionsRequest,
    threshold: &ThresholdSignerContext,
    relay: &dyn RelayClient,
    wrap_key: &WrapKey,
) -> Result<Vec<SignedTransactionResult>, SignerError> {
    let group_public_key = PublicKey::from_near_format(&threshold.group_public_key)
        .map_err(SignerError::InvalidInput)?;
    let block_hash = crate::encoders::bs58_decode_32(&request.transaction_context.tx_block_hash)
        .map_err(SignerError::InvalidInput)?;

    let mut results = Vec::with_capacity(request.tx_signing_requests.len());
    let mut current_nonce = request.transaction_context.next_nonce;

    for tx_data in &request.tx_signing_requests {
        let actions = build_actions_from_params(&tx_data.actions)
            .map_err(SignerError::TransactionBuild)?;
        let transaction = build_transaction_with_actions(
            &tx_data.near_account_id,
            &tx_data.receiver_id,
            current_nonce,
            &block_hash,
            &group_public_key,
            actions,
        )
        .map_err(SignerError::TransactionBuild)?;

        let (digest, _size) = transaction.get_hash_and_size();
        let signature_bytes = crate::threshold::coordinator::sign_digest(
            relay,
            threshold,
            wrap_key,
            &tx_data.near_account_id,
            "near_tx",
            &digest.0,
            None,
        )
        .await
        .map_err(SignerError::Threshold)?;

        let signed_transaction = SignedTransaction::new(
            Signature::from_ed25519_bytes(&signature_bytes),
            transaction,
        );
        let signed_tx_bytes = signed_transaction
            .to_borsh_bytes()
            .map_err(SignerError::TransactionBuild)?;
        let transaction_hash = calculate_transaction_hash(&signed_tx_bytes);

        results.push(SignedTransactionResult {
            transaction_hash,
            signed_transaction,
            signed_transaction_borsh: signed_tx_bytes,
        });
        current_nonce = current_nonce.saturating_add(1);
    }

    Ok(results)
}
