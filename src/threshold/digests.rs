//! Signing-digest computation shared by the local and threshold signing
//! paths, and used to bind VRF challenges to the exact messages signed.

use crate::actions::build_actions_from_params;
use crate::signer_worker::{TransactionContext, TransactionPayload};
use crate::transaction::build_transaction_with_actions;
use crate::types::near::PublicKey;

/// NEAR transaction signing digests (`sha256(borsh(Transaction))`) for a
/// batch, one per transaction in order, with monotonically increasing nonces
/// from the context's base nonce.
pub fn compute_near_tx_signing_digests(
    tx_signing_requests: &[TransactionPayload],
    context: &TransactionContext,
) -> Result<Vec<[u8; 32]>, String> {
    if tx_signing_requests.is_empty() {
        return Err("txSigningRequests must not be empty".to_string());
    }

    let signer_account_id = tx_signing_requests[0].near_account_id.trim().to_string();
    if signer_account_id.is_empty() {
        return Err("txSigningRequests[0].nearAccountId is required".to_string());
    }
    for tx in tx_signing_requests {
        if tx.near_account_id.trim() != signer_account_id {
            return Err("All txSigningRequests[].nearAccountId must match".to_string());
        }
    }

    let public_key = PublicKey::from_near_format(&context.near_public_key_str)?;
    let block_hash = crate::encoders::bs58_decode_32(&context.tx_block_hash)?;

    let mut digests = Vec::with_capacity(tx_signing_requests.len());
    for (i, tx) in tx_signing_requests.iter().enumerate() {
        let nonce = context.next_nonce.saturating_add(i as u64);
        let actions = build_actions_from_params(&tx.actions)?;
        let transaction = build_transaction_with_actions(
            &signer_account_id,
            tx.receiver_id.trim(),
            nonce,
            &block_hash,
            &public_key,
            actions,
        )?;
        let (hash, _size) = transaction.get_hash_and_size();
        digests.push(hash.0);
    }
    Ok(digests)
}

/// Digest binding an entire batch into one VRF challenge: the hash of the
/// concatenated per-transaction signing digests.
pub fn compute_batch_intent_digest(digests: &[[u8; 32]]) -> [u8; 32] {
    let flattened: Vec<u8> = digests.iter().flat_map(|d| d.iter().copied()).collect();
    crate::crypto::sha256(&flattened)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionParams;

    fn context() -> TransactionContext {
        TransactionContext {
            near_public_key_str: format!("ed25519:{}", bs58::encode([3u8; 32]).into_string()),
            next_nonce: 10,
            tx_block_height: 100,
            tx_block_hash: bs58::encode([0u8; 32]).into_string(),
        }
    }

    fn transfer(receiver: &str) -> TransactionPayload {
        TransactionPayload {
            near_account_id: "alice.near".to_string(),
            receiver_id: receiver.to_string(),
            actions: vec![ActionParams::Transfer {
                deposit: "1".to_string(),
            }],
        }
    }

    #[test]
    fn digests_are_per_transaction_and_nonce_sequenced() {
        let digests = compute_near_tx_signing_digests(
            &[transfer("bob.near"), transfer("bob.near")],
            &context(),
        )
        .unwrap();
        assert_eq!(digests.len(), 2);
        // Same receiver and actions but consecutive nonces: digests differ.
        assert_ne!(digests[0], digests[1]);
    }

    #[test]
    fn mixed_signer_accounts_are_rejected() {
        let mut second = transfer("bob.near");
        second.near_account_id = "carol.near".to_string();
        assert!(compute_near_tx_signing_digests(&[transfer("bob.near"), second], &context())
            .is_err());
    }

    #[test]
    fn batch_intent_digest_commits_to_every_member() {
        let d1 = compute_near_tx_signing_digests(&[transfer("bob.near")], &context()).unwrap();
        let d2 =
            compute_near_tx_signing_digests(&[transfer("carol.near")], &context()).unwrap();
        assert_ne!(
            compute_batch_intent_digest(&d1),
            compute_batch_intent_digest(&d2)
        );
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(compute_near_tx_signing_digests(&[], &context()).is_err());
    }
}
