//! Transaction assembly and signing helpers shared by the signer worker and
//! the threshold digest computation.

use ed25519_dalek::Signer;
use sha2::{Digest, Sha256};

use crate::config::{DELEGATE_ACTION_PREFIX, NEP413_PAYLOAD_PREFIX};
use crate::types::near::{
    AccountId, Action, CryptoHash, DelegateAction, PublicKey, Signature, SignedTransaction,
    Transaction,
};

/// Build an unsigned transaction for the given signer key.
pub fn build_transaction_with_actions(
    signer_account_id: &str,
    receiver_account_id: &str,
    nonce: u64,
    block_hash_bytes: &[u8],
    public_key: &PublicKey,
    actions: Vec<Action>,
) -> Result<Transaction, String> {
    let signer_id: AccountId = signer_account_id
        .parse()
        .map_err(|e| format!("Invalid signer account: {}", e))?;
    let receiver_id: AccountId = receiver_account_id
        .parse()
        .map_err(|e| format!("Invalid receiver account: {}", e))?;

    if block_hash_bytes.len() != 32 {
        return Err("Block hash must be 32 bytes".to_string());
    }
    let mut block_hash_array = [0u8; 32];
    block_hash_array.copy_from_slice(block_hash_bytes);

    Ok(Transaction {
        signer_id,
        public_key: public_key.clone(),
        nonce,
        receiver_id,
        block_hash: CryptoHash::from_bytes(block_hash_array),
        actions,
    })
}

/// Sign an already-built transaction and return the borsh-serialized
/// `SignedTransaction`.
pub fn sign_transaction(
    transaction: Transaction,
    private_key: &ed25519_dalek::SigningKey,
) -> Result<Vec<u8>, String> {
    let (transaction_hash, _size) = transaction.get_hash_and_size();
    let signature_bytes = private_key.sign(&transaction_hash.0);
    let signature = Signature::from_ed25519_bytes(&signature_bytes.to_bytes());
    let signed_transaction = SignedTransaction::new(signature, transaction);
    signed_transaction.to_borsh_bytes()
}

/// Hex-encoded SHA-256 of the signed transaction bytes, used as the
/// user-facing transaction id.
pub fn calculate_transaction_hash(signed_tx_bytes: &[u8]) -> String {
    let digest = Sha256::digest(signed_tx_bytes);
    format!("{:x}", digest)
}

/// Encode a DelegateAction with the NEP-461 prefix.
pub fn encode_delegate_action(delegate: &DelegateAction) -> Result<Vec<u8>, String> {
    let mut encoded = borsh::to_vec(&DELEGATE_ACTION_PREFIX)
        .map_err(|e| format!("Prefix encode error: {}", e))?;
    let mut delegate_bytes =
        borsh::to_vec(delegate).map_err(|e| format!("Delegate encode error: {}", e))?;
    encoded.append(&mut delegate_bytes);
    Ok(encoded)
}

/// `sha256` over the NEP-461-prefixed delegate action bytes.
pub fn hash_delegate_action(delegate: &DelegateAction) -> Result<[u8; 32], String> {
    let encoded = encode_delegate_action(delegate)?;
    let digest = Sha256::digest(&encoded);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);
    Ok(hash)
}

/// NEP-413 signing payload.
#[derive(borsh::BorshSerialize)]
pub struct Nep413Payload {
    pub message: String,
    pub recipient: String,
    pub nonce: [u8; 32],
    pub state: Option<String>,
}

/// `sha256(prefix_le || borsh(payload))` with the NEP-413 prefix `2^31+413`.
pub fn hash_nep413_payload(payload: &Nep413Payload) -> Result<[u8; 32], String> {
    let serialized =
        borsh::to_vec(payload).map_err(|e| format!("Borsh serialization failed: {}", e))?;
    let mut prefixed = NEP413_PAYLOAD_PREFIX.to_le_bytes().to_vec();
    prefixed.extend_from_slice(&serialized);
    let digest = Sha256::digest(&prefixed);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);
    Ok(hash)
}
