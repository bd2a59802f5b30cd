//! Transaction execution: batch signing under one prompt, sequential or
//! parallel-staggered broadcast, and strict nonce discipline.
//!
//! `send_transaction` owns the nonce outcome: a successful broadcast
//! reconciles the reservation (fire-and-forget), a failed one releases it
//! synchronously. Callers never release nonces themselves.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::actions::ActionParams;
use crate::chain_client::{ChainClient, TransactionOutcome, WaitUntil};
use crate::config::{SignerMode, ThresholdBehavior, DEFAULT_STAGGER_MS};
use crate::encoders::{base64_standard_encode, base64_url_encode};
use crate::errors::{ErrorKind, WalletError};
use crate::events::ProgressStep;
use crate::nonce_manager::NonceManager;
use crate::signer_worker::handlers::handle_sign_nep413_message::SignNep413Request;
use crate::signer_worker::handlers::handle_sign_transactions_with_actions::SignTransactionsRequest;
use crate::signer_worker::{
    DecryptionPayload, SignNep413Result, SignedTransactionResult, ThresholdSignerContext,
    TransactionContext, TransactionPayload,
};
use crate::types::webauthn::WebAuthnAuthenticationCredential;

use super::PasskeyWallet;

#[derive(Debug, Clone)]
pub struct TransactionInput {
    pub receiver_id: String,
    pub actions: Vec<ActionParams>,
}

#[derive(Debug, Clone, Copy)]
pub enum ExecutionPlan {
    /// Broadcast in order; the (i+1)th broadcast starts strictly after the
    /// ith resolves.
    Sequential,
    /// Broadcast in parallel with a per-item delay; results may resolve out
    /// of order. `stagger_ms = 0` is an uncoordinated parallel broadcast.
    ParallelStaggered { stagger_ms: u64 },
}

impl Default for ExecutionPlan {
    fn default() -> Self {
        ExecutionPlan::ParallelStaggered {
            stagger_ms: DEFAULT_STAGGER_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionExecutionResult {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub error: Option<String>,
}

impl PasskeyWallet {
    /// Sign and broadcast a single transaction.
    pub async fn execute_action(
        &self,
        account_id: &str,
        receiver_id: &str,
        actions: Vec<ActionParams>,
        wait_until: WaitUntil,
    ) -> Result<TransactionExecutionResult, WalletError> {
        let mut results = self
            .sign_and_send_transactions(
                account_id,
                vec![TransactionInput {
                    receiver_id: receiver_id.to_string(),
                    actions,
                }],
                ExecutionPlan::Sequential,
                wait_until,
            )
            .await?;
        Ok(results.pop().expect("one result per input transaction"))
    }

    pub async fn sign_and_send_transactions(
        &self,
        account_id: &str,
        transactions: Vec<TransactionInput>,
        execution_plan: ExecutionPlan,
        wait_until: WaitUntil,
    ) -> Result<Vec<TransactionExecutionResult>, WalletError> {
        let mut result = self
            .sign_and_send_transactions_inner(
                account_id,
                transactions.clone(),
                execution_plan,
                wait_until,
            )
            .await;

        // A passkey mismatch gets one repair (single TouchID prompt, small
        // session remint) and a single retry.
        if matches!(&result, Err(err) if err.kind() == ErrorKind::VrfSessionPasskeyMismatch) {
            if self.repair_vrf_session_for_current_device().await.is_ok() {
                result = self
                    .sign_and_send_transactions_inner(
                        account_id,
                        transactions,
                        execution_plan,
                        wait_until,
                    )
                    .await;
            }
        }

        match &result {
            Ok(_) => self.events.after_call(true),
            Err(err) => self.events.action_error(err.kind(), err.message()),
        }
        result
    }

    async fn sign_and_send_transactions_inner(
        &self,
        account_id: &str,
        transactions: Vec<TransactionInput>,
        execution_plan: ExecutionPlan,
        wait_until: WaitUntil,
    ) -> Result<Vec<TransactionExecutionResult>, WalletError> {
        if transactions.is_empty() {
            return Err(WalletError::validation("transactions must not be empty"));
        }

        let signed = self.sign_transactions(account_id, &transactions).await?;
        self.events
            .action_progress(ProgressStep::BroadcastStarted, "Broadcasting transactions");

        let results = match execution_plan {
            ExecutionPlan::Sequential => {
                let mut results = Vec::with_capacity(signed.len());
                let mut failed = false;
                for tx in &signed {
                    if failed {
                        // The batch aborted; release the untouched
                        // reservations immediately.
                        self.nonces
                            .release_nonce(tx.signed_transaction.transaction.nonce)
                            .await;
                        results.push(TransactionExecutionResult {
                            success: false,
                            transaction_id: None,
                            error: Some("Skipped after earlier broadcast failure".to_string()),
                        });
                        continue;
                    }
                    match self.send_transaction(tx, wait_until).await {
                        Ok(outcome) => results.push(TransactionExecutionResult {
                            success: outcome.success,
                            transaction_id: Some(outcome.transaction_hash),
                            error: None,
                        }),
                        Err(err) => {
                            failed = true;
                            results.push(TransactionExecutionResult {
                                success: false,
                                transaction_id: None,
                                error: Some(err.to_string()),
                            });
                        }
                    }
                }
                results
            }
            ExecutionPlan::ParallelStaggered { stagger_ms } => {
                let tasks = signed.iter().enumerate().map(|(index, tx)| {
                    let chain = self.chain.clone();
                    let nonces = self.nonces.clone();
                    let clock = self.clock.clone();
                    let tx_bytes = tx.signed_transaction_borsh.clone();
                    let nonce = tx.signed_transaction.transaction.nonce;
                    async move {
                        if stagger_ms > 0 && index > 0 {
                            clock
                                .sleep(Duration::from_millis(stagger_ms * index as u64))
                                .await;
                        }
                        broadcast_with_nonce_discipline(chain, &nonces, &tx_bytes, nonce, wait_until)
                            .await
                    }
                });
                join_all(tasks)
                    .await
                    .into_iter()
                    .map(|result| match result {
                        Ok(outcome) => TransactionExecutionResult {
                            success: outcome.success,
                            transaction_id: Some(outcome.transaction_hash),
                            error: None,
                        },
                        Err(err) => TransactionExecutionResult {
                            success: false,
                            transaction_id: None,
                            error: Some(err.to_string()),
                        },
                    })
                    .collect()
            }
        };

        self.events
            .action_progress(ProgressStep::BroadcastComplete, "Broadcast finished");

        if let Some(failure) = results.iter().find(|r| r.error.is_some()) {
            if results.len() == 1 {
                return Err(WalletError::new(
                    ErrorKind::BroadcastRpcError,
                    failure.error.clone().unwrap_or_default(),
                ));
            }
        }
        Ok(results)
    }

    /// Sign a batch under one warm signing session (one prompt), with nonces
    /// reserved strictly monotonically.
    pub(crate) async fn sign_transactions(
        &self,
        account_id: &str,
        transactions: &[TransactionInput],
    ) -> Result<Vec<SignedTransactionResult>, WalletError> {
        let user = self.resolve_user(Some(account_id)).await?;
        let near_key = self
            .vault
            .get_near_key(&user.account_id, user.device_number)?
            .ok_or_else(|| {
                WalletError::new(
                    ErrorKind::ValidationFailed,
                    "No encrypted signing key stored for this device",
                )
            })?;

        // Resolve the signer mode: threshold when enrolled, local otherwise;
        // strict mode fails without an enrollment.
        let threshold_record = self
            .vault
            .get_threshold_key(&user.account_id, user.device_number)?;
        let use_threshold = match (self.config.signer_mode, &threshold_record) {
            (SignerMode::LocalSigner, _) => false,
            (SignerMode::ThresholdSigner { .. }, Some(_)) => true,
            (
                SignerMode::ThresholdSigner {
                    behavior: ThresholdBehavior::Fallback,
                },
                None,
            ) => false,
            (
                SignerMode::ThresholdSigner {
                    behavior: ThresholdBehavior::Strict,
                },
                None,
            ) => {
                return Err(WalletError::new(
                    ErrorKind::ThresholdEnrollmentFailed,
                    "signerMode is threshold-signer (strict) but this device is not enrolled",
                ))
            }
        };
        let signer_public_key = if use_threshold {
            threshold_record
                .as_ref()
                .map(|r| r.public_key.clone())
                .expect("use_threshold implies a record")
        } else {
            user.near_public_key.clone()
        };

        // Reserve nonces and block context for the whole batch.
        self.nonces
            .initialize_user(&user.account_id, &signer_public_key)
            .await;
        let contexts = self
            .nonces
            .reserve_nonces(self.chain.as_ref(), transactions.len() as u64, false)
            .await?;
        let base = &contexts[0];
        let transaction_context = TransactionContext {
            near_public_key_str: signer_public_key.clone(),
            next_nonce: base.next_nonce,
            tx_block_height: base.tx_block_height,
            tx_block_hash: base.tx_block_hash.clone(),
        };

        let tx_signing_requests: Vec<TransactionPayload> = transactions
            .iter()
            .map(|tx| TransactionPayload {
                near_account_id: user.account_id.clone(),
                receiver_id: tx.receiver_id.clone(),
                actions: tx.actions.clone(),
            })
            .collect();

        // Bind the exact batch digests into the VRF challenge.
        let digests = crate::threshold::digests::compute_near_tx_signing_digests(
            &tx_signing_requests,
            &transaction_context,
        )
        .map_err(WalletError::validation)?;
        let intent_digest =
            crate::threshold::digests::compute_batch_intent_digest(&digests);

        let sign_result = async {
            self.events.action_progress(
                ProgressStep::UserConfirmation,
                "Requesting signing confirmation",
            );
            let (session_id, challenge, credential) = self
                .mint_session_with_prompt(
                    &user.account_id,
                    &near_key.wrap_key_salt_b64u,
                    Some(base64_url_encode(&intent_digest)),
                )
                .await?;
            self.vrf.dispense_session_key(&session_id, 1).await?;

            let threshold = if use_threshold {
                let record = threshold_record.as_ref().expect("checked above");
                Some(ThresholdSignerContext {
                    relayer_key_id: record.relayer_key_id.clone(),
                    group_public_key: record.public_key.clone(),
                    participant_ids: record.participants.clone(),
                    vrf_challenge: challenge,
                    credential: WebAuthnAuthenticationCredential::from(&credential),
                })
            } else {
                None
            };

            self.events.action_progress(
                ProgressStep::TransactionSigningProgress,
                "Signing transactions in the signer worker",
            );
            self.signer
                .sign_transactions_with_actions(SignTransactionsRequest {
                    session_id,
                    tx_signing_requests,
                    transaction_context,
                    decryption: DecryptionPayload::from(&near_key),
                    threshold,
                })
                .await
                .map_err(WalletError::from)
        }
        .await;

        match sign_result {
            Ok(signed) => {
                self.events.action_progress(
                    ProgressStep::TransactionSigningComplete,
                    format!("{} transactions signed", signed.len()),
                );
                Ok(signed)
            }
            Err(err) => {
                // Signing failures always release the reserved nonces before
                // surfacing.
                for context in &contexts {
                    self.nonces.release_nonce(context.next_nonce).await;
                }
                Err(err)
            }
        }
    }

    /// Broadcast one signed transaction with the nonce discipline attached.
    pub(crate) async fn send_transaction(
        &self,
        signed: &SignedTransactionResult,
        wait_until: WaitUntil,
    ) -> Result<TransactionOutcome, WalletError> {
        broadcast_with_nonce_discipline(
            self.chain.clone(),
            &self.nonces,
            &signed.signed_transaction_borsh,
            signed.signed_transaction.transaction.nonce,
            wait_until,
        )
        .await
    }

    /// Sign a NEP-413 off-chain message. The 32-byte nonce is random; the
    /// VRF challenge binds the exact NEP-413 digest.
    pub async fn sign_message_nep413(
        &self,
        account_id: &str,
        message: &str,
        recipient: &str,
        state: Option<String>,
    ) -> Result<SignNep413Result, WalletError> {
        let user = self.resolve_user(Some(account_id)).await?;
        let near_key = self
            .vault
            .get_near_key(&user.account_id, user.device_number)?
            .ok_or_else(|| {
                WalletError::new(
                    ErrorKind::ValidationFailed,
                    "No encrypted signing key stored for this device",
                )
            })?;

        let mut nonce_bytes = [0u8; 32];
        crate::crypto::random_bytes(&mut nonce_bytes).map_err(WalletError::internal)?;
        let nonce_b64 = base64_standard_encode(&nonce_bytes);

        let digest = crate::transaction::hash_nep413_payload(&crate::transaction::Nep413Payload {
            message: message.to_string(),
            recipient: recipient.to_string(),
            nonce: nonce_bytes,
            state: state.clone(),
        })
        .map_err(WalletError::validation)?;

        let (session_id, _challenge, _credential) = self
            .mint_session_with_prompt(
                &user.account_id,
                &near_key.wrap_key_salt_b64u,
                Some(base64_url_encode(&digest)),
            )
            .await?;
        self.vrf.dispense_session_key(&session_id, 1).await?;

        self.signer
            .sign_nep413_message(SignNep413Request {
                session_id,
                account_id: user.account_id.clone(),
                message: message.to_string(),
                recipient: recipient.to_string(),
                nonce: nonce_b64,
                state,
                decryption: DecryptionPayload::from(&near_key),
            })
            .await
            .map_err(WalletError::from)
    }
}

/// Broadcast + nonce outcome: success reconciles in the background, failure
/// releases synchronously before the error propagates.
async fn broadcast_with_nonce_discipline(
    chain: Arc<dyn ChainClient>,
    nonces: &Arc<NonceManager>,
    signed_tx_borsh: &[u8],
    nonce: u64,
    wait_until: WaitUntil,
) -> Result<TransactionOutcome, WalletError> {
    match chain.send_transaction(signed_tx_borsh, wait_until).await {
        Ok(outcome) => {
            let nonces = nonces.clone();
            tokio::spawn(async move {
                let _ = nonces
                    .update_nonce_from_blockchain(chain.as_ref(), nonce)
                    .await;
            });
            Ok(outcome)
        }
        Err(err) => {
            nonces.release_nonce(nonce).await;
            Err(WalletError::new(
                ErrorKind::BroadcastRpcError,
                err.message().to_string(),
            ))
        }
    }
}
