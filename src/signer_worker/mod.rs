//! Signer worker actor.
//!
//! Exclusive owner of decrypted Ed25519 key material for the duration of a
//! signing request. Wrap keys arrive from the VRF worker over the dedicated
//! session-key channel; a signing request without a delivered session key is
//! refused (`VRF_SESSION_INACTIVE`), except for the explicit bootstrap
//! operations that carry PRF material directly.

pub mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::config::SignerMode;
use crate::crypto::WrapKey;
use crate::errors::SignerError;
use crate::relay_client::RelayClient;
use crate::types::near::{SignedDelegate, SignedTransaction};
use crate::types::webauthn::{SerializedCredential, SerializedRegistrationCredential};
use crate::vault::EncryptedNearKey;
use crate::vrf_worker::SessionKeyDelivery;

pub use handlers::handle_sign_transactions_with_actions::{
    TransactionContext, TransactionPayload,
};
pub use handlers::handle_sign_nep413_message::SignNep413Result;

// === SHARED REQUEST/RESPONSE TYPES ===

/// Ciphertext locator for the NEAR signing key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptionPayload {
    pub encrypted_private_key_data_b64u: String,
    pub chacha20_nonce_b64u: String,
}

impl From<&EncryptedNearKey> for DecryptionPayload {
    fn from(key: &EncryptedNearKey) -> Self {
        Self {
            encrypted_private_key_data_b64u: key.encrypted_private_key_data_b64u.clone(),
            chacha20_nonce_b64u: key.chacha20_nonce_b64u.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DerivedNearKey {
    pub public_key: String,
    pub encrypted_near_key: EncryptedNearKey,
}

#[derive(Debug, Clone)]
pub struct SignedTransactionResult {
    pub transaction_hash: String,
    pub signed_transaction: SignedTransaction,
    pub signed_transaction_borsh: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SignedDelegateResult {
    pub delegate_hash_b64u: String,
    pub signed_delegate: SignedDelegate,
}

/// Threshold-signing context resolved by the orchestrator from the vault's
/// enrollment record plus the live VRF challenge and assertion.
#[derive(Debug, Clone)]
pub struct ThresholdSignerContext {
    pub relayer_key_id: String,
    /// Group public key, NEAR format.
    pub group_public_key: String,
    pub participant_ids: Vec<u16>,
    pub vrf_challenge: crate::types::vrf::VrfChallenge,
    pub credential: crate::types::webauthn::WebAuthnAuthenticationCredential,
}

type SignerResult<T> = Result<T, SignerError>;

enum SignerRequest {
    DeriveNearKeypairAndEncrypt {
        credential: SerializedRegistrationCredential,
        account_id: String,
        respond: oneshot::Sender<SignerResult<DerivedNearKey>>,
    },
    RecoverKeypairFromPasskey {
        credential: SerializedCredential,
        account_id: String,
        wrap_key_salt_b64u: Option<String>,
        respond: oneshot::Sender<SignerResult<DerivedNearKey>>,
    },
    SignTransactionsWithActions {
        request: handlers::handle_sign_transactions_with_actions::SignTransactionsRequest,
        respond: oneshot::Sender<SignerResult<Vec<SignedTransactionResult>>>,
    },
    SignNep413Message {
        request: handlers::handle_sign_nep413_message::SignNep413Request,
        respond: oneshot::Sender<SignerResult<SignNep413Result>>,
    },
    SignDelegateAction {
        request: handlers::handle_sign_delegate_action::SignDelegateRequest,
        respond: oneshot::Sender<SignerResult<SignedDelegateResult>>,
    },
    SignTransactionWithKeypair {
        request: handlers::handle_sign_transaction_with_keypair::SignWithKeypairRequest,
        respond: oneshot::Sender<SignerResult<SignedTransactionResult>>,
    },
    SignAddKeyThresholdNoPrompt {
        request: handlers::handle_sign_add_key_threshold_public_key_no_prompt::AddKeyThresholdRequest,
        respond: oneshot::Sender<SignerResult<SignedTransactionResult>>,
    },
    RegisterDeviceWithDerivedKey {
        request: handlers::handle_register_device2_with_derived_key::RegisterDeviceRequest,
        respond: oneshot::Sender<SignerResult<SignedTransactionResult>>,
    },
    DeriveThresholdClientVerifyingShare {
        credential: SerializedRegistrationCredential,
        account_id: String,
        wrap_key_salt_b64u: String,
        respond: oneshot::Sender<SignerResult<String>>,
    },
}

/// Cloneable handle to the signer worker actor.
#[derive(Clone)]
pub struct SignerWorkerHandle {
    tx: mpsc::Sender<SignerRequest>,
}

impl SignerWorkerHandle {
    pub fn spawn(
        session_key_rx: mpsc::UnboundedReceiver<SessionKeyDelivery>,
        relay: Option<Arc<dyn RelayClient>>,
        signer_mode: SignerMode,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let worker = SignerWorker {
            wrap_keys: HashMap::new(),
            relay,
            signer_mode,
        };
        tokio::spawn(worker.run(rx, session_key_rx));
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<SignerResult<T>>) -> SignerRequest,
    ) -> SignerResult<T> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(build(respond))
            .await
            .map_err(|_| SignerError::WorkerGone)?;
        rx.await.map_err(|_| SignerError::WorkerGone)?
    }

    /// Bootstrap derivation: PRF outputs travel in the credential, no warm
    /// session required.
    pub async fn derive_near_keypair_and_encrypt(
        &self,
        credential: SerializedRegistrationCredential,
        account_id: &str,
    ) -> SignerResult<DerivedNearKey> {
        self.request(|respond| SignerRequest::DeriveNearKeypairAndEncrypt {
            credential,
            account_id: account_id.to_string(),
            respond,
        })
        .await
    }

    pub async fn recover_keypair_from_passkey(
        &self,
        credential: SerializedCredential,
        account_id: &str,
        wrap_key_salt_b64u: Option<String>,
    ) -> SignerResult<DerivedNearKey> {
        self.request(|respond| SignerRequest::RecoverKeypairFromPasskey {
            credential,
            account_id: account_id.to_string(),
            wrap_key_salt_b64u,
            respond,
        })
        .await
    }

    pub async fn sign_transactions_with_actions(
        &self,
        request: handlers::handle_sign_transactions_with_actions::SignTransactionsRequest,
    ) -> SignerResult<Vec<SignedTransactionResult>> {
        self.request(|respond| SignerRequest::SignTransactionsWithActions { request, respond })
            .await
    }

    pub async fn sign_nep413_message(
        &self,
        request: handlers::handle_sign_nep413_message::SignNep413Request,
    ) -> SignerResult<SignNep413Result> {
        self.request(|respond| SignerRequest::SignNep413Message { request, respond })
            .await
    }

    pub async fn sign_delegate_action(
        &self,
        request: handlers::handle_sign_delegate_action::SignDelegateRequest,
    ) -> SignerResult<SignedDelegateResult> {
        self.request(|respond| SignerRequest::SignDelegateAction { request, respond })
            .await
    }

    /// Raw signer used only for the device-linking temporary-key swap.
    pub async fn sign_transaction_with_keypair(
        &self,
        request: handlers::handle_sign_transaction_with_keypair::SignWithKeypairRequest,
    ) -> SignerResult<SignedTransactionResult> {
        self.request(|respond| SignerRequest::SignTransactionWithKeypair { request, respond })
            .await
    }

    /// Threshold enrollment AddKey, signed with the key re-derived from the
    /// PRF output captured during registration (no new prompt).
    pub async fn sign_add_key_threshold_no_prompt(
        &self,
        request: handlers::handle_sign_add_key_threshold_public_key_no_prompt::AddKeyThresholdRequest,
    ) -> SignerResult<SignedTransactionResult> {
        self.request(|respond| SignerRequest::SignAddKeyThresholdNoPrompt { request, respond })
            .await
    }

    /// Sign a new device's on-chain registration with the key re-derived
    /// from already-captured PRF outputs (no new prompt).
    pub async fn register_device_with_derived_key(
        &self,
        request: handlers::handle_register_device2_with_derived_key::RegisterDeviceRequest,
    ) -> SignerResult<SignedTransactionResult> {
        self.request(|respond| SignerRequest::RegisterDeviceWithDerivedKey { request, respond })
            .await
    }

    pub async fn derive_threshold_client_verifying_share(
        &self,
        credential: SerializedRegistrationCredential,
        account_id: &str,
        wrap_key_salt_b64u: &str,
    ) -> SignerResult<String> {
        self.request(|respond| SignerRequest::DeriveThresholdClientVerifyingShare {
            credential,
            account_id: account_id.to_string(),
            wrap_key_salt_b64u: wrap_key_salt_b64u.to_string(),
            respond,
        })
        .await
    }
}

struct SignerWorker {
    /// Wrap keys delivered by the VRF worker, keyed by session id. One
    /// delivery authorizes one signing request.
    wrap_keys: HashMap<String, WrapKey>,
    relay: Option<Arc<dyn RelayClient>>,
    signer_mode: SignerMode,
}

impl SignerWorker {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<SignerRequest>,
        mut session_key_rx: mpsc::UnboundedReceiver<SessionKeyDelivery>,
    ) {
        debug!("Signer worker started");
        loop {
            // Wrap-key deliveries are drained before requests so a signing
            // request sent right after a mint/dispense always finds its key.
            tokio::select! {
                biased;
                delivery = session_key_rx.recv() => {
                    match delivery {
                        Some(delivery) => {
                            debug!("Session key delivered for {}", delivery.session_id);
                            self.wrap_keys.insert(delivery.session_id, delivery.wrap_key);
                        }
                        None => break,
                    }
                }
                request = rx.recv() => {
                    match request {
                        Some(request) => self.handle(request).await,
                        None => break,
                    }
                }
            }
        }
        debug!("Signer worker stopped");
    }

    /// Take the wrap key delivered for a session. Consuming it keeps the
    /// one-delivery-per-request discipline.
    fn take_wrap_key(&mut self, session_id: &str) -> SignerResult<WrapKey> {
        self.wrap_keys
            .remove(session_id)
            .ok_or_else(|| SignerError::NoSessionKey(session_id.to_string()))
    }

    async fn handle(&mut self, request: SignerRequest) {
        match request {
            SignerRequest::DeriveNearKeypairAndEncrypt {
                credential,
                account_id,
                respond,
            } => {
                let result = handlers::handle_derive_near_keypair_and_encrypt::handle(
                    &credential,
                    &account_id,
                );
                let _ = respond.send(result);
            }
            SignerRequest::RecoverKeypairFromPasskey {
                credential,
                account_id,
                wrap_key_salt_b64u,
                respond,
            } => {
                let result = handlers::handle_recover_keypair_from_passkey::handle(
                    &credential,
                    &account_id,
                    wrap_key_salt_b64u.as_deref(),
                );
                let _ = respond.send(result);
            }
            SignerRequest::SignTransactionsWithActions { request, respond } => {
                let wrap_key = match self.take_wrap_key(&request.session_id) {
                    Ok(key) => key,
                    Err(e) => {
                        let _ = respond.send(Err(e));
                        return;
                    }
                };
                let result = handlers::handle_sign_transactions_with_actions::handle(
                    request,
                    wrap_key,
                    self.relay.clone(),
                    self.signer_mode,
                )
                .await;
                let _ = respond.send(result);
            }
            SignerRequest::SignNep413Message { request, respond } => {
                let wrap_key = match self.take_wrap_key(&request.session_id) {
                    Ok(key) => key,
                    Err(e) => {
                        let _ = respond.send(Err(e));
                        return;
                    }
                };
                let result =
                    handlers::handle_sign_nep413_message::handle(request, wrap_key);
                let _ = respond.send(result);
            }
            SignerRequest::SignDelegateAction { request, respond } => {
                let wrap_key = match self.take_wrap_key(&request.session_id) {
                    Ok(key) => key,
                    Err(e) => {
                        let _ = respond.send(Err(e));
                        return;
                    }
                };
                let result = handlers::handle_sign_delegate_action::handle(request, wrap_key);
                let _ = respond.send(result);
            }
            SignerRequest::SignTransactionWithKeypair { request, respond } => {
                let result = handlers::handle_sign_transaction_with_keypair::handle(request);
                let _ = respond.send(result);
            }
            SignerRequest::SignAddKeyThresholdNoPrompt { request, respond } => {
                let result =
                    handlers::handle_sign_add_key_threshold_public_key_no_prompt::handle(request);
                let _ = respond.send(result);
            }
            SignerRequest::RegisterDeviceWithDerivedKey { request, respond } => {
                let result = handlers::handle_register_device2_with_derived_key::handle(request);
                let _ = respond.send(result);
            }
            SignerRequest::DeriveThresholdClientVerifyingShare {
                credential,
                account_id,
                wrap_key_salt_b64u,
                respond,
            } => {
                let result = handlers::derive_threshold_client_verifying_share(
                    &credential,
                    &account_id,
                    &wrap_key_salt_b64u,
                );
                let _ = respond.send(result);
            }
        }
    }
}
