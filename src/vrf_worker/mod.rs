//! VRF worker actor.
//!
//! Single-threaded message-passing actor that exclusively owns the unlocked
//! VRF keypair and all warm signing sessions. Callers talk to it through
//! [`VrfWorkerHandle`]; wrap keys minted for signing sessions are delivered
//! to the signer worker over a dedicated channel and never returned to the
//! caller.

pub mod manager;
pub mod shamir3pass;

use std::sync::Arc;

use log::{debug, warn};
use num_bigint::BigUint;
use tokio::sync::{mpsc, oneshot};

use crate::clock::Clock;
use crate::config::{Shamir3PassConfig, REGISTRATION_BOOTSTRAP_INTENT};
use crate::crypto::{sha256_concat, WrapKey};
use crate::encoders::{base64_url_encode, base64_url_decode};
use crate::errors::{VrfResult, VrfWorkerError};
use crate::relay_client::RelayClient;
use crate::types::vrf::{EncryptedVrfKeypair, ServerEncryptedVrfKeypair, VrfChallenge, VrfInputData};
use crate::types::webauthn::{challenge_from_client_data, decode_user_handle, SerializedCredential};
use manager::{VrfKeyManager, VrfSessionData, VrfStatus};
use shamir3pass::{decode_biguint_b64u, encode_biguint_b64u};

/// Wrap key handed from the VRF worker to the signer worker when a signing
/// session is minted or dispensed.
pub struct SessionKeyDelivery {
    pub session_id: String,
    pub account_id: String,
    pub wrap_key: WrapKey,
}

#[derive(Debug, Clone)]
pub struct BootstrapChallengeResponse {
    pub vrf_public_key: String,
    pub vrf_challenge: VrfChallenge,
}

#[derive(Debug, Clone)]
pub struct DeriveVrfKeypairResponse {
    pub vrf_public_key: String,
    pub encrypted_vrf_keypair: EncryptedVrfKeypair,
    pub server_encrypted_vrf_keypair: Option<ServerEncryptedVrfKeypair>,
    pub vrf_challenge: Option<VrfChallenge>,
}

#[derive(Debug, Clone)]
pub struct MintedSession {
    pub session_id: String,
    pub wrap_key_salt_b64u: String,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,
    /// `active | exhausted | expired | not_found`
    pub status: &'static str,
    pub remaining_uses: Option<u32>,
    pub expires_at_ms: Option<u64>,
}

pub struct MintSigningSessionRequest {
    pub session_id: String,
    pub account_id: String,
    pub credential: SerializedCredential,
    /// Existing vault salt, or empty to mint a fresh one.
    pub wrap_key_salt_b64u: String,
    pub ttl_ms: u64,
    pub remaining_uses: u32,
}

enum VrfRequest {
    GenerateBootstrapChallenge {
        account_id: String,
        rp_id: String,
        block_height: u64,
        block_hash: String,
        respond: oneshot::Sender<VrfResult<BootstrapChallengeResponse>>,
    },
    DeriveVrfKeypair {
        prf_output_b64u: String,
        account_id: String,
        load_into_memory: bool,
        vrf_input: Option<VrfInputData>,
        respond: oneshot::Sender<VrfResult<DeriveVrfKeypairResponse>>,
    },
    UnlockVrfKeypair {
        account_id: String,
        encrypted: EncryptedVrfKeypair,
        prf_output_b64u: String,
        respond: oneshot::Sender<VrfResult<()>>,
    },
    ShamirUnlock {
        account_id: String,
        server_encrypted: ServerEncryptedVrfKeypair,
        respond: oneshot::Sender<VrfResult<()>>,
    },
    ShamirReencrypt {
        respond: oneshot::Sender<VrfResult<ServerEncryptedVrfKeypair>>,
    },
    GenerateChallenge {
        session_id: Option<String>,
        input: VrfInputData,
        respond: oneshot::Sender<VrfResult<VrfChallenge>>,
    },
    MintSigningSession {
        request: MintSigningSessionRequest,
        respond: oneshot::Sender<VrfResult<MintedSession>>,
    },
    DispenseSessionKey {
        session_id: String,
        uses: u32,
        respond: oneshot::Sender<VrfResult<SessionStatus>>,
    },
    CheckStatus {
        respond: oneshot::Sender<VrfStatus>,
    },
    CheckSessionStatus {
        session_id: String,
        respond: oneshot::Sender<SessionStatus>,
    },
    Logout {
        respond: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the VRF worker actor.
#[derive(Clone)]
pub struct VrfWorkerHandle {
    tx: mpsc::Sender<VrfRequest>,
}

impl VrfWorkerHandle {
    /// Spawn the worker. `session_key_tx` is the dedicated channel to the
    /// signer worker for wrap-key delivery.
    pub fn spawn(
        shamir_config: Option<Shamir3PassConfig>,
        relay: Option<Arc<dyn RelayClient>>,
        session_key_tx: mpsc::UnboundedSender<SessionKeyDelivery>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let worker = VrfWorker {
            manager: VrfKeyManager::new(
                shamir_config
                    .as_ref()
                    .and_then(|c| c.shamir_p_b64u.as_deref()),
            ),
            shamir_config,
            relay,
            session_key_tx,
            clock,
        };
        tokio::spawn(worker.run(rx));
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<VrfResult<T>>) -> VrfRequest,
    ) -> VrfResult<T> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(build(respond))
            .await
            .map_err(|_| VrfWorkerError::WorkerGone)?;
        rx.await.map_err(|_| VrfWorkerError::WorkerGone)?
    }

    pub async fn generate_bootstrap_challenge(
        &self,
        account_id: &str,
        rp_id: &str,
        block_height: u64,
        block_hash: &str,
    ) -> VrfResult<BootstrapChallengeResponse> {
        self.request(|respond| VrfRequest::GenerateBootstrapChallenge {
            account_id: account_id.to_string(),
            rp_id: rp_id.to_string(),
            block_height,
            block_hash: block_hash.to_string(),
            respond,
        })
        .await
    }

    pub async fn derive_vrf_keypair(
        &self,
        prf_output_b64u: &str,
        account_id: &str,
        load_into_memory: bool,
        vrf_input: Option<VrfInputData>,
    ) -> VrfResult<DeriveVrfKeypairResponse> {
        self.request(|respond| VrfRequest::DeriveVrfKeypair {
            prf_output_b64u: prf_output_b64u.to_string(),
            account_id: account_id.to_string(),
            load_into_memory,
            vrf_input,
            respond,
        })
        .await
    }

    pub async fn unlock_vrf_keypair(
        &self,
        account_id: &str,
        encrypted: EncryptedVrfKeypair,
        prf_output_b64u: &str,
    ) -> VrfResult<()> {
        self.request(|respond| VrfRequest::UnlockVrfKeypair {
            account_id: account_id.to_string(),
            encrypted,
            prf_output_b64u: prf_output_b64u.to_string(),
            respond,
        })
        .await
    }

    /// Unlock without a biometric prompt via the Shamir 3-pass relay round.
    pub async fn shamir_unlock(
        &self,
        account_id: &str,
        server_encrypted: ServerEncryptedVrfKeypair,
    ) -> VrfResult<()> {
        self.request(|respond| VrfRequest::ShamirUnlock {
            account_id: account_id.to_string(),
            server_encrypted,
            respond,
        })
        .await
    }

    /// Re-run the registration-side Shamir encryption of the in-memory
    /// keypair (proactive rotation).
    pub async fn shamir_reencrypt(&self) -> VrfResult<ServerEncryptedVrfKeypair> {
        self.request(|respond| VrfRequest::ShamirReencrypt { respond })
            .await
    }

    pub async fn generate_challenge(
        &self,
        session_id: Option<&str>,
        input: VrfInputData,
    ) -> VrfResult<VrfChallenge> {
        self.request(|respond| VrfRequest::GenerateChallenge {
            session_id: session_id.map(|s| s.to_string()),
            input,
            respond,
        })
        .await
    }

    pub async fn mint_signing_session(
        &self,
        request: MintSigningSessionRequest,
    ) -> VrfResult<MintedSession> {
        self.request(|respond| VrfRequest::MintSigningSession { request, respond })
            .await
    }

    pub async fn dispense_session_key(
        &self,
        session_id: &str,
        uses: u32,
    ) -> VrfResult<SessionStatus> {
        self.request(|respond| VrfRequest::DispenseSessionKey {
            session_id: session_id.to_string(),
            uses,
            respond,
        })
        .await
    }

    pub async fn check_status(&self) -> VrfResult<VrfStatus> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(VrfRequest::CheckStatus { respond })
            .await
            .map_err(|_| VrfWorkerError::WorkerGone)?;
        rx.await.map_err(|_| VrfWorkerError::WorkerGone)
    }

    pub async fn check_session_status(&self, session_id: &str) -> VrfResult<SessionStatus> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(VrfRequest::CheckSessionStatus {
                session_id: session_id.to_string(),
                respond,
            })
            .await
            .map_err(|_| VrfWorkerError::WorkerGone)?;
        rx.await.map_err(|_| VrfWorkerError::WorkerGone)
    }

    pub async fn clear_session(&self) -> VrfResult<()> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(VrfRequest::Logout { respond })
            .await
            .map_err(|_| VrfWorkerError::WorkerGone)?;
        rx.await.map_err(|_| VrfWorkerError::WorkerGone)
    }
}

struct VrfWorker {
    manager: VrfKeyManager,
    shamir_config: Option<Shamir3PassConfig>,
    relay: Option<Arc<dyn RelayClient>>,
    session_key_tx: mpsc::UnboundedSender<SessionKeyDelivery>,
    clock: Arc<dyn Clock>,
}

impl VrfWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<VrfRequest>) {
        debug!("VRF worker started");
        while let Some(request) = rx.recv().await {
            self.handle(request).await;
        }
        debug!("VRF worker stopped");
    }

    async fn handle(&mut self, request: VrfRequest) {
        match request {
            VrfRequest::GenerateBootstrapChallenge {
                account_id,
                rp_id,
                block_height,
                block_hash,
                respond,
            } => {
                let result = self.generate_bootstrap_challenge(
                    &account_id,
                    &rp_id,
                    block_height,
                    &block_hash,
                );
                let _ = respond.send(result);
            }
            VrfRequest::DeriveVrfKeypair {
                prf_output_b64u,
                account_id,
                load_into_memory,
                vrf_input,
                respond,
            } => {
                let result = self
                    .derive_vrf_keypair(&prf_output_b64u, &account_id, load_into_memory, vrf_input)
                    .await;
                let _ = respond.send(result);
            }
            VrfRequest::UnlockVrfKeypair {
                account_id,
                encrypted,
                prf_output_b64u,
                respond,
            } => {
                let result = self.unlock_keypair(&account_id, &encrypted, &prf_output_b64u);
                let _ = respond.send(result);
            }
            VrfRequest::ShamirUnlock {
                account_id,
                server_encrypted,
                respond,
            } => {
                let result = self.shamir_unlock(&account_id, &server_encrypted).await;
                let _ = respond.send(result);
            }
            VrfRequest::ShamirReencrypt { respond } => {
                let result = self.shamir_reencrypt_current().await;
                let _ = respond.send(result);
            }
            VrfRequest::GenerateChallenge {
                session_id,
                input,
                respond,
            } => {
                let result = self.manager.generate_challenge(&input);
                if let (Ok(challenge), Some(session_id)) = (&result, session_id) {
                    self.manager
                        .vrf_challenges
                        .insert(session_id, challenge.clone());
                }
                let _ = respond.send(result);
            }
            VrfRequest::MintSigningSession { request, respond } => {
                let result = self.mint_signing_session(request);
                let _ = respond.send(result);
            }
            VrfRequest::DispenseSessionKey {
                session_id,
                uses,
                respond,
            } => {
                let result = self.dispense_session_key(&session_id, uses);
                let _ = respond.send(result);
            }
            VrfRequest::CheckStatus { respond } => {
                let _ = respond.send(self.manager.status(self.clock.now_ms()));
            }
            VrfRequest::CheckSessionStatus {
                session_id,
                respond,
            } => {
                let _ = respond.send(self.session_status(&session_id));
            }
            VrfRequest::Logout { respond } => {
                self.manager.logout();
                let _ = respond.send(());
            }
        }
    }

    fn generate_bootstrap_challenge(
        &mut self,
        account_id: &str,
        rp_id: &str,
        block_height: u64,
        block_hash: &str,
    ) -> VrfResult<BootstrapChallengeResponse> {
        let vrf_public_key = self.manager.generate_bootstrap_keypair(account_id)?;
        self.manager.set_session_start(self.clock.now_ms());

        let intent_digest =
            sha256_concat(&[REGISTRATION_BOOTSTRAP_INTENT, account_id.as_bytes()]);
        let input = VrfInputData {
            user_id: account_id.to_string(),
            rp_id: rp_id.to_string(),
            block_height,
            block_hash: block_hash.to_string(),
            intent_digest: Some(base64_url_encode(&intent_digest)),
            session_policy_digest_32: None,
        };
        let vrf_challenge = self.manager.generate_challenge(&input)?;

        Ok(BootstrapChallengeResponse {
            vrf_public_key,
            vrf_challenge,
        })
    }

    async fn derive_vrf_keypair(
        &mut self,
        prf_output_b64u: &str,
        account_id: &str,
        load_into_memory: bool,
        vrf_input: Option<VrfInputData>,
    ) -> VrfResult<DeriveVrfKeypairResponse> {
        let prf_output =
            base64_url_decode(prf_output_b64u).map_err(VrfWorkerError::InvalidPrfOutput)?;
        let keypair = self.manager.derive_keypair_from_prf(&prf_output, account_id)?;
        let (vrf_public_key, encrypted_vrf_keypair) =
            self.manager.encrypt_keypair(&keypair, &prf_output, account_id)?;

        let vrf_challenge = match &vrf_input {
            Some(input) => Some(
                self.manager
                    .generate_challenge_with_keypair(&keypair, input)?,
            ),
            None => None,
        };

        if load_into_memory {
            self.manager.load_keypair(keypair, account_id);
            self.manager.set_session_start(self.clock.now_ms());
        }

        // Registration-side Shamir encryption is best-effort; a relay outage
        // only costs the auto-unlock path.
        let server_encrypted_vrf_keypair = if load_into_memory {
            match self.shamir_reencrypt_current().await {
                Ok(blob) => Some(blob),
                Err(VrfWorkerError::MissingRequiredData(_)) => None,
                Err(e) => {
                    warn!("Shamir registration encryption failed: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(DeriveVrfKeypairResponse {
            vrf_public_key,
            encrypted_vrf_keypair,
            server_encrypted_vrf_keypair,
            vrf_challenge,
        })
    }

    fn unlock_keypair(
        &mut self,
        account_id: &str,
        encrypted: &EncryptedVrfKeypair,
        prf_output_b64u: &str,
    ) -> VrfResult<()> {
        let prf_output =
            base64_url_decode(prf_output_b64u).map_err(VrfWorkerError::InvalidPrfOutput)?;
        self.manager.unlock_keypair(account_id, encrypted, &prf_output)?;
        self.manager.set_session_start(self.clock.now_ms());
        Ok(())
    }

    /// Shamir 3-pass unlock round: temp-lock the stored `KEK_s`, have the
    /// relay strip its lock, strip ours, then AEAD-decrypt.
    async fn shamir_unlock(
        &mut self,
        account_id: &str,
        server_encrypted: &ServerEncryptedVrfKeypair,
    ) -> VrfResult<()> {
        let relay = self.require_shamir_relay()?;

        let kek_s: BigUint = decode_biguint_b64u(&server_encrypted.kek_s_b64u)
            .map_err(VrfWorkerError::Shamir)?;
        let temp = self
            .manager
            .shamir
            .generate_lock_keys()
            .map_err(|e| VrfWorkerError::Shamir(e.to_string()))?;
        let kek_st = self.manager.shamir.add_lock(&kek_s, &temp.e);

        let response = relay
            .shamir_remove_server_lock(
                &encode_biguint_b64u(&kek_st),
                &server_encrypted.server_key_id,
            )
            .await
            .map_err(|e| VrfWorkerError::Shamir(e.to_string()))?;

        let kek_t: BigUint =
            decode_biguint_b64u(&response.kek_c_b64u).map_err(VrfWorkerError::Shamir)?;
        let kek = self.manager.shamir.remove_lock(&kek_t, &temp.d);

        let blob = base64_url_decode(&server_encrypted.ciphertext_blob_b64u)
            .map_err(VrfWorkerError::Serialization)?;
        let plaintext = self
            .manager
            .shamir
            .decrypt_with_kek(&blob, &kek)
            .map_err(|e| VrfWorkerError::Shamir(e.to_string()))?;

        let keypair = self.manager.deserialize_keypair_data(&plaintext)?;
        self.manager.load_keypair(keypair, account_id);
        self.manager.set_session_start(self.clock.now_ms());

        if !self.manager.session_active {
            return Err(VrfWorkerError::Shamir(
                "VRF session inactive after Shamir3Pass unlock".to_string(),
            ));
        }
        Ok(())
    }

    /// Registration-side Shamir encryption of the in-memory keypair:
    /// random KEK → AEAD blob, then client lock → server lock → client
    /// unlock, leaving `KEK_s` and the relay's key epoch.
    async fn shamir_reencrypt_current(&mut self) -> VrfResult<ServerEncryptedVrfKeypair> {
        let relay = self.require_shamir_relay()?;
        let plaintext = self.manager.serialize_current_keypair()?;

        let (blob, kek) = self
            .manager
            .shamir
            .encrypt_with_random_kek(&plaintext)
            .map_err(|e| VrfWorkerError::Shamir(e.to_string()))?;
        let client = self
            .manager
            .shamir
            .generate_lock_keys()
            .map_err(|e| VrfWorkerError::Shamir(e.to_string()))?;
        let kek_c = self.manager.shamir.add_lock(&kek, &client.e);

        let response = relay
            .shamir_apply_server_lock(&encode_biguint_b64u(&kek_c))
            .await
            .map_err(|e| VrfWorkerError::Shamir(e.to_string()))?;

        let kek_cs: BigUint =
            decode_biguint_b64u(&response.kek_cs_b64u).map_err(VrfWorkerError::Shamir)?;
        let kek_s = self.manager.shamir.remove_lock(&kek_cs, &client.d);

        Ok(ServerEncryptedVrfKeypair {
            ciphertext_blob_b64u: base64_url_encode(&blob),
            kek_s_b64u: encode_biguint_b64u(&kek_s),
            server_key_id: response.key_id.unwrap_or_default(),
        })
    }

    fn require_shamir_relay(&self) -> VrfResult<Arc<dyn RelayClient>> {
        if self.shamir_config.is_none() {
            return Err(VrfWorkerError::MissingRequiredData(
                "Shamir 3-pass relay is not configured".to_string(),
            ));
        }
        self.relay.clone().ok_or_else(|| {
            VrfWorkerError::MissingRequiredData("Shamir 3-pass relay is not configured".to_string())
        })
    }

    /// Mint a warm signing session from a fresh WebAuthn assertion: the
    /// credential must carry PRF outputs, belong to the session's account
    /// (userHandle match) and present a never-before-seen challenge.
    fn mint_signing_session(
        &mut self,
        request: MintSigningSessionRequest,
    ) -> VrfResult<MintedSession> {
        let credential = &request.credential;

        let handle_account = credential
            .response
            .user_handle
            .as_deref()
            .map(decode_user_handle)
            .transpose()
            .map_err(|e| VrfWorkerError::Serialization(e.to_string()))?;
        if let Some(handle_account) = handle_account {
            if handle_account != request.account_id {
                return Err(VrfWorkerError::CredentialAccountMismatch {
                    expected: request.account_id.clone(),
                    actual: handle_account,
                });
            }
        }

        let webauthn_challenge = challenge_from_client_data(&credential.response.client_data_json)
            .map_err(|e| VrfWorkerError::Serialization(e.to_string()))?;
        self.manager
            .consume_webauthn_challenge(&request.session_id, &webauthn_challenge)?;

        let prf_first = credential
            .prf_first()
            .ok_or(VrfWorkerError::MissingPrfOutput)?;
        let prf_first_bytes =
            base64_url_decode(prf_first).map_err(VrfWorkerError::InvalidPrfOutput)?;

        let wrap_key_salt_b64u = if request.wrap_key_salt_b64u.trim().is_empty() {
            crate::crypto::random_salt_b64u().map_err(VrfWorkerError::Serialization)?
        } else {
            request.wrap_key_salt_b64u.clone()
        };

        let wrap_key = WrapKey::derive(&prf_first_bytes, &wrap_key_salt_b64u)
            .map_err(VrfWorkerError::Serialization)?;

        let now_ms = self.clock.now_ms();
        self.manager.upsert_session(
            &request.session_id,
            VrfSessionData {
                account_id: request.account_id.clone(),
                wrap_key: wrap_key.clone(),
                created_at_ms: now_ms,
                expires_at_ms: Some(now_ms + request.ttl_ms),
                remaining_uses: Some(request.remaining_uses),
            },
        );

        // Session metadata only; the wrap key goes straight to the signer.
        let _ = self.session_key_tx.send(SessionKeyDelivery {
            session_id: request.session_id.clone(),
            account_id: request.account_id.clone(),
            wrap_key,
        });

        Ok(MintedSession {
            session_id: request.session_id,
            wrap_key_salt_b64u,
        })
    }

    fn dispense_session_key(&mut self, session_id: &str, uses: u32) -> VrfResult<SessionStatus> {
        let now_ms = self.clock.now_ms();
        let wrap_key = self.manager.dispense_session_key(session_id, uses, now_ms)?;
        let account_id = self
            .manager
            .session_account(session_id)
            .unwrap_or_default()
            .to_string();

        let _ = self.session_key_tx.send(SessionKeyDelivery {
            session_id: session_id.to_string(),
            account_id,
            wrap_key,
        });

        Ok(self.session_status(session_id))
    }

    fn session_status(&mut self, session_id: &str) -> SessionStatus {
        let now_ms = self.clock.now_ms();
        match self.manager.sessions.get(session_id) {
            None => SessionStatus {
                session_id: session_id.to_string(),
                status: "not_found",
                remaining_uses: None,
                expires_at_ms: None,
            },
            Some(session) => {
                let remaining_uses = session.remaining_uses;
                let expires_at_ms = session.expires_at_ms;
                let status = if session.is_expired(now_ms) {
                    self.manager.sessions.remove(session_id);
                    "expired"
                } else if remaining_uses == Some(0) {
                    "exhausted"
                } else {
                    "active"
                };
                SessionStatus {
                    session_id: session_id.to_string(),
                    status,
                    remaining_uses,
                    expires_at_ms,
                }
            }
        }
    }
}
