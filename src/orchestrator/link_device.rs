//! Link-device flow.
//!
//! Device2 publishes a temporary public key via QR; Device1 authorizes it
//! with one prompt (AddKey + linking mapping + a pre-signed DeleteKey safety
//! net); Device2 polls the mapping, swaps the temporary key for its real
//! derived key, signs its own registration and logs in.

use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::actions::ActionParams;
use crate::chain_client::{ContractViews, WaitUntil};
use crate::config::{
    LINK_DEVICE_POLL_INTERVAL_MS, LINK_DEVICE_SESSION_TTL_MS, STORE_DEVICE_LINKING_MAPPING_METHOD,
};
use crate::encoders::base64_url_encode;
use crate::errors::{ErrorKind, WalletError};
use crate::events::WalletEvent;
use crate::types::vrf::{VrfData, VrfInputData};
use crate::vault::{AuthenticatorRecord, UserRecord};

use super::PasskeyWallet;

pub const QR_PAYLOAD_VERSION: &str = "1.0";

/// JSON payload carried in the QR code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLinkingQrPayload {
    pub device2_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub timestamp: u64,
    pub version: String,
}

/// In-memory Device2 linking session. Holds the temporary private key; the
/// key and any temp vault rows are erased on failure or cancellation.
pub struct Device2LinkingSession {
    pub qr_payload: DeviceLinkingQrPayload,
    temp_private_key: Zeroizing<String>,
    temp_public_key: String,
    created_at_ms: u64,
    expires_at_ms: u64,
    cancel: CancellationToken,
}

impl Device2LinkingSession {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    pub fn qr_json(&self) -> Result<String, WalletError> {
        serde_json::to_string(&self.qr_payload).map_err(|e| WalletError::internal(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct LinkDeviceResult {
    pub account_id: String,
    pub device_number: u32,
    pub near_public_key: String,
}

/// Device1-side result: the two broadcast transactions plus the retained
/// DeleteKey safety net.
#[derive(Debug)]
pub struct Device1LinkingResult {
    pub add_key_tx_hash: String,
    pub mapping_tx_hash: String,
    /// Pre-signed DeleteKey(device2 temp key), broadcast automatically at
    /// session expiry unless `cancel_safety_net` is cancelled first.
    pub safety_net_delete_key_borsh: Vec<u8>,
    pub cancel_safety_net: CancellationToken,
}

impl PasskeyWallet {
    // === DEVICE 2 ===

    /// Generate the temporary keypair and QR payload.
    pub fn start_device2_linking(
        &self,
        account_id_hint: Option<&str>,
    ) -> Result<Device2LinkingSession, WalletError> {
        let (temp_private_key, temp_public_key) = crate::crypto::generate_near_keypair()?;
        let now_ms = self.clock.now_ms();
        Ok(Device2LinkingSession {
            qr_payload: DeviceLinkingQrPayload {
                device2_public_key: temp_public_key.clone(),
                account_id: account_id_hint.map(|a| a.to_string()),
                timestamp: now_ms,
                version: QR_PAYLOAD_VERSION.to_string(),
            },
            temp_private_key: Zeroizing::new(temp_private_key),
            temp_public_key,
            created_at_ms: now_ms,
            expires_at_ms: now_ms + LINK_DEVICE_SESSION_TTL_MS,
            cancel: CancellationToken::new(),
        })
    }

    /// Poll the linking mapping and complete the swap once Device1 has
    /// authorized the temporary key.
    pub async fn poll_and_complete_device2_linking(
        &self,
        session: &Device2LinkingSession,
    ) -> Result<LinkDeviceResult, WalletError> {
        let result = self.device2_linking_inner(session).await;
        if let Err(err) = &result {
            self.events.action_error(err.kind(), err.message());
        } else {
            self.events.after_call(true);
        }
        result
    }

    async fn device2_linking_inner(
        &self,
        session: &Device2LinkingSession,
    ) -> Result<LinkDeviceResult, WalletError> {
        let views = ContractViews::new(self.chain.as_ref(), &self.config.contract_id);

        // Poll until Device1 stores the mapping, the session expires, or the
        // caller cancels.
        let account_id = loop {
            if session.cancel.is_cancelled() {
                return Err(WalletError::new(
                    ErrorKind::LinkDeviceSessionExpired,
                    "Device linking cancelled",
                ));
            }
            if self.clock.now_ms() >= session.expires_at_ms {
                return Err(WalletError::new(
                    ErrorKind::LinkDeviceSessionExpired,
                    "Device linking session expired before Device1 authorized the key",
                ));
            }

            match views
                .get_device_linking_account(&session.temp_public_key)
                .await
            {
                Ok(Some((account_id, _counter))) => break account_id,
                Ok(None) => {}
                Err(err) => debug!("linking mapping poll failed: {}", err),
            }

            self.events.emit(WalletEvent::LinkDeviceProgress {
                phase: "polling".to_string(),
                message: "Waiting for Device1 authorization".to_string(),
            });
            tokio::select! {
                _ = session.cancel.cancelled() => {}
                _ = self.clock.sleep(Duration::from_millis(LINK_DEVICE_POLL_INTERVAL_MS)) => {}
            }
        };

        let device_number = self.vault.next_device_number(&account_id)?;
        let result = self
            .complete_device2_linking(session, &account_id, device_number)
            .await;

        if result.is_err() {
            // Failure path: erase the temp rows; the temp private key is
            // zeroized when the session drops.
            if let Err(cleanup_err) =
                self.vault
                    .delete_device_rows(&account_id, device_number, None)
            {
                warn!("link-device cleanup failed: {}", cleanup_err);
            }
        }
        result
    }

    async fn complete_device2_linking(
        &self,
        session: &Device2LinkingSession,
        account_id: &str,
        device_number: u32,
    ) -> Result<LinkDeviceResult, WalletError> {
        // New passkey for the real account.
        let challenge = crate::crypto::random_salt_b64u().map_err(WalletError::internal)?;
        let credential = self
            .webauthn
            .request_registration_credential(account_id, &challenge)
            .await?;
        let (prf_first, _prf_second) = credential.require_prf_outputs()?;

        // Deterministic VRF + NEAR keys for this device.
        let derived_vrf = self
            .vrf
            .derive_vrf_keypair(&prf_first, account_id, true, None)
            .await?;
        let derived_near = self
            .signer
            .derive_near_keypair_and_encrypt(credential.clone(), account_id)
            .await
            .map_err(WalletError::from)?;

        // Key swap signed by the temporary key: AddKey(real) + DeleteKey(temp).
        let temp_access_key = self
            .chain
            .view_access_key(account_id, &session.temp_public_key)
            .await
            .map_err(|e| {
                WalletError::new(ErrorKind::LinkDeviceKeyswapFailed, e.message().to_string())
            })?;
        let block = self.fresh_block().await?;
        let swap = self
            .signer
            .sign_transaction_with_keypair(
                crate::signer_worker::handlers::handle_sign_transaction_with_keypair::SignWithKeypairRequest {
                    private_key: session.temp_private_key.to_string(),
                    signer_account_id: account_id.to_string(),
                    receiver_id: account_id.to_string(),
                    nonce: temp_access_key.nonce + 1,
                    block_hash: block.block_hash.clone(),
                    actions: vec![
                        ActionParams::AddKey {
                            public_key: derived_near.public_key.clone(),
                            access_key: r#"{"nonce":0,"permission":"FullAccess"}"#.to_string(),
                        },
                        ActionParams::DeleteKey {
                            public_key: session.temp_public_key.clone(),
                        },
                    ],
                },
            )
            .await
            .map_err(WalletError::from)?;
        self.chain
            .send_transaction(&swap.signed_transaction_borsh, WaitUntil::Final)
            .await
            .map_err(|e| {
                WalletError::new(ErrorKind::LinkDeviceKeyswapFailed, e.message().to_string())
            })?;
        self.wait_for_access_keys(account_id, &[derived_near.public_key.clone()])
            .await?;

        // Device2 registration signed with the derived key, no new prompt.
        let reg_block = self.fresh_block().await?;
        let vrf_challenge = self
            .vrf
            .generate_challenge(
                None,
                VrfInputData {
                    user_id: account_id.to_string(),
                    rp_id: self.webauthn.rp_id().to_string(),
                    block_height: reg_block.block_height,
                    block_hash: reg_block.block_hash.clone(),
                    intent_digest: Some(base64_url_encode(&crate::crypto::sha256_concat(&[
                        b"link-device",
                        account_id.as_bytes(),
                    ]))),
                    session_policy_digest_32: None,
                },
            )
            .await?;
        let new_access_key = self
            .chain
            .view_access_key(account_id, &derived_near.public_key)
            .await?;
        let registration_tx = self
            .signer
            .register_device_with_derived_key(
                crate::signer_worker::handlers::handle_register_device2_with_derived_key::RegisterDeviceRequest {
                    prf_source: crate::signer_worker::handlers::handle_register_device2_with_derived_key::PrfSource::Registration(credential.clone()),
                    account_id: account_id.to_string(),
                    contract_id: self.config.contract_id.clone(),
                    vrf_data: VrfData::try_from(&vrf_challenge).map_err(WalletError::validation)?,
                    deterministic_vrf_public_key: crate::encoders::base64_url_decode(
                        &derived_vrf.vrf_public_key,
                    )
                    .map_err(WalletError::validation)?,
                    registration_credential: (&credential).into(),
                    authenticator_options: Some(self.config.authenticator_options.clone()),
                    nonce: new_access_key.nonce + 1,
                    block_hash: reg_block.block_hash,
                },
            )
            .await
            .map_err(WalletError::from)?;
        self.chain
            .send_transaction(&registration_tx.signed_transaction_borsh, WaitUntil::Final)
            .await?;

        // Persist and auto-login (the VRF keypair is already unlocked from
        // the derive step; Shamir re-encryption is best-effort).
        let now_ms = self.clock.now_ms();
        let user = UserRecord {
            account_id: account_id.to_string(),
            device_number,
            vrf_public_key_b64u: derived_vrf.vrf_public_key.clone(),
            near_public_key: derived_near.public_key.clone(),
            encrypted_vrf_keypair: derived_vrf.encrypted_vrf_keypair.clone(),
            server_encrypted_vrf_keypair: derived_vrf.server_encrypted_vrf_keypair.clone(),
            registered_at_ms: now_ms,
            last_updated_ms: now_ms,
        };
        let authenticator = AuthenticatorRecord {
            account_id: account_id.to_string(),
            credential_id: credential.id.clone(),
            device_number,
            transports: credential.response.transports.clone(),
            registered_at_ms: now_ms,
        };
        self.vault.atomic_store_registration_data(
            &user,
            &derived_near.encrypted_near_key,
            &authenticator,
        )?;

        self.nonces
            .initialize_user(account_id, &derived_near.public_key)
            .await;
        *self.current_user.lock().await = Some(super::CurrentUser {
            account_id: account_id.to_string(),
            device_number,
            near_public_key: derived_near.public_key.clone(),
        });

        Ok(LinkDeviceResult {
            account_id: account_id.to_string(),
            device_number,
            near_public_key: derived_near.public_key,
        })
    }

    // === DEVICE 1 ===

    /// Authorize a scanned QR payload: sign AddKey + linking mapping + the
    /// DeleteKey safety net with a single prompt, broadcast the first two,
    /// and schedule the third for session expiry.
    pub async fn link_device_with_qr(
        &self,
        qr_payload: DeviceLinkingQrPayload,
    ) -> Result<Device1LinkingResult, WalletError> {
        if qr_payload.version != QR_PAYLOAD_VERSION {
            return Err(WalletError::validation(format!(
                "Unsupported QR payload version {}",
                qr_payload.version
            )));
        }
        let now_ms = self.clock.now_ms();
        if now_ms.saturating_sub(qr_payload.timestamp) > LINK_DEVICE_SESSION_TTL_MS {
            return Err(WalletError::new(
                ErrorKind::LinkDeviceSessionExpired,
                "QR payload is too old",
            ));
        }
        crate::types::near::ensure_ed25519_prefix(&qr_payload.device2_public_key)
            .map_err(WalletError::validation)?;

        let current = self.current_user().await.ok_or_else(|| {
            WalletError::new(ErrorKind::ValidationFailed, "No signed-in user on Device1")
        })?;

        // Three transactions, one prompt.
        let signed = self
            .sign_transactions(
                &current.account_id,
                &[
                    super::execute::TransactionInput {
                        receiver_id: current.account_id.clone(),
                        actions: vec![ActionParams::AddKey {
                            public_key: qr_payload.device2_public_key.clone(),
                            access_key: r#"{"nonce":0,"permission":"FullAccess"}"#.to_string(),
                        }],
                    },
                    super::execute::TransactionInput {
                        receiver_id: self.config.contract_id.clone(),
                        actions: vec![ActionParams::FunctionCall {
                            method_name: STORE_DEVICE_LINKING_MAPPING_METHOD.to_string(),
                            args: serde_json::json!({
                                "device_public_key": qr_payload.device2_public_key,
                                "target_account_id": current.account_id,
                            })
                            .to_string(),
                            gas: crate::config::DEVICE_REGISTRATION_GAS.to_string(),
                            deposit: "0".to_string(),
                        }],
                    },
                    super::execute::TransactionInput {
                        receiver_id: current.account_id.clone(),
                        actions: vec![ActionParams::DeleteKey {
                            public_key: qr_payload.device2_public_key.clone(),
                        }],
                    },
                ],
            )
            .await?;

        let [add_key_tx, mapping_tx, delete_key_tx] = <[_; 3]>::try_from(signed)
            .map_err(|_| WalletError::internal("expected three signed transactions"))?;

        // Broadcast AddKey + mapping; hold DeleteKey as the safety net.
        let add_outcome = self.send_transaction(&add_key_tx, WaitUntil::Final).await?;
        let mapping_outcome = self.send_transaction(&mapping_tx, WaitUntil::Final).await?;

        let cancel = CancellationToken::new();
        let safety_cancel = cancel.clone();
        let chain = self.chain.clone();
        let nonces = self.nonces.clone();
        let clock = self.clock.clone();
        let safety_bytes = delete_key_tx.signed_transaction_borsh.clone();
        let safety_nonce = delete_key_tx.signed_transaction.transaction.nonce;
        let deadline_ms = now_ms + LINK_DEVICE_SESSION_TTL_MS;
        tokio::spawn(async move {
            // Wait out the linking window in cancellable steps; fire the
            // DeleteKey only if nobody called the flow off.
            while clock.now_ms() < deadline_ms {
                if safety_cancel.is_cancelled() {
                    nonces.release_nonce(safety_nonce).await;
                    return;
                }
                tokio::select! {
                    _ = safety_cancel.cancelled() => {}
                    _ = clock.sleep(Duration::from_millis(LINK_DEVICE_POLL_INTERVAL_MS)) => {}
                }
            }
            if safety_cancel.is_cancelled() {
                nonces.release_nonce(safety_nonce).await;
                return;
            }
            match chain.send_transaction(&safety_bytes, WaitUntil::Final).await {
                Ok(_) => {
                    let _ = nonces
                        .update_nonce_from_blockchain(chain.as_ref(), safety_nonce)
                        .await;
                }
                Err(err) => {
                    nonces.release_nonce(safety_nonce).await;
                    debug!("safety-net DeleteKey broadcast failed: {}", err);
                }
            }
        });

        Ok(Device1LinkingResult {
            add_key_tx_hash: add_outcome.transaction_hash,
            mapping_tx_hash: mapping_outcome.transaction_hash,
            safety_net_delete_key_borsh: delete_key_tx.signed_transaction_borsh,
            cancel_safety_net: cancel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_payload_round_trips_with_documented_field_names() {
        let payload = DeviceLinkingQrPayload {
            device2_public_key: "ed25519:Abc".to_string(),
            account_id: Some("alice.near".to_string()),
            timestamp: 1234,
            version: QR_PAYLOAD_VERSION.to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("device2PublicKey").is_some());
        assert!(json.get("accountId").is_some());
        assert_eq!(json["version"], "1.0");
        let restored: DeviceLinkingQrPayload = serde_json::from_value(json).unwrap();
        assert_eq!(restored.device2_public_key, payload.device2_public_key);
    }
}
