//! Email recovery: a two-phase flow around a persistent pending record.
//!
//! `start` collects a new passkey, derives keys for the new device and
//! produces a `mailto:` URL; the DKIM verifier contract adds the new key
//! on-chain after the user sends the email; polling observes the
//! verification result and `finalize` completes the device registration.

use std::time::Duration;

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::chain_client::{ContractViews, WaitUntil};
use crate::config::EmailRecoveryConfig;
use crate::errors::{ErrorKind, WalletError};
use crate::events::WalletEvent;
use crate::types::vrf::{VrfData, VrfInputData};
use crate::vault::{
    AuthenticatorRecord, PendingEmailRecovery, PendingRecoveryStatus, UserRecord,
};

use super::PasskeyWallet;

#[derive(Debug, Clone)]
pub struct EmailRecoveryStart {
    pub request_id: String,
    pub mailto_url: String,
    pub new_public_key: String,
    pub device_number: u32,
}

#[derive(Debug, Clone)]
pub struct EmailRecoveryResult {
    pub account_id: String,
    pub device_number: u32,
    pub near_public_key: String,
}

/// 6-character `[A-Z0-9]` request id.
fn generate_request_id() -> Result<String, WalletError> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut bytes = [0u8; 6];
    crate::crypto::random_bytes(&mut bytes).map_err(WalletError::internal)?;
    Ok(bytes
        .iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect())
}

fn build_mailto_url(
    config: &EmailRecoveryConfig,
    request_id: &str,
    account_id: &str,
    new_public_key: &str,
) -> String {
    format!(
        "mailto:{}?subject=recover-{}%20{}%20{}&body=Recovering%20account%20{}%20with%20a%20new%20passkey.",
        config.mailto_address, request_id, account_id, new_public_key, account_id
    )
}

impl PasskeyWallet {
    fn email_recovery_config(&self) -> Result<EmailRecoveryConfig, WalletError> {
        self.config
            .relayer
            .as_ref()
            .and_then(|r| r.email_recovery.clone())
            .ok_or_else(|| {
                WalletError::new(ErrorKind::ValidationFailed, "Email recovery is not configured")
            })
    }

    /// Phase 1: validate balance, collect a new passkey, derive keys for the
    /// new device, persist the pending record and build the `mailto:` URL.
    pub async fn start_email_recovery(
        &self,
        account_id: &str,
        recovery_email: &str,
    ) -> Result<EmailRecoveryStart, WalletError> {
        let config = self.email_recovery_config()?;
        self.require_secure_context()?;

        // Balance gate: exact-equal is sufficient.
        let min_balance: u128 = config
            .min_balance_yocto
            .parse()
            .map_err(|_| WalletError::validation("Invalid minBalanceYocto configuration"))?;
        let balance = self.chain.view_account_balance(account_id).await?;
        if balance < min_balance {
            return Err(WalletError::validation(format!(
                "Account balance {} is below the required minimum {}",
                balance, min_balance
            )));
        }

        // New passkey + derived keys for the recovery device.
        let challenge = crate::crypto::random_salt_b64u().map_err(WalletError::internal)?;
        let credential = self
            .webauthn
            .request_registration_credential(account_id, &challenge)
            .await?;
        let (prf_first, _prf_second) = credential.require_prf_outputs()?;
        let derived_vrf = self
            .vrf
            .derive_vrf_keypair(&prf_first, account_id, false, None)
            .await?;
        let derived_near = self
            .signer
            .derive_near_keypair_and_encrypt(credential.clone(), account_id)
            .await
            .map_err(WalletError::from)?;

        let request_id = generate_request_id()?;
        let device_number = self.vault.next_device_number(account_id)?;
        let now_ms = self.clock.now_ms();

        let mut pending = PendingEmailRecovery {
            account_id: account_id.to_string(),
            recovery_email: recovery_email.to_string(),
            device_number,
            near_public_key: derived_near.public_key.clone(),
            request_id: request_id.clone(),
            encrypted_vrf_keypair: derived_vrf.encrypted_vrf_keypair.clone(),
            server_encrypted_vrf_keypair: derived_vrf.server_encrypted_vrf_keypair.clone(),
            vrf_public_key_b64u: derived_vrf.vrf_public_key.clone(),
            encrypted_near_key: derived_near.encrypted_near_key.clone(),
            credential_id: credential.id.clone(),
            registration_credential: (&credential).into(),
            created_at_ms: now_ms,
            status: PendingRecoveryStatus::AwaitingEmail,
        };
        self.vault.save_pending_recovery(&pending)?;

        let mailto_url =
            build_mailto_url(&config, &request_id, account_id, &derived_near.public_key);

        // The mail is handed to the user; from here we wait for the key.
        pending.status = PendingRecoveryStatus::AwaitingAddKey;
        self.vault.save_pending_recovery(&pending)?;
        self.emit_status("awaiting-add-key", "Recovery email prepared");

        Ok(EmailRecoveryStart {
            request_id,
            mailto_url,
            new_public_key: derived_near.public_key,
            device_number,
        })
    }

    /// Phase 2: poll the DKIM verifier contract for the verification result
    /// and finalize the device registration when it confirms.
    pub async fn poll_and_finalize_email_recovery(
        &self,
        account_id: &str,
        cancel: &CancellationToken,
    ) -> Result<EmailRecoveryResult, WalletError> {
        let result = self.poll_email_recovery_inner(account_id, cancel).await;
        match &result {
            Ok(_) => self.events.after_call(true),
            Err(err) => {
                if let Some(mut pending) = self
                    .vault
                    .load_pending_recovery(
                        account_id,
                        self.clock.now_ms(),
                        self.email_recovery_config()
                            .map(|c| c.pending_ttl_ms)
                            .unwrap_or(u64::MAX),
                    )
                    .unwrap_or(None)
                {
                    pending.status = PendingRecoveryStatus::Error;
                    let _ = self.vault.save_pending_recovery(&pending);
                }
                self.events.action_error(err.kind(), err.message());
            }
        }
        result
    }

    async fn poll_email_recovery_inner(
        &self,
        account_id: &str,
        cancel: &CancellationToken,
    ) -> Result<EmailRecoveryResult, WalletError> {
        let config = self.email_recovery_config()?;
        let pending = self
            .vault
            .load_pending_recovery(account_id, self.clock.now_ms(), config.pending_ttl_ms)?
            .ok_or_else(|| {
                WalletError::new(
                    ErrorKind::EmailPendingTtlExpired,
                    "No live pending email recovery for this account",
                )
            })?;

        let views = ContractViews::new(self.chain.as_ref(), &self.config.contract_id);
        let deadline = self.clock.now_ms() + config.max_polling_duration_ms;

        let verification = loop {
            if cancel.is_cancelled() {
                return Err(WalletError::new(
                    ErrorKind::EmailVerificationFailed,
                    "Email recovery polling cancelled",
                ));
            }
            // A poll that would begin past the deadline times out.
            if self.clock.now_ms() > deadline {
                return Err(WalletError::new(
                    ErrorKind::EmailPollTimeout,
                    "Email verification did not complete within the polling window",
                ));
            }

            match views
                .get_verification_result(
                    &config.dkim_verifier_account_id,
                    &config.verification_view_method,
                    &pending.request_id,
                )
                .await
            {
                Ok(Some(result)) => break result,
                Ok(None) => {}
                Err(err) => debug!("verification poll failed: {}", err),
            }

            self.emit_status("polling", "Waiting for email verification");
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = self.clock.sleep(Duration::from_millis(config.polling_interval_ms)) => {}
            }
        };

        if !verification.verified {
            return Err(WalletError::new(
                ErrorKind::EmailVerificationFailed,
                verification
                    .error_message
                    .unwrap_or_else(|| "Email verification failed".to_string()),
            ));
        }
        if verification.account_id.as_deref() != Some(account_id)
            || verification.new_public_key.as_deref() != Some(pending.near_public_key.as_str())
        {
            return Err(WalletError::new(
                ErrorKind::EmailVerificationFailed,
                "Verification result does not match the pending recovery",
            ));
        }

        self.finalize_email_recovery(pending).await
    }

    async fn finalize_email_recovery(
        &self,
        mut pending: PendingEmailRecovery,
    ) -> Result<EmailRecoveryResult, WalletError> {
        pending.status = PendingRecoveryStatus::Finalizing;
        self.vault.save_pending_recovery(&pending)?;
        self.emit_status("finalizing", "Email verified, completing registration");

        let account_id = pending.account_id.clone();

        // The verifier contract added the key; confirm before signing with it.
        self.wait_for_access_keys(&account_id, &[pending.near_public_key.clone()])
            .await?;

        // One assertion over the stored credential recovers the PRF outputs
        // needed to re-derive the signing key and unlock the VRF keypair.
        let challenge = crate::crypto::random_salt_b64u().map_err(WalletError::internal)?;
        let assertion = self
            .webauthn
            .request_authentication_credential(
                &account_id,
                &challenge,
                vec![pending.credential_id.clone()],
            )
            .await?;
        let (prf_first, _prf_second) = assertion.require_prf_outputs()?;

        // Unlock VRF for this device and produce the registration challenge.
        self.vrf
            .unlock_vrf_keypair(&account_id, pending.encrypted_vrf_keypair.clone(), &prf_first)
            .await?;
        let block = self.fresh_block().await?;
        let vrf_challenge = self
            .vrf
            .generate_challenge(
                None,
                VrfInputData {
                    user_id: account_id.clone(),
                    rp_id: self.webauthn.rp_id().to_string(),
                    block_height: block.block_height,
                    block_hash: block.block_hash.clone(),
                    intent_digest: Some(crate::encoders::base64_url_encode(
                        &crate::crypto::sha256_concat(&[
                            b"email-recovery",
                            account_id.as_bytes(),
                        ]),
                    )),
                    session_policy_digest_32: None,
                },
            )
            .await?;

        let access_key = self
            .chain
            .view_access_key(&account_id, &pending.near_public_key)
            .await?;
        let registration_tx = self
            .signer
            .register_device_with_derived_key(
                crate::signer_worker::handlers::handle_register_device2_with_derived_key::RegisterDeviceRequest {
                    prf_source: crate::signer_worker::handlers::handle_register_device2_with_derived_key::PrfSource::Assertion(assertion),
                    account_id: account_id.clone(),
                    contract_id: self.config.contract_id.clone(),
                    vrf_data: VrfData::try_from(&vrf_challenge).map_err(WalletError::validation)?,
                    deterministic_vrf_public_key: crate::encoders::base64_url_decode(
                        &pending.vrf_public_key_b64u,
                    )
                    .map_err(WalletError::validation)?,
                    registration_credential: pending.registration_credential.clone(),
                    authenticator_options: Some(self.config.authenticator_options.clone()),
                    nonce: access_key.nonce + 1,
                    block_hash: block.block_hash,
                },
            )
            .await
            .map_err(WalletError::from)?;
        self.chain
            .send_transaction(&registration_tx.signed_transaction_borsh, WaitUntil::Final)
            .await?;

        // Persist, mark complete, clear pending, auto-login.
        let now_ms = self.clock.now_ms();
        let user = UserRecord {
            account_id: account_id.clone(),
            device_number: pending.device_number,
            vrf_public_key_b64u: pending.vrf_public_key_b64u.clone(),
            near_public_key: pending.near_public_key.clone(),
            encrypted_vrf_keypair: pending.encrypted_vrf_keypair.clone(),
            server_encrypted_vrf_keypair: pending.server_encrypted_vrf_keypair.clone(),
            registered_at_ms: now_ms,
            last_updated_ms: now_ms,
        };
        let authenticator = AuthenticatorRecord {
            account_id: account_id.clone(),
            credential_id: pending.credential_id.clone(),
            device_number: pending.device_number,
            transports: Vec::new(),
            registered_at_ms: now_ms,
        };
        self.vault.atomic_store_registration_data(
            &user,
            &pending.encrypted_near_key,
            &authenticator,
        )?;

        pending.status = PendingRecoveryStatus::Complete;
        self.vault.save_pending_recovery(&pending)?;
        self.vault.clear_pending_recovery(&account_id)?;

        self.nonces
            .initialize_user(&account_id, &pending.near_public_key)
            .await;
        *self.current_user.lock().await = Some(super::CurrentUser {
            account_id: account_id.clone(),
            device_number: pending.device_number,
            near_public_key: pending.near_public_key.clone(),
        });
        self.emit_status("complete", "Email recovery complete");

        Ok(EmailRecoveryResult {
            account_id,
            device_number: pending.device_number,
            near_public_key: pending.near_public_key.clone(),
        })
    }

    /// Stop polling and clear local pending state. The OS passkey created in
    /// phase 1 cannot be revoked from here.
    pub fn cancel_and_reset_email_recovery(
        &self,
        account_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), WalletError> {
        cancel.cancel();
        self.vault.clear_pending_recovery(account_id)?;
        Ok(())
    }

    fn emit_status(&self, status: &str, message: &str) {
        self.events.emit(WalletEvent::EmailRecoveryProgress {
            status: status.to_string(),
            message: message.to_string(),
        });
    }
}
