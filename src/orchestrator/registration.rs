//! Registration flow: eight phases from account-id validation to a live VRF
//! session, with destructive-forward rollback of local rows on failure.

use std::time::Duration;

use log::debug;

use crate::chain_client::ContractViews;
use crate::config::{
    THRESHOLD_CLIENT_SHARE_DERIVATION, THRESHOLD_KEY_KIND, REGISTRATION_KEY_POLL_ATTEMPTS,
    REGISTRATION_KEY_POLL_INTERVAL_MS,
};
use crate::encoders::base64_url_decode;
use crate::errors::{ErrorKind, WalletError};
use crate::events::WalletEvent;
use crate::relay_client::{
    CreateAccountAndRegisterRequest, ThresholdKeygenRequest, ThresholdRegistrationInfo,
};
use crate::types::near::{AccountId, PublicKey};
use crate::types::vrf::VrfData;
use crate::types::webauthn::WebAuthnRegistrationCredential;
use crate::vault::{AuthenticatorRecord, ThresholdKeyRecord, UserRecord};

use super::PasskeyWallet;

#[derive(Debug, Clone, Default)]
pub struct RegistrationOptions {
    /// Enroll a 2-of-2 threshold key alongside the local key.
    pub enroll_threshold: bool,
}

#[derive(Debug, Clone)]
pub struct RegistrationResult {
    pub account_id: String,
    pub device_number: u32,
    pub near_public_key: String,
    pub vrf_public_key_b64u: String,
    pub transaction_hash: Option<String>,
    pub threshold_public_key: Option<String>,
}

impl PasskeyWallet {
    pub async fn register_passkey(
        &self,
        account_id: &str,
        options: RegistrationOptions,
    ) -> Result<RegistrationResult, WalletError> {
        let result = self.register_passkey_inner(account_id, options).await;
        match &result {
            Ok(_) => self.events.after_call(true),
            Err(err) => self.events.action_error(err.kind(), err.message()),
        }
        result
    }

    async fn register_passkey_inner(
        &self,
        account_id: &str,
        options: RegistrationOptions,
    ) -> Result<RegistrationResult, WalletError> {
        // Phase 1: validation.
        let account: AccountId = account_id
            .parse()
            .map_err(WalletError::invalid_account_id)?;
        self.require_secure_context()?;
        let relay = self.require_relay()?;
        self.emit_phase(1, "Validated account id");

        // Phase 2: registration credential with PRF over a bootstrap VRF
        // challenge anchored to a fresh final block.
        let block = self.fresh_block().await?;
        let bootstrap = self
            .vrf
            .generate_bootstrap_challenge(
                account.as_str(),
                self.webauthn.rp_id(),
                block.block_height,
                &block.block_hash,
            )
            .await?;
        let credential = self
            .webauthn
            .request_registration_credential(
                account.as_str(),
                &bootstrap.vrf_challenge.vrf_output,
            )
            .await?;
        let (prf_first, _prf_second) = credential.require_prf_outputs()?;
        self.emit_phase(2, "Collected registration credential");

        // Phase 3: in parallel, pre-check registrability on-chain and derive
        // both keypairs.
        let vrf_data = VrfData::try_from(&bootstrap.vrf_challenge)
            .map_err(WalletError::validation)?;
        let wire_credential = WebAuthnRegistrationCredential::from(&credential);
        let views = ContractViews::new(self.chain.as_ref(), &self.config.contract_id);

        let (can_register, derived_vrf, derived_near) = tokio::join!(
            views.check_can_register_user(
                &vrf_data,
                &wire_credential,
                Some(&self.config.authenticator_options),
            ),
            self.vrf
                .derive_vrf_keypair(&prf_first, account.as_str(), true, None),
            self.signer
                .derive_near_keypair_and_encrypt(credential.clone(), account.as_str()),
        );
        if !can_register? {
            return Err(WalletError::new(
                ErrorKind::RelayVerificationFailed,
                "Contract rejected the registration pre-check",
            ));
        }
        let derived_vrf = derived_vrf.map_err(WalletError::from)?;
        let derived_near = derived_near.map_err(WalletError::from)?;
        self.emit_phase(3, "Derived VRF and NEAR keypairs");

        let threshold_share_b64u = if options.enroll_threshold {
            Some(
                self.signer
                    .derive_threshold_client_verifying_share(
                        credential.clone(),
                        account.as_str(),
                        &derived_near.encrypted_near_key.wrap_key_salt_b64u,
                    )
                    .await
                    .map_err(WalletError::from)?,
            )
        } else {
            None
        };

        // Phase 4: atomic account creation through the relay.
        let device_number = self.vault.next_device_number(account.as_str())?;
        let deterministic_vrf_public_key = base64_url_decode(&derived_vrf.vrf_public_key)
            .map_err(WalletError::validation)?;
        let create_response = relay
            .create_account_and_register_user(CreateAccountAndRegisterRequest {
                new_account_id: account.as_str().to_string(),
                new_public_key: derived_near.public_key.clone(),
                device_number,
                threshold_ed25519: threshold_share_b64u.as_ref().map(|share| {
                    ThresholdRegistrationInfo {
                        client_verifying_share_b64u: share.clone(),
                    }
                }),
                vrf_data,
                webauthn_registration: wire_credential,
                deterministic_vrf_public_key,
                authenticator_options: Some(self.config.authenticator_options.clone()),
            })
            .await?;
        if !create_response.success {
            return Err(WalletError::new(
                ErrorKind::RelayVerificationFailed,
                create_response
                    .error
                    .unwrap_or_else(|| "Relay refused account creation".to_string()),
            ));
        }
        self.emit_phase(4, "Relay created the account");

        // Phase 5: confirm the access key landed on-chain.
        self.wait_for_access_keys(account.as_str(), &[derived_near.public_key.clone()])
            .await?;
        self.emit_phase(5, "Access key visible on-chain");

        // Phase 6: optional threshold enrollment via a no-prompt AddKey.
        let threshold_enrollment = match threshold_share_b64u {
            Some(client_share_b64u) => Some(
                self.enroll_threshold_key(
                    &relay,
                    account.as_str(),
                    &credential,
                    &client_share_b64u,
                    &derived_near.public_key,
                    &derived_near.encrypted_near_key.wrap_key_salt_b64u,
                    device_number,
                )
                .await?,
            ),
            None => None,
        };

        // Phase 7: atomic local persistence.
        let now_ms = self.clock.now_ms();
        let user = UserRecord {
            account_id: account.as_str().to_string(),
            device_number,
            vrf_public_key_b64u: derived_vrf.vrf_public_key.clone(),
            near_public_key: derived_near.public_key.clone(),
            encrypted_vrf_keypair: derived_vrf.encrypted_vrf_keypair.clone(),
            server_encrypted_vrf_keypair: derived_vrf.server_encrypted_vrf_keypair.clone(),
            registered_at_ms: now_ms,
            last_updated_ms: now_ms,
        };
        let authenticator = AuthenticatorRecord {
            account_id: account.as_str().to_string(),
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
        if let Some(record) = &threshold_enrollment {
            self.vault
                .store_threshold_key(account.as_str(), device_number, record)?;
        }
        self.emit_phase(7, "Persisted vault records");

        // Phase 8: ensure a live VRF session. Failures from here on roll the
        // vault rows back; the chain side is immutable.
        let finish = async {
            let status = self.vrf.check_status().await?;
            if !status.active {
                self.vrf
                    .unlock_vrf_keypair(
                        account.as_str(),
                        derived_vrf.encrypted_vrf_keypair.clone(),
                        &prf_first,
                    )
                    .await?;
            }
            Ok::<(), WalletError>(())
        };
        if let Err(err) = finish.await {
            debug!("registration rollback after persist: {}", err);
            self.vault.rollback_user_registration(account.as_str())?;
            return Err(err);
        }

        self.nonces
            .initialize_user(account.as_str(), &derived_near.public_key)
            .await;
        *self.current_user.lock().await = Some(super::CurrentUser {
            account_id: account.as_str().to_string(),
            device_number,
            near_public_key: derived_near.public_key.clone(),
        });
        self.emit_phase(8, "VRF session live");

        Ok(RegistrationResult {
            account_id: account.as_str().to_string(),
            device_number,
            near_public_key: derived_near.public_key,
            vrf_public_key_b64u: derived_vrf.vrf_public_key,
            transaction_hash: create_response.transaction_hash,
            threshold_public_key: threshold_enrollment.map(|r| r.public_key),
        })
    }

    /// Poll the on-chain access-key list until every expected key appears.
    pub(crate) async fn wait_for_access_keys(
        &self,
        account_id: &str,
        expected_public_keys: &[String],
    ) -> Result<(), WalletError> {
        for attempt in 0..REGISTRATION_KEY_POLL_ATTEMPTS {
            match self.chain.view_access_key_list(account_id).await {
                Ok(keys) => {
                    if expected_public_keys.iter().all(|pk| keys.contains(pk)) {
                        return Ok(());
                    }
                }
                Err(err) => debug!("access-key poll attempt {} failed: {}", attempt + 1, err),
            }
            self.clock
                .sleep(Duration::from_millis(REGISTRATION_KEY_POLL_INTERVAL_MS))
                .await;
        }
        Err(WalletError::new(
            ErrorKind::RegistrationOnchainMismatch,
            format!(
                "Expected access keys did not appear on {} within {} attempts",
                account_id, REGISTRATION_KEY_POLL_ATTEMPTS
            ),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn enroll_threshold_key(
        &self,
        relay: &std::sync::Arc<dyn crate::relay_client::RelayClient>,
        account_id: &str,
        credential: &crate::types::webauthn::SerializedRegistrationCredential,
        client_verifying_share_b64u: &str,
        local_public_key: &str,
        wrap_key_salt_b64u: &str,
        _device_number: u32,
    ) -> Result<ThresholdKeyRecord, WalletError> {
        let keygen = relay
            .threshold_keygen(ThresholdKeygenRequest {
                near_account_id: account_id.to_string(),
                client_verifying_share_b64u: client_verifying_share_b64u.to_string(),
            })
            .await
            .map_err(|e| {
                WalletError::new(ErrorKind::ThresholdEnrollmentFailed, e.message().to_string())
            })?;

        // Verify the relay's group key against the Lagrange interpolation of
        // both verifying shares.
        let (client_id, relayer_id) = match keygen.participant_ids.as_slice() {
            [c, r, ..] => (*c, *r),
            _ => (1, 2),
        };
        let client_share: [u8; 32] = base64_url_decode(client_verifying_share_b64u)
            .map_err(WalletError::validation)?
            .try_into()
            .map_err(|_| WalletError::validation("client verifying share must be 32 bytes"))?;
        let relayer_share: [u8; 32] = base64_url_decode(&keygen.relayer_verifying_share_b64u)
            .map_err(WalletError::validation)?
            .try_into()
            .map_err(|_| WalletError::validation("relayer verifying share must be 32 bytes"))?;
        let expected_group = crate::threshold::frost::compute_group_public_key_2p(
            &client_share,
            &relayer_share,
            client_id,
            relayer_id,
        )
        .map_err(|e| WalletError::new(ErrorKind::ThresholdEnrollmentFailed, e))?;
        let announced = PublicKey::from_near_format(&keygen.public_key)
            .map_err(|e| WalletError::new(ErrorKind::ThresholdEnrollmentFailed, e))?;
        if announced.key_data != expected_group {
            return Err(WalletError::new(
                ErrorKind::ThresholdEnrollmentFailed,
                "Relay group public key does not match the verifying shares",
            ));
        }

        // AddKey signed with the freshly derived local key, no new prompt.
        let access_key = self
            .chain
            .view_access_key(account_id, local_public_key)
            .await?;
        let block = self.fresh_block().await?;
        let signed = self
            .signer
            .sign_add_key_threshold_no_prompt(
                crate::signer_worker::handlers::handle_sign_add_key_threshold_public_key_no_prompt::AddKeyThresholdRequest {
                    credential: credential.clone(),
                    account_id: account_id.to_string(),
                    threshold_public_key: keygen.public_key.clone(),
                    nonce: access_key.nonce + 1,
                    block_hash: block.block_hash,
                },
            )
            .await
            .map_err(WalletError::from)?;
        self.chain
            .send_transaction(
                &signed.signed_transaction_borsh,
                crate::chain_client::WaitUntil::Final,
            )
            .await?;
        self.wait_for_access_keys(account_id, &[keygen.public_key.clone()])
            .await
            .map_err(|_| {
                WalletError::new(
                    ErrorKind::ThresholdEnrollmentFailed,
                    "Threshold key did not appear on-chain",
                )
            })?;

        Ok(ThresholdKeyRecord {
            kind: THRESHOLD_KEY_KIND.to_string(),
            public_key: keygen.public_key,
            wrap_key_salt_b64u: wrap_key_salt_b64u.to_string(),
            relayer_key_id: keygen.relayer_key_id,
            client_share_derivation: THRESHOLD_CLIENT_SHARE_DERIVATION.to_string(),
            participants: keygen.participant_ids,
            created_at_ms: self.clock.now_ms(),
        })
    }

    fn emit_phase(&self, phase: u8, message: &str) {
        self.events.emit(WalletEvent::RegistrationProgress {
            phase,
            message: message.to_string(),
        });
    }
}
