//! Login flow: Shamir 3-pass auto-unlock with TouchID fallback, optional
//! server-session minting, and a warm signing session minted from the same
//! assertion to avoid a second prompt.

use log::{debug, warn};

use crate::config::SessionKind;
use crate::errors::{ErrorKind, WalletError};
use crate::events::WalletEvent;
use crate::types::vrf::{VrfData, VrfInputData};
use crate::types::webauthn::WebAuthnAuthenticationCredential;
use crate::vault::UserRecord;

use super::PasskeyWallet;

#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    /// Mint a relay server session (JWT or cookie) after unlock.
    pub mint_server_session: bool,
}

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub account_id: String,
    pub device_number: u32,
    pub near_public_key: String,
    /// Present when the relay session kind is `jwt`.
    pub jwt: Option<String>,
    /// True when the VRF keypair was unlocked without a biometric prompt.
    pub unlocked_via_shamir: bool,
}

impl PasskeyWallet {
    pub async fn login(
        &self,
        account_id: Option<&str>,
        options: LoginOptions,
    ) -> Result<LoginResult, WalletError> {
        let was_active = self.vrf.check_status().await?.active;
        let result = self.login_inner(account_id, options).await;
        match &result {
            Ok(_) => self.events.after_call(true),
            Err(err) => {
                // If this call activated the VRF session, clear the partial
                // session rather than leaving it half-initialized.
                if !was_active {
                    if let Ok(status) = self.vrf.check_status().await {
                        if status.active {
                            let _ = self.vrf.clear_session().await;
                        }
                    }
                }
                self.events.action_error(err.kind(), err.message());
            }
        }
        result
    }

    async fn login_inner(
        &self,
        account_id: Option<&str>,
        options: LoginOptions,
    ) -> Result<LoginResult, WalletError> {
        let user = self.resolve_user(account_id).await?;
        self.events.emit(WalletEvent::LoginProgress {
            message: format!("Unlocking VRF keypair for {}", user.account_id),
        });

        // Prefer the Shamir 3-pass unlock; fall through to TouchID on any
        // Shamir failure.
        let (user, unlocked_via_shamir) = match self.try_shamir_unlock(&user).await {
            Ok(()) => (user, true),
            Err(err) => {
                debug!("Shamir unlock unavailable ({}), falling back to TouchID", err);
                let user = self.login_with_touch_id_unlock(&user).await?;
                (user, false)
            }
        };

        // Optional server session; the assertion is reused for the warm
        // signing session below.
        let mut jwt = None;
        let mut session_credential = None;
        if options.mint_server_session {
            let relay = self.require_relay()?;
            let session_kind = self
                .config
                .relayer
                .as_ref()
                .map(|r| r.session_kind)
                .unwrap_or(SessionKind::Jwt);
            let block = self.fresh_block().await?;
            let challenge = self
                .vrf
                .generate_challenge(
                    None,
                    VrfInputData {
                        user_id: user.account_id.clone(),
                        rp_id: self.webauthn.rp_id().to_string(),
                        block_height: block.block_height,
                        block_hash: block.block_hash,
                        intent_digest: None,
                        session_policy_digest_32: None,
                    },
                )
                .await?;
            let allow_ids = self
                .vault
                .ensure_current_passkey(&user.account_id)?
                .into_iter()
                .map(|a| a.credential_id)
                .collect();
            let credential = self
                .webauthn
                .request_authentication_credential(
                    &user.account_id,
                    &challenge.vrf_output,
                    allow_ids,
                )
                .await?;

            let vrf_data = VrfData::try_from(&challenge).map_err(WalletError::validation)?;
            let response = relay
                .verify_authentication_response(
                    vrf_data,
                    WebAuthnAuthenticationCredential::from(&credential),
                    session_kind,
                )
                .await?;
            if !response.verified {
                return Err(WalletError::new(
                    ErrorKind::RelayVerificationFailed,
                    response
                        .error
                        .unwrap_or_else(|| "Relay rejected the session assertion".to_string()),
                ));
            }
            jwt = response.jwt;
            session_credential = Some(credential);
        }

        // Warm signing session: reuse the assertion when one exists,
        // otherwise it costs one prompt at first signing.
        if let Some(credential) = session_credential {
            let wrap_key_salt = self
                .vault
                .get_near_key(&user.account_id, user.device_number)?
                .map(|k| k.wrap_key_salt_b64u)
                .unwrap_or_default();
            let session_id = self.next_session_id();
            self.mint_session_with_credential(
                &session_id,
                &user.account_id,
                &wrap_key_salt,
                credential,
            )
            .await?;
        }

        self.vault
            .set_last_user(&user.account_id, user.device_number)?;
        self.nonces
            .initialize_user(&user.account_id, &user.near_public_key)
            .await;
        *self.current_user.lock().await = Some(super::CurrentUser {
            account_id: user.account_id.clone(),
            device_number: user.device_number,
            near_public_key: user.near_public_key.clone(),
        });

        Ok(LoginResult {
            account_id: user.account_id,
            device_number: user.device_number,
            near_public_key: user.near_public_key,
            jwt,
            unlocked_via_shamir,
        })
    }

    async fn try_shamir_unlock(&self, user: &UserRecord) -> Result<(), WalletError> {
        let server_encrypted = user.server_encrypted_vrf_keypair.clone().ok_or_else(|| {
            WalletError::validation("No server-encrypted VRF keypair stored for this device")
        })?;
        self.vrf
            .shamir_unlock(&user.account_id, server_encrypted)
            .await
            .map_err(WalletError::from)
    }

    /// TouchID fallback unlock. The credential the user actually picks is
    /// matched against stored authenticators; picking a passkey bound to a
    /// different device number switches the effective user record.
    pub(crate) async fn login_with_touch_id_unlock(
        &self,
        user: &UserRecord,
    ) -> Result<UserRecord, WalletError> {
        let challenge = crate::crypto::random_salt_b64u().map_err(WalletError::internal)?;
        let allow_ids = self
            .vault
            .ensure_current_passkey(&user.account_id)?
            .into_iter()
            .map(|a| a.credential_id)
            .collect();
        let credential = self
            .webauthn
            .request_authentication_credential(&user.account_id, &challenge, allow_ids)
            .await?;

        // Device switch: follow the authenticator the user picked.
        let mut effective = user.clone();
        match self
            .vault
            .find_authenticator(&user.account_id, &credential.id)?
        {
            Some(authenticator) if authenticator.device_number != user.device_number => {
                effective = self
                    .vault
                    .get_user(&user.account_id, authenticator.device_number)?
                    .ok_or_else(|| {
                        WalletError::new(
                            ErrorKind::VrfSessionPasskeyMismatch,
                            format!(
                                "Authenticator maps to device {} but no user record exists",
                                authenticator.device_number
                            ),
                        )
                    })?;
            }
            Some(_) => {}
            None => {
                return Err(WalletError::new(
                    ErrorKind::VrfSessionPasskeyMismatch,
                    "Presented credential is not registered for this account",
                ))
            }
        }

        let (prf_first, _prf_second) = credential.require_prf_outputs()?;
        self.vrf
            .unlock_vrf_keypair(
                &effective.account_id,
                effective.encrypted_vrf_keypair.clone(),
                &prf_first,
            )
            .await?;

        // Proactive Shamir rotation after a successful fallback unlock.
        if self.config.vrf_worker_configs.shamir3pass.is_some() {
            match self.vrf.shamir_reencrypt().await {
                Ok(server_encrypted) => {
                    let rotated = server_encrypted.server_key_id.clone();
                    let mut updated = effective.clone();
                    updated.server_encrypted_vrf_keypair = Some(server_encrypted);
                    updated.last_updated_ms = self.clock.now_ms();
                    self.vault.update_user(&updated)?;
                    effective = updated;
                    debug!("Rotated server-encrypted VRF keypair to epoch {}", rotated);
                }
                Err(err) => warn!("Shamir rotation failed (non-fatal): {}", err),
            }
        }

        Ok(effective)
    }
}
