//! Account sync / recovery: rebuild local state for an account from an
//! existing passkey, verifying the deterministically re-derived key against
//! the on-chain access-key list.

use crate::chain_client::ContractViews;
use crate::errors::{ErrorKind, WalletError};
use crate::vault::{AuthenticatorRecord, UserRecord};

use super::PasskeyWallet;

#[derive(Debug, Clone)]
pub struct RecoveryOption {
    pub credential_id: String,
    pub account_id: String,
}

/// Discovery result; options are looked up internally by index so callers
/// never round-trip raw credential material.
#[derive(Debug, Clone)]
pub struct RecoverySession {
    options: Vec<RecoveryOption>,
}

impl RecoverySession {
    pub fn options(&self) -> &[RecoveryOption] {
        &self.options
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryResult {
    pub account_id: String,
    pub device_number: u32,
    pub near_public_key: String,
}

impl PasskeyWallet {
    /// Discovery step. With an account id, credential ids come from the
    /// contract without prompting; without one, a single discovery prompt
    /// infers the account from the credential's userHandle.
    pub async fn discover_recovery_options(
        &self,
        account_id: Option<&str>,
    ) -> Result<RecoverySession, WalletError> {
        let options = match account_id {
            Some(account_id) => {
                let views = ContractViews::new(self.chain.as_ref(), &self.config.contract_id);
                views
                    .get_credential_ids_by_account(account_id)
                    .await?
                    .into_iter()
                    .map(|credential_id| RecoveryOption {
                        credential_id,
                        account_id: account_id.to_string(),
                    })
                    .collect()
            }
            None => {
                let challenge = crate::crypto::random_salt_b64u().map_err(WalletError::internal)?;
                let credential = self
                    .webauthn
                    .request_authentication_credential("", &challenge, Vec::new())
                    .await?;
                let account_id = credential.account_id_from_user_handle()?;
                vec![RecoveryOption {
                    credential_id: credential.id,
                    account_id,
                }]
            }
        };

        if options.is_empty() {
            return Err(WalletError::new(
                ErrorKind::ValidationFailed,
                "No recoverable credentials found for this account",
            ));
        }
        Ok(RecoverySession { options })
    }

    /// Recover local state with the selected option: re-derive both
    /// keypairs, verify the NEAR key on-chain, sync authenticators and
    /// restore vault rows for the credential actually used.
    pub async fn recover_account(
        &self,
        session: &RecoverySession,
        option_index: usize,
    ) -> Result<RecoveryResult, WalletError> {
        let option = session.options.get(option_index).ok_or_else(|| {
            WalletError::validation(format!("No recovery option at index {}", option_index))
        })?;
        let account_id = option.account_id.clone();

        // One prompt scoped to the chosen credential.
        let challenge = crate::crypto::random_salt_b64u().map_err(WalletError::internal)?;
        let credential = self
            .webauthn
            .request_authentication_credential(
                &account_id,
                &challenge,
                vec![option.credential_id.clone()],
            )
            .await?;

        // The credential must belong to the requested account.
        let handle_account = credential.account_id_from_user_handle()?;
        if handle_account != account_id {
            return Err(WalletError::new(
                ErrorKind::VrfSessionPasskeyMismatch,
                format!(
                    "Credential belongs to {} but recovery was requested for {}",
                    handle_account, account_id
                ),
            ));
        }
        let (prf_first, _prf_second) = credential.require_prf_outputs()?;

        // Re-derive VRF and NEAR keypairs. An existing vault salt is honored
        // so re-registration on the same device stays stable.
        let stored_salt = self
            .vault
            .get_last_db_updated_user(&account_id)?
            .and_then(|user| {
                self.vault
                    .get_near_key(&account_id, user.device_number)
                    .ok()
                    .flatten()
            })
            .map(|key| key.wrap_key_salt_b64u);

        let derived_vrf = self
            .vrf
            .derive_vrf_keypair(&prf_first, &account_id, true, None)
            .await?;
        let derived_near = self
            .signer
            .recover_keypair_from_passkey(credential.clone(), &account_id, stored_salt)
            .await
            .map_err(WalletError::from)?;

        // The derived public key must be an access key of the account.
        self.wait_for_access_keys(&account_id, &[derived_near.public_key.clone()])
            .await
            .map_err(|_| {
                WalletError::new(
                    ErrorKind::AccessKeyNotFound,
                    format!(
                        "Derived key {} is not an access key of {}",
                        derived_near.public_key, account_id
                    ),
                )
            })?;

        // Sync authenticators from chain, restoring only the credential that
        // was actually used.
        let views = ContractViews::new(self.chain.as_ref(), &self.config.contract_id);
        let onchain_authenticators = views.get_authenticators_by_user(&account_id).await?;
        let used_is_registered = onchain_authenticators
            .iter()
            .any(|(credential_id, _)| credential_id == &credential.id);
        if !used_is_registered {
            return Err(WalletError::new(
                ErrorKind::ValidationFailed,
                "Credential is not registered on-chain for this account",
            ));
        }

        let device_number = self.vault.next_device_number(&account_id)?;
        let now_ms = self.clock.now_ms();
        let user = UserRecord {
            account_id: account_id.clone(),
            device_number,
            vrf_public_key_b64u: derived_vrf.vrf_public_key.clone(),
            near_public_key: derived_near.public_key.clone(),
            encrypted_vrf_keypair: derived_vrf.encrypted_vrf_keypair.clone(),
            server_encrypted_vrf_keypair: derived_vrf.server_encrypted_vrf_keypair.clone(),
            registered_at_ms: now_ms,
            last_updated_ms: now_ms,
        };
        let authenticator = AuthenticatorRecord {
            account_id: account_id.clone(),
            credential_id: credential.id.clone(),
            device_number,
            transports: Vec::new(),
            registered_at_ms: now_ms,
        };
        self.vault.atomic_store_registration_data(
            &user,
            &derived_near.encrypted_near_key,
            &authenticator,
        )?;

        self.nonces
            .initialize_user(&account_id, &derived_near.public_key)
            .await;
        *self.current_user.lock().await = Some(super::CurrentUser {
            account_id: account_id.clone(),
            device_number,
            near_public_key: derived_near.public_key.clone(),
        });

        Ok(RecoveryResult {
            account_id,
            device_number,
            near_public_key: derived_near.public_key,
        })
    }
}
