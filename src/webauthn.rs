//! WebAuthn manager: platform ceremony wrapper.
//!
//! The actual platform authenticator (Touch ID et al.) is injected behind
//! [`PasskeyAuthenticator`]; this module owns ceremony option assembly
//! (account-scoped PRF salts, userHandle binding, allow-lists) and credential
//! normalization.

use async_trait::async_trait;

use crate::errors::{ErrorKind, WalletError};
use crate::types::webauthn::{
    encode_user_handle, prf_salts_for_account, AuthenticatorOptions, Credential,
    SerializedCredential, SerializedRegistrationCredential, UserVerificationPolicy,
};

/// Options for a registration (create) ceremony.
#[derive(Debug, Clone)]
pub struct RegistrationCeremony {
    pub rp_id: String,
    pub account_id: String,
    /// base64url user handle bound to the account.
    pub user_handle: String,
    /// base64url challenge (the VRF output for VRF-bound ceremonies).
    pub challenge_b64u: String,
    pub prf_salt_first: [u8; 32],
    pub prf_salt_second: [u8; 32],
    pub user_verification: Option<UserVerificationPolicy>,
}

/// Options for an authentication (get) ceremony.
#[derive(Debug, Clone)]
pub struct AuthenticationCeremony {
    pub rp_id: String,
    pub challenge_b64u: String,
    /// Credential ids to restrict the prompt to; empty allows discovery.
    pub allow_credential_ids: Vec<String>,
    pub prf_salt_first: [u8; 32],
    pub prf_salt_second: [u8; 32],
    pub user_verification: Option<UserVerificationPolicy>,
}

/// Platform authenticator boundary. Implementations run the OS ceremony and
/// return serialized credentials with PRF extension outputs attached.
#[async_trait]
pub trait PasskeyAuthenticator: Send + Sync {
    async fn create_credential(
        &self,
        ceremony: &RegistrationCeremony,
    ) -> Result<SerializedRegistrationCredential, WalletError>;

    async fn get_credential(
        &self,
        ceremony: &AuthenticationCeremony,
    ) -> Result<SerializedCredential, WalletError>;
}

pub struct WebAuthnManager {
    authenticator: std::sync::Arc<dyn PasskeyAuthenticator>,
    rp_id: String,
    options: AuthenticatorOptions,
}

impl WebAuthnManager {
    pub fn new(
        authenticator: std::sync::Arc<dyn PasskeyAuthenticator>,
        rp_id: impl Into<String>,
        options: AuthenticatorOptions,
    ) -> Self {
        let rp_id = rp_id.into();
        let rp_id = options
            .expected_rp_id
            .clone()
            .unwrap_or(rp_id);
        Self {
            authenticator,
            rp_id,
            options,
        }
    }

    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    /// Run a registration ceremony for the account. The returned credential
    /// carries PRF outputs; strip them before any wire transmission.
    pub async fn request_registration_credential(
        &self,
        account_id: &str,
        challenge_b64u: &str,
    ) -> Result<SerializedRegistrationCredential, WalletError> {
        let (salt_first, salt_second) = prf_salts_for_account(account_id);
        let credential = self
            .authenticator
            .create_credential(&RegistrationCeremony {
                rp_id: self.rp_id.clone(),
                account_id: account_id.to_string(),
                user_handle: encode_user_handle(account_id),
                challenge_b64u: challenge_b64u.to_string(),
                prf_salt_first: salt_first,
                prf_salt_second: salt_second,
                user_verification: self.options.user_verification.clone(),
            })
            .await?;

        match Credential::Registration(credential).normalize() {
            Credential::Registration(credential) => {
                credential.require_prf_outputs()?;
                Ok(credential)
            }
            Credential::Authentication(_) => Err(WalletError::new(
                ErrorKind::ValidationFailed,
                "Authenticator returned an assertion for a create ceremony",
            )),
        }
    }

    /// Run an authentication ceremony. `account_id` scopes the PRF salts;
    /// pass the account the credential is expected to belong to.
    pub async fn request_authentication_credential(
        &self,
        account_id: &str,
        challenge_b64u: &str,
        allow_credential_ids: Vec<String>,
    ) -> Result<SerializedCredential, WalletError> {
        let (salt_first, salt_second) = prf_salts_for_account(account_id);
        let credential = self
            .authenticator
            .get_credential(&AuthenticationCeremony {
                rp_id: self.rp_id.clone(),
                challenge_b64u: challenge_b64u.to_string(),
                allow_credential_ids,
                prf_salt_first: salt_first,
                prf_salt_second: salt_second,
                user_verification: self.options.user_verification.clone(),
            })
            .await?;

        match Credential::Authentication(credential).normalize() {
            Credential::Authentication(credential) => Ok(credential),
            Credential::Registration(_) => Err(WalletError::new(
                ErrorKind::ValidationFailed,
                "Authenticator returned an attestation for a get ceremony",
            )),
        }
    }
}
