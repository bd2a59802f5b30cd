//! Relay client: account creation, server-session verification, Shamir
//! 3-pass lock rounds and threshold-Ed25519 coordination.
//!
//! The relay is untrusted for key confidentiality (it never sees plaintext
//! private keys) and trusted only to refuse service and to keep its Shamir
//! exponent stable within a `serverKeyId` epoch.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SessionKind;
use crate::errors::{ErrorKind, WalletError};
use crate::types::vrf::VrfData;
use crate::types::webauthn::{
    AuthenticatorOptions, WebAuthnAuthenticationCredential, WebAuthnRegistrationCredential,
};

// === CREATE ACCOUNT ===

#[derive(Debug, Clone, Serialize)]
pub struct CreateAccountAndRegisterRequest {
    pub new_account_id: String,
    pub new_public_key: String,
    pub device_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_ed25519: Option<ThresholdRegistrationInfo>,
    pub vrf_data: VrfData,
    pub webauthn_registration: WebAuthnRegistrationCredential,
    pub deterministic_vrf_public_key: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticator_options: Option<AuthenticatorOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdRegistrationInfo {
    pub client_verifying_share_b64u: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountAndRegisterResponse {
    pub success: bool,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub threshold_ed25519: Option<ThresholdKeygenResponse>,
}

// === SERVER SESSIONS ===

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionVerificationResponse {
    pub verified: bool,
    /// Present when the session kind is `jwt`; cookie sessions are set as
    /// HttpOnly headers and carry nothing in the body.
    #[serde(default)]
    pub jwt: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// === SHAMIR 3-PASS ROUNDS ===

#[derive(Debug, Clone, Serialize)]
pub struct ShamirApplyServerLockRequest {
    pub kek_c_b64u: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShamirApplyServerLockResponse {
    pub kek_cs_b64u: String,
    #[serde(default, rename = "keyId")]
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShamirRemoveServerLockRequest {
    pub kek_st_b64u: String,
    #[serde(rename = "keyId")]
    pub key_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShamirRemoveServerLockResponse {
    pub kek_c_b64u: String,
}

// === THRESHOLD ED25519 ===

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdKeygenRequest {
    pub near_account_id: String,
    pub client_verifying_share_b64u: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdKeygenResponse {
    pub relayer_key_id: String,
    /// Group public key in NEAR format (`ed25519:<base58>`).
    pub public_key: String,
    pub relayer_verifying_share_b64u: String,
    pub participant_ids: Vec<u16>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdAuthorizeRequest {
    #[serde(rename = "relayerKeyId")]
    pub relayer_key_id: String,
    #[serde(rename = "clientVerifyingShareB64u")]
    pub client_verifying_share_b64u: String,
    pub purpose: String,
    pub signing_digest_32: Vec<u8>,
    pub vrf_data: VrfData,
    pub webauthn_authentication: WebAuthnAuthenticationCredential,
    #[serde(rename = "signingPayload", skip_serializing_if = "Option::is_none")]
    pub signing_payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdAuthorizeResponse {
    pub ok: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub mpc_session_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentsWire {
    pub hiding: String,
    pub binding: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSignInitRequest {
    pub mpc_session_id: String,
    pub relayer_key_id: String,
    pub near_account_id: String,
    pub signing_digest_b64u: String,
    pub client_commitments: CommitmentsWire,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSignInitResponse {
    pub ok: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub signing_session_id: Option<String>,
    #[serde(default)]
    pub commitments_by_id: Option<BTreeMap<String, CommitmentsWire>>,
    #[serde(default)]
    pub relayer_verifying_shares_by_id: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSignFinalizeRequest {
    pub signing_session_id: String,
    pub client_signature_share_b64u: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSignFinalizeResponse {
    pub ok: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub relayer_signature_shares_by_id: Option<BTreeMap<String, String>>,
}

// === TRAIT ===

#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn create_account_and_register_user(
        &self,
        request: CreateAccountAndRegisterRequest,
    ) -> Result<CreateAccountAndRegisterResponse, WalletError>;

    async fn verify_authentication_response(
        &self,
        vrf_data: VrfData,
        credential: WebAuthnAuthenticationCredential,
        session_kind: SessionKind,
    ) -> Result<SessionVerificationResponse, WalletError>;

    async fn shamir_apply_server_lock(
        &self,
        kek_c_b64u: &str,
    ) -> Result<ShamirApplyServerLockResponse, WalletError>;

    async fn shamir_remove_server_lock(
        &self,
        kek_st_b64u: &str,
        key_id: &str,
    ) -> Result<ShamirRemoveServerLockResponse, WalletError>;

    async fn threshold_keygen(
        &self,
        request: ThresholdKeygenRequest,
    ) -> Result<ThresholdKeygenResponse, WalletError>;

    async fn threshold_authorize(
        &self,
        request: ThresholdAuthorizeRequest,
    ) -> Result<ThresholdAuthorizeResponse, WalletError>;

    async fn threshold_sign_init(
        &self,
        request: ThresholdSignInitRequest,
    ) -> Result<ThresholdSignInitResponse, WalletError>;

    async fn threshold_sign_finalize(
        &self,
        request: ThresholdSignFinalizeRequest,
    ) -> Result<ThresholdSignFinalizeResponse, WalletError>;
}

// === HTTP IMPLEMENTATION ===

pub struct HttpRelayClient {
    base_url: String,
    verify_route: String,
    apply_lock_route: String,
    remove_lock_route: String,
    client: reqwest::Client,
}

impl HttpRelayClient {
    pub fn new(
        base_url: impl Into<String>,
        verify_route: impl Into<String>,
        apply_lock_route: impl Into<String>,
        remove_lock_route: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            verify_route: verify_route.into(),
            apply_lock_route: apply_lock_route.into(),
            remove_lock_route: remove_lock_route.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(relayer: &crate::config::RelayerConfig, shamir: Option<&crate::config::Shamir3PassConfig>) -> Self {
        Self::new(
            relayer.url.clone(),
            relayer.verify_route.clone(),
            shamir
                .map(|s| s.apply_lock_route.clone())
                .unwrap_or_else(|| "/shamir/apply-lock".to_string()),
            shamir
                .map(|s| s.remove_lock_route.clone())
                .unwrap_or_else(|| "/shamir/remove-lock".to_string()),
        )
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, WalletError> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| WalletError::relay_http(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WalletError::new(
                ErrorKind::RelayHttpError,
                format!("POST {} returned HTTP {}: {}", url, status, body),
            ));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| WalletError::relay_http(format!("Invalid response from {}: {}", url, e)))
    }
}

#[async_trait]
impl RelayClient for HttpRelayClient {
    async fn create_account_and_register_user(
        &self,
        request: CreateAccountAndRegisterRequest,
    ) -> Result<CreateAccountAndRegisterResponse, WalletError> {
        self.post_json("/create_account_and_register_user", &request)
            .await
    }

    async fn verify_authentication_response(
        &self,
        vrf_data: VrfData,
        credential: WebAuthnAuthenticationCredential,
        session_kind: SessionKind,
    ) -> Result<SessionVerificationResponse, WalletError> {
        #[derive(Serialize)]
        struct Body {
            vrf_data: VrfData,
            webauthn_authentication: WebAuthnAuthenticationCredential,
            #[serde(rename = "sessionKind")]
            session_kind: SessionKind,
        }
        let route = self.verify_route.clone();
        self.post_json(
            &route,
            &Body {
                vrf_data,
                webauthn_authentication: credential,
                session_kind,
            },
        )
        .await
    }

    async fn shamir_apply_server_lock(
        &self,
        kek_c_b64u: &str,
    ) -> Result<ShamirApplyServerLockResponse, WalletError> {
        let route = self.apply_lock_route.clone();
        self.post_json(
            &route,
            &ShamirApplyServerLockRequest {
                kek_c_b64u: kek_c_b64u.to_string(),
            },
        )
        .await
    }

    async fn shamir_remove_server_lock(
        &self,
        kek_st_b64u: &str,
        key_id: &str,
    ) -> Result<ShamirRemoveServerLockResponse, WalletError> {
        let route = self.remove_lock_route.clone();
        self.post_json(
            &route,
            &ShamirRemoveServerLockRequest {
                kek_st_b64u: kek_st_b64u.to_string(),
                key_id: key_id.to_string(),
            },
        )
        .await
    }

    async fn threshold_keygen(
        &self,
        request: ThresholdKeygenRequest,
    ) -> Result<ThresholdKeygenResponse, WalletError> {
        self.post_json("/threshold-ed25519/keygen", &request).await
    }

    async fn threshold_authorize(
        &self,
        request: ThresholdAuthorizeRequest,
    ) -> Result<ThresholdAuthorizeResponse, WalletError> {
        self.post_json("/threshold-ed25519/authorize", &request)
            .await
    }

    async fn threshold_sign_init(
        &self,
        request: ThresholdSignInitRequest,
    ) -> Result<ThresholdSignInitResponse, WalletError> {
        self.post_json("/threshold-ed25519/sign/init", &request)
            .await
    }

    async fn threshold_sign_finalize(
        &self,
        request: ThresholdSignFinalizeRequest,
    ) -> Result<ThresholdSignFinalizeResponse, WalletError> {
        self.post_json("/threshold-ed25519/sign/finalize", &request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_account_body_uses_contract_field_names() {
        let request = CreateAccountAndRegisterRequest {
            new_account_id: "alice.near".to_string(),
            new_public_key: "ed25519:abc".to_string(),
            device_number: 1,
            threshold_ed25519: None,
            vrf_data: VrfData {
                vrf_input_data: vec![1],
                vrf_output: vec![2],
                vrf_proof: vec![3],
                public_key: vec![4],
                user_id: "alice.near".to_string(),
                rp_id: "example.com".to_string(),
                block_height: 1,
                block_hash: vec![5],
                intent_digest_32: None,
                session_policy_digest_32: None,
            },
            webauthn_registration: WebAuthnRegistrationCredential {
                id: "cred".to_string(),
                raw_id: "cred".to_string(),
                response: crate::types::webauthn::WebAuthnRegistrationResponse {
                    client_data_json: "e30".to_string(),
                    attestation_object: "AA".to_string(),
                    transports: None,
                },
                authenticator_attachment: None,
                reg_type: "public-key".to_string(),
            },
            deterministic_vrf_public_key: vec![7],
            authenticator_options: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("new_account_id").is_some());
        assert!(json.get("vrf_data").is_some());
        assert!(json.get("webauthn_registration").is_some());
        assert!(json.get("deterministic_vrf_public_key").is_some());
        assert!(json.get("threshold_ed25519").is_none());
    }
}
