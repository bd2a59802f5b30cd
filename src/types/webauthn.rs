//! WebAuthn credential types, PRF extension results, and credential
//! normalization.
//!
//! Credentials enter the SDK either freshly collected from the platform
//! authenticator or as already-serialized DTOs; both converge on the tagged
//! [`Credential`] variant through [`Credential::normalize`]. PRF outputs are
//! carried only in the serialized client-side forms and are stripped by
//! construction when converting to the wire forms sent to the relay or the
//! contract.

use serde::{Deserialize, Serialize};

use crate::config::{PRF_SALT_PREFIX_CHACHA20, PRF_SALT_PREFIX_ED25519};
use crate::crypto::sha256_concat;
use crate::encoders::{base64_url_decode, base64_url_encode};
use crate::errors::{ErrorKind, WalletError};

// === PRF EXTENSION ===

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PrfOutputs {
    pub first: Option<String>,
    pub second: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PrfResults {
    pub results: PrfOutputs,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ClientExtensionResults {
    pub prf: PrfResults,
}

/// Account-scoped PRF salts: `(sha256("chacha20" || account_id),
/// sha256("ed25519" || account_id))`.
pub fn prf_salts_for_account(account_id: &str) -> ([u8; 32], [u8; 32]) {
    (
        sha256_concat(&[PRF_SALT_PREFIX_CHACHA20, account_id.as_bytes()]),
        sha256_concat(&[PRF_SALT_PREFIX_ED25519, account_id.as_bytes()]),
    )
}

// === SERIALIZED CLIENT-SIDE CREDENTIALS (may carry PRF outputs) ===

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    #[serde(alias = "clientDataJSON", rename = "clientDataJSON")]
    pub client_data_json: String,
    pub authenticator_data: String,
    pub signature: String,
    pub user_handle: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    #[serde(alias = "clientDataJSON", rename = "clientDataJSON")]
    pub client_data_json: String,
    pub attestation_object: String,
    pub transports: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SerializedCredential {
    pub id: String,
    pub raw_id: String,
    #[serde(alias = "type", rename = "type")]
    pub credential_type: String,
    pub authenticator_attachment: Option<String>,
    pub response: AuthenticationResponse,
    pub client_extension_results: ClientExtensionResults,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SerializedRegistrationCredential {
    pub id: String,
    pub raw_id: String,
    #[serde(alias = "type", rename = "type")]
    pub credential_type: String,
    pub authenticator_attachment: Option<String>,
    pub response: RegistrationResponse,
    pub client_extension_results: ClientExtensionResults,
}

/// Incoming credential shape: either an authentication assertion or a
/// registration attestation. The single normalization entry point for both.
#[derive(Debug, Clone)]
pub enum Credential {
    Authentication(SerializedCredential),
    Registration(SerializedRegistrationCredential),
}

impl Credential {
    /// Canonicalize identifier fields. Returns the credential with trimmed
    /// ids so downstream lookups never depend on caller whitespace.
    pub fn normalize(mut self) -> Self {
        match &mut self {
            Credential::Authentication(c) => {
                c.id = c.id.trim().to_string();
                c.raw_id = c.raw_id.trim().to_string();
            }
            Credential::Registration(c) => {
                c.id = c.id.trim().to_string();
                c.raw_id = c.raw_id.trim().to_string();
            }
        }
        self
    }

    pub fn credential_id(&self) -> &str {
        match self {
            Credential::Authentication(c) => &c.id,
            Credential::Registration(c) => &c.id,
        }
    }
}

impl SerializedCredential {
    /// Extract both PRF outputs, failing with `WEBAUTHN_NO_PRF` when the
    /// authenticator did not evaluate the extension.
    pub fn require_prf_outputs(&self) -> Result<(String, String), WalletError> {
        require_prf(&self.client_extension_results)
    }

    pub fn prf_first(&self) -> Option<&str> {
        self.client_extension_results.prf.results.first.as_deref()
    }

    /// Decode the `userHandle` back into the account id it was minted for.
    pub fn account_id_from_user_handle(&self) -> Result<String, WalletError> {
        let handle = self.response.user_handle.as_deref().ok_or_else(|| {
            WalletError::new(ErrorKind::ValidationFailed, "Credential has no userHandle")
        })?;
        decode_user_handle(handle)
    }
}

impl SerializedRegistrationCredential {
    pub fn require_prf_outputs(&self) -> Result<(String, String), WalletError> {
        require_prf(&self.client_extension_results)
    }
}

fn require_prf(ext: &ClientExtensionResults) -> Result<(String, String), WalletError> {
    match (&ext.prf.results.first, &ext.prf.results.second) {
        (Some(first), Some(second)) if !first.is_empty() && !second.is_empty() => {
            Ok((first.clone(), second.clone()))
        }
        _ => Err(WalletError::new(
            ErrorKind::WebauthnNoPrf,
            "Authenticator did not return PRF outputs",
        )),
    }
}

/// `userHandle` is the base64url-encoded UTF-8 account id.
pub fn encode_user_handle(account_id: &str) -> String {
    base64_url_encode(account_id.as_bytes())
}

pub fn decode_user_handle(user_handle: &str) -> Result<String, WalletError> {
    let bytes = base64_url_decode(user_handle)
        .map_err(|e| WalletError::new(ErrorKind::ValidationFailed, e))?;
    String::from_utf8(bytes)
        .map_err(|_| WalletError::new(ErrorKind::ValidationFailed, "userHandle is not UTF-8"))
}

/// Parse the `challenge` field out of a base64url-encoded clientDataJSON.
pub fn challenge_from_client_data(client_data_json_b64u: &str) -> Result<String, WalletError> {
    let bytes = base64_url_decode(client_data_json_b64u)
        .map_err(|e| WalletError::new(ErrorKind::ValidationFailed, e))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| WalletError::new(ErrorKind::ValidationFailed, format!("Invalid clientDataJSON: {}", e)))?;
    value
        .get("challenge")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| WalletError::new(ErrorKind::ValidationFailed, "clientDataJSON has no challenge"))
}

// === WIRE CREDENTIALS (PRF-free by construction) ===

/// Authentication credential as sent to the relay and the contract.
/// All buffer fields are base64url strings; no extension results are carried.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebAuthnAuthenticationCredential {
    pub id: String,
    #[serde(rename = "rawId")]
    pub raw_id: String,
    pub response: WebAuthnAuthenticationResponse,
    #[serde(rename = "authenticatorAttachment")]
    pub authenticator_attachment: Option<String>,
    #[serde(rename = "type")]
    pub auth_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebAuthnAuthenticationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: String,
    pub signature: String,
    #[serde(rename = "userHandle")]
    pub user_handle: Option<String>,
}

/// Registration credential as sent to the relay and the contract. The
/// contract decodes `clientDataJSON` / `attestationObject` internally, so
/// both stay base64url strings here.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebAuthnRegistrationCredential {
    pub id: String,
    #[serde(rename = "rawId")]
    pub raw_id: String,
    pub response: WebAuthnRegistrationResponse,
    #[serde(rename = "authenticatorAttachment")]
    pub authenticator_attachment: Option<String>,
    #[serde(rename = "type")]
    pub reg_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebAuthnRegistrationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(rename = "attestationObject")]
    pub attestation_object: String,
    pub transports: Option<Vec<String>>,
}

impl From<&SerializedCredential> for WebAuthnAuthenticationCredential {
    fn from(credential: &SerializedCredential) -> Self {
        WebAuthnAuthenticationCredential {
            id: credential.id.clone(),
            raw_id: credential.raw_id.clone(),
            response: WebAuthnAuthenticationResponse {
                client_data_json: credential.response.client_data_json.clone(),
                authenticator_data: credential.response.authenticator_data.clone(),
                signature: credential.response.signature.clone(),
                user_handle: credential.response.user_handle.clone(),
            },
            authenticator_attachment: credential.authenticator_attachment.clone(),
            auth_type: credential.credential_type.clone(),
        }
    }
}

impl From<&SerializedRegistrationCredential> for WebAuthnRegistrationCredential {
    fn from(credential: &SerializedRegistrationCredential) -> Self {
        WebAuthnRegistrationCredential {
            id: credential.id.clone(),
            raw_id: credential.raw_id.clone(),
            response: WebAuthnRegistrationResponse {
                client_data_json: credential.response.client_data_json.clone(),
                attestation_object: credential.response.attestation_object.clone(),
                transports: Some(credential.response.transports.clone()),
            },
            authenticator_attachment: credential.authenticator_attachment.clone(),
            reg_type: credential.credential_type.clone(),
        }
    }
}

// === AUTHENTICATOR OPTIONS ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum UserVerificationPolicy {
    #[serde(rename = "required")]
    Required,
    #[serde(rename = "preferred")]
    Preferred,
    #[serde(rename = "discouraged")]
    Discouraged,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct OriginPolicyInput {
    /// Exactly one of these should be set
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub single: Option<bool>,
    #[serde(
        rename = "allSubdomains",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub all_subdomains: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub multiple: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorOptions {
    pub expected_rp_id: Option<String>,
    pub user_verification: Option<UserVerificationPolicy>,
    pub origin_policy: Option<OriginPolicyInput>,
}

impl Default for AuthenticatorOptions {
    fn default() -> Self {
        Self {
            expected_rp_id: None,
            user_verification: Some(UserVerificationPolicy::Preferred),
            origin_policy: Some(OriginPolicyInput {
                single: None,
                all_subdomains: Some(true),
                multiple: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prf_salts_are_account_scoped_and_distinct() {
        let (s1a, s2a) = prf_salts_for_account("alice.near");
        let (s1b, s2b) = prf_salts_for_account("bob.near");
        assert_ne!(s1a, s2a);
        assert_ne!(s1a, s1b);
        assert_ne!(s2a, s2b);
    }

    #[test]
    fn user_handle_round_trip() {
        let handle = encode_user_handle("alice.near");
        assert_eq!(decode_user_handle(&handle).unwrap(), "alice.near");
    }

    #[test]
    fn wire_conversion_strips_prf_outputs() {
        let credential = SerializedCredential {
            id: "cred".to_string(),
            raw_id: "cred".to_string(),
            credential_type: "public-key".to_string(),
            authenticator_attachment: Some("platform".to_string()),
            response: AuthenticationResponse {
                client_data_json: "e30".to_string(),
                authenticator_data: "AA".to_string(),
                signature: "sig".to_string(),
                user_handle: Some(encode_user_handle("alice.near")),
            },
            client_extension_results: ClientExtensionResults {
                prf: PrfResults {
                    results: PrfOutputs {
                        first: Some("SECRET1".to_string()),
                        second: Some("SECRET2".to_string()),
                    },
                },
            },
        };
        let wire = WebAuthnAuthenticationCredential::from(&credential);
        let json = serde_json::to_string(&wire).unwrap();
        assert!(!json.contains("SECRET1"));
        assert!(!json.contains("SECRET2"));
        assert!(!json.contains("prf"));
    }

    #[test]
    fn challenge_extraction_from_client_data() {
        let client_data = serde_json::json!({
            "type": "webauthn.get",
            "challenge": "dGVzdA",
            "origin": "https://example.com",
        });
        let b64u = base64_url_encode(client_data.to_string().as_bytes());
        assert_eq!(challenge_from_client_data(&b64u).unwrap(), "dGVzdA");
    }

    #[test]
    fn missing_prf_is_surfaced_with_stable_kind() {
        let credential = SerializedCredential {
            id: "cred".to_string(),
            raw_id: "cred".to_string(),
            credential_type: "public-key".to_string(),
            authenticator_attachment: None,
            response: AuthenticationResponse {
                client_data_json: "e30".to_string(),
                authenticator_data: "AA".to_string(),
                signature: "sig".to_string(),
                user_handle: None,
            },
            client_extension_results: Default::default(),
        };
        let err = credential.require_prf_outputs().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WebauthnNoPrf);
    }
}
