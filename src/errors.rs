//! Error types for the wallet SDK.
//!
//! Every public API failure converges on [`WalletError`], which carries one of
//! the stable [`ErrorKind`] identifiers. Worker-internal errors keep richer
//! structure and are mapped at the actor boundary. Outgoing error text passes
//! through [`scrub_error_message`] so PRF outputs and private-key material can
//! never leak through a formatted error.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable machine-readable error identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidAccountId,
    InsecureContext,
    ValidationFailed,
    WebauthnCancelled,
    WebauthnTimeout,
    WebauthnNoPrf,
    VrfUnlockBadPrf,
    VrfSessionInactive,
    VrfSessionPasskeyMismatch,
    NonceStale,
    AccessKeyNotFound,
    BroadcastRpcError,
    RelayHttpError,
    RelayVerificationFailed,
    RegistrationOnchainMismatch,
    ThresholdEnrollmentFailed,
    EmailVerificationFailed,
    EmailPollTimeout,
    EmailPendingTtlExpired,
    LinkDeviceSessionExpired,
    LinkDeviceKeyswapFailed,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAccountId => "INVALID_ACCOUNT_ID",
            ErrorKind::InsecureContext => "INSECURE_CONTEXT",
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::WebauthnCancelled => "WEBAUTHN_CANCELLED",
            ErrorKind::WebauthnTimeout => "WEBAUTHN_TIMEOUT",
            ErrorKind::WebauthnNoPrf => "WEBAUTHN_NO_PRF",
            ErrorKind::VrfUnlockBadPrf => "VRF_UNLOCK_BAD_PRF",
            ErrorKind::VrfSessionInactive => "VRF_SESSION_INACTIVE",
            ErrorKind::VrfSessionPasskeyMismatch => "VRF_SESSION_PASSKEY_MISMATCH",
            ErrorKind::NonceStale => "NONCE_STALE",
            ErrorKind::AccessKeyNotFound => "ACCESS_KEY_NOT_FOUND",
            ErrorKind::BroadcastRpcError => "BROADCAST_RPC_ERROR",
            ErrorKind::RelayHttpError => "RELAY_HTTP_ERROR",
            ErrorKind::RelayVerificationFailed => "RELAY_VERIFICATION_FAILED",
            ErrorKind::RegistrationOnchainMismatch => "REGISTRATION_ONCHAIN_MISMATCH",
            ErrorKind::ThresholdEnrollmentFailed => "THRESHOLD_ENROLLMENT_FAILED",
            ErrorKind::EmailVerificationFailed => "EMAIL_VERIFICATION_FAILED",
            ErrorKind::EmailPollTimeout => "EMAIL_POLL_TIMEOUT",
            ErrorKind::EmailPendingTtlExpired => "EMAIL_PENDING_TTL_EXPIRED",
            ErrorKind::LinkDeviceSessionExpired => "LINK_DEVICE_SESSION_EXPIRED",
            ErrorKind::LinkDeviceKeyswapFailed => "LINK_DEVICE_KEYSWAP_FAILED",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public error type for all fallible SDK operations.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct WalletError {
    kind: ErrorKind,
    message: String,
}

impl WalletError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: scrub_error_message(&message.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, message)
    }

    pub fn invalid_account_id(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidAccountId, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    pub fn broadcast(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BroadcastRpcError, message)
    }

    pub fn relay_http(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RelayHttpError, message)
    }
}

impl From<VrfWorkerError> for WalletError {
    fn from(err: VrfWorkerError) -> Self {
        let kind = match &err {
            VrfWorkerError::AeadDecryptionFailed(_) => ErrorKind::VrfUnlockBadPrf,
            VrfWorkerError::VrfNotUnlocked | VrfWorkerError::NoVrfKeypair => {
                ErrorKind::VrfSessionInactive
            }
            VrfWorkerError::SessionExpired
            | VrfWorkerError::SessionExhausted
            | VrfWorkerError::SessionNotFound(_) => ErrorKind::VrfSessionInactive,
            VrfWorkerError::CredentialAccountMismatch { .. } => {
                ErrorKind::VrfSessionPasskeyMismatch
            }
            VrfWorkerError::MissingPrfOutput => ErrorKind::WebauthnNoPrf,
            _ => ErrorKind::ValidationFailed,
        };
        WalletError::new(kind, err.to_string())
    }
}

/// VRF worker error surface.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VrfWorkerError {
    #[error("No VRF keypair in memory - generate or unlock a keypair first")]
    NoVrfKeypair,
    #[error("VRF keypair not unlocked - please login first")]
    VrfNotUnlocked,
    #[error("Invalid PRF output: {0}")]
    InvalidPrfOutput(String),
    #[error("Missing PRF output in credential extension results")]
    MissingPrfOutput,
    #[error("HKDF key derivation failed")]
    HkdfDerivationFailed,
    #[error("Encryption failed: {0}")]
    AeadEncryptionFailed(String),
    #[error("Failed to decrypt VRF keypair: {0}")]
    AeadDecryptionFailed(String),
    #[error("Invalid nonce length for ChaCha20Poly1305: expected {expected} bytes, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("VRF public key mismatch - expected: {expected}, actual: {actual}")]
    PublicKeyMismatch { expected: String, actual: String },
    #[error("Credential does not belong to {expected}: userHandle resolves to {actual}")]
    CredentialAccountMismatch { expected: String, actual: String },
    #[error("Replayed WebAuthn challenge for session {0}")]
    StaleChallenge(String),
    #[error("Signing session expired")]
    SessionExpired,
    #[error("Signing session exhausted")]
    SessionExhausted,
    #[error("Unknown signing session: {0}")]
    SessionNotFound(String),
    #[error("Invalid block height: {0}")]
    BlockHeightParsing(String),
    #[error("Shamir 3-pass error: {0}")]
    Shamir(String),
    #[error("Missing required data: {0}")]
    MissingRequiredData(String),
    #[error("VRF worker is no longer running")]
    WorkerGone,
}

pub type VrfResult<T> = Result<T, VrfWorkerError>;

impl VrfWorkerError {
    pub fn empty_prf_output() -> Self {
        VrfWorkerError::InvalidPrfOutput("PRF output cannot be empty".to_string())
    }

    pub fn public_key_mismatch(expected: &str, actual: &str) -> Self {
        let cut = crate::config::DISPLAY_TRUNCATE_LENGTH;
        VrfWorkerError::PublicKeyMismatch {
            expected: expected.chars().take(cut).collect(),
            actual: actual.chars().take(cut).collect(),
        }
    }
}

/// Signer worker error surface.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignerError {
    #[error("No signing session key delivered for session {0}")]
    NoSessionKey(String),
    #[error("Key derivation failed: {0}")]
    Kdf(String),
    #[error("Decryption failed: {0}")]
    Decryption(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Transaction build failed: {0}")]
    TransactionBuild(String),
    #[error("Threshold signing failed: {0}")]
    Threshold(String),
    #[error("Signer worker is no longer running")]
    WorkerGone,
}

impl From<SignerError> for WalletError {
    fn from(err: SignerError) -> Self {
        let kind = match &err {
            SignerError::NoSessionKey(_) => ErrorKind::VrfSessionInactive,
            SignerError::Threshold(_) => ErrorKind::ThresholdEnrollmentFailed,
            _ => ErrorKind::ValidationFailed,
        };
        WalletError::new(kind, err.to_string())
    }
}

/// Vault error surface.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Vault storage error: {0}")]
    Storage(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Refusing to persist secret-shaped field: {0}")]
    ForbiddenSecretField(String),
    #[error("Wrap-key salt is immutable once written for {0}")]
    WrapKeySaltConflict(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for VaultError {
    fn from(err: sled::Error) -> Self {
        VaultError::Storage(err.to_string())
    }
}

impl From<VaultError> for WalletError {
    fn from(err: VaultError) -> Self {
        WalletError::new(ErrorKind::ValidationFailed, err.to_string())
    }
}

// === SECRET SCRUBBING ===

const REDACTED: &str = "[REDACTED]";

const SECRET_STRING_FIELDS: [&str; 12] = [
    "\"nearPrivateKey\"",
    "\"near_private_key\"",
    "\"prfOutput\"",
    "\"prf_output\"",
    "\"prfFirst\"",
    "\"prfSecond\"",
    "\"prf_first\"",
    "\"prf_second\"",
    "\"chacha20PrfOutput\"",
    "\"ed25519PrfOutput\"",
    "\"wrapKeySeed\"",
    "\"wrap_key_seed\"",
];

/// Redact the values of secret-bearing JSON string fields embedded in an
/// error message. Structural detail ("invalid type: found integer") survives.
pub fn scrub_error_message(message: &str) -> String {
    let mut scrubbed = message.to_string();
    for pattern in SECRET_STRING_FIELDS {
        scrubbed = scrub_json_string_field(&scrubbed, pattern);
    }
    if scrubbed.contains("\"prf\"") {
        for pattern in ["\"first\"", "\"second\""] {
            scrubbed = scrub_json_string_field(&scrubbed, pattern);
        }
    }
    scrubbed
}

fn scrub_json_string_field(input: &str, key_pattern: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some((before_key, after_key)) = rest.split_once(key_pattern) {
        out.push_str(before_key);
        out.push_str(key_pattern);
        rest = after_key;

        let Some(after_colon) = rest.strip_prefix(':') else {
            continue;
        };
        let after_ws = after_colon.trim_start();
        out.push(':');
        let Some(after_open) = after_ws.strip_prefix('"') else {
            rest = after_colon;
            continue;
        };
        out.push('"');
        out.push_str(REDACTED);
        out.push('"');

        rest = match skip_quoted_value(after_open) {
            Some(after_close) => after_close,
            None => return out,
        };
    }

    out.push_str(rest);
    out
}

fn skip_quoted_value(s: &str) -> Option<&str> {
    let mut escaped = false;
    for (idx, ch) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == '"' {
            return Some(&s[idx + ch.len_utf8()..]);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_secret_json_string_fields() {
        let input = r#"{"nearPrivateKey":"ed25519:SECRET","wrapKeySeed":"SEED","ok":true}"#;
        let scrubbed = scrub_error_message(input);
        assert!(scrubbed.contains(r#""nearPrivateKey":"[REDACTED]""#));
        assert!(scrubbed.contains(r#""wrapKeySeed":"[REDACTED]""#));
        assert!(scrubbed.contains(r#""ok":true"#));
        assert!(!scrubbed.contains("ed25519:SECRET"));
        assert!(!scrubbed.contains("SEED"));
    }

    #[test]
    fn scrubs_prf_first_second_when_prf_object_present() {
        let input = r#"{"prf":{"first":"AAA","second":"BBB"}}"#;
        let scrubbed = scrub_error_message(input);
        assert!(scrubbed.contains(r#""first":"[REDACTED]""#));
        assert!(scrubbed.contains(r#""second":"[REDACTED]""#));
        assert!(!scrubbed.contains("AAA"));
        assert!(!scrubbed.contains("BBB"));
    }

    #[test]
    fn wallet_error_carries_stable_identifier() {
        let err = WalletError::new(ErrorKind::VrfUnlockBadPrf, "auth tag mismatch");
        assert_eq!(err.kind().as_str(), "VRF_UNLOCK_BAD_PRF");
        assert!(err.to_string().starts_with("VRF_UNLOCK_BAD_PRF"));
    }
}
