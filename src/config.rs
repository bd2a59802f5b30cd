//! Configuration constants and the recognized configuration surface.
//!
//! This module centralizes protocol constants (domain separators, HKDF info
//! strings, AEAD parameters) so derivations stay consistent across workers,
//! plus the serde-deserializable `WalletConfig` tree.

use serde::{Deserialize, Serialize};

// === CRYPTOGRAPHIC CONSTANTS ===

/// Domain separator for VRF challenge generation.
/// Bytewise-stable; the on-chain verifier must hash with the same constant.
pub const VRF_DOMAIN_SEPARATOR: &[u8] = b"passkey_wallet_challenge_v1";

/// HKDF salt for deterministic VRF seed derivation from a PRF output.
pub const HKDF_VRF_SEED_SALT: &[u8] = b"vrf-v1";

/// HKDF salt for the AEAD key that locks the VRF keypair at rest.
pub const HKDF_VRF_AEAD_SALT: &[u8] = b"vrf-aead";

/// HKDF salt for deterministic Ed25519 seed derivation from PRF.second.
pub const HKDF_NEAR_SEED_SALT: &[u8] = b"ed25519-v1";

/// HKDF info for the wrap key that locks the NEAR signing key at rest:
/// `wrap_key = HKDF(prf_first, salt = wrap_key_salt, info = "wrap")`.
pub const HKDF_WRAP_INFO: &[u8] = b"wrap";

/// HKDF info for deriving the AEAD key from a Shamir 3-pass KEK.
pub const SHAMIR_AEAD_HKDF_INFO: &[u8] = b"passkey-wallet-shamir3pass-kek-to-aead-key-v1";

/// PRF extension salt prefixes; the full salt is `sha256(prefix || account_id)`.
pub const PRF_SALT_PREFIX_CHACHA20: &[u8] = b"chacha20";
pub const PRF_SALT_PREFIX_ED25519: &[u8] = b"ed25519";

/// Intent-digest domain prefix used by the registration bootstrap challenge.
pub const REGISTRATION_BOOTSTRAP_INTENT: &[u8] = b"registration-bootstrap";

// === ENCRYPTION PARAMETERS ===

/// ChaCha20Poly1305 key size in bytes (256 bits)
pub const CHACHA20_KEY_SIZE: usize = 32;

/// ChaCha20Poly1305 nonce size in bytes (96 bits)
pub const CHACHA20_NONCE_SIZE: usize = 12;

/// VRF seed size in bytes for deterministic generation
pub const VRF_SEED_SIZE: usize = 32;

/// Ed25519 seed size in bytes
pub const ED25519_SEED_SIZE: usize = 32;

/// Stored-ciphertext kind markers
pub const ENCRYPTED_NEAR_KEY_KIND: &str = "local_near_sk_v3";
pub const THRESHOLD_KEY_KIND: &str = "threshold_ed25519_2p_v1";
pub const THRESHOLD_CLIENT_SHARE_DERIVATION: &str = "prf_first_v1";

// === SHAMIR 3-PASS CONFIGURATION ===

/// Minimum prime size in bits accepted for the commutative-encryption group.
pub const SHAMIR_MIN_PRIME_BITS: usize = 256;

/// Maximum rejection-sampling attempts for random exponent generation.
pub const SHAMIR_REJECTION_SAMPLING_MAX_ATTEMPTS: u32 = 10;

/// Extra random bytes drawn per rejection-sampling attempt to reduce bias.
pub const SHAMIR_RANDOM_BYTES_OVERHEAD: usize = 64;

/// Default public prime (base64url big-endian), 256 bits.
pub const DEFAULT_SHAMIR_P_B64U: &str = "3N5w46AIGjGT2v5Vua_TMD5Ywfa9U2F7-WzW8SNDsIM";

// === SIGNING SESSION DEFAULTS ===

/// Default warm signing session TTL (ms).
pub const SESSION_DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

/// Default maximum number of sign operations per warm session.
/// A "use" is counted at the VRF worker boundary, per dispense.
pub const SESSION_DEFAULT_MAX_USES: u32 = 5;

// === FLOW TIMING ===

/// Registration: attempts and interval for the on-chain access-key poll.
pub const REGISTRATION_KEY_POLL_ATTEMPTS: u32 = 5;
pub const REGISTRATION_KEY_POLL_INTERVAL_MS: u64 = 750;

/// Default stagger between parallel broadcasts (ms).
pub const DEFAULT_STAGGER_MS: u64 = 75;

/// Device-linking session lifetime and Device2 polling cadence.
pub const LINK_DEVICE_SESSION_TTL_MS: u64 = 10 * 60 * 1000;
pub const LINK_DEVICE_POLL_INTERVAL_MS: u64 = 2000;

/// Reservations older than this are pruned during nonce reconciliation.
pub const NONCE_RESERVATION_MAX_AGE_MS: u64 = 60_000;

/// Cached block context is refreshed after this age.
pub const BLOCK_CONTEXT_TTL_MS: u64 = 30_000;

/// Gas attached to the device registration function call.
pub const DEVICE_REGISTRATION_GAS: &str = "30000000000000";

// === SERIALIZATION PREFIXES ===

/// NEP-413 off-chain message prefix (2^31 + 413), little-endian on the wire.
pub const NEP413_PAYLOAD_PREFIX: u32 = 2_147_484_061;

/// NEP-461 delegate action prefix (2^30 + 366).
pub const DELEGATE_ACTION_PREFIX: u32 = 1_073_742_190;

/// Number of characters shown when logging truncated keys or hashes.
pub const DISPLAY_TRUNCATE_LENGTH: usize = 20;

// === CONTRACT METHOD NAMES (consumed surface) ===

pub const CHECK_CAN_REGISTER_USER_METHOD: &str = "check_can_register_user";
pub const DEVICE_REGISTER_USER_METHOD: &str = "link_device_register_user";
pub const GET_DEVICE_LINKING_ACCOUNT_METHOD: &str = "get_device_linking_account";
pub const STORE_DEVICE_LINKING_MAPPING_METHOD: &str = "store_device_linking_mapping";
pub const GET_CREDENTIAL_IDS_METHOD: &str = "get_credential_ids_by_account";
pub const GET_AUTHENTICATORS_METHOD: &str = "get_authenticators_by_user";

// === CONFIGURATION SURFACE ===

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletConfig {
    pub near_rpc_url: String,
    pub near_network: String,
    pub contract_id: String,
    /// WebAuthn relying party id used for ceremonies and VRF inputs.
    pub rp_id: String,
    /// Hosts embedding the SDK assert a secure browsing context; flows that
    /// mint credentials refuse to run without one.
    pub secure_context: bool,
    pub relayer: Option<RelayerConfig>,
    pub vrf_worker_configs: VrfWorkerConfigs,
    pub signing_session_defaults: SigningSessionDefaults,
    pub authenticator_options: crate::types::webauthn::AuthenticatorOptions,
    pub signer_mode: SignerMode,
    pub iframe_wallet: Option<IframeWalletConfig>,
    pub wallet_theme: WalletTheme,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            near_rpc_url: "https://rpc.testnet.near.org".to_string(),
            near_network: "testnet".to_string(),
            contract_id: "webauthn-contract.testnet".to_string(),
            rp_id: "localhost".to_string(),
            secure_context: true,
            relayer: None,
            vrf_worker_configs: VrfWorkerConfigs::default(),
            signing_session_defaults: SigningSessionDefaults::default(),
            authenticator_options: Default::default(),
            signer_mode: SignerMode::default(),
            iframe_wallet: None,
            wallet_theme: WalletTheme::Dark,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerConfig {
    pub url: String,
    /// Route used to mint a server session from a VRF-bound assertion.
    #[serde(default = "default_verify_route")]
    pub verify_route: String,
    #[serde(default)]
    pub session_kind: SessionKind,
    pub email_recovery: Option<EmailRecoveryConfig>,
}

fn default_verify_route() -> String {
    "/verify-authentication-response".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    #[default]
    Jwt,
    Cookie,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRecoveryConfig {
    /// Minimum spendable balance (yoctoNEAR, decimal string). Exact-equal is
    /// sufficient.
    pub min_balance_yocto: String,
    pub polling_interval_ms: u64,
    pub max_polling_duration_ms: u64,
    pub pending_ttl_ms: u64,
    pub mailto_address: String,
    pub dkim_verifier_account_id: String,
    pub verification_view_method: String,
}

impl Default for EmailRecoveryConfig {
    fn default() -> Self {
        Self {
            min_balance_yocto: "0".to_string(),
            polling_interval_ms: 3000,
            max_polling_duration_ms: 15 * 60 * 1000,
            pending_ttl_ms: 24 * 60 * 60 * 1000,
            mailto_address: "recovery@example.com".to_string(),
            dkim_verifier_account_id: "dkim-verifier.testnet".to_string(),
            verification_view_method: "get_verification_result".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrfWorkerConfigs {
    pub shamir3pass: Option<Shamir3PassConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shamir3PassConfig {
    pub relay_server_url: String,
    #[serde(default = "default_apply_lock_route")]
    pub apply_lock_route: String,
    #[serde(default = "default_remove_lock_route")]
    pub remove_lock_route: String,
    /// Override for the public prime; defaults to `DEFAULT_SHAMIR_P_B64U`.
    pub shamir_p_b64u: Option<String>,
}

fn default_apply_lock_route() -> String {
    "/shamir/apply-lock".to_string()
}

fn default_remove_lock_route() -> String {
    "/shamir/remove-lock".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningSessionDefaults {
    pub ttl_ms: u64,
    pub remaining_uses: u32,
}

impl Default for SigningSessionDefaults {
    fn default() -> Self {
        Self {
            ttl_ms: SESSION_DEFAULT_TTL_MS,
            remaining_uses: SESSION_DEFAULT_MAX_USES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum SignerMode {
    #[default]
    LocalSigner,
    ThresholdSigner { behavior: ThresholdBehavior },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdBehavior {
    Strict,
    #[default]
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IframeWalletConfig {
    pub wallet_origin: Option<String>,
    pub extension_wallet_origin: Option<String>,
    pub sdk_base_path: Option<String>,
    pub rp_id_override: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletTheme {
    Dark,
    Light,
}
