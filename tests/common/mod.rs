//! Shared test doubles: an in-memory chain, an in-process relay running the
//! real Shamir-server and FROST-cosigner math, and a deterministic software
//! authenticator with PRF support.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use passkey_wallet::chain_client::{
    AccessKeyView, BlockContext, ChainClient, TransactionOutcome, WaitUntil,
};
use passkey_wallet::clock::TestClock;
use passkey_wallet::config::{
    EmailRecoveryConfig, RelayerConfig, SessionKind, Shamir3PassConfig, SignerMode,
    VrfWorkerConfigs, WalletConfig,
};
use passkey_wallet::crypto::{sha256, sha256_concat};
use passkey_wallet::encoders::{base64_url_encode, bs58_decode_32};
use passkey_wallet::errors::{ErrorKind, WalletError};
use passkey_wallet::events::EventSink;
use passkey_wallet::relay_client::{
    CommitmentsWire, CreateAccountAndRegisterRequest, CreateAccountAndRegisterResponse,
    RelayClient, SessionVerificationResponse, ShamirApplyServerLockResponse,
    ShamirRemoveServerLockResponse, ThresholdAuthorizeRequest, ThresholdAuthorizeResponse,
    ThresholdKeygenRequest, ThresholdKeygenResponse, ThresholdSignFinalizeRequest,
    ThresholdSignFinalizeResponse, ThresholdSignInitRequest, ThresholdSignInitResponse,
};
use passkey_wallet::types::near::{Action, SignedTransaction};
use passkey_wallet::types::vrf::VrfData;
use passkey_wallet::types::webauthn::{
    AuthenticationResponse, ClientExtensionResults, PrfOutputs, PrfResults, RegistrationResponse,
    SerializedCredential, SerializedRegistrationCredential, WebAuthnAuthenticationCredential,
};
use passkey_wallet::vault::Vault;
use passkey_wallet::vrf_worker::shamir3pass::{
    decode_biguint_b64u, encode_biguint_b64u, Shamir3Pass, ShamirServerKeypair,
};
use passkey_wallet::webauthn::{
    AuthenticationCeremony, PasskeyAuthenticator, RegistrationCeremony,
};
use passkey_wallet::PasskeyWallet;

// === SOFTWARE AUTHENTICATOR ===

struct StoredPasskey {
    seed: [u8; 32],
    user_handle: String,
}

/// Deterministic platform-authenticator stand-in. PRF outputs are
/// `sha256(seed || salt)`, so they are stable per `(credential, salt)` like a
/// real PRF extension.
pub struct SoftwareAuthenticator {
    credentials: Mutex<HashMap<String, StoredPasskey>>,
    counter: AtomicU64,
    /// Credential the next discovery-style prompt picks, when several match.
    preferred: Mutex<Option<String>>,
}

impl SoftwareAuthenticator {
    pub fn new() -> Self {
        Self {
            credentials: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(1),
            preferred: Mutex::new(None),
        }
    }

    pub fn set_preferred_credential(&self, credential_id: &str) {
        *self.preferred.lock().unwrap() = Some(credential_id.to_string());
    }

    pub fn credential_ids(&self) -> Vec<String> {
        self.credentials.lock().unwrap().keys().cloned().collect()
    }

    fn prf(seed: &[u8; 32], salt: &[u8; 32]) -> String {
        base64_url_encode(&sha256_concat(&[seed, salt]))
    }

    fn client_data(kind: &str, challenge: &str) -> String {
        base64_url_encode(
            json!({
                "type": kind,
                "challenge": challenge,
                "origin": "https://wallet.example",
            })
            .to_string()
            .as_bytes(),
        )
    }
}

#[async_trait]
impl PasskeyAuthenticator for SoftwareAuthenticator {
    async fn create_credential(
        &self,
        ceremony: &RegistrationCeremony,
    ) -> Result<SerializedRegistrationCredential, WalletError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let credential_id = format!("cred-{n}");
        let seed = sha256_concat(&[b"passkey-seed", credential_id.as_bytes()]);

        self.credentials.lock().unwrap().insert(
            credential_id.clone(),
            StoredPasskey {
                seed,
                user_handle: ceremony.user_handle.clone(),
            },
        );

        Ok(SerializedRegistrationCredential {
            id: credential_id.clone(),
            raw_id: credential_id,
            credential_type: "public-key".to_string(),
            authenticator_attachment: Some("platform".to_string()),
            response: RegistrationResponse {
                client_data_json: Self::client_data("webauthn.create", &ceremony.challenge_b64u),
                attestation_object: base64_url_encode(b"software-attestation"),
                transports: vec!["internal".to_string()],
            },
            client_extension_results: ClientExtensionResults {
                prf: PrfResults {
                    results: PrfOutputs {
                        first: Some(Self::prf(&seed, &ceremony.prf_salt_first)),
                        second: Some(Self::prf(&seed, &ceremony.prf_salt_second)),
                    },
                },
            },
        })
    }

    async fn get_credential(
        &self,
        ceremony: &AuthenticationCeremony,
    ) -> Result<SerializedCredential, WalletError> {
        let credentials = self.credentials.lock().unwrap();
        let preferred = self.preferred.lock().unwrap().clone();

        let pick = |id: &String| -> bool {
            ceremony.allow_credential_ids.is_empty() || ceremony.allow_credential_ids.contains(id)
        };
        let credential_id = preferred
            .filter(|id| credentials.contains_key(id) && pick(id))
            .or_else(|| {
                let mut ids: Vec<_> = credentials.keys().filter(|id| pick(id)).cloned().collect();
                ids.sort();
                ids.pop()
            })
            .ok_or_else(|| {
                WalletError::new(ErrorKind::WebauthnCancelled, "No matching passkey")
            })?;
        let stored = &credentials[&credential_id];

        Ok(SerializedCredential {
            id: credential_id.clone(),
            raw_id: credential_id,
            credential_type: "public-key".to_string(),
            authenticator_attachment: Some("platform".to_string()),
            response: AuthenticationResponse {
                client_data_json: Self::client_data("webauthn.get", &ceremony.challenge_b64u),
                authenticator_data: base64_url_encode(b"software-authenticator-data"),
                signature: base64_url_encode(b"software-assertion-signature"),
                user_handle: Some(stored.user_handle.clone()),
            },
            client_extension_results: ClientExtensionResults {
                prf: PrfResults {
                    results: PrfOutputs {
                        first: Some(Self::prf(&stored.seed, &ceremony.prf_salt_first)),
                        second: Some(Self::prf(&stored.seed, &ceremony.prf_salt_second)),
                    },
                },
            },
        })
    }
}

// === IN-MEMORY CHAIN ===

#[derive(Default)]
struct AccountState {
    balance: u128,
    /// public key -> current nonce
    access_keys: HashMap<String, u64>,
}

#[derive(Default)]
struct ChainState {
    accounts: HashMap<String, AccountState>,
    block_height: u64,
    linking_mappings: HashMap<String, (String, u64)>,
    credential_ids: HashMap<String, Vec<String>>,
    authenticators: HashMap<String, Vec<(String, serde_json::Value)>>,
    verification_results: HashMap<String, serde_json::Value>,
    broadcast_hashes: Vec<String>,
}

pub struct MockChain {
    state: Mutex<ChainState>,
    fail_broadcasts: AtomicBool,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState::default()),
            fail_broadcasts: AtomicBool::new(false),
        })
    }

    pub fn create_account(&self, account_id: &str, balance: u128) {
        let mut state = self.state.lock().unwrap();
        state.accounts.entry(account_id.to_string()).or_default().balance = balance;
    }

    pub fn add_access_key(&self, account_id: &str, public_key: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .accounts
            .entry(account_id.to_string())
            .or_default()
            .access_keys
            .insert(public_key.to_string(), 0);
    }

    pub fn register_credential(&self, account_id: &str, credential_id: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .credential_ids
            .entry(account_id.to_string())
            .or_default()
            .push(credential_id.to_string());
        state
            .authenticators
            .entry(account_id.to_string())
            .or_default()
            .push((
                credential_id.to_string(),
                json!({ "registered": true }),
            ));
    }

    pub fn set_verification_result(&self, request_id: &str, result: serde_json::Value) {
        self.state
            .lock()
            .unwrap()
            .verification_results
            .insert(request_id.to_string(), result);
    }

    pub fn set_fail_broadcasts(&self, fail: bool) {
        self.fail_broadcasts.store(fail, Ordering::SeqCst);
    }

    pub fn access_keys(&self, account_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(account_id)
            .map(|a| a.access_keys.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn broadcast_count(&self) -> usize {
        self.state.lock().unwrap().broadcast_hashes.len()
    }

    fn apply_transaction(&self, tx: &SignedTransaction) -> Result<(), WalletError> {
        let mut state = self.state.lock().unwrap();
        let signer_id = tx.transaction.signer_id.as_str().to_string();
        let public_key = tx.transaction.public_key.to_near_format();

        let current_nonce = state
            .accounts
            .get(&signer_id)
            .and_then(|a| a.access_keys.get(&public_key))
            .copied()
            .ok_or_else(|| {
                WalletError::new(
                    ErrorKind::AccessKeyNotFound,
                    format!("No access key {public_key} on {signer_id}"),
                )
            })?;
        if tx.transaction.nonce <= current_nonce {
            return Err(WalletError::new(
                ErrorKind::NonceStale,
                format!(
                    "Nonce {} is not above the access key nonce {}",
                    tx.transaction.nonce, current_nonce
                ),
            ));
        }

        for action in &tx.transaction.actions {
            match action {
                Action::CreateAccount => {
                    state
                        .accounts
                        .entry(tx.transaction.receiver_id.as_str().to_string())
                        .or_default();
                }
                Action::AddKey { public_key, .. } => {
                    state
                        .accounts
                        .entry(tx.transaction.receiver_id.as_str().to_string())
                        .or_default()
                        .access_keys
                        .insert(public_key.to_near_format(), 0);
                }
                Action::DeleteKey { public_key } => {
                    if let Some(account) = state
                        .accounts
                        .get_mut(tx.transaction.receiver_id.as_str())
                    {
                        account.access_keys.remove(&public_key.to_near_format());
                    }
                }
                Action::Transfer { deposit } => {
                    if let Some(sender) = state.accounts.get_mut(&signer_id) {
                        sender.balance = sender.balance.saturating_sub(*deposit);
                    }
                    state
                        .accounts
                        .entry(tx.transaction.receiver_id.as_str().to_string())
                        .or_default()
                        .balance += deposit;
                }
                Action::FunctionCall(call) => {
                    let args: serde_json::Value =
                        serde_json::from_slice(&call.args).unwrap_or(serde_json::Value::Null);
                    match call.method_name.as_str() {
                        "store_device_linking_mapping" => {
                            let device_pk = args["device_public_key"]
                                .as_str()
                                .unwrap_or_default()
                                .to_string();
                            let target = args["target_account_id"]
                                .as_str()
                                .unwrap_or_default()
                                .to_string();
                            state.linking_mappings.insert(device_pk, (target, 0));
                        }
                        "link_device_register_user" => {
                            let credential_id = args["webauthn_registration"]["id"]
                                .as_str()
                                .unwrap_or_default()
                                .to_string();
                            state
                                .credential_ids
                                .entry(signer_id.clone())
                                .or_default()
                                .push(credential_id.clone());
                            state
                                .authenticators
                                .entry(signer_id.clone())
                                .or_default()
                                .push((credential_id, json!({ "registered": true })));
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        if let Some(account) = state.accounts.get_mut(&signer_id) {
            account
                .access_keys
                .insert(public_key, tx.transaction.nonce);
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn view_call(
        &self,
        _contract_id: &str,
        method: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, WalletError> {
        let state = self.state.lock().unwrap();
        let result = match method {
            "check_can_register_user" => json!({ "verified": true }),
            "get_device_linking_account" => {
                let pk = args["device_public_key"].as_str().unwrap_or_default();
                match state.linking_mappings.get(pk) {
                    Some((account, counter)) => json!([account, counter]),
                    None => serde_json::Value::Null,
                }
            }
            "get_credential_ids_by_account" => {
                let account = args["account_id"].as_str().unwrap_or_default();
                json!(state.credential_ids.get(account).cloned().unwrap_or_default())
            }
            "get_authenticators_by_user" => {
                let account = args["user_id"].as_str().unwrap_or_default();
                json!(state.authenticators.get(account).cloned().unwrap_or_default())
            }
            "get_verification_result" => {
                let request_id = args["request_id"].as_str().unwrap_or_default();
                state
                    .verification_results
                    .get(request_id)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null)
            }
            _ => serde_json::Value::Null,
        };
        Ok(result)
    }

    async fn view_access_key(
        &self,
        account_id: &str,
        public_key: &str,
    ) -> Result<AccessKeyView, WalletError> {
        let state = self.state.lock().unwrap();
        let nonce = state
            .accounts
            .get(account_id)
            .and_then(|a| a.access_keys.get(public_key))
            .copied()
            .ok_or_else(|| {
                WalletError::new(
                    ErrorKind::AccessKeyNotFound,
                    format!("No access key {public_key} on {account_id}"),
                )
            })?;
        Ok(AccessKeyView {
            nonce,
            block_hash: bs58::encode(sha256(&state.block_height.to_le_bytes())).into_string(),
            block_height: state.block_height,
        })
    }

    async fn view_access_key_list(&self, account_id: &str) -> Result<Vec<String>, WalletError> {
        Ok(self.access_keys(account_id))
    }

    async fn view_account_balance(&self, account_id: &str) -> Result<u128, WalletError> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(account_id)
            .map(|a| a.balance)
            .ok_or_else(|| WalletError::validation(format!("Unknown account {account_id}")))
    }

    async fn final_block(&self) -> Result<BlockContext, WalletError> {
        let mut state = self.state.lock().unwrap();
        state.block_height += 1;
        Ok(BlockContext {
            block_hash: bs58::encode(sha256(&state.block_height.to_le_bytes())).into_string(),
            block_height: state.block_height,
        })
    }

    async fn send_transaction(
        &self,
        signed_tx_borsh: &[u8],
        _wait_until: WaitUntil,
    ) -> Result<TransactionOutcome, WalletError> {
        if self.fail_broadcasts.load(Ordering::SeqCst) {
            return Err(WalletError::new(
                ErrorKind::BroadcastRpcError,
                "injected broadcast failure",
            ));
        }
        let tx = SignedTransaction::from_borsh_bytes(signed_tx_borsh)
            .map_err(WalletError::validation)?;
        self.apply_transaction(&tx)?;

        let hash = bs58::encode(sha256(signed_tx_borsh)).into_string();
        self.state
            .lock()
            .unwrap()
            .broadcast_hashes
            .push(hash.clone());
        Ok(TransactionOutcome {
            transaction_hash: hash,
            success: true,
            logs: Vec::new(),
        })
    }
}

// === IN-PROCESS RELAY ===

struct PendingThresholdSign {
    digest: Vec<u8>,
    client_commitments: CommitmentsWire,
    relayer_nonces: frost_ed25519::round1::SigningNonces,
    relayer_commitments_wire: CommitmentsWire,
    relayer_share_bytes: [u8; 32],
    group_public_key: [u8; 32],
}

struct RelayState {
    server_keypair: ShamirServerKeypair,
    /// relayer_key_id -> (relayer share, group pk)
    threshold_keys: HashMap<String, ([u8; 32], [u8; 32])>,
    authorized_sessions: HashMap<String, String>,
    pending_signs: HashMap<String, PendingThresholdSign>,
    counter: u64,
}

pub struct MockRelay {
    chain: Arc<MockChain>,
    shamir: Shamir3Pass,
    state: Mutex<RelayState>,
    fail_shamir: AtomicBool,
}

impl MockRelay {
    pub fn new(chain: Arc<MockChain>) -> Arc<Self> {
        let shamir = Shamir3Pass::new_default();
        let server_keypair = ShamirServerKeypair::generate(&shamir, "key-epoch-1")
            .expect("server keypair generation");
        Arc::new(Self {
            chain,
            shamir,
            state: Mutex::new(RelayState {
                server_keypair,
                threshold_keys: HashMap::new(),
                authorized_sessions: HashMap::new(),
                pending_signs: HashMap::new(),
                counter: 0,
            }),
            fail_shamir: AtomicBool::new(false),
        })
    }

    pub fn set_fail_shamir(&self, fail: bool) {
        self.fail_shamir.store(fail, Ordering::SeqCst);
    }

    /// Rotate the server Shamir exponent to a new key epoch.
    pub fn rotate_server_key(&self, new_key_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.server_keypair =
            ShamirServerKeypair::generate(&self.shamir, new_key_id).expect("rotation");
    }

    pub fn current_server_key_id(&self) -> String {
        self.state.lock().unwrap().server_keypair.key_id.clone()
    }

    fn derive_relayer_share(client_verifying_share_b64u: &str) -> [u8; 32] {
        let digest = sha256_concat(&[b"relayer-master", client_verifying_share_b64u.as_bytes()]);
        curve25519_dalek::scalar::Scalar::from_bytes_mod_order(digest).to_bytes()
    }
}

#[async_trait]
impl RelayClient for MockRelay {
    async fn create_account_and_register_user(
        &self,
        request: CreateAccountAndRegisterRequest,
    ) -> Result<CreateAccountAndRegisterResponse, WalletError> {
        if request.vrf_data.intent_digest_32.is_none() {
            return Err(WalletError::new(
                ErrorKind::RelayVerificationFailed,
                "registration challenge is missing its intent digest",
            ));
        }
        self.chain
            .create_account(&request.new_account_id, 10u128.pow(25));
        self.chain
            .add_access_key(&request.new_account_id, &request.new_public_key);
        self.chain
            .register_credential(&request.new_account_id, &request.webauthn_registration.id);
        Ok(CreateAccountAndRegisterResponse {
            success: true,
            transaction_hash: Some("relay-create-tx".to_string()),
            error: None,
            threshold_ed25519: None,
        })
    }

    async fn verify_authentication_response(
        &self,
        vrf_data: VrfData,
        _credential: WebAuthnAuthenticationCredential,
        session_kind: SessionKind,
    ) -> Result<SessionVerificationResponse, WalletError> {
        if vrf_data.vrf_output.is_empty() || vrf_data.vrf_proof.is_empty() {
            return Ok(SessionVerificationResponse {
                verified: false,
                jwt: None,
                error: Some("missing VRF proof".to_string()),
            });
        }
        Ok(SessionVerificationResponse {
            verified: true,
            jwt: matches!(session_kind, SessionKind::Jwt)
                .then(|| format!("jwt-for-{}", vrf_data.user_id)),
            error: None,
        })
    }

    async fn shamir_apply_server_lock(
        &self,
        kek_c_b64u: &str,
    ) -> Result<ShamirApplyServerLockResponse, WalletError> {
        if self.fail_shamir.load(Ordering::SeqCst) {
            return Err(WalletError::relay_http("shamir relay unavailable"));
        }
        let state = self.state.lock().unwrap();
        let kek_c = decode_biguint_b64u(kek_c_b64u).map_err(WalletError::validation)?;
        let kek_cs = state.server_keypair.apply_lock(&self.shamir, &kek_c);
        Ok(ShamirApplyServerLockResponse {
            kek_cs_b64u: encode_biguint_b64u(&kek_cs),
            key_id: Some(state.server_keypair.key_id.clone()),
        })
    }

    async fn shamir_remove_server_lock(
        &self,
        kek_st_b64u: &str,
        key_id: &str,
    ) -> Result<ShamirRemoveServerLockResponse, WalletError> {
        if self.fail_shamir.load(Ordering::SeqCst) {
            return Err(WalletError::relay_http("shamir relay unavailable"));
        }
        let state = self.state.lock().unwrap();
        if state.server_keypair.key_id != key_id {
            return Err(WalletError::new(
                ErrorKind::RelayHttpError,
                format!("unknown server key epoch {key_id}"),
            ));
        }
        let kek_st = decode_biguint_b64u(kek_st_b64u).map_err(WalletError::validation)?;
        let kek_t = state.server_keypair.remove_lock(&self.shamir, &kek_st);
        Ok(ShamirRemoveServerLockResponse {
            kek_c_b64u: encode_biguint_b64u(&kek_t),
        })
    }

    async fn threshold_keygen(
        &self,
        request: ThresholdKeygenRequest,
    ) -> Result<ThresholdKeygenResponse, WalletError> {
        let relayer_share = Self::derive_relayer_share(&request.client_verifying_share_b64u);
        let relayer_verifying_share = (curve25519_dalek::constants::ED25519_BASEPOINT_POINT
            * curve25519_dalek::scalar::Scalar::from_bytes_mod_order(relayer_share))
        .compress()
        .to_bytes();

        let client_verifying_share: [u8; 32] =
            passkey_wallet::encoders::base64_url_decode(&request.client_verifying_share_b64u)
                .map_err(WalletError::validation)?
                .try_into()
                .map_err(|_| WalletError::validation("client share must be 32 bytes"))?;
        let group_public_key = passkey_wallet::threshold::frost::compute_group_public_key_2p(
            &client_verifying_share,
            &relayer_verifying_share,
            1,
            2,
        )
        .map_err(WalletError::validation)?;

        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let relayer_key_id = format!("relayer-key-{}", state.counter);
        state
            .threshold_keys
            .insert(relayer_key_id.clone(), (relayer_share, group_public_key));

        Ok(ThresholdKeygenResponse {
            relayer_key_id,
            public_key: format!("ed25519:{}", bs58::encode(group_public_key).into_string()),
            relayer_verifying_share_b64u: base64_url_encode(&relayer_verifying_share),
            participant_ids: vec![1, 2],
        })
    }

    async fn threshold_authorize(
        &self,
        request: ThresholdAuthorizeRequest,
    ) -> Result<ThresholdAuthorizeResponse, WalletError> {
        if request.signing_digest_32.len() != 32 {
            return Ok(ThresholdAuthorizeResponse {
                ok: false,
                message: Some("signing_digest_32 must be 32 bytes".to_string()),
                mpc_session_id: None,
                expires_at: None,
            });
        }
        if request.vrf_data.intent_digest_32.is_none() {
            return Ok(ThresholdAuthorizeResponse {
                ok: false,
                message: Some("authorization requires an intent digest".to_string()),
                mpc_session_id: None,
                expires_at: None,
            });
        }
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let mpc_session_id = format!("mpc-{}", state.counter);
        state
            .authorized_sessions
            .insert(mpc_session_id.clone(), request.relayer_key_id.clone());
        Ok(ThresholdAuthorizeResponse {
            ok: true,
            message: None,
            mpc_session_id: Some(mpc_session_id),
            expires_at: None,
        })
    }

    async fn threshold_sign_init(
        &self,
        request: ThresholdSignInitRequest,
    ) -> Result<ThresholdSignInitResponse, WalletError> {
        let mut state = self.state.lock().unwrap();
        let Some(relayer_key_id) = state
            .authorized_sessions
            .remove(&request.mpc_session_id)
        else {
            return Ok(ThresholdSignInitResponse {
                ok: false,
                message: Some("unknown mpcSessionId".to_string()),
                signing_session_id: None,
                commitments_by_id: None,
                relayer_verifying_shares_by_id: None,
            });
        };
        let (relayer_share, group_public_key) = state
            .threshold_keys
            .get(&relayer_key_id)
            .copied()
            .ok_or_else(|| WalletError::validation("unknown relayerKeyId"))?;

        let relayer_key_package = passkey_wallet::threshold::frost::build_client_key_package(
            &relayer_share,
            &group_public_key,
            2,
        )
        .map_err(WalletError::validation)?;
        let round1 = passkey_wallet::threshold::frost::client_round1_commit(&relayer_key_package)
            .map_err(WalletError::validation)?;

        let digest = passkey_wallet::encoders::base64_url_decode(&request.signing_digest_b64u)
            .map_err(WalletError::validation)?;
        state.counter += 1;
        let signing_session_id = format!("sign-{}", state.counter);

        let relayer_verifying_share = (curve25519_dalek::constants::ED25519_BASEPOINT_POINT
            * curve25519_dalek::scalar::Scalar::from_bytes_mod_order(relayer_share))
        .compress()
        .to_bytes();

        let mut commitments_by_id = BTreeMap::new();
        commitments_by_id.insert("2".to_string(), round1.commitments_wire.clone());
        let mut verifying_by_id = BTreeMap::new();
        verifying_by_id.insert("2".to_string(), base64_url_encode(&relayer_verifying_share));

        state.pending_signs.insert(
            signing_session_id.clone(),
            PendingThresholdSign {
                digest,
                client_commitments: request.client_commitments,
                relayer_nonces: round1.nonces,
                relayer_commitments_wire: round1.commitments_wire,
                relayer_share_bytes: relayer_share,
                group_public_key,
            },
        );

        Ok(ThresholdSignInitResponse {
            ok: true,
            message: None,
            signing_session_id: Some(signing_session_id),
            commitments_by_id: Some(commitments_by_id),
            relayer_verifying_shares_by_id: Some(verifying_by_id),
        })
    }

    async fn threshold_sign_finalize(
        &self,
        request: ThresholdSignFinalizeRequest,
    ) -> Result<ThresholdSignFinalizeResponse, WalletError> {
        let pending = {
            let mut state = self.state.lock().unwrap();
            state
                .pending_signs
                .remove(&request.signing_session_id)
                .ok_or_else(|| WalletError::validation("unknown signingSessionId"))?
        };

        let relayer_key_package = passkey_wallet::threshold::frost::build_client_key_package(
            &pending.relayer_share_bytes,
            &pending.group_public_key,
            2,
        )
        .map_err(WalletError::validation)?;

        let client_identifier: frost_ed25519::Identifier = 1u16.try_into().unwrap();
        let relayer_identifier: frost_ed25519::Identifier = 2u16.try_into().unwrap();
        let mut commitments = BTreeMap::new();
        commitments.insert(
            client_identifier,
            passkey_wallet::threshold::frost::commitments_from_wire(&pending.client_commitments)
                .map_err(WalletError::validation)?,
        );
        commitments.insert(
            relayer_identifier,
            passkey_wallet::threshold::frost::commitments_from_wire(
                &pending.relayer_commitments_wire,
            )
            .map_err(WalletError::validation)?,
        );
        let signing_package = passkey_wallet::threshold::frost::build_signing_package(
            &pending.digest,
            commitments,
        );
        let share = passkey_wallet::threshold::frost::client_round2_signature_share(
            &signing_package,
            &pending.relayer_nonces,
            &relayer_key_package,
        )
        .map_err(WalletError::validation)?;

        let mut shares_by_id = BTreeMap::new();
        shares_by_id.insert(
            "2".to_string(),
            passkey_wallet::threshold::frost::signature_share_to_b64u(&share),
        );
        Ok(ThresholdSignFinalizeResponse {
            ok: true,
            message: None,
            relayer_signature_shares_by_id: Some(shares_by_id),
        })
    }
}

// === WALLET HARNESS ===

pub struct TestHarness {
    pub wallet: PasskeyWallet,
    pub chain: Arc<MockChain>,
    pub relay: Arc<MockRelay>,
    pub authenticator: Arc<SoftwareAuthenticator>,
    pub clock: Arc<TestClock>,
    pub vault: Arc<Vault>,
}

pub fn test_config(signer_mode: SignerMode) -> WalletConfig {
    WalletConfig {
        near_rpc_url: "http://rpc.test".to_string(),
        near_network: "sandbox".to_string(),
        contract_id: "webauthn-contract.test".to_string(),
        rp_id: "wallet.example".to_string(),
        secure_context: true,
        relayer: Some(RelayerConfig {
            url: "http://relay.test".to_string(),
            verify_route: "/verify-authentication-response".to_string(),
            session_kind: SessionKind::Jwt,
            email_recovery: Some(EmailRecoveryConfig {
                min_balance_yocto: "1000000".to_string(),
                polling_interval_ms: 100,
                max_polling_duration_ms: 10_000,
                pending_ttl_ms: 24 * 60 * 60 * 1000,
                mailto_address: "recover@wallet.example".to_string(),
                dkim_verifier_account_id: "dkim-verifier.test".to_string(),
                verification_view_method: "get_verification_result".to_string(),
            }),
        }),
        vrf_worker_configs: VrfWorkerConfigs {
            shamir3pass: Some(Shamir3PassConfig {
                relay_server_url: "http://relay.test".to_string(),
                apply_lock_route: "/shamir/apply-lock".to_string(),
                remove_lock_route: "/shamir/remove-lock".to_string(),
                shamir_p_b64u: None,
            }),
        },
        signing_session_defaults: Default::default(),
        authenticator_options: Default::default(),
        signer_mode,
        iframe_wallet: None,
        wallet_theme: passkey_wallet::config::WalletTheme::Dark,
    }
}

pub fn build_harness(signer_mode: SignerMode) -> TestHarness {
    let chain = MockChain::new();
    let relay = MockRelay::new(chain.clone());
    let authenticator = Arc::new(SoftwareAuthenticator::new());
    let clock = Arc::new(TestClock::new(1_700_000_000_000));
    let vault = Arc::new(Vault::open_temporary().expect("temporary vault"));

    let wallet = PasskeyWallet::new(
        test_config(signer_mode),
        vault.clone(),
        chain.clone(),
        Some(relay.clone()),
        authenticator.clone(),
        clock.clone(),
        EventSink::disabled(),
    );

    TestHarness {
        wallet,
        chain,
        relay,
        authenticator,
        clock,
        vault,
    }
}

/// Convenience: decode a NEAR-format key and assert it is well-formed.
pub fn assert_near_key(pk: &str) {
    assert!(pk.starts_with("ed25519:"), "not a NEAR key: {pk}");
    bs58_decode_32(pk.strip_prefix("ed25519:").unwrap()).expect("32-byte key payload");
}
