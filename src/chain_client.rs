//! Chain client facade: view calls, access-key queries, block context and
//! broadcast. Injected into the orchestrator; the HTTP implementation speaks
//! JSON-RPC 2.0 to a NEAR-style node.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::encoders::base64_standard_encode;
use crate::errors::{ErrorKind, WalletError};
use crate::types::vrf::VrfData;
use crate::types::webauthn::{AuthenticatorOptions, WebAuthnRegistrationCredential};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockContext {
    pub block_hash: String,
    pub block_height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKeyView {
    pub nonce: u64,
    pub block_hash: String,
    pub block_height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitUntil {
    Included,
    ExecutedOptimistic,
    Final,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutcome {
    pub transaction_hash: String,
    pub success: bool,
    #[serde(default)]
    pub logs: Vec<String>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Call a contract view method; `args` is the JSON argument object,
    /// the result the JSON the method returned.
    async fn view_call(
        &self,
        contract_id: &str,
        method: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, WalletError>;

    /// Access key for `(account_id, public_key)`, with the block it was
    /// observed at. Missing keys surface `ACCESS_KEY_NOT_FOUND`.
    async fn view_access_key(
        &self,
        account_id: &str,
        public_key: &str,
    ) -> Result<AccessKeyView, WalletError>;

    /// Public keys currently authorized on the account (NEAR format).
    async fn view_access_key_list(&self, account_id: &str) -> Result<Vec<String>, WalletError>;

    /// Spendable balance in yoctoNEAR.
    async fn view_account_balance(&self, account_id: &str) -> Result<u128, WalletError>;

    /// Hash and height of the latest final block.
    async fn final_block(&self) -> Result<BlockContext, WalletError>;

    /// Broadcast a borsh-serialized SignedTransaction.
    async fn send_transaction(
        &self,
        signed_tx_borsh: &[u8],
        wait_until: WaitUntil,
    ) -> Result<TransactionOutcome, WalletError>;
}

// === TYPED CONTRACT VIEWS (consumed surface) ===

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub new_public_key: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Helper over the webauthn contract's view surface.
pub struct ContractViews<'a> {
    pub chain: &'a dyn ChainClient,
    pub contract_id: &'a str,
}

impl<'a> ContractViews<'a> {
    pub fn new(chain: &'a dyn ChainClient, contract_id: &'a str) -> Self {
        Self { chain, contract_id }
    }

    pub async fn check_can_register_user(
        &self,
        vrf_data: &VrfData,
        webauthn_registration: &WebAuthnRegistrationCredential,
        authenticator_options: Option<&AuthenticatorOptions>,
    ) -> Result<bool, WalletError> {
        let result = self
            .chain
            .view_call(
                self.contract_id,
                crate::config::CHECK_CAN_REGISTER_USER_METHOD,
                json!({
                    "vrf_data": vrf_data,
                    "webauthn_registration": webauthn_registration,
                    "authenticator_options": authenticator_options,
                }),
            )
            .await?;
        Ok(result
            .get("verified")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    pub async fn get_device_linking_account(
        &self,
        device_public_key: &str,
    ) -> Result<Option<(String, u64)>, WalletError> {
        let result = self
            .chain
            .view_call(
                self.contract_id,
                crate::config::GET_DEVICE_LINKING_ACCOUNT_METHOD,
                json!({ "device_public_key": device_public_key }),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let pair: (String, u64) = serde_json::from_value(result)
            .map_err(|e| WalletError::validation(format!("Invalid linking mapping: {}", e)))?;
        Ok(Some(pair))
    }

    pub async fn get_credential_ids_by_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<String>, WalletError> {
        let result = self
            .chain
            .view_call(
                self.contract_id,
                crate::config::GET_CREDENTIAL_IDS_METHOD,
                json!({ "account_id": account_id }),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| WalletError::validation(format!("Invalid credential id list: {}", e)))
    }

    pub async fn get_authenticators_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<(String, serde_json::Value)>, WalletError> {
        let result = self
            .chain
            .view_call(
                self.contract_id,
                crate::config::GET_AUTHENTICATORS_METHOD,
                json!({ "user_id": user_id }),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| WalletError::validation(format!("Invalid authenticator list: {}", e)))
    }

    pub async fn get_verification_result(
        &self,
        verifier_account_id: &str,
        view_method: &str,
        request_id: &str,
    ) -> Result<Option<VerificationResult>, WalletError> {
        let result = self
            .chain
            .view_call(
                verifier_account_id,
                view_method,
                json!({ "request_id": request_id }),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| WalletError::validation(format!("Invalid verification result: {}", e)))
    }
}

// === JSON-RPC IMPLEMENTATION ===

/// JSON-RPC 2.0 client for a NEAR-style node. Raw HTTP POST with serde_json
/// rather than a full RPC framework, to keep the client lean.
pub struct HttpChainClient {
    url: String,
    client: reqwest::Client,
}

impl HttpChainClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, WalletError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "passkey-wallet",
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WalletError::broadcast(format!("RPC connection to {} failed: {}", self.url, e)))?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WalletError::broadcast(format!("Invalid RPC response: {}", e)))?;

        if let Some(error) = json.get("error") {
            return Err(WalletError::broadcast(format!("RPC error: {}", error)));
        }
        Ok(json.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn view_call(
        &self,
        contract_id: &str,
        method: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, WalletError> {
        let args_base64 = base64_standard_encode(args.to_string().as_bytes());
        let result = self
            .call(
                "query",
                json!({
                    "request_type": "call_function",
                    "finality": "optimistic",
                    "account_id": contract_id,
                    "method_name": method,
                    "args_base64": args_base64,
                }),
            )
            .await?;

        let bytes: Vec<u8> = result
            .get("result")
            .and_then(|r| r.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_u64().map(|n| n as u8))
                    .collect()
            })
            .unwrap_or_default();
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| WalletError::validation(format!("Invalid view result JSON: {}", e)))
    }

    async fn view_access_key(
        &self,
        account_id: &str,
        public_key: &str,
    ) -> Result<AccessKeyView, WalletError> {
        let result = self
            .call(
                "query",
                json!({
                    "request_type": "view_access_key",
                    "finality": "final",
                    "account_id": account_id,
                    "public_key": public_key,
                }),
            )
            .await
            .map_err(|e| {
                WalletError::new(ErrorKind::AccessKeyNotFound, e.message().to_string())
            })?;

        let nonce = result.get("nonce").and_then(|n| n.as_u64()).ok_or_else(|| {
            WalletError::new(
                ErrorKind::AccessKeyNotFound,
                format!("No access key {} on {}", public_key, account_id),
            )
        })?;
        Ok(AccessKeyView {
            nonce,
            block_hash: result
                .get("block_hash")
                .and_then(|h| h.as_str())
                .unwrap_or_default()
                .to_string(),
            block_height: result
                .get("block_height")
                .and_then(|h| h.as_u64())
                .unwrap_or_default(),
        })
    }

    async fn view_access_key_list(&self, account_id: &str) -> Result<Vec<String>, WalletError> {
        let result = self
            .call(
                "query",
                json!({
                    "request_type": "view_access_key_list",
                    "finality": "final",
                    "account_id": account_id,
                }),
            )
            .await?;
        let keys = result
            .get("keys")
            .and_then(|k| k.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|entry| entry.get("public_key"))
                    .filter_map(|pk| pk.as_str())
                    .map(|pk| pk.to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(keys)
    }

    async fn view_account_balance(&self, account_id: &str) -> Result<u128, WalletError> {
        let result = self
            .call(
                "query",
                json!({
                    "request_type": "view_account",
                    "finality": "final",
                    "account_id": account_id,
                }),
            )
            .await?;
        result
            .get("amount")
            .and_then(|a| a.as_str())
            .and_then(|a| a.parse::<u128>().ok())
            .ok_or_else(|| WalletError::validation(format!("No balance for {}", account_id)))
    }

    async fn final_block(&self) -> Result<BlockContext, WalletError> {
        let result = self
            .call("block", json!({ "finality": "final" }))
            .await?;
        let header = result
            .get("header")
            .ok_or_else(|| WalletError::broadcast("Block response has no header"))?;
        Ok(BlockContext {
            block_hash: header
                .get("hash")
                .and_then(|h| h.as_str())
                .unwrap_or_default()
                .to_string(),
            block_height: header
                .get("height")
                .and_then(|h| h.as_u64())
                .unwrap_or_default(),
        })
    }

    async fn send_transaction(
        &self,
        signed_tx_borsh: &[u8],
        wait_until: WaitUntil,
    ) -> Result<TransactionOutcome, WalletError> {
        let result = self
            .call(
                "send_tx",
                json!({
                    "signed_tx_base64": base64_standard_encode(signed_tx_borsh),
                    "wait_until": wait_until,
                }),
            )
            .await?;

        let transaction_hash = result
            .get("transaction")
            .and_then(|t| t.get("hash"))
            .and_then(|h| h.as_str())
            .unwrap_or_default()
            .to_string();
        let success = result
            .get("status")
            .map(|s| s.get("SuccessValue").is_some() || s.get("SuccessReceiptId").is_some())
            .unwrap_or(false);
        Ok(TransactionOutcome {
            transaction_hash,
            success,
            logs: Vec::new(),
        })
    }
}
