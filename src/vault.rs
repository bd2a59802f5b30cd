//! Encrypted vault: the only persistence root.
//!
//! One sled tree per logical table. Every persisted secret is ciphertext;
//! records are scanned for secret-shaped fields before any write and the
//! vault refuses to store them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;

use crate::errors::VaultError;
use crate::types::vrf::{EncryptedVrfKeypair, ServerEncryptedVrfKeypair};

// === RECORDS ===

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub account_id: String,
    pub device_number: u32,
    pub vrf_public_key_b64u: String,
    pub near_public_key: String,
    pub encrypted_vrf_keypair: EncryptedVrfKeypair,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_encrypted_vrf_keypair: Option<ServerEncryptedVrfKeypair>,
    pub registered_at_ms: u64,
    pub last_updated_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorRecord {
    pub account_id: String,
    pub credential_id: String,
    pub device_number: u32,
    #[serde(default)]
    pub transports: Vec<String>,
    pub registered_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedNearKey {
    /// Record kind marker; `local_near_sk_v3` for PRF-wrapped local keys.
    pub kind: String,
    pub encrypted_private_key_data_b64u: String,
    pub chacha20_nonce_b64u: String,
    pub wrap_key_salt_b64u: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdKeyRecord {
    /// `threshold_ed25519_2p_v1`
    pub kind: String,
    /// Group public key (NEAR format). The client share is re-derived from
    /// PRF on demand and never stored.
    pub public_key: String,
    pub wrap_key_salt_b64u: String,
    pub relayer_key_id: String,
    pub client_share_derivation: String,
    pub participants: Vec<u16>,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PendingRecoveryStatus {
    AwaitingEmail,
    AwaitingAddKey,
    Finalizing,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEmailRecovery {
    pub account_id: String,
    pub recovery_email: String,
    pub device_number: u32,
    pub near_public_key: String,
    pub request_id: String,
    pub encrypted_vrf_keypair: EncryptedVrfKeypair,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_encrypted_vrf_keypair: Option<ServerEncryptedVrfKeypair>,
    pub vrf_public_key_b64u: String,
    pub encrypted_near_key: EncryptedNearKey,
    pub credential_id: String,
    /// Wire-form (PRF-free) registration credential, needed to finalize the
    /// on-chain device registration after email verification.
    pub registration_credential: crate::types::webauthn::WebAuthnRegistrationCredential,
    pub created_at_ms: u64,
    pub status: PendingRecoveryStatus,
}

// === FORBIDDEN-SECRET GUARD ===

const FORBIDDEN_KEYS: [&str; 8] = [
    "near_sk",
    "nearPrivateKey",
    "near_private_key",
    "privateKey",
    "prf",
    "prfOutput",
    "prf_first",
    "prf_second",
];

/// Reject records containing fields shaped like PRF outputs or raw private
/// keys, recursively.
pub fn find_forbidden_secret(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, inner) in map {
                if FORBIDDEN_KEYS.contains(&key.as_str()) {
                    return Some(key.clone());
                }
                if let Some(found) = find_forbidden_secret(inner) {
                    return Some(found);
                }
            }
            None
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_forbidden_secret),
        _ => None,
    }
}

// === VAULT ===

const TREE_USERS: &str = "users";
const TREE_AUTHENTICATORS: &str = "authenticators";
const TREE_NEAR_KEYS: &str = "near_keys";
const TREE_THRESHOLD_KEYS: &str = "threshold_keys";
const TREE_PENDING_RECOVERY: &str = "pending_email_recovery";
const TREE_APP_STATE: &str = "app_state";
const TREE_DERIVED_ADDRESSES: &str = "derived_addresses";

const LAST_USER_KEY: &str = "last_user";

pub struct Vault {
    users: sled::Tree,
    authenticators: sled::Tree,
    near_keys: sled::Tree,
    threshold_keys: sled::Tree,
    pending_recovery: sled::Tree,
    app_state: sled::Tree,
    derived_addresses: sled::Tree,
    _db: sled::Db,
}

fn user_key(account_id: &str, device_number: u32) -> String {
    format!("{}#{:05}", account_id, device_number)
}

fn authenticator_key(account_id: &str, credential_id: &str) -> String {
    format!("{}#{}", account_id, credential_id)
}

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, VaultError> {
    let value =
        serde_json::to_value(record).map_err(|e| VaultError::Serialization(e.to_string()))?;
    if let Some(field) = find_forbidden_secret(&value) {
        return Err(VaultError::ForbiddenSecretField(field));
    }
    serde_json::to_vec(&value).map_err(|e| VaultError::Serialization(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, VaultError> {
    serde_json::from_slice(bytes).map_err(|e| VaultError::Serialization(e.to_string()))
}

impl Vault {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, VaultError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory vault for tests.
    pub fn open_temporary() -> Result<Self, VaultError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, VaultError> {
        Ok(Self {
            users: db.open_tree(TREE_USERS)?,
            authenticators: db.open_tree(TREE_AUTHENTICATORS)?,
            near_keys: db.open_tree(TREE_NEAR_KEYS)?,
            threshold_keys: db.open_tree(TREE_THRESHOLD_KEYS)?,
            pending_recovery: db.open_tree(TREE_PENDING_RECOVERY)?,
            app_state: db.open_tree(TREE_APP_STATE)?,
            derived_addresses: db.open_tree(TREE_DERIVED_ADDRESSES)?,
            _db: db,
        })
    }

    // === USERS ===

    /// Assign the next device number for an account: 1 for the first device,
    /// max+1 otherwise.
    pub fn next_device_number(&self, account_id: &str) -> Result<u32, VaultError> {
        let mut max = 0u32;
        for entry in self.users.scan_prefix(format!("{}#", account_id)) {
            let (_, value) = entry?;
            let user: UserRecord = decode(&value)?;
            max = max.max(user.device_number);
        }
        Ok(max + 1)
    }

    pub fn store_user(&self, user: &UserRecord) -> Result<(), VaultError> {
        self.users.insert(
            user_key(&user.account_id, user.device_number),
            encode(user)?,
        )?;
        Ok(())
    }

    pub fn get_user(
        &self,
        account_id: &str,
        device_number: u32,
    ) -> Result<Option<UserRecord>, VaultError> {
        match self.users.get(user_key(account_id, device_number))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn update_user(&self, user: &UserRecord) -> Result<(), VaultError> {
        let key = user_key(&user.account_id, user.device_number);
        if self.users.get(&key)?.is_none() {
            return Err(VaultError::NotFound(key));
        }
        self.users.insert(key, encode(user)?)?;
        Ok(())
    }

    pub fn delete_user(&self, account_id: &str, device_number: u32) -> Result<(), VaultError> {
        self.users.remove(user_key(account_id, device_number))?;
        Ok(())
    }

    pub fn list_users(&self, account_id: &str) -> Result<Vec<UserRecord>, VaultError> {
        let mut users = Vec::new();
        for entry in self.users.scan_prefix(format!("{}#", account_id)) {
            let (_, value) = entry?;
            users.push(decode(&value)?);
        }
        Ok(users)
    }

    pub fn list_all_users(&self) -> Result<Vec<UserRecord>, VaultError> {
        let mut users = Vec::new();
        for entry in self.users.iter() {
            let (_, value) = entry?;
            users.push(decode(&value)?);
        }
        Ok(users)
    }

    /// The account/device most recently written, by `last_updated_ms`.
    pub fn get_last_db_updated_user(
        &self,
        account_id: &str,
    ) -> Result<Option<UserRecord>, VaultError> {
        Ok(self
            .list_users(account_id)?
            .into_iter()
            .max_by_key(|u| u.last_updated_ms))
    }

    pub fn set_last_user(&self, account_id: &str, device_number: u32) -> Result<(), VaultError> {
        self.app_state.insert(
            LAST_USER_KEY,
            serde_json::to_vec(&(account_id, device_number))
                .map_err(|e| VaultError::Serialization(e.to_string()))?,
        )?;
        Ok(())
    }

    pub fn get_last_user(&self) -> Result<Option<UserRecord>, VaultError> {
        let Some(bytes) = self.app_state.get(LAST_USER_KEY)? else {
            return Ok(None);
        };
        let (account_id, device_number): (String, u32) = decode(&bytes)?;
        self.get_user(&account_id, device_number)
    }

    // === AUTHENTICATORS ===

    pub fn store_authenticator(&self, authenticator: &AuthenticatorRecord) -> Result<(), VaultError> {
        self.authenticators.insert(
            authenticator_key(&authenticator.account_id, &authenticator.credential_id),
            encode(authenticator)?,
        )?;
        Ok(())
    }

    pub fn list_authenticators(
        &self,
        account_id: &str,
    ) -> Result<Vec<AuthenticatorRecord>, VaultError> {
        let mut records = Vec::new();
        for entry in self.authenticators.scan_prefix(format!("{}#", account_id)) {
            let (_, value) = entry?;
            records.push(decode(&value)?);
        }
        Ok(records)
    }

    /// Authenticators to surface in a credential prompt for the account.
    pub fn ensure_current_passkey(
        &self,
        account_id: &str,
    ) -> Result<Vec<AuthenticatorRecord>, VaultError> {
        self.list_authenticators(account_id)
    }

    pub fn find_authenticator(
        &self,
        account_id: &str,
        credential_id: &str,
    ) -> Result<Option<AuthenticatorRecord>, VaultError> {
        match self
            .authenticators
            .get(authenticator_key(account_id, credential_id))?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // === NEAR KEYS ===

    /// Store the encrypted NEAR key. The wrap-key salt is immutable once
    /// written: a different salt for the same `(account, device)` is a
    /// corruption, not an update.
    pub fn store_near_key(
        &self,
        account_id: &str,
        device_number: u32,
        key: &EncryptedNearKey,
    ) -> Result<(), VaultError> {
        let db_key = user_key(account_id, device_number);
        if let Some(existing) = self.near_keys.get(&db_key)? {
            let existing: EncryptedNearKey = decode(&existing)?;
            if existing.wrap_key_salt_b64u != key.wrap_key_salt_b64u {
                return Err(VaultError::WrapKeySaltConflict(db_key));
            }
        }
        self.near_keys.insert(db_key, encode(key)?)?;
        Ok(())
    }

    pub fn get_near_key(
        &self,
        account_id: &str,
        device_number: u32,
    ) -> Result<Option<EncryptedNearKey>, VaultError> {
        match self.near_keys.get(user_key(account_id, device_number))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // === THRESHOLD KEYS ===

    pub fn store_threshold_key(
        &self,
        account_id: &str,
        device_number: u32,
        record: &ThresholdKeyRecord,
    ) -> Result<(), VaultError> {
        self.threshold_keys
            .insert(user_key(account_id, device_number), encode(record)?)?;
        Ok(())
    }

    pub fn get_threshold_key(
        &self,
        account_id: &str,
        device_number: u32,
    ) -> Result<Option<ThresholdKeyRecord>, VaultError> {
        match self
            .threshold_keys
            .get(user_key(account_id, device_number))?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // === REGISTRATION ATOMICITY ===

    /// Persist the complete registration state as a unit: user record,
    /// encrypted NEAR key and authenticator either all land or none do.
    pub fn atomic_store_registration_data(
        &self,
        user: &UserRecord,
        near_key: &EncryptedNearKey,
        authenticator: &AuthenticatorRecord,
    ) -> Result<(), VaultError> {
        let user_bytes = encode(user)?;
        let key_bytes = encode(near_key)?;
        let auth_bytes = encode(authenticator)?;
        let user_db_key = user_key(&user.account_id, user.device_number);
        let auth_db_key = authenticator_key(&authenticator.account_id, &authenticator.credential_id);

        (&self.users, &self.near_keys, &self.authenticators)
            .transaction(|(users, near_keys, authenticators)| {
                users.insert(user_db_key.as_bytes(), user_bytes.clone())?;
                near_keys.insert(user_db_key.as_bytes(), key_bytes.clone())?;
                authenticators.insert(auth_db_key.as_bytes(), auth_bytes.clone())?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| VaultError::Storage(format!("registration transaction failed: {:?}", e)))?;

        self.set_last_user(&user.account_id, user.device_number)
    }

    /// Remove the rows created for one device: user record, encrypted NEAR
    /// key, threshold key and (optionally) the authenticator. Used by flow
    /// cleanup paths that must not touch other devices of the account.
    pub fn delete_device_rows(
        &self,
        account_id: &str,
        device_number: u32,
        credential_id: Option<&str>,
    ) -> Result<(), VaultError> {
        let key = user_key(account_id, device_number);
        self.users.remove(&*key)?;
        self.near_keys.remove(&*key)?;
        self.threshold_keys.remove(&*key)?;
        if let Some(credential_id) = credential_id {
            self.authenticators
                .remove(authenticator_key(account_id, credential_id))?;
        }
        Ok(())
    }

    /// Destructive-forward rollback: prune every local row for the account.
    /// Chain-side writes are never reverted.
    pub fn rollback_user_registration(&self, account_id: &str) -> Result<(), VaultError> {
        let prefix = format!("{}#", account_id);
        for tree in [
            &self.users,
            &self.near_keys,
            &self.threshold_keys,
            &self.authenticators,
            &self.pending_recovery,
        ] {
            let keys: Vec<_> = tree
                .scan_prefix(&prefix)
                .filter_map(|entry| entry.ok().map(|(k, _)| k))
                .collect();
            for key in keys {
                tree.remove(key)?;
            }
        }
        if let Some(bytes) = self.app_state.get(LAST_USER_KEY)? {
            let (last_account, _): (String, u32) = decode(&bytes)?;
            if last_account == account_id {
                self.app_state.remove(LAST_USER_KEY)?;
            }
        }
        Ok(())
    }

    // === PENDING EMAIL RECOVERY ===

    fn pending_key(account_id: &str, near_public_key: &str) -> String {
        format!("{}#{}", account_id, near_public_key)
    }

    fn pending_pointer_key(account_id: &str) -> String {
        format!("pending_email_recovery#{}", account_id)
    }

    pub fn save_pending_recovery(&self, pending: &PendingEmailRecovery) -> Result<(), VaultError> {
        let row_key = Self::pending_key(&pending.account_id, &pending.near_public_key);
        self.pending_recovery.insert(&*row_key, encode(pending)?)?;
        self.app_state.insert(
            Self::pending_pointer_key(&pending.account_id),
            row_key.as_bytes(),
        )?;
        Ok(())
    }

    /// Load the pending record for an account. Records older than `ttl_ms`
    /// are expired: both the row and the per-account pointer are removed and
    /// `None` is returned.
    pub fn load_pending_recovery(
        &self,
        account_id: &str,
        now_ms: u64,
        ttl_ms: u64,
    ) -> Result<Option<PendingEmailRecovery>, VaultError> {
        let pointer_key = Self::pending_pointer_key(account_id);
        let Some(row_key) = self.app_state.get(&pointer_key)? else {
            return Ok(None);
        };
        let Some(bytes) = self.pending_recovery.get(&row_key)? else {
            self.app_state.remove(&pointer_key)?;
            return Ok(None);
        };
        let pending: PendingEmailRecovery = decode(&bytes)?;
        if now_ms.saturating_sub(pending.created_at_ms) > ttl_ms {
            self.pending_recovery.remove(&row_key)?;
            self.app_state.remove(&pointer_key)?;
            return Ok(None);
        }
        Ok(Some(pending))
    }

    pub fn clear_pending_recovery(&self, account_id: &str) -> Result<(), VaultError> {
        let pointer_key = Self::pending_pointer_key(account_id);
        if let Some(row_key) = self.app_state.get(&pointer_key)? {
            self.pending_recovery.remove(&row_key)?;
        }
        self.app_state.remove(&pointer_key)?;
        Ok(())
    }

    // === APP STATE / DERIVED ADDRESSES ===

    pub fn put_app_state(&self, key: &str, value: &serde_json::Value) -> Result<(), VaultError> {
        if let Some(field) = find_forbidden_secret(value) {
            return Err(VaultError::ForbiddenSecretField(field));
        }
        self.app_state.insert(
            key,
            serde_json::to_vec(value).map_err(|e| VaultError::Serialization(e.to_string()))?,
        )?;
        Ok(())
    }

    pub fn get_app_state(&self, key: &str) -> Result<Option<serde_json::Value>, VaultError> {
        match self.app_state.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_derived_address(
        &self,
        account_id: &str,
        contract_id: &str,
        path: &str,
        address: &str,
    ) -> Result<(), VaultError> {
        self.derived_addresses.insert(
            format!("{}#{}#{}", account_id, contract_id, path),
            address.as_bytes(),
        )?;
        Ok(())
    }

    pub fn get_derived_address(
        &self,
        account_id: &str,
        contract_id: &str,
        path: &str,
    ) -> Result<Option<String>, VaultError> {
        Ok(self
            .derived_addresses
            .get(format!("{}#{}#{}", account_id, contract_id, path))?
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string()))
    }

    /// Map of device number to user record for an account.
    pub fn users_by_device(&self, account_id: &str) -> Result<BTreeMap<u32, UserRecord>, VaultError> {
        Ok(self
            .list_users(account_id)?
            .into_iter()
            .map(|u| (u.device_number, u))
            .collect())
    }
}
