//! Chain-side types: accounts, keys, actions, transactions. Borsh layouts
//! mirror the host chain's canonical serialization.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// === CORE TYPES ===

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    pub const MIN_LEN: usize = 2;
    pub const MAX_LEN: usize = 64;

    /// Validate against host-chain naming rules: lowercase alphanumeric
    /// segments separated by single `.`, `_` or `-`, length 2..=64.
    pub fn new(account_id: String) -> Result<Self, String> {
        if account_id.len() < Self::MIN_LEN || account_id.len() > Self::MAX_LEN {
            return Err(format!(
                "Account ID must be {}..={} characters, got {}",
                Self::MIN_LEN,
                Self::MAX_LEN,
                account_id.len()
            ));
        }
        let bytes = account_id.as_bytes();
        let mut prev_separator = true; // leading separator is invalid
        for &b in bytes {
            match b {
                b'a'..=b'z' | b'0'..=b'9' => prev_separator = false,
                b'.' | b'_' | b'-' => {
                    if prev_separator {
                        return Err(format!("Invalid account ID: {}", account_id));
                    }
                    prev_separator = true;
                }
                _ => return Err(format!("Invalid character in account ID: {}", account_id)),
            }
        }
        if prev_separator {
            return Err(format!("Invalid account ID: {}", account_id));
        }
        Ok(AccountId(account_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for AccountId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountId::new(s.to_string())
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    pub key_type: u8, // 0 for ED25519
    #[serde(with = "serde_array_32")]
    pub key_data: [u8; 32],
}

impl PublicKey {
    pub fn from_ed25519_bytes(bytes: &[u8; 32]) -> Self {
        PublicKey {
            key_type: 0,
            key_data: *bytes,
        }
    }

    /// Parse a NEAR-format public key (`ed25519:<base58>` or bare base58).
    pub fn from_near_format(public_key: &str) -> Result<Self, String> {
        let payload = public_key.strip_prefix("ed25519:").unwrap_or(public_key);
        let bytes = bs58::decode(payload.trim())
            .into_vec()
            .map_err(|e| format!("Failed to decode public key: {}", e))?;
        if bytes.len() != 32 {
            return Err(format!(
                "Public key must be 32 bytes, got {}",
                bytes.len()
            ));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(PublicKey::from_ed25519_bytes(&arr))
    }

    pub fn to_near_format(&self) -> String {
        format!("ed25519:{}", bs58::encode(&self.key_data).into_string())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.key_data.to_vec()
    }
}

/// Normalize a public key string to `ed25519:<base58>`. Idempotent; rejects
/// payloads that do not decode to exactly 32 bytes.
pub fn ensure_ed25519_prefix(public_key: &str) -> Result<String, String> {
    Ok(PublicKey::from_near_format(public_key)?.to_near_format())
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub key_type: u8, // 0 for ED25519
    #[serde(with = "serde_array_64")]
    pub signature_data: [u8; 64],
}

impl Signature {
    pub fn from_ed25519_bytes(bytes: &[u8; 64]) -> Self {
        Signature {
            key_type: 0,
            signature_data: *bytes,
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.signature_data.to_vec()
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoHash(#[serde(with = "serde_array_32")] pub [u8; 32]);

impl CryptoHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        CryptoHash(bytes)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

pub type Nonce = u64;
pub type Gas = u64;
pub type Balance = u128;

// JSON has no native 128-bit integers: Balance serializes as a decimal string
// and deserializes from either a string or a non-negative number.
pub(crate) mod serde_balance_as_dec_str {
    use super::Balance;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(value: &Balance, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Balance, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = Balance;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a non-negative u128 as string or number")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(v as Balance)
            }

            fn visit_u128<E: serde::de::Error>(self, v: u128) -> Result<Self::Value, E> {
                Ok(v)
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                if v < 0 {
                    return Err(E::custom("negative values are not allowed for Balance"));
                }
                Ok(v as u128)
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse::<Balance>().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

mod serde_option_balance_as_dec_str {
    use super::Balance;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Balance>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => super::serde_balance_as_dec_str::serialize(v, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Balance>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super::serde_balance_as_dec_str")] Balance);
        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
    }
}

// === ACCESS KEYS ===

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKey {
    pub nonce: Nonce,
    pub permission: AccessKeyPermission,
}

impl AccessKey {
    pub fn full_access() -> Self {
        AccessKey {
            nonce: 0,
            permission: AccessKeyPermission::FullAccess,
        }
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessKeyPermission {
    FunctionCall(FunctionCallPermission),
    FullAccess,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallPermission {
    #[serde(with = "serde_option_balance_as_dec_str", default)]
    pub allowance: Option<Balance>,
    pub receiver_id: String,
    pub method_names: Vec<String>,
}

// === ACTIONS ===

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallAction {
    pub method_name: String,
    pub args: Vec<u8>,
    pub gas: Gas,
    #[serde(with = "serde_balance_as_dec_str")]
    pub deposit: Balance,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    CreateAccount,
    DeployContract {
        code: Vec<u8>,
    },
    FunctionCall(Box<FunctionCallAction>),
    Transfer {
        #[serde(with = "serde_balance_as_dec_str")]
        deposit: Balance,
    },
    Stake {
        #[serde(with = "serde_balance_as_dec_str")]
        stake: Balance,
        public_key: PublicKey,
    },
    AddKey {
        public_key: PublicKey,
        access_key: AccessKey,
    },
    DeleteKey {
        public_key: PublicKey,
    },
    DeleteAccount {
        beneficiary_id: AccountId,
    },
    SignedDelegate(Box<SignedDelegate>),
}

// === TRANSACTIONS ===

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub signer_id: AccountId,
    pub public_key: PublicKey,
    pub nonce: Nonce,
    pub receiver_id: AccountId,
    pub block_hash: CryptoHash,
    pub actions: Vec<Action>,
}

impl Transaction {
    /// Signing digest: `sha256(borsh(Transaction))`, plus the serialized size.
    pub fn get_hash_and_size(&self) -> (CryptoHash, u64) {
        let bytes = borsh::to_vec(&self).expect("Transaction is borsh-serializable");
        let digest = Sha256::digest(&bytes);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        (CryptoHash::from_bytes(hash), bytes.len() as u64)
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: Signature,
}

impl SignedTransaction {
    pub fn new(signature: Signature, transaction: Transaction) -> Self {
        SignedTransaction {
            transaction,
            signature,
        }
    }

    pub fn to_borsh_bytes(&self) -> Result<Vec<u8>, String> {
        borsh::to_vec(self).map_err(|e| format!("Failed to serialize to borsh: {}", e))
    }

    pub fn from_borsh_bytes(bytes: &[u8]) -> Result<Self, String> {
        borsh::from_slice(bytes).map_err(|e| format!("Failed to deserialize from borsh: {}", e))
    }
}

// === DELEGATE ACTIONS (NEP-461) ===

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateAction {
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub actions: Vec<Action>,
    pub nonce: Nonce,
    pub max_block_height: u64,
    pub public_key: PublicKey,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedDelegate {
    pub delegate_action: DelegateAction,
    pub signature: Signature,
}

impl SignedDelegate {
    pub fn to_borsh_bytes(&self) -> Result<Vec<u8>, String> {
        borsh::to_vec(self).map_err(|e| format!("Failed to serialize signed delegate: {}", e))
    }
}

// === FIXED-ARRAY SERDE HELPERS ===

pub(crate) mod serde_array_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(value.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let vec = Vec::<u8>::deserialize(deserializer)?;
        vec.try_into()
            .map_err(|v: Vec<u8>| serde::de::Error::custom(format!("expected 32 bytes, got {}", v.len())))
    }
}

pub(crate) mod serde_array_64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(value.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 64], D::Error> {
        let vec = Vec::<u8>::deserialize(deserializer)?;
        vec.try_into()
            .map_err(|v: Vec<u8>| serde::de::Error::custom(format!("expected 64 bytes, got {}", v.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_validation() {
        assert!(AccountId::new("alice.near".to_string()).is_ok());
        assert!(AccountId::new("sub_account-1.testnet".to_string()).is_ok());
        assert!(AccountId::new("a".to_string()).is_err());
        assert!(AccountId::new("Alice.near".to_string()).is_err());
        assert!(AccountId::new(".near".to_string()).is_err());
        assert!(AccountId::new("alice.".to_string()).is_err());
        assert!(AccountId::new("alice..near".to_string()).is_err());
        assert!(AccountId::new("a".repeat(65)).is_err());
    }

    #[test]
    fn ensure_ed25519_prefix_is_idempotent() {
        let bare = bs58::encode([1u8; 32]).into_string();
        let once = ensure_ed25519_prefix(&bare).unwrap();
        let twice = ensure_ed25519_prefix(&once).unwrap();
        assert_eq!(once, twice);
        assert!(once.starts_with("ed25519:"));
    }

    #[test]
    fn ensure_ed25519_prefix_rejects_wrong_length() {
        let short = bs58::encode([1u8; 16]).into_string();
        assert!(ensure_ed25519_prefix(&short).is_err());
        assert!(ensure_ed25519_prefix(&format!("ed25519:{}", short)).is_err());
    }

    #[test]
    fn signed_transaction_borsh_round_trip() {
        let tx = Transaction {
            signer_id: "alice.near".parse().unwrap(),
            public_key: PublicKey::from_ed25519_bytes(&[2u8; 32]),
            nonce: 7,
            receiver_id: "bob.near".parse().unwrap(),
            block_hash: CryptoHash::from_bytes([9u8; 32]),
            actions: vec![Action::Transfer {
                deposit: 1_000_000_000_000_000_000_000_000,
            }],
        };
        let signed = SignedTransaction::new(Signature::from_ed25519_bytes(&[5u8; 64]), tx);
        let bytes = signed.to_borsh_bytes().unwrap();
        let restored = SignedTransaction::from_borsh_bytes(&bytes).unwrap();
        assert_eq!(signed, restored);
    }

    #[test]
    fn transaction_hash_changes_with_nonce() {
        let mut tx = Transaction {
            signer_id: "alice.near".parse().unwrap(),
            public_key: PublicKey::from_ed25519_bytes(&[2u8; 32]),
            nonce: 1,
            receiver_id: "bob.near".parse().unwrap(),
            block_hash: CryptoHash::from_bytes([0u8; 32]),
            actions: vec![Action::CreateAccount],
        };
        let (h1, _) = tx.get_hash_and_size();
        tx.nonce = 2;
        let (h2, _) = tx.get_hash_and_size();
        assert_ne!(h1, h2);
    }
}
