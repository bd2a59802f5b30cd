//! VRF challenge and encrypted-keypair types, plus the contract wire form.

use serde::{Deserialize, Serialize};

use crate::encoders::base64_url_decode;

/// Inputs to VRF challenge generation. `block_hash` is the base58 hash of a
/// recent final block; the optional digests bind the challenge to the exact
/// message being authorized.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VrfInputData {
    pub user_id: String,
    pub rp_id: String,
    pub block_height: u64,
    pub block_hash: String,
    /// base64url-encoded 32-byte digest; when present, must decode to
    /// exactly 32 bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_digest: Option<String>,
    /// base64url-encoded 32-byte digest binding a relayer session policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_policy_digest_32: Option<String>,
}

/// A generated VRF challenge. Byte fields are base64url strings client-side;
/// [`VrfData`] is the `number[]` wire form.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VrfChallenge {
    pub vrf_input: String,
    pub vrf_output: String,
    pub vrf_proof: String,
    pub vrf_public_key: String,
    pub user_id: String,
    pub rp_id: String,
    pub block_height: u64,
    pub block_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_policy_digest_32: Option<String>,
}

/// VRF keypair ciphertext under a PRF-derived AEAD key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedVrfKeypair {
    pub encrypted_vrf_data_b64u: String,
    pub chacha20_nonce_b64u: String,
}

/// Shamir 3-pass form of the VRF keypair: the AEAD blob is locked under a
/// KEK whose server-locked form `KEK_s` is stored beside it, together with
/// the server key epoch that produced it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerEncryptedVrfKeypair {
    pub ciphertext_blob_b64u: String,
    pub kek_s_b64u: String,
    pub server_key_id: String,
}

/// Plaintext container that gets AEAD-encrypted: the bincode-serialized VRF
/// keypair plus its public key for convenience.
#[derive(Serialize, Deserialize)]
pub struct VrfKeypairData {
    pub keypair_bytes: Vec<u8>,
    pub public_key_base64: String,
}

/// Contract wire form of a VRF challenge. All byte fields serialize as
/// `number[]` in JSON.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VrfData {
    pub vrf_input_data: Vec<u8>,
    pub vrf_output: Vec<u8>,
    pub vrf_proof: Vec<u8>,
    pub public_key: Vec<u8>,
    pub user_id: String,
    pub rp_id: String,
    pub block_height: u64,
    pub block_hash: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_digest_32: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_policy_digest_32: Option<Vec<u8>>,
}

impl TryFrom<&VrfChallenge> for VrfData {
    type Error = String;

    fn try_from(challenge: &VrfChallenge) -> Result<Self, Self::Error> {
        Ok(VrfData {
            vrf_input_data: base64_url_decode(&challenge.vrf_input)
                .map_err(|e| format!("Failed to decode VRF input: {}", e))?,
            vrf_output: base64_url_decode(&challenge.vrf_output)
                .map_err(|e| format!("Failed to decode VRF output: {}", e))?,
            vrf_proof: base64_url_decode(&challenge.vrf_proof)
                .map_err(|e| format!("Failed to decode VRF proof: {}", e))?,
            public_key: base64_url_decode(&challenge.vrf_public_key)
                .map_err(|e| format!("Failed to decode VRF public key: {}", e))?,
            user_id: challenge.user_id.clone(),
            rp_id: challenge.rp_id.clone(),
            block_height: challenge.block_height,
            block_hash: bs58::decode(&challenge.block_hash)
                .into_vec()
                .map_err(|e| format!("Failed to decode block hash: {}", e))?,
            intent_digest_32: decode_digest_32(challenge.intent_digest.as_deref(), "intentDigest")?,
            session_policy_digest_32: decode_digest_32(
                challenge.session_policy_digest_32.as_deref(),
                "sessionPolicyDigest32",
            )?,
        })
    }
}

fn decode_digest_32(b64u: Option<&str>, label: &str) -> Result<Option<Vec<u8>>, String> {
    match b64u {
        Some(s) if !s.trim().is_empty() => {
            let bytes = base64_url_decode(s.trim())
                .map_err(|e| format!("Failed to decode {} (base64url): {}", label, e))?;
            if bytes.len() != 32 {
                return Err(format!(
                    "Invalid {} length: expected 32 bytes, got {}",
                    label,
                    bytes.len()
                ));
            }
            Ok(Some(bytes))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::base64_url_encode;

    fn sample_challenge() -> VrfChallenge {
        VrfChallenge {
            vrf_input: base64_url_encode(&[1u8; 32]),
            vrf_output: base64_url_encode(&[2u8; 64]),
            vrf_proof: base64_url_encode(&[3u8; 80]),
            vrf_public_key: base64_url_encode(&[4u8; 32]),
            user_id: "alice.near".to_string(),
            rp_id: "example.com".to_string(),
            block_height: 12345,
            block_hash: bs58::encode([9u8; 32]).into_string(),
            intent_digest: Some(base64_url_encode(&[7u8; 32])),
            session_policy_digest_32: None,
        }
    }

    #[test]
    fn wire_conversion_produces_number_arrays() {
        let data = VrfData::try_from(&sample_challenge()).unwrap();
        let json = serde_json::to_value(&data).unwrap();
        assert!(json["vrf_input_data"].is_array());
        assert_eq!(json["block_height"], 12345);
        assert_eq!(json["intent_digest_32"].as_array().unwrap().len(), 32);
    }

    #[test]
    fn wire_conversion_rejects_short_intent_digest() {
        let mut challenge = sample_challenge();
        challenge.intent_digest = Some(base64_url_encode(&[7u8; 16]));
        assert!(VrfData::try_from(&challenge).is_err());
    }
}
