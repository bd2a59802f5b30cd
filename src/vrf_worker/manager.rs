//! VRF key manager: exclusive owner of the unlocked VRF keypair and the warm
//! signing session table. Lives inside the VRF worker actor; nothing here is
//! reachable without going through the worker's message channel.

use std::collections::{HashMap, HashSet};

use log::debug;
use rand_core::SeedableRng;
use vrf_wasm::ecvrf::ECVRFKeyPair;
use vrf_wasm::traits::WasmRngFromSeed;
use vrf_wasm::vrf::{VRFKeyPair, VRFProof};
use zeroize::ZeroizeOnDrop;

use crate::config::{
    CHACHA20_KEY_SIZE, DISPLAY_TRUNCATE_LENGTH, HKDF_VRF_AEAD_SALT, HKDF_VRF_SEED_SALT,
    VRF_DOMAIN_SEPARATOR, VRF_SEED_SIZE,
};
use crate::crypto::{aead_open, aead_seal, hkdf_sha256, sha256, WrapKey};
use crate::encoders::{base64_url_decode, base64_url_encode};
use crate::errors::{VrfResult, VrfWorkerError};
use crate::types::vrf::{EncryptedVrfKeypair, VrfChallenge, VrfInputData, VrfKeypairData};

/// VRF keypair wrapper with automatic memory zeroization.
#[derive(ZeroizeOnDrop)]
pub struct SecureVrfKeyPair {
    keypair: ECVRFKeyPair,
}

impl SecureVrfKeyPair {
    pub fn new(keypair: ECVRFKeyPair) -> Self {
        Self { keypair }
    }

    pub fn inner(&self) -> &ECVRFKeyPair {
        &self.keypair
    }
}

/// One warm signing session: the wrap key that unlocks the NEAR signing key,
/// plus TTL and remaining-use accounting.
pub struct VrfSessionData {
    pub account_id: String,
    pub wrap_key: WrapKey,
    pub created_at_ms: u64,
    pub expires_at_ms: Option<u64>,
    pub remaining_uses: Option<u32>,
}

impl VrfSessionData {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(deadline) if now_ms >= deadline)
    }
}

pub struct VrfKeyManager {
    pub vrf_keypair: Option<SecureVrfKeyPair>,
    /// Account the in-memory keypair is bound to. Bootstrap keypairs carry
    /// the account the registration is creating.
    pub active_account_id: Option<String>,
    pub session_active: bool,
    pub session_start_ms: u64,
    pub sessions: HashMap<String, VrfSessionData>,
    /// Challenge minted per signing session, consumed by the matching
    /// signing request.
    pub vrf_challenges: HashMap<String, VrfChallenge>,
    /// WebAuthn challenges already accepted for session minting; replays are
    /// rejected.
    used_webauthn_challenges: HashSet<String>,
    pub shamir: super::shamir3pass::Shamir3Pass,
}

impl VrfKeyManager {
    pub fn new(shamir_p_b64u: Option<&str>) -> Self {
        let shamir = match shamir_p_b64u {
            Some(p) => match super::shamir3pass::Shamir3Pass::new(p) {
                Ok(sp) => sp,
                Err(e) => {
                    log::warn!("Invalid Shamir prime ({e}), falling back to default");
                    super::shamir3pass::Shamir3Pass::new_default()
                }
            },
            None => super::shamir3pass::Shamir3Pass::new_default(),
        };
        Self {
            vrf_keypair: None,
            active_account_id: None,
            session_active: false,
            session_start_ms: 0,
            sessions: HashMap::new(),
            vrf_challenges: HashMap::new(),
            used_webauthn_challenges: HashSet::new(),
            shamir,
        }
    }

    // === KEYPAIR LIFECYCLE ===

    /// Generate a fresh random VRF keypair for registration bootstrap, hold
    /// it in memory, and return its public key (base64url of the bincode
    /// encoding).
    pub fn generate_bootstrap_keypair(&mut self, account_id: &str) -> VrfResult<String> {
        debug!("Generating bootstrap VRF keypair for {account_id}");
        self.vrf_keypair.take();

        let mut rng = WasmRngFromSeed::from_entropy();
        let keypair = ECVRFKeyPair::generate(&mut rng);
        let public_key = public_key_b64u(&keypair)?;

        self.vrf_keypair = Some(SecureVrfKeyPair::new(keypair));
        self.active_account_id = Some(account_id.to_string());
        self.session_active = true;
        Ok(public_key)
    }

    /// Deterministic VRF keypair from a PRF output:
    /// `vrf_seed = HKDF(prf_output, salt = "vrf-v1", info = account_id)`.
    pub fn derive_keypair_from_prf(
        &self,
        prf_output: &[u8],
        account_id: &str,
    ) -> VrfResult<ECVRFKeyPair> {
        if prf_output.is_empty() {
            return Err(VrfWorkerError::empty_prf_output());
        }
        let mut seed = [0u8; VRF_SEED_SIZE];
        hkdf_sha256(
            prf_output,
            Some(HKDF_VRF_SEED_SALT),
            account_id.as_bytes(),
            &mut seed,
        )
        .map_err(|_| VrfWorkerError::HkdfDerivationFailed)?;

        let mut rng = WasmRngFromSeed::from_seed(seed);
        Ok(ECVRFKeyPair::generate(&mut rng))
    }

    /// Encrypt a VRF keypair under the PRF-derived AEAD key:
    /// `aead_key = HKDF(prf_output, salt = "vrf-aead", info = account_id)`.
    pub fn encrypt_keypair(
        &self,
        keypair: &ECVRFKeyPair,
        prf_output: &[u8],
        account_id: &str,
    ) -> VrfResult<(String, EncryptedVrfKeypair)> {
        let public_key_base64 = public_key_b64u(keypair)?;
        let plaintext = self.serialize_keypair_data(keypair)?;

        let mut aead_key = [0u8; CHACHA20_KEY_SIZE];
        hkdf_sha256(
            prf_output,
            Some(HKDF_VRF_AEAD_SALT),
            account_id.as_bytes(),
            &mut aead_key,
        )
        .map_err(|_| VrfWorkerError::HkdfDerivationFailed)?;

        let (nonce, ciphertext) = aead_seal(&aead_key, &[], &plaintext)
            .map_err(VrfWorkerError::AeadEncryptionFailed)?;

        Ok((
            public_key_base64,
            EncryptedVrfKeypair {
                encrypted_vrf_data_b64u: base64_url_encode(&ciphertext),
                chacha20_nonce_b64u: base64_url_encode(&nonce),
            },
        ))
    }

    /// Decrypt and load a stored VRF keypair into memory. An AEAD auth-tag
    /// failure means the PRF output does not match the ciphertext.
    pub fn unlock_keypair(
        &mut self,
        account_id: &str,
        encrypted: &EncryptedVrfKeypair,
        prf_output: &[u8],
    ) -> VrfResult<()> {
        debug!("Unlocking VRF keypair for {account_id}");
        let mut aead_key = [0u8; CHACHA20_KEY_SIZE];
        hkdf_sha256(
            prf_output,
            Some(HKDF_VRF_AEAD_SALT),
            account_id.as_bytes(),
            &mut aead_key,
        )
        .map_err(|_| VrfWorkerError::HkdfDerivationFailed)?;

        let ciphertext = base64_url_decode(&encrypted.encrypted_vrf_data_b64u)
            .map_err(VrfWorkerError::Serialization)?;
        let nonce = base64_url_decode(&encrypted.chacha20_nonce_b64u)
            .map_err(VrfWorkerError::Serialization)?;
        if nonce.len() != crate::config::CHACHA20_NONCE_SIZE {
            return Err(VrfWorkerError::InvalidNonceLength {
                expected: crate::config::CHACHA20_NONCE_SIZE,
                actual: nonce.len(),
            });
        }

        let plaintext = aead_open(&aead_key, &nonce, &[], &ciphertext)
            .map_err(VrfWorkerError::AeadDecryptionFailed)?;

        let keypair = self.deserialize_keypair_data(&plaintext)?;
        self.load_keypair(keypair, account_id);
        Ok(())
    }

    /// Load an already-plaintext keypair (Shamir unlock, deterministic
    /// recovery) into memory.
    pub fn load_keypair(&mut self, keypair: ECVRFKeyPair, account_id: &str) {
        self.vrf_keypair.take();
        self.vrf_keypair = Some(SecureVrfKeyPair::new(keypair));
        self.active_account_id = Some(account_id.to_string());
        self.session_active = true;
    }

    pub fn set_session_start(&mut self, now_ms: u64) {
        self.session_start_ms = now_ms;
    }

    /// Serialize the in-memory keypair for Shamir registration-side
    /// encryption.
    pub fn serialize_current_keypair(&self) -> VrfResult<Vec<u8>> {
        let keypair = self.require_keypair()?;
        self.serialize_keypair_data(keypair.inner())
    }

    pub fn current_public_key_b64u(&self) -> VrfResult<String> {
        public_key_b64u(self.require_keypair()?.inner())
    }

    pub fn deserialize_keypair_data(&self, plaintext: &[u8]) -> VrfResult<ECVRFKeyPair> {
        let data: VrfKeypairData = bincode::deserialize(plaintext)
            .map_err(|e| VrfWorkerError::Serialization(e.to_string()))?;
        bincode::deserialize(&data.keypair_bytes)
            .map_err(|e| VrfWorkerError::Serialization(e.to_string()))
    }

    fn serialize_keypair_data(&self, keypair: &ECVRFKeyPair) -> VrfResult<Vec<u8>> {
        let keypair_bytes = bincode::serialize(keypair)
            .map_err(|e| VrfWorkerError::Serialization(e.to_string()))?;
        let data = VrfKeypairData {
            public_key_base64: public_key_b64u(keypair)?,
            keypair_bytes,
        };
        bincode::serialize(&data).map_err(|e| VrfWorkerError::Serialization(e.to_string()))
    }

    fn require_keypair(&self) -> VrfResult<&SecureVrfKeyPair> {
        if !self.session_active {
            return Err(VrfWorkerError::VrfNotUnlocked);
        }
        self.vrf_keypair.as_ref().ok_or(VrfWorkerError::NoVrfKeypair)
    }

    // === CHALLENGES ===

    /// Generate a VRF challenge with the in-memory keypair. The input's
    /// `user_id` must match the account the keypair is bound to.
    pub fn generate_challenge(&self, input: &VrfInputData) -> VrfResult<VrfChallenge> {
        let keypair = self.require_keypair()?;
        if let Some(active) = &self.active_account_id {
            if active != &input.user_id {
                return Err(VrfWorkerError::CredentialAccountMismatch {
                    expected: input.user_id.clone(),
                    actual: active.clone(),
                });
            }
        }
        self.generate_challenge_with_keypair(keypair.inner(), input)
    }

    /// Generate a VRF challenge with an explicit keypair.
    ///
    /// `vrf_input = sha256(domain_sep || user_id || rp_id || block_height_le
    /// || block_hash || intent_digest_32 [|| session_policy_digest_32])`.
    pub fn generate_challenge_with_keypair(
        &self,
        keypair: &ECVRFKeyPair,
        input: &VrfInputData,
    ) -> VrfResult<VrfChallenge> {
        let block_hash_bytes = bs58::decode(&input.block_hash)
            .into_vec()
            .map_err(|e| VrfWorkerError::Serialization(format!("invalid blockHash: {}", e)))?;

        let mut vrf_input_data = Vec::new();
        vrf_input_data.extend_from_slice(VRF_DOMAIN_SEPARATOR);
        vrf_input_data.extend_from_slice(input.user_id.as_bytes());
        vrf_input_data.extend_from_slice(input.rp_id.as_bytes());
        vrf_input_data.extend_from_slice(&input.block_height.to_le_bytes());
        vrf_input_data.extend_from_slice(&block_hash_bytes);
        if let Some(digest) = decode_digest(&input.intent_digest, "intentDigest")? {
            vrf_input_data.extend_from_slice(&digest);
        }
        if let Some(digest) = decode_digest(&input.session_policy_digest_32, "sessionPolicyDigest32")?
        {
            vrf_input_data.extend_from_slice(&digest);
        }

        let vrf_input = sha256(&vrf_input_data);
        let proof = keypair.prove(&vrf_input);
        let vrf_output = proof.to_hash().to_vec();

        let proof_bytes = bincode::serialize(&proof)
            .map_err(|e| VrfWorkerError::Serialization(e.to_string()))?;
        let pk_bytes = bincode::serialize(&keypair.pk)
            .map_err(|e| VrfWorkerError::Serialization(e.to_string()))?;

        Ok(VrfChallenge {
            vrf_input: base64_url_encode(&vrf_input),
            vrf_output: base64_url_encode(&vrf_output),
            vrf_proof: base64_url_encode(&proof_bytes),
            vrf_public_key: base64_url_encode(&pk_bytes),
            user_id: input.user_id.clone(),
            rp_id: input.rp_id.clone(),
            block_height: input.block_height,
            block_hash: input.block_hash.clone(),
            intent_digest: input.intent_digest.clone(),
            session_policy_digest_32: input.session_policy_digest_32.clone(),
        })
    }

    // === WARM SIGNING SESSIONS ===

    pub fn upsert_session(&mut self, session_id: &str, session: VrfSessionData) {
        self.sessions.insert(session_id.to_string(), session);
    }

    /// Record a WebAuthn challenge as consumed; a second appearance is a
    /// replay.
    pub fn consume_webauthn_challenge(&mut self, session_id: &str, challenge: &str) -> VrfResult<()> {
        if !self.used_webauthn_challenges.insert(challenge.to_string()) {
            return Err(VrfWorkerError::StaleChallenge(session_id.to_string()));
        }
        Ok(())
    }

    /// Consume `uses` from a session's budget and return its wrap key for
    /// delivery to the signer worker. Expired or exhausted sessions are
    /// removed. A session is only dispensable while the VRF keypair for its
    /// account is unlocked.
    pub fn dispense_session_key(
        &mut self,
        session_id: &str,
        uses: u32,
        now_ms: u64,
    ) -> VrfResult<WrapKey> {
        let session_account = self
            .sessions
            .get(session_id)
            .map(|s| s.account_id.clone())
            .ok_or_else(|| VrfWorkerError::SessionNotFound(session_id.to_string()))?;
        if !self.session_active || self.active_account_id.as_deref() != Some(session_account.as_str())
        {
            return Err(VrfWorkerError::VrfNotUnlocked);
        }

        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| VrfWorkerError::SessionNotFound(session_id.to_string()))?;

        if session.is_expired(now_ms) {
            self.sessions.remove(session_id);
            return Err(VrfWorkerError::SessionExpired);
        }

        if let Some(remaining) = session.remaining_uses {
            if remaining == 0 {
                self.sessions.remove(session_id);
                return Err(VrfWorkerError::SessionExhausted);
            }
            session.remaining_uses = Some(remaining.saturating_sub(uses));
        }

        Ok(session.wrap_key.clone())
    }

    pub fn session_account(&self, session_id: &str) -> Option<&str> {
        self.sessions
            .get(session_id)
            .map(|s| s.account_id.as_str())
    }

    // === STATUS / TEARDOWN ===

    pub fn status(&self, now_ms: u64) -> VrfStatus {
        VrfStatus {
            active: self.session_active,
            account_id: self.active_account_id.clone(),
            session_duration_ms: if self.session_active {
                now_ms.saturating_sub(self.session_start_ms)
            } else {
                0
            },
        }
    }

    /// Erase the keypair and all warm sessions.
    pub fn logout(&mut self) {
        if self.vrf_keypair.take().is_some() {
            debug!("VRF keypair cleared with zeroization");
        }
        self.active_account_id = None;
        self.session_active = false;
        self.session_start_ms = 0;
        self.sessions.clear();
        self.vrf_challenges.clear();
        self.used_webauthn_challenges.clear();
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VrfStatus {
    pub active: bool,
    pub account_id: Option<String>,
    pub session_duration_ms: u64,
}

fn public_key_b64u(keypair: &ECVRFKeyPair) -> VrfResult<String> {
    let pk_bytes = bincode::serialize(&keypair.pk)
        .map_err(|e| VrfWorkerError::Serialization(e.to_string()))?;
    Ok(base64_url_encode(&pk_bytes))
}

fn decode_digest(b64u: &Option<String>, label: &str) -> VrfResult<Option<Vec<u8>>> {
    match b64u.as_deref() {
        Some(s) if !s.trim().is_empty() => {
            let bytes = base64_url_decode(s.trim()).map_err(VrfWorkerError::Serialization)?;
            if bytes.len() != 32 {
                return Err(VrfWorkerError::Serialization(format!(
                    "Invalid {} length: expected 32 bytes, got {}",
                    label,
                    bytes.len()
                )));
            }
            Ok(Some(bytes))
        }
        _ => Ok(None),
    }
}

/// Log-safe truncation of key material identifiers.
pub fn truncate_for_log(value: &str) -> &str {
    &value[..DISPLAY_TRUNCATE_LENGTH.min(value.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::base64_url_encode;

    fn test_prf() -> Vec<u8> {
        (0..32).map(|i| (i as u8).wrapping_add(42)).collect()
    }

    fn test_input(account: &str) -> VrfInputData {
        VrfInputData {
            user_id: account.to_string(),
            rp_id: "example.com".to_string(),
            block_height: 12345,
            block_hash: bs58::encode([0u8; 32]).into_string(),
            intent_digest: Some(base64_url_encode(
                &(0u8..32).collect::<Vec<u8>>(),
            )),
            session_policy_digest_32: None,
        }
    }

    fn test_wrap_key() -> WrapKey {
        WrapKey::derive(&[7u8; 32], &base64_url_encode(&[1u8; 32])).unwrap()
    }

    #[test]
    fn deterministic_derivation_yields_stable_public_key() {
        let mgr = VrfKeyManager::new(None);
        let kp1 = mgr.derive_keypair_from_prf(&test_prf(), "alice.near").unwrap();
        let kp2 = mgr.derive_keypair_from_prf(&test_prf(), "alice.near").unwrap();
        assert_eq!(
            bincode::serialize(&kp1.pk).unwrap(),
            bincode::serialize(&kp2.pk).unwrap()
        );

        let other = mgr.derive_keypair_from_prf(&test_prf(), "bob.near").unwrap();
        assert_ne!(
            bincode::serialize(&kp1.pk).unwrap(),
            bincode::serialize(&other.pk).unwrap()
        );
    }

    #[test]
    fn encrypt_then_unlock_restores_the_same_keypair() {
        let mut mgr = VrfKeyManager::new(None);
        let prf = test_prf();
        let keypair = mgr.derive_keypair_from_prf(&prf, "alice.near").unwrap();
        let expected_pk = bincode::serialize(&keypair.pk).unwrap();

        let (pk_b64u, encrypted) = mgr.encrypt_keypair(&keypair, &prf, "alice.near").unwrap();
        assert_eq!(pk_b64u, base64_url_encode(&expected_pk));

        mgr.unlock_keypair("alice.near", &encrypted, &prf).unwrap();
        assert_eq!(mgr.current_public_key_b64u().unwrap(), pk_b64u);
    }

    #[test]
    fn ciphertexts_differ_but_decrypt_to_same_keypair() {
        let mgr = VrfKeyManager::new(None);
        let prf = test_prf();
        let keypair = mgr.derive_keypair_from_prf(&prf, "alice.near").unwrap();
        let (_, enc1) = mgr.encrypt_keypair(&keypair, &prf, "alice.near").unwrap();
        let (_, enc2) = mgr.encrypt_keypair(&keypair, &prf, "alice.near").unwrap();
        assert_ne!(enc1.encrypted_vrf_data_b64u, enc2.encrypted_vrf_data_b64u);
        assert_ne!(enc1.chacha20_nonce_b64u, enc2.chacha20_nonce_b64u);
    }

    #[test]
    fn unlock_with_wrong_prf_fails_with_bad_prf() {
        let mut mgr = VrfKeyManager::new(None);
        let prf = test_prf();
        let keypair = mgr.derive_keypair_from_prf(&prf, "alice.near").unwrap();
        let (_, encrypted) = mgr.encrypt_keypair(&keypair, &prf, "alice.near").unwrap();

        let wrong_prf = vec![0u8; 32];
        let err = mgr
            .unlock_keypair("alice.near", &encrypted, &wrong_prf)
            .unwrap_err();
        assert!(matches!(err, VrfWorkerError::AeadDecryptionFailed(_)));
        assert!(!mgr.session_active);
    }

    #[test]
    fn challenge_generation_requires_matching_account() {
        let mut mgr = VrfKeyManager::new(None);
        let prf = test_prf();
        let keypair = mgr.derive_keypair_from_prf(&prf, "alice.near").unwrap();
        mgr.load_keypair(keypair, "alice.near");

        assert!(mgr.generate_challenge(&test_input("alice.near")).is_ok());
        let err = mgr.generate_challenge(&test_input("mallory.near")).unwrap_err();
        assert!(matches!(err, VrfWorkerError::CredentialAccountMismatch { .. }));
    }

    #[test]
    fn challenge_binds_intent_digest_into_vrf_input() {
        let mut mgr = VrfKeyManager::new(None);
        let prf = test_prf();
        let keypair = mgr.derive_keypair_from_prf(&prf, "alice.near").unwrap();
        mgr.load_keypair(keypair, "alice.near");

        let with_digest = mgr.generate_challenge(&test_input("alice.near")).unwrap();
        let mut input = test_input("alice.near");
        input.intent_digest = None;
        let without_digest = mgr.generate_challenge(&input).unwrap();
        assert_ne!(with_digest.vrf_input, without_digest.vrf_input);
        assert_ne!(with_digest.vrf_output, without_digest.vrf_output);
    }

    #[test]
    fn challenge_public_key_matches_unlocked_keypair() {
        let mut mgr = VrfKeyManager::new(None);
        let prf = test_prf();
        let keypair = mgr.derive_keypair_from_prf(&prf, "alice.near").unwrap();
        mgr.load_keypair(keypair, "alice.near");

        let challenge = mgr.generate_challenge(&test_input("alice.near")).unwrap();
        assert_eq!(
            challenge.vrf_public_key,
            mgr.current_public_key_b64u().unwrap()
        );
    }

    fn manager_with_active_account(account_id: &str) -> VrfKeyManager {
        let mut mgr = VrfKeyManager::new(None);
        let keypair = mgr.derive_keypair_from_prf(&test_prf(), account_id).unwrap();
        mgr.load_keypair(keypair, account_id);
        mgr
    }

    #[test]
    fn session_ttl_is_enforced_on_dispense() {
        let mut mgr = manager_with_active_account("alice.near");
        mgr.upsert_session(
            "sess-ttl",
            VrfSessionData {
                account_id: "alice.near".to_string(),
                wrap_key: test_wrap_key(),
                created_at_ms: 0,
                expires_at_ms: Some(100),
                remaining_uses: Some(5),
            },
        );

        let res = mgr.dispense_session_key("sess-ttl", 1, 100);
        assert!(matches!(res, Err(VrfWorkerError::SessionExpired)));
        assert!(mgr.sessions.get("sess-ttl").is_none());
    }

    #[test]
    fn dispense_requires_an_unlocked_vrf_keypair_for_the_account() {
        let mut mgr = VrfKeyManager::new(None);
        mgr.upsert_session(
            "sess-locked",
            VrfSessionData {
                account_id: "alice.near".to_string(),
                wrap_key: test_wrap_key(),
                created_at_ms: 0,
                expires_at_ms: None,
                remaining_uses: Some(5),
            },
        );
        let res = mgr.dispense_session_key("sess-locked", 1, 0);
        assert!(matches!(res, Err(VrfWorkerError::VrfNotUnlocked)));
    }

    #[test]
    fn session_remaining_uses_are_enforced_on_dispense() {
        let mut mgr = manager_with_active_account("alice.near");
        mgr.upsert_session(
            "sess-uses",
            VrfSessionData {
                account_id: "alice.near".to_string(),
                wrap_key: test_wrap_key(),
                created_at_ms: 0,
                expires_at_ms: Some(1_000_000),
                remaining_uses: Some(1),
            },
        );

        // First dispense consumes the last use but succeeds.
        assert!(mgr.dispense_session_key("sess-uses", 1, 0).is_ok());
        assert_eq!(
            mgr.sessions.get("sess-uses").unwrap().remaining_uses,
            Some(0)
        );

        // Second dispense fails and clears the session.
        let res = mgr.dispense_session_key("sess-uses", 1, 0);
        assert!(matches!(res, Err(VrfWorkerError::SessionExhausted)));
        assert!(mgr.sessions.get("sess-uses").is_none());
    }

    #[test]
    fn webauthn_challenge_replay_is_rejected() {
        let mut mgr = VrfKeyManager::new(None);
        mgr.consume_webauthn_challenge("sess", "challenge-1").unwrap();
        let err = mgr
            .consume_webauthn_challenge("sess", "challenge-1")
            .unwrap_err();
        assert!(matches!(err, VrfWorkerError::StaleChallenge(_)));
    }

    #[test]
    fn logout_clears_keypair_sessions_and_challenges() {
        let mut mgr = VrfKeyManager::new(None);
        let prf = test_prf();
        let keypair = mgr.derive_keypair_from_prf(&prf, "alice.near").unwrap();
        mgr.load_keypair(keypair, "alice.near");
        mgr.upsert_session(
            "sess",
            VrfSessionData {
                account_id: "alice.near".to_string(),
                wrap_key: test_wrap_key(),
                created_at_ms: 0,
                expires_at_ms: None,
                remaining_uses: Some(5),
            },
        );

        mgr.logout();
        assert!(!mgr.session_active);
        assert!(mgr.vrf_keypair.is_none());
        assert!(mgr.sessions.is_empty());
        assert!(mgr.vrf_challenges.is_empty());
        assert!(mgr.generate_challenge(&test_input("alice.near")).is_err());
    }
}
