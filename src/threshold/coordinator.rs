//! Client-side coordination of one 2-party signing round with the relay.

use std::collections::BTreeMap;

use crate::crypto::WrapKey;
use crate::encoders::base64_url_encode;
use crate::relay_client::{
    RelayClient, ThresholdAuthorizeRequest, ThresholdSignFinalizeRequest, ThresholdSignInitRequest,
};
use crate::signer_worker::ThresholdSignerContext;
use crate::types::vrf::VrfData;

fn participant_ids(ctx: &ThresholdSignerContext) -> (u16, u16) {
    match ctx.participant_ids.as_slice() {
        [client, relayer, ..] => (*client, *relayer),
        _ => (1, 2),
    }
}

/// Authorize and run one signing round for a 32-byte digest, returning the
/// Ed25519 signature under the group public key.
///
/// The authorize call binds `signing_digest_32` to the VRF challenge's
/// `intent_digest_32`; the relay refuses digests the user never authorized.
pub async fn sign_digest(
    relay: &dyn RelayClient,
    ctx: &ThresholdSignerContext,
    wrap_key: &WrapKey,
    near_account_id: &str,
    purpose: &str,
    digest32: &[u8; 32],
    signing_payload: Option<serde_json::Value>,
) -> Result<[u8; 64], String> {
    if ctx.vrf_challenge.user_id.trim() != near_account_id.trim() {
        return Err("threshold-signer: vrfChallenge.userId does not match nearAccountId".to_string());
    }
    let (client_id, relayer_id) = participant_ids(ctx);

    // Derive the client share and key package.
    let client_share_bytes =
        super::client_share::derive_client_signing_share_bytes(wrap_key, near_account_id)?;
    let client_verifying_share_b64u =
        super::client_share::derive_client_verifying_share_b64u(wrap_key, near_account_id)?;
    let group_pk_bytes = crate::encoders::bs58_decode_32(
        ctx.group_public_key
            .strip_prefix("ed25519:")
            .unwrap_or(&ctx.group_public_key),
    )?;
    let key_package =
        super::frost::build_client_key_package(&client_share_bytes, &group_pk_bytes, client_id)?;

    // Authorize the digest against the VRF-bound assertion.
    let vrf_data = VrfData::try_from(&ctx.vrf_challenge)?;
    let authorize = relay
        .threshold_authorize(ThresholdAuthorizeRequest {
            relayer_key_id: ctx.relayer_key_id.clone(),
            client_verifying_share_b64u: client_verifying_share_b64u.clone(),
            purpose: purpose.to_string(),
            signing_digest_32: digest32.to_vec(),
            vrf_data,
            webauthn_authentication: ctx.credential.clone(),
            signing_payload,
        })
        .await
        .map_err(|e| e.to_string())?;
    if !authorize.ok {
        return Err(authorize
            .message
            .unwrap_or_else(|| "threshold-signer: /authorize failed".to_string()));
    }
    let mpc_session_id = authorize
        .mpc_session_id
        .ok_or_else(|| "threshold-signer: /authorize missing mpcSessionId".to_string())?;

    // Round 1: commit and exchange commitments.
    let round1 = super::frost::client_round1_commit(&key_package)?;
    let init = relay
        .threshold_sign_init(ThresholdSignInitRequest {
            mpc_session_id,
            relayer_key_id: ctx.relayer_key_id.clone(),
            near_account_id: near_account_id.to_string(),
            signing_digest_b64u: base64_url_encode(digest32),
            client_commitments: round1.commitments_wire.clone(),
        })
        .await
        .map_err(|e| e.to_string())?;
    if !init.ok {
        return Err(init
            .message
            .unwrap_or_else(|| "threshold-signer: /sign/init failed".to_string()));
    }

    let signing_session_id = init
        .signing_session_id
        .ok_or_else(|| "threshold-signer: /sign/init missing signingSessionId".to_string())?;
    let relayer_key = relayer_id.to_string();
    let relayer_commitments_wire = init
        .commitments_by_id
        .as_ref()
        .and_then(|m| m.get(&relayer_key))
        .cloned()
        .ok_or_else(|| {
            format!("threshold-signer: /sign/init missing commitmentsById[{relayer_key}]")
        })?;
    let relayer_verifying_share_b64u = init
        .relayer_verifying_shares_by_id
        .as_ref()
        .and_then(|m| m.get(&relayer_key))
        .cloned()
        .ok_or_else(|| {
            format!("threshold-signer: /sign/init missing relayerVerifyingSharesById[{relayer_key}]")
        })?;

    let client_identifier: frost_ed25519::Identifier = client_id
        .try_into()
        .map_err(|_| "threshold-signer: invalid client identifier".to_string())?;
    let relayer_identifier: frost_ed25519::Identifier = relayer_id
        .try_into()
        .map_err(|_| "threshold-signer: invalid relayer identifier".to_string())?;

    let mut commitments_by_id = BTreeMap::new();
    commitments_by_id.insert(client_identifier, round1.commitments);
    commitments_by_id.insert(
        relayer_identifier,
        super::frost::commitments_from_wire(&relayer_commitments_wire)?,
    );
    let signing_package = super::frost::build_signing_package(digest32, commitments_by_id);

    // Round 2: sign and aggregate.
    let client_signature_share =
        super::frost::client_round2_signature_share(&signing_package, &round1.nonces, &key_package)?;
    let finalize = relay
        .threshold_sign_finalize(ThresholdSignFinalizeRequest {
            signing_session_id,
            client_signature_share_b64u: super::frost::signature_share_to_b64u(
                &client_signature_share,
            ),
        })
        .await
        .map_err(|e| e.to_string())?;
    if !finalize.ok {
        return Err(finalize
            .message
            .unwrap_or_else(|| "threshold-signer: /sign/finalize failed".to_string()));
    }
    let relayer_signature_share_b64u = finalize
        .relayer_signature_shares_by_id
        .as_ref()
        .and_then(|m| m.get(&relayer_key))
        .cloned()
        .ok_or_else(|| {
            format!(
                "threshold-signer: /sign/finalize missing relayerSignatureSharesById[{relayer_key}]"
            )
        })?;

    let mut verifying_shares = BTreeMap::new();
    verifying_shares.insert(
        client_identifier,
        super::frost::verifying_share_from_b64u(&client_verifying_share_b64u)?,
    );
    verifying_shares.insert(
        relayer_identifier,
        super::frost::verifying_share_from_b64u(&relayer_verifying_share_b64u)?,
    );
    let mut signature_shares = BTreeMap::new();
    signature_shares.insert(client_identifier, client_signature_share);
    signature_shares.insert(
        relayer_identifier,
        super::frost::signature_share_from_b64u(&relayer_signature_share_b64u)?,
    );

    let verifying_key = frost_ed25519::VerifyingKey::deserialize(&group_pk_bytes)
        .map_err(|e| format!("threshold-signer: invalid group public key: {e}"))?;
    super::frost::aggregate_signature(
        &signing_package,
        verifying_key,
        verifying_shares,
        signature_shares,
    )
}
