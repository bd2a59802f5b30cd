//! FROST Ed25519 building blocks for the 2-party signer.

use std::collections::BTreeMap;

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar as CurveScalar;

use crate::encoders::{base64_url_decode, base64_url_encode};
use crate::relay_client::CommitmentsWire;

/// Group public key for the 2-party signer set: the Lagrange interpolation of
/// the verifying shares at x=0:
///   `PK = λc·Pc + λr·Pr`, with `λc = xr/(xr-xc)` and `λr = xc/(xc-xr)`.
pub fn compute_group_public_key_2p(
    client_verifying_share: &[u8; 32],
    relayer_verifying_share: &[u8; 32],
    client_participant_id: u16,
    relayer_participant_id: u16,
) -> Result<[u8; 32], String> {
    if client_participant_id == 0 || relayer_participant_id == 0 {
        return Err("participant ids must be in [1,65535]".to_string());
    }
    if client_participant_id == relayer_participant_id {
        return Err("client and relayer participant ids must differ".to_string());
    }

    let client_point = decompress_point(client_verifying_share, "client verifying share")?;
    let relayer_point = decompress_point(relayer_verifying_share, "relayer verifying share")?;

    let xc = CurveScalar::from(client_participant_id as u64);
    let xr = CurveScalar::from(relayer_participant_id as u64);
    let lambda_c = xr * (xr - xc).invert();
    let lambda_r = xc * (xc - xr).invert();

    let group_point = client_point * lambda_c + relayer_point * lambda_r;
    Ok(group_point.compress().to_bytes())
}

fn decompress_point(bytes: &[u8; 32], label: &str) -> Result<EdwardsPoint, String> {
    CompressedEdwardsY(*bytes)
        .decompress()
        .ok_or_else(|| format!("threshold-signer: invalid {label}"))
}

/// Build the client's FROST key package from the derived share scalar and
/// the group public key.
pub fn build_client_key_package(
    client_signing_share_bytes: &[u8; 32],
    group_public_key_bytes: &[u8; 32],
    client_participant_id: u16,
) -> Result<frost_ed25519::keys::KeyPackage, String> {
    let signing_share = frost_ed25519::keys::SigningShare::deserialize(client_signing_share_bytes)
        .map_err(|e| format!("threshold-signer: invalid signing share: {e}"))?;

    let scalar = CurveScalar::from_bytes_mod_order(*client_signing_share_bytes);
    let verifying_share_bytes =
        (curve25519_dalek::constants::ED25519_BASEPOINT_POINT * scalar)
            .compress()
            .to_bytes();
    let verifying_share = frost_ed25519::keys::VerifyingShare::deserialize(&verifying_share_bytes)
        .map_err(|e| format!("threshold-signer: invalid verifying share: {e}"))?;

    let verifying_key = frost_ed25519::VerifyingKey::deserialize(group_public_key_bytes)
        .map_err(|e| format!("threshold-signer: invalid group public key: {e}"))?;

    let identifier: frost_ed25519::Identifier = client_participant_id
        .try_into()
        .map_err(|_| "threshold-signer: invalid client identifier".to_string())?;

    Ok(frost_ed25519::keys::KeyPackage::new(
        identifier,
        signing_share,
        verifying_share,
        verifying_key,
        2, // min_signers (2-of-2)
    ))
}

pub struct ClientRound1State {
    pub nonces: frost_ed25519::round1::SigningNonces,
    pub commitments: frost_ed25519::round1::SigningCommitments,
    pub commitments_wire: CommitmentsWire,
}

pub fn client_round1_commit(
    key_package: &frost_ed25519::keys::KeyPackage,
) -> Result<ClientRound1State, String> {
    let mut rng = frost_ed25519::rand_core::OsRng;
    let (nonces, commitments) =
        frost_ed25519::round1::commit(key_package.signing_share(), &mut rng);
    let commitments_wire = commitments_to_wire(&commitments)?;
    Ok(ClientRound1State {
        nonces,
        commitments,
        commitments_wire,
    })
}

pub fn commitments_to_wire(
    commitments: &frost_ed25519::round1::SigningCommitments,
) -> Result<CommitmentsWire, String> {
    let hiding_bytes = commitments
        .hiding()
        .serialize()
        .map_err(|e| format!("threshold-signer: serialize hiding commitment: {e}"))?;
    let binding_bytes = commitments
        .binding()
        .serialize()
        .map_err(|e| format!("threshold-signer: serialize binding commitment: {e}"))?;
    Ok(CommitmentsWire {
        hiding: base64_url_encode(&hiding_bytes),
        binding: base64_url_encode(&binding_bytes),
    })
}

pub fn commitments_from_wire(
    wire: &CommitmentsWire,
) -> Result<frost_ed25519::round1::SigningCommitments, String> {
    let hiding_bytes = base64_url_decode(wire.hiding.trim())
        .map_err(|e| format!("threshold-signer: invalid commitments.hiding: {e}"))?;
    let binding_bytes = base64_url_decode(wire.binding.trim())
        .map_err(|e| format!("threshold-signer: invalid commitments.binding: {e}"))?;

    let hiding = frost_ed25519::round1::NonceCommitment::deserialize(&hiding_bytes)
        .map_err(|e| format!("threshold-signer: invalid hiding commitment: {e}"))?;
    let binding = frost_ed25519::round1::NonceCommitment::deserialize(&binding_bytes)
        .map_err(|e| format!("threshold-signer: invalid binding commitment: {e}"))?;
    Ok(frost_ed25519::round1::SigningCommitments::new(
        hiding, binding,
    ))
}

pub fn build_signing_package(
    message: &[u8],
    commitments_by_id: BTreeMap<
        frost_ed25519::Identifier,
        frost_ed25519::round1::SigningCommitments,
    >,
) -> frost_ed25519::SigningPackage {
    frost_ed25519::SigningPackage::new(commitments_by_id, message)
}

pub fn client_round2_signature_share(
    signing_package: &frost_ed25519::SigningPackage,
    nonces: &frost_ed25519::round1::SigningNonces,
    key_package: &frost_ed25519::keys::KeyPackage,
) -> Result<frost_ed25519::round2::SignatureShare, String> {
    frost_ed25519::round2::sign(signing_package, nonces, key_package)
        .map_err(|e| format!("threshold-signer: round2 sign failed: {e}"))
}

pub fn signature_share_to_b64u(share: &frost_ed25519::round2::SignatureShare) -> String {
    base64_url_encode(&share.serialize())
}

pub fn signature_share_from_b64u(
    b64u: &str,
) -> Result<frost_ed25519::round2::SignatureShare, String> {
    let bytes = base64_url_decode(b64u.trim())
        .map_err(|e| format!("threshold-signer: invalid signature share: {e}"))?;
    frost_ed25519::round2::SignatureShare::deserialize(&bytes)
        .map_err(|e| format!("threshold-signer: invalid signature share: {e}"))
}

pub fn verifying_share_from_b64u(
    b64u: &str,
) -> Result<frost_ed25519::keys::VerifyingShare, String> {
    let bytes = base64_url_decode(b64u.trim())
        .map_err(|e| format!("threshold-signer: invalid verifying share: {e}"))?;
    frost_ed25519::keys::VerifyingShare::deserialize(&bytes)
        .map_err(|e| format!("threshold-signer: invalid verifying share: {e}"))
}

/// Aggregate the two signature shares into an Ed25519 signature under the
/// group key. Aggregation verifies the result internally.
pub fn aggregate_signature(
    signing_package: &frost_ed25519::SigningPackage,
    verifying_key: frost_ed25519::VerifyingKey,
    verifying_shares: BTreeMap<frost_ed25519::Identifier, frost_ed25519::keys::VerifyingShare>,
    signature_shares: BTreeMap<frost_ed25519::Identifier, frost_ed25519::round2::SignatureShare>,
) -> Result<[u8; 64], String> {
    let pubkey_package =
        frost_ed25519::keys::PublicKeyPackage::new(verifying_shares, verifying_key);
    let group_signature =
        frost_ed25519::aggregate(signing_package, &signature_shares, &pubkey_package)
            .map_err(|e| format!("threshold-signer: aggregate failed: {e}"))?;
    let bytes = group_signature
        .serialize()
        .map_err(|e| format!("threshold-signer: signature serialization failed: {e}"))?;
    if bytes.len() != 64 {
        return Err(format!(
            "threshold-signer: invalid signature length from aggregation: {}",
            bytes.len()
        ));
    }
    let mut out = [0u8; 64];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    // Run a full 2-of-2 signing round in-process with raw scalar shares on
    // both sides, as the relayer fleet does.
    #[test]
    fn two_party_round_produces_a_valid_ed25519_signature() {
        let client_share_bytes = CurveScalar::from_bytes_mod_order([5u8; 32]).to_bytes();
        let relayer_share_bytes = CurveScalar::from_bytes_mod_order([9u8; 32]).to_bytes();

        let client_vs = (curve25519_dalek::constants::ED25519_BASEPOINT_POINT
            * CurveScalar::from_bytes_mod_order(client_share_bytes))
        .compress()
        .to_bytes();
        let relayer_vs = (curve25519_dalek::constants::ED25519_BASEPOINT_POINT
            * CurveScalar::from_bytes_mod_order(relayer_share_bytes))
        .compress()
        .to_bytes();

        let group_pk = compute_group_public_key_2p(&client_vs, &relayer_vs, 1, 2).unwrap();

        let client_kp = build_client_key_package(&client_share_bytes, &group_pk, 1).unwrap();
        let relayer_kp = build_client_key_package(&relayer_share_bytes, &group_pk, 2).unwrap();

        let message = [42u8; 32];

        let client_r1 = client_round1_commit(&client_kp).unwrap();
        let relayer_r1 = client_round1_commit(&relayer_kp).unwrap();

        let mut commitments = BTreeMap::new();
        commitments.insert(*client_kp.identifier(), client_r1.commitments);
        commitments.insert(*relayer_kp.identifier(), relayer_r1.commitments);
        let signing_package = build_signing_package(&message, commitments);

        let client_share =
            client_round2_signature_share(&signing_package, &client_r1.nonces, &client_kp)
                .unwrap();
        let relayer_share =
            client_round2_signature_share(&signing_package, &relayer_r1.nonces, &relayer_kp)
                .unwrap();

        let mut verifying_shares = BTreeMap::new();
        verifying_shares.insert(
            *client_kp.identifier(),
            frost_ed25519::keys::VerifyingShare::deserialize(&client_vs).unwrap(),
        );
        verifying_shares.insert(
            *relayer_kp.identifier(),
            frost_ed25519::keys::VerifyingShare::deserialize(&relayer_vs).unwrap(),
        );
        let mut signature_shares = BTreeMap::new();
        signature_shares.insert(*client_kp.identifier(), client_share);
        signature_shares.insert(*relayer_kp.identifier(), relayer_share);

        let verifying_key = frost_ed25519::VerifyingKey::deserialize(&group_pk).unwrap();
        let signature = aggregate_signature(
            &signing_package,
            verifying_key,
            verifying_shares,
            signature_shares,
        )
        .unwrap();

        let vk = ed25519_dalek::VerifyingKey::from_bytes(&group_pk).unwrap();
        vk.verify(&message, &ed25519_dalek::Signature::from_bytes(&signature))
            .unwrap();
    }

    #[test]
    fn group_key_rejects_equal_participant_ids() {
        let point = (curve25519_dalek::constants::ED25519_BASEPOINT_POINT
            * CurveScalar::from_bytes_mod_order([5u8; 32]))
        .compress()
        .to_bytes();
        assert!(compute_group_public_key_2p(&point, &point, 1, 1).is_err());
    }

    #[test]
    fn commitments_survive_the_wire_round_trip() {
        let share_bytes = CurveScalar::from_bytes_mod_order([5u8; 32]).to_bytes();
        let group_pk = {
            let vs = (curve25519_dalek::constants::ED25519_BASEPOINT_POINT
                * CurveScalar::from_bytes_mod_order(share_bytes))
            .compress()
            .to_bytes();
            compute_group_public_key_2p(
                &vs,
                &(curve25519_dalek::constants::ED25519_BASEPOINT_POINT
                    * CurveScalar::from_bytes_mod_order([8u8; 32]))
                .compress()
                .to_bytes(),
                1,
                2,
            )
            .unwrap()
        };
        let kp = build_client_key_package(&share_bytes, &group_pk, 1).unwrap();
        let r1 = client_round1_commit(&kp).unwrap();
        let parsed = commitments_from_wire(&r1.commitments_wire).unwrap();
        assert_eq!(parsed, r1.commitments);
    }
}
