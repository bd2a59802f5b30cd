//! Deterministic client signing share derivation.

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::scalar::Scalar as CurveScalar;

use crate::crypto::WrapKey;
use crate::encoders::base64_url_encode;

pub(crate) const THRESHOLD_CLIENT_SHARE_SALT_V1: &[u8] =
    b"passkey-wallet-threshold-ed25519-client-share:v1";

/// Derive the client signing-share scalar from the wrap key, bound to the
/// account id. The all-zero scalar is invalid as a signing share.
pub fn derive_client_share_scalar(
    wrap_key: &WrapKey,
    near_account_id: &str,
) -> Result<CurveScalar, String> {
    let mut okm = [0u8; 64];
    crate::crypto::hkdf_sha256(
        wrap_key.key_bytes(),
        Some(THRESHOLD_CLIENT_SHARE_SALT_V1),
        near_account_id.as_bytes(),
        &mut okm,
    )?;

    let scalar = CurveScalar::from_bytes_mod_order_wide(&okm);
    if scalar == CurveScalar::ZERO {
        return Err("threshold-signer: derived client signing share is zero".to_string());
    }
    Ok(scalar)
}

pub fn derive_client_signing_share_bytes(
    wrap_key: &WrapKey,
    near_account_id: &str,
) -> Result<[u8; 32], String> {
    Ok(derive_client_share_scalar(wrap_key, near_account_id)?.to_bytes())
}

pub fn derive_client_verifying_share_bytes(
    wrap_key: &WrapKey,
    near_account_id: &str,
) -> Result<[u8; 32], String> {
    let scalar = derive_client_share_scalar(wrap_key, near_account_id)?;
    Ok((ED25519_BASEPOINT_POINT * scalar).compress().to_bytes())
}

pub fn derive_client_verifying_share_b64u(
    wrap_key: &WrapKey,
    near_account_id: &str,
) -> Result<String, String> {
    Ok(base64_url_encode(&derive_client_verifying_share_bytes(
        wrap_key,
        near_account_id,
    )?))
}
