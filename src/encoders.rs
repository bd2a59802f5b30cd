//! Encoding utilities: base64url (WebAuthn), standard base64 (JSON/HTTP
//! payloads) and base58 helpers.

use base64ct::{Base64, Base64UrlUnpadded, Encoding};

/// Encode bytes as base64url without padding, the WebAuthn wire standard.
pub fn base64_url_encode(data: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(data)
}

/// Decode an unpadded base64url string.
pub fn base64_url_decode(input: &str) -> Result<Vec<u8>, String> {
    Base64UrlUnpadded::decode_vec(input).map_err(|e| format!("Base64 decode error: {}", e))
}

/// Encode bytes as standard base64. Used for JSON payloads and RPC bodies.
pub fn base64_standard_encode(data: &[u8]) -> String {
    Base64::encode_string(data)
}

/// Decode a standard base64 string.
pub fn base64_standard_decode(input: &str) -> Result<Vec<u8>, String> {
    Base64::decode_vec(input).map_err(|e| format!("Base64 decode error: {}", e))
}

/// Decode a base58 string into exactly 32 bytes.
pub fn bs58_decode_32(input: &str) -> Result<[u8; 32], String> {
    let bytes = bs58::decode(input.trim())
        .into_vec()
        .map_err(|e| format!("Base58 decode error: {}", e))?;
    if bytes.len() != 32 {
        return Err(format!("Expected 32 bytes, got {}", bytes.len()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
