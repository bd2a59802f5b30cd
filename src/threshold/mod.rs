//! Optional 2-of-2 threshold-Ed25519 signing (FROST-style).
//!
//! The client share is re-derived on demand from the PRF-derived wrap key;
//! the relay holds the second share and acts as the cosigner. Signing runs
//! one commit/sign round against the relay, aggregated locally under the
//! group public key.

pub mod client_share;
pub mod coordinator;
pub mod digests;
pub mod frost;
