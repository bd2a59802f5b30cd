//! Passkey wallet SDK core.
//!
//! Turns platform-bound WebAuthn passkeys (with the PRF extension) into
//! non-custodial account credentials for a NEAR-style chain. A single passkey
//! deterministically derives a per-account Ed25519 signing key and a
//! per-account VRF keypair; both live encrypted in a local vault and are only
//! ever decrypted inside trust-isolated worker actors.
//!
//! The crate is organized around the worker boundary:
//!
//! - [`vrf_worker`] owns the unlocked VRF keypair and warm signing sessions,
//!   generates chain-anchored challenges, and runs the Shamir 3-pass
//!   auto-unlock protocol with the relay.
//! - [`signer_worker`] owns decrypted Ed25519 key material for the duration of
//!   a signing request and performs all transaction / NEP-413 / delegate
//!   signing.
//! - [`orchestrator`] sequences the registration, login, recovery,
//!   link-device, email-recovery and transaction-execution state machines on
//!   top of the vault, the chain client facade and the relay client.

pub mod actions;
pub mod chain_client;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod encoders;
pub mod errors;
pub mod events;
pub mod nonce_manager;
pub mod orchestrator;
pub mod relay_client;
pub mod retry;
pub mod signer_worker;
pub mod threshold;
pub mod transaction;
pub mod types;
pub mod vault;
pub mod vrf_worker;
pub mod webauthn;

pub use chain_client::{BlockContext, ChainClient, HttpChainClient, WaitUntil};
pub use clock::{Clock, SystemClock, TestClock};
pub use config::{
    EmailRecoveryConfig, RelayerConfig, SessionKind, Shamir3PassConfig, SignerMode,
    SigningSessionDefaults, ThresholdBehavior, WalletConfig,
};
pub use errors::{ErrorKind, WalletError};
pub use events::{EventSink, WalletEvent};
pub use orchestrator::PasskeyWallet;
pub use relay_client::{HttpRelayClient, RelayClient};
pub use types::near::AccountId;
pub use vault::Vault;
pub use webauthn::{PasskeyAuthenticator, WebAuthnManager};
