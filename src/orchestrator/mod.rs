//! Flow orchestrator: sequences the WebAuthn manager, the two worker actors,
//! the relay and the chain facade under explicit state machines.
//!
//! All services are explicitly constructed and owned here; there is no
//! ambient/global access to the vault or the workers.

pub mod email_recovery;
pub mod execute;
pub mod link_device;
pub mod login;
pub mod recovery;
pub mod registration;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::chain_client::{BlockContext, ChainClient};
use crate::clock::Clock;
use crate::config::WalletConfig;
use crate::errors::{ErrorKind, WalletError};
use crate::events::EventSink;
use crate::nonce_manager::NonceManager;
use crate::relay_client::RelayClient;
use crate::signer_worker::SignerWorkerHandle;
use crate::types::vrf::{VrfChallenge, VrfInputData};
use crate::types::webauthn::SerializedCredential;
use crate::vault::{UserRecord, Vault};
use crate::vrf_worker::{MintSigningSessionRequest, VrfWorkerHandle};
use crate::webauthn::{PasskeyAuthenticator, WebAuthnManager};

/// The active signed-in identity.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub account_id: String,
    pub device_number: u32,
    pub near_public_key: String,
}

pub struct PasskeyWallet {
    pub(crate) config: WalletConfig,
    pub(crate) vault: Arc<Vault>,
    pub(crate) vrf: VrfWorkerHandle,
    pub(crate) signer: SignerWorkerHandle,
    pub(crate) chain: Arc<dyn ChainClient>,
    pub(crate) relay: Option<Arc<dyn RelayClient>>,
    pub(crate) webauthn: WebAuthnManager,
    pub(crate) nonces: Arc<NonceManager>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: EventSink,
    pub(crate) current_user: Mutex<Option<CurrentUser>>,
    session_counter: AtomicU64,
}

impl PasskeyWallet {
    pub fn new(
        config: WalletConfig,
        vault: Arc<Vault>,
        chain: Arc<dyn ChainClient>,
        relay: Option<Arc<dyn RelayClient>>,
        authenticator: Arc<dyn PasskeyAuthenticator>,
        clock: Arc<dyn Clock>,
        events: EventSink,
    ) -> Self {
        let (session_key_tx, session_key_rx) = mpsc::unbounded_channel();

        let vrf = VrfWorkerHandle::spawn(
            config.vrf_worker_configs.shamir3pass.clone(),
            relay.clone(),
            session_key_tx,
            clock.clone(),
        );
        let signer = SignerWorkerHandle::spawn(session_key_rx, relay.clone(), config.signer_mode);

        let webauthn = WebAuthnManager::new(
            authenticator,
            config.rp_id.clone(),
            config.authenticator_options.clone(),
        );
        let nonces = Arc::new(NonceManager::new(clock.clone()));

        Self {
            config,
            vault,
            vrf,
            signer,
            chain,
            relay,
            webauthn,
            nonces,
            clock,
            events,
            current_user: Mutex::new(None),
            session_counter: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub async fn current_user(&self) -> Option<CurrentUser> {
        self.current_user.lock().await.clone()
    }

    pub async fn check_vrf_status(&self) -> Result<crate::vrf_worker::manager::VrfStatus, WalletError> {
        self.vrf.check_status().await.map_err(WalletError::from)
    }

    /// Tear down the VRF session, warm sessions, nonce reservations and the
    /// active identity.
    pub async fn logout_and_clear_session(&self) -> Result<(), WalletError> {
        self.vrf.clear_session().await?;
        self.nonces.clear().await;
        *self.current_user.lock().await = None;
        Ok(())
    }

    // === INTERNAL HELPERS ===

    pub(crate) fn require_secure_context(&self) -> Result<(), WalletError> {
        if !self.config.secure_context {
            return Err(WalletError::new(
                ErrorKind::InsecureContext,
                "WebAuthn ceremonies require a secure context",
            ));
        }
        Ok(())
    }

    pub(crate) fn require_relay(&self) -> Result<Arc<dyn RelayClient>, WalletError> {
        self.relay.clone().ok_or_else(|| {
            WalletError::new(ErrorKind::ValidationFailed, "No relay server configured")
        })
    }

    pub(crate) fn next_session_id(&self) -> String {
        let counter = self.session_counter.fetch_add(1, Ordering::SeqCst);
        format!("session-{}-{}", self.clock.now_ms(), counter)
    }

    pub(crate) async fn fresh_block(&self) -> Result<BlockContext, WalletError> {
        self.chain.final_block().await
    }

    pub(crate) async fn resolve_user(
        &self,
        account_id: Option<&str>,
    ) -> Result<UserRecord, WalletError> {
        // The last-used pointer wins when it matches the requested account;
        // otherwise fall back to the most recently written device.
        let user = match account_id {
            Some(account_id) => match self.vault.get_last_user()? {
                Some(user) if user.account_id == account_id => Some(user),
                _ => self.vault.get_last_db_updated_user(account_id)?,
            },
            None => self.vault.get_last_user()?,
        };
        user.ok_or_else(|| {
            WalletError::new(
                ErrorKind::ValidationFailed,
                "No registered user found in the vault",
            )
        })
    }

    /// One prompt, one warm session: generate a VRF challenge bound to
    /// `intent_digest`, collect an assertion over it, and mint a signing
    /// session whose wrap key goes straight to the signer worker.
    pub(crate) async fn mint_session_with_prompt(
        &self,
        account_id: &str,
        wrap_key_salt_b64u: &str,
        intent_digest_b64u: Option<String>,
    ) -> Result<(String, VrfChallenge, SerializedCredential), WalletError> {
        let session_id = self.next_session_id();
        let block = self.fresh_block().await?;

        let challenge = self
            .vrf
            .generate_challenge(
                Some(&session_id),
                VrfInputData {
                    user_id: account_id.to_string(),
                    rp_id: self.webauthn.rp_id().to_string(),
                    block_height: block.block_height,
                    block_hash: block.block_hash,
                    intent_digest: intent_digest_b64u,
                    session_policy_digest_32: None,
                },
            )
            .await?;

        let allow_ids = self
            .vault
            .ensure_current_passkey(account_id)?
            .into_iter()
            .map(|a| a.credential_id)
            .collect();
        let credential = self
            .webauthn
            .request_authentication_credential(account_id, &challenge.vrf_output, allow_ids)
            .await?;

        self.mint_session_with_credential(
            &session_id,
            account_id,
            wrap_key_salt_b64u,
            credential.clone(),
        )
        .await?;

        Ok((session_id, challenge, credential))
    }

    pub(crate) async fn mint_session_with_credential(
        &self,
        session_id: &str,
        account_id: &str,
        wrap_key_salt_b64u: &str,
        credential: SerializedCredential,
    ) -> Result<(), WalletError> {
        let defaults = self.config.signing_session_defaults;
        self.vrf
            .mint_signing_session(MintSigningSessionRequest {
                session_id: session_id.to_string(),
                account_id: account_id.to_string(),
                credential,
                wrap_key_salt_b64u: wrap_key_salt_b64u.to_string(),
                ttl_ms: defaults.ttl_ms,
                remaining_uses: defaults.remaining_uses,
            })
            .await?;
        Ok(())
    }

    /// One-prompt repair path for `VRF_SESSION_PASSKEY_MISMATCH`: unlock the
    /// VRF keypair for the device the user actually picked and remint a
    /// small signing session.
    pub async fn repair_vrf_session_for_current_device(&self) -> Result<(), WalletError> {
        let user = self.resolve_user(None).await?;
        self.login_with_touch_id_unlock(&user).await?;
        Ok(())
    }
}
