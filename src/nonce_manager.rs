//! Access-key nonce manager: one-shot reservation around each broadcast with
//! reconciliation on success and release on failure.
//!
//! Invariant: after `send_transaction` resolves, exactly one of
//! `update_nonce_from_blockchain` or `release_nonce` has been called for the
//! reserved nonce.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use tokio::sync::Mutex;

use crate::chain_client::{BlockContext, ChainClient};
use crate::clock::Clock;
use crate::config::{BLOCK_CONTEXT_TTL_MS, NONCE_RESERVATION_MAX_AGE_MS};
use crate::errors::{ErrorKind, WalletError};

/// Block context plus the base nonce handed to a signing request.
#[derive(Debug, Clone)]
pub struct NonceContext {
    pub next_nonce: u64,
    pub tx_block_hash: String,
    pub tx_block_height: u64,
}

#[derive(Default)]
struct NonceState {
    account_id: Option<String>,
    public_key: Option<String>,
    /// nonce -> reservation timestamp (ms)
    reserved: BTreeMap<u64, u64>,
    block_context: Option<CachedBlock>,
}

struct CachedBlock {
    context: BlockContext,
    fetched_at_ms: u64,
}

pub struct NonceManager {
    state: Mutex<NonceState>,
    clock: Arc<dyn Clock>,
}

impl NonceManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(NonceState::default()),
            clock,
        }
    }

    /// Set the active signer. Clears reservations belonging to a previous
    /// signer.
    pub async fn initialize_user(&self, account_id: &str, public_key: &str) {
        let mut state = self.state.lock().await;
        if state.account_id.as_deref() != Some(account_id)
            || state.public_key.as_deref() != Some(public_key)
        {
            state.reserved.clear();
            state.block_context = None;
        }
        state.account_id = Some(account_id.to_string());
        state.public_key = Some(public_key.to_string());
    }

    /// Reserve one nonce with a fresh block context. Access key and final
    /// block are fetched in parallel.
    pub async fn get_nonce_block_hash_and_height(
        &self,
        chain: &dyn ChainClient,
        force: bool,
    ) -> Result<NonceContext, WalletError> {
        let mut reserved = self.reserve_nonces(chain, 1, force).await?;
        Ok(reserved.pop().expect("reserve_nonces returns one context"))
    }

    /// Reserve `count` consecutive nonces (strictly monotonic within a
    /// batch). Returns one context per nonce, sharing the block context.
    pub async fn reserve_nonces(
        &self,
        chain: &dyn ChainClient,
        count: u64,
        force: bool,
    ) -> Result<Vec<NonceContext>, WalletError> {
        if count == 0 {
            return Err(WalletError::validation("Cannot reserve zero nonces"));
        }
        let (account_id, public_key) = {
            let state = self.state.lock().await;
            match (&state.account_id, &state.public_key) {
                (Some(a), Some(p)) => (a.clone(), p.clone()),
                _ => {
                    return Err(WalletError::new(
                        ErrorKind::NonceStale,
                        "Nonce manager has no active signer",
                    ))
                }
            }
        };

        let (access_key, block) = tokio::join!(
            chain.view_access_key(&account_id, &public_key),
            self.block_context(chain, force)
        );
        let access_key = access_key?;
        let block = block?;

        let now_ms = self.clock.now_ms();
        let mut state = self.state.lock().await;
        let base = access_key.nonce + 1 + state.reserved.len() as u64;
        let mut contexts = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let nonce = base + offset;
            state.reserved.insert(nonce, now_ms);
            contexts.push(NonceContext {
                next_nonce: nonce,
                tx_block_hash: block.block_hash.clone(),
                tx_block_height: block.block_height,
            });
        }
        debug!(
            "Reserved nonces {}..={} for {}",
            base,
            base + count - 1,
            account_id
        );
        Ok(contexts)
    }

    /// Release a reservation whose broadcast failed.
    pub async fn release_nonce(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        if state.reserved.remove(&nonce).is_some() {
            debug!("Released nonce {}", nonce);
        }
    }

    pub async fn release_all_nonces(&self) {
        self.state.lock().await.reserved.clear();
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        *state = NonceState::default();
    }

    /// Reconcile after a successful broadcast: drop the confirmed
    /// reservation, prune reservations the chain has already passed, and
    /// prune reservations old enough to be abandoned.
    pub async fn update_nonce_from_blockchain(
        &self,
        chain: &dyn ChainClient,
        confirmed_nonce: u64,
    ) -> Result<(), WalletError> {
        let (account_id, public_key) = {
            let state = self.state.lock().await;
            match (&state.account_id, &state.public_key) {
                (Some(a), Some(p)) => (a.clone(), p.clone()),
                _ => return Ok(()),
            }
        };
        let chain_nonce = chain
            .view_access_key(&account_id, &public_key)
            .await
            .map(|ak| ak.nonce)
            .unwrap_or(confirmed_nonce);

        let now_ms = self.clock.now_ms();
        let mut state = self.state.lock().await;
        state.reserved.remove(&confirmed_nonce);
        state.reserved.retain(|nonce, reserved_at| {
            *nonce > chain_nonce
                && now_ms.saturating_sub(*reserved_at) <= NONCE_RESERVATION_MAX_AGE_MS
        });
        Ok(())
    }

    /// Background refresh of the cached block context.
    pub async fn prefetch_blockheight(&self, chain: &dyn ChainClient) -> Result<(), WalletError> {
        self.block_context(chain, false).await.map(|_| ())
    }

    pub async fn reserved_count(&self) -> usize {
        self.state.lock().await.reserved.len()
    }

    async fn block_context(
        &self,
        chain: &dyn ChainClient,
        force: bool,
    ) -> Result<BlockContext, WalletError> {
        let now_ms = self.clock.now_ms();
        if !force {
            let state = self.state.lock().await;
            if let Some(cached) = &state.block_context {
                if now_ms.saturating_sub(cached.fetched_at_ms) < BLOCK_CONTEXT_TTL_MS {
                    return Ok(cached.context.clone());
                }
            }
        }
        let context = chain.final_block().await?;
        let mut state = self.state.lock().await;
        state.block_context = Some(CachedBlock {
            context: context.clone(),
            fetched_at_ms: now_ms,
        });
        Ok(context)
    }
}
