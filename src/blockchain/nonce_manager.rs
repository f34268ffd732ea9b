// src/blockchain/nonce_manager.rs

use std::sync::Arc;

use dashmap::DashMap;
use ethers_core::types::Address;
use tokio::sync::Mutex;

use crate::blockchain::rpc::RpcProvider;
use crate::error::SessionError;

// Hands out sequential nonces per sender so back-to-back counter calls
// (increment then decrement) never collide.
#[derive(Debug, Clone, Default)]
pub struct NonceManager {
    nonces: Arc<DashMap<Address, Arc<Mutex<Option<u64>>>>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next nonce for `address`, seeded from the pending transaction count
    /// the first time the address is seen.
    pub async fn next_nonce(
        &self,
        address: Address,
        provider: &RpcProvider,
    ) -> Result<u64, SessionError> {
        let slot = self
            .nonces
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut next = slot.lock().await;
        let nonce = match *next {
            Some(n) => n,
            None => provider.transaction_count(address).await?,
        };
        *next = Some(nonce + 1);
        Ok(nonce)
    }

    /// Forgets the cached nonce so the next call re-reads it from the chain.
    /// Used after a failed broadcast or a network switch.
    pub fn reset(&self, address: Address) {
        self.nonces.remove(&address);
    }

    pub fn reset_all(&self) {
        self.nonces.clear();
    }
}
