//! Wallet backed by a locally held private key.
//!
//! Stands in for a browser-injected wallet in the console binary: it signs
//! raw transactions itself and keeps a table of chains it knows how to reach.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{Address, TransactionRequest, H256};
use ethers_signers::{LocalWallet, Signer};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

use crate::blockchain::nonce_manager::NonceManager;
use crate::blockchain::rpc::{ChainReader, RpcProvider};
use crate::config::ChainSpec;
use crate::error::{wallet_codes, WalletError};
use crate::wallet::{WalletEvent, WalletProvider};

struct Network {
    chain_id: u64,
    provider: Arc<RpcProvider>,
}

pub struct LocalKeyWallet {
    signer: LocalWallet,
    request_timeout: Duration,
    known: RwLock<HashMap<u64, Arc<RpcProvider>>>,
    current: RwLock<Network>,
    nonce_manager: NonceManager,
    events: broadcast::Sender<WalletEvent>,
}

fn internal(e: impl std::fmt::Display) -> WalletError {
    WalletError::new(wallet_codes::INTERNAL_ERROR, e.to_string())
}

impl LocalKeyWallet {
    /// Opens the wallet on whatever chain `rpc_url` serves.
    pub async fn connect(
        private_key: &SecretString,
        rpc_url: Url,
        request_timeout: Duration,
    ) -> Result<Self, WalletError> {
        let key = private_key.expose_secret();
        let signer: LocalWallet = key
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| internal(format!("Invalid private key: {}", e)))?;

        let provider = Arc::new(RpcProvider::new(rpc_url, request_timeout).map_err(internal)?);
        let chain_id = provider.chain_id().await.map_err(internal)?;
        info!("Local wallet {:?} opened on chain {}", signer.address(), chain_id);

        let (events, _) = broadcast::channel(16);
        Ok(Self {
            signer,
            request_timeout,
            known: RwLock::new(HashMap::from([(chain_id, provider.clone())])),
            current: RwLock::new(Network { chain_id, provider }),
            nonce_manager: NonceManager::new(),
            events,
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    fn current(&self) -> (u64, Arc<RpcProvider>) {
        let network = self.current.read().unwrap_or_else(PoisonError::into_inner);
        (network.chain_id, network.provider.clone())
    }

    fn emit(&self, event: WalletEvent) {
        // No receivers just means nobody listens yet.
        let _ = self.events.send(event);
    }

    async fn sign_and_send(
        &self,
        chain_id: u64,
        provider: &RpcProvider,
        tx: TransactionRequest,
    ) -> Result<H256, WalletError> {
        let from = self.signer.address();
        let nonce = self
            .nonce_manager
            .next_nonce(from, provider)
            .await
            .map_err(internal)?;

        let mut tx = tx.from(from).nonce(nonce).chain_id(chain_id);

        // If gas is not provided, estimate it via eth_estimateGas
        if tx.gas.is_none() {
            let call = serde_json::to_value(&tx).map_err(internal)?;
            let gas = provider.estimate_gas(call).await.map_err(internal)?;
            tx = tx.gas(gas);
        }
        if tx.gas_price.is_none() {
            let gas_price = provider.gas_price().await.map_err(internal)?;
            tx = tx.gas_price(gas_price);
        }

        let typed: TypedTransaction = tx.into();
        let signature = self
            .signer
            .sign_transaction(&typed)
            .await
            .map_err(internal)?;
        let raw = typed.rlp_signed(&signature);

        provider.send_raw_transaction(raw).await.map_err(internal)
    }
}

#[async_trait]
impl WalletProvider for LocalKeyWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        Ok(vec![self.signer.address()])
    }

    async fn accounts(&self) -> Result<Vec<Address>, WalletError> {
        Ok(vec![self.signer.address()])
    }

    async fn chain_id(&self) -> Result<u64, WalletError> {
        Ok(self.current().0)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        let provider = {
            let known = self.known.read().unwrap_or_else(PoisonError::into_inner);
            known.get(&chain_id).cloned()
        };
        let provider = provider.ok_or_else(|| WalletError::unrecognized_chain(chain_id))?;

        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if current.chain_id == chain_id {
                return Ok(());
            }
            *current = Network { chain_id, provider };
        }
        self.nonce_manager.reset_all();
        info!("Local wallet switched to chain {}", chain_id);
        self.emit(WalletEvent::ChainChanged(chain_id));
        Ok(())
    }

    async fn add_chain(&self, spec: &ChainSpec) -> Result<(), WalletError> {
        let url = spec
            .rpc_endpoints
            .first()
            .cloned()
            .ok_or_else(|| internal("Chain definition has no RPC URL"))?;
        let provider = RpcProvider::new(url, self.request_timeout).map_err(internal)?;

        let served = provider.chain_id().await.map_err(internal)?;
        if !spec.matches(served) {
            return Err(internal(format!(
                "RPC endpoint serves chain {}, not {}",
                served, spec.chain_id
            )));
        }

        self.known
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.chain_id, Arc::new(provider));
        info!("Local wallet added chain {} ({})", spec.chain_id, spec.chain_name);
        Ok(())
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<H256, WalletError> {
        let (chain_id, provider) = self.current();
        let result = self.sign_and_send(chain_id, &provider, tx).await;
        if let Err(e) = &result {
            warn!("Broadcast failed, dropping cached nonce: {}", e);
            self.nonce_manager.reset(self.signer.address());
        }
        result
    }

    fn provider(&self) -> Arc<dyn ChainReader> {
        self.current().1
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}
