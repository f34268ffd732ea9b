//! Wallet provider boundary.
//!
//! The session never talks to a wallet directly: it is handed a
//! [`WalletProvider`] at construction and consumes only this surface.

use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::{Address, TransactionRequest, H256};
use tokio::sync::broadcast;

use crate::blockchain::rpc::ChainReader;
use crate::config::ChainSpec;
use crate::error::WalletError;

pub mod local;

pub use local::LocalKeyWallet;

/// Notifications a wallet may emit at any time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Prompts the user for account access (`eth_requestAccounts`).
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError>;

    /// Accounts already authorized, without prompting (`eth_accounts`).
    async fn accounts(&self) -> Result<Vec<Address>, WalletError>;

    /// Chain the wallet is currently on.
    async fn chain_id(&self) -> Result<u64, WalletError>;

    /// `wallet_switchEthereumChain`; code 4902 when the chain is unknown.
    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError>;

    /// `wallet_addEthereumChain`.
    async fn add_chain(&self, spec: &ChainSpec) -> Result<(), WalletError>;

    /// Signs and submits; resolves once the wallet accepted the transaction.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<H256, WalletError>;

    /// The wallet's own read connection on its current chain.
    fn provider(&self) -> Arc<dyn ChainReader>;

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}
