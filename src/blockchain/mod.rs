// src/blockchain/mod.rs

pub mod abi;
pub mod contract;
pub mod nonce_manager;
pub mod provider_pool;
pub mod rpc;

pub use contract::{ContractClient, ContractEvent, ContractHandle, Executor, PendingTx};
pub use provider_pool::ReadProviderPool;
pub use rpc::{ChainReader, RpcProvider};

// Re-export commonly used types
pub use ethers::types::{Address, H256, U256, U64};
