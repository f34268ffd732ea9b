// src/blockchain/rpc.rs

use std::time::Duration;

use async_trait::async_trait;
use ethers_core::types::{Address, Bytes, Filter, Log, TransactionReceipt, H256, U64};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use url::Url;

use crate::error::SessionError;

/// Read access to a chain, either through the wallet's own connection or a
/// plain JSON-RPC endpoint.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn chain_id(&self) -> Result<u64, SessionError>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, SessionError>;

    async fn block_number(&self) -> Result<u64, SessionError>;

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, SessionError>;

    /// `None` while the transaction is still pending.
    async fn receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>, SessionError>;
}

/// JSON-RPC 2.0 client for a single HTTP endpoint.
#[derive(Clone, Debug)]
pub struct RpcProvider {
    url: Url,
    client: Client,
}

impl RpcProvider {
    /// Every request on this provider is bounded by `timeout`.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::ReadError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, SessionError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response: Value = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| SessionError::ReadError(format!("{} to {}: {}", method, self.url, e)))?
            .error_for_status()
            .map_err(|e| SessionError::ReadError(format!("{} to {}: {}", method, self.url, e)))?
            .json()
            .await
            .map_err(|e| SessionError::ReadError(format!("{} response: {}", method, e)))?;

        if let Some(error) = response.get("error") {
            return Err(SessionError::ReadError(format!("RPC Error in {}: {}", method, error)));
        }

        let result = response.get("result").cloned().unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| SessionError::DecodeError(format!("{} result: {}", method, e)))
    }

    /// Broadcasts an already signed transaction.
    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, SessionError> {
        self.request("eth_sendRawTransaction", json!([raw])).await
    }

    pub async fn transaction_count(&self, address: Address) -> Result<u64, SessionError> {
        let nonce: U64 = self
            .request("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        Ok(nonce.as_u64())
    }

    pub async fn gas_price(&self) -> Result<ethers_core::types::U256, SessionError> {
        self.request("eth_gasPrice", json!([])).await
    }

    pub async fn estimate_gas(&self, call: Value) -> Result<ethers_core::types::U256, SessionError> {
        self.request("eth_estimateGas", json!([call])).await
    }
}

#[async_trait]
impl ChainReader for RpcProvider {
    async fn chain_id(&self) -> Result<u64, SessionError> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.as_u64())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, SessionError> {
        self.request("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await
    }

    async fn block_number(&self) -> Result<u64, SessionError> {
        let number: U64 = self.request("eth_blockNumber", json!([])).await?;
        Ok(number.as_u64())
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, SessionError> {
        self.request("eth_getLogs", json!([filter])).await
    }

    async fn receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>, SessionError> {
        self.request("eth_getTransactionReceipt", json!([tx_hash]))
            .await
    }
}
