// src/blockchain/provider_pool.rs

use std::time::Duration;

use tracing::{debug, warn};

use crate::blockchain::rpc::{ChainReader, RpcProvider};
use crate::config::ChainSpec;
use crate::error::SessionError;

/// Ordered fallback list of read-only endpoints.
///
/// Holds no state between calls: every `resolve` probes the endpoints again,
/// in configuration order, and hands out the first live one.
#[derive(Clone, Debug)]
pub struct ReadProviderPool {
    chain: ChainSpec,
    probe_timeout: Duration,
}

impl ReadProviderPool {
    pub fn new(chain: ChainSpec, probe_timeout: Duration) -> Self {
        Self {
            chain,
            probe_timeout,
        }
    }

    pub fn endpoints(&self) -> &[url::Url] {
        &self.chain.rpc_endpoints
    }

    /// Returns the first endpoint whose liveness probe succeeds.
    pub async fn resolve(&self) -> Result<RpcProvider, SessionError> {
        for url in &self.chain.rpc_endpoints {
            let provider = match RpcProvider::new(url.clone(), self.probe_timeout) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Skipping endpoint {}: {}", url, e);
                    continue;
                }
            };

            match self.probe(&provider).await {
                Ok(()) => {
                    debug!("Selected read endpoint {}", url);
                    return Ok(provider);
                }
                Err(e) => warn!("Read endpoint {} failed probe: {}", url, e),
            }
        }
        Err(SessionError::NoProviderAvailable)
    }

    async fn probe(&self, provider: &RpcProvider) -> Result<(), SessionError> {
        let chain_id = tokio::time::timeout(self.probe_timeout, provider.chain_id())
            .await
            .map_err(|_| SessionError::ReadError("probe timed out".to_string()))??;

        if !self.chain.matches(chain_id) {
            return Err(SessionError::NetworkMismatch {
                expected: self.chain.chain_id,
                actual: chain_id,
            });
        }
        Ok(())
    }
}
