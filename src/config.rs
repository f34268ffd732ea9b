// src/config.rs

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use ethers::types::{Address, H160};
use secrecy::SecretString;
use serde_json::{json, Value};
use url::Url;

/// Chain id of the Injective EVM testnet.
pub const INJECTIVE_TESTNET_CHAIN_ID: u64 = 1439;

/// Deployed counter contract (0x7504970cf3Ae75F67323Fb5a81660EB3665dCF47).
pub const COUNTER_CONTRACT_ADDRESS: Address = H160([
    0x75, 0x04, 0x97, 0x0c, 0xf3, 0xae, 0x75, 0xf6, 0x73, 0x23, 0xfb, 0x5a, 0x81, 0x66, 0x0e,
    0xb3, 0x66, 0x5d, 0xcf, 0x47,
]);

const INJECTIVE_TESTNET_RPC: &str = "https://k8s.testnet.json-rpc.injective.network/";
const INJECTIVE_TESTNET_EXPLORER: &str = "https://testnet.blockscout.injective.network/";

/// Native currency of a chain, as wallets expect it in `wallet_addEthereumChain`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Static description of the chain the session must run on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainSpec {
    pub chain_id: u64,
    pub chain_name: String,
    /// Read endpoints, in fallback order.
    pub rpc_endpoints: Vec<Url>,
    pub native_currency: NativeCurrency,
    pub block_explorer_urls: Vec<Url>,
}

impl ChainSpec {
    pub fn injective_testnet() -> Self {
        Self {
            chain_id: INJECTIVE_TESTNET_CHAIN_ID,
            chain_name: "Injective Testnet".to_string(),
            rpc_endpoints: parse_urls(&[INJECTIVE_TESTNET_RPC]),
            native_currency: NativeCurrency {
                name: "INJ".to_string(),
                symbol: "INJ".to_string(),
                decimals: 18,
            },
            block_explorer_urls: parse_urls(&[INJECTIVE_TESTNET_EXPLORER]),
        }
    }

    /// True when a chain id reported by a wallet or endpoint is this chain.
    pub fn matches(&self, observed_chain_id: u64) -> bool {
        self.chain_id == observed_chain_id
    }

    /// Chain id in the `0x`-prefixed form used by EIP-1193 wallets.
    pub fn chain_id_hex(&self) -> String {
        format!("{:#x}", self.chain_id)
    }

    /// Parameters for `wallet_addEthereumChain` (EIP-3085).
    pub fn add_chain_params(&self) -> Value {
        json!({
            "chainId": self.chain_id_hex(),
            "chainName": self.chain_name,
            "nativeCurrency": {
                "name": self.native_currency.name,
                "symbol": self.native_currency.symbol,
                "decimals": self.native_currency.decimals,
            },
            "rpcUrls": self.rpc_endpoints.iter().map(Url::as_str).collect::<Vec<_>>(),
            "blockExplorerUrls": self.block_explorer_urls.iter().map(Url::as_str).collect::<Vec<_>>(),
        })
    }
}

// The literals above are known-good; anything unparsable is skipped.
fn parse_urls(raw: &[&str]) -> Vec<Url> {
    raw.iter().filter_map(|u| Url::parse(u).ok()).collect()
}

// A struct to hold all configuration, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Target chain; the session is only Ready on this chain.
    pub chain: ChainSpec,
    /// The counter contract every handle is bound to.
    pub contract_address: Address,

    // Timing
    /// Upper bound for one read-endpoint liveness probe.
    pub probe_timeout: Duration,
    /// Upper bound for wallet account and network-switch requests.
    pub wallet_timeout: Duration,
    /// How long a submitted write may take to be finalized.
    pub finality_timeout: Duration,
    /// Receipt and event polling cadence.
    pub poll_interval: Duration,

    // Console wallet
    pub tx_private_key: Option<SecretString>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain: ChainSpec::injective_testnet(),
            contract_address: COUNTER_CONTRACT_ADDRESS,
            probe_timeout: Duration::from_secs(5),
            wallet_timeout: Duration::from_secs(60),
            finality_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            tx_private_key: None,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Chain id and contract address are fixed; only endpoints, timings and
    /// the console signing key can be overridden.
    pub fn from_env() -> Result<Self> {
        // Load variables from the .env file into the environment
        dotenvy::dotenv().ok();

        let mut config = Config::default();

        if let Ok(raw) = env::var("CHAIN_RPC_URLS") {
            let urls: Vec<String> = serde_json::from_str(&raw)
                .context("CHAIN_RPC_URLS must be a JSON array of RPC URLs")?;
            config.chain.rpc_endpoints = urls
                .iter()
                .map(|u| Url::parse(u).with_context(|| format!("Invalid RPC URL: {}", u)))
                .collect::<Result<Vec<_>>>()?;
        }

        config.probe_timeout = duration_from_env("PROBE_TIMEOUT_MS", config.probe_timeout)?;
        config.wallet_timeout = duration_from_env("WALLET_TIMEOUT_MS", config.wallet_timeout)?;
        config.finality_timeout =
            duration_from_env("FINALITY_TIMEOUT_MS", config.finality_timeout)?;
        config.poll_interval = duration_from_env("POLL_INTERVAL_MS", config.poll_interval)?;
        config.tx_private_key = env::var("TX_PRIVATE_KEY").ok().map(SecretString::new);

        Ok(config)
    }
}

fn duration_from_env(key: &str, default: Duration) -> Result<Duration> {
    match env::var(key) {
        Ok(raw) => {
            let millis = raw
                .parse::<u64>()
                .with_context(|| format!("{} must be a number of milliseconds", key))?;
            Ok(Duration::from_millis(millis))
        }
        Err(_) => Ok(default),
    }
}
