// src/main.rs

use std::env;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use injective_counter::{
    config::Config, console, session::SessionController, wallet::LocalKeyWallet, AppState,
};
use tokio::io::{self, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

async fn build_state() -> Result<AppState> {
    let config = Config::from_env()?;

    let private_key = config
        .tx_private_key
        .clone()
        .ok_or_else(|| anyhow!("TX_PRIVATE_KEY must be set to sign counter transactions"))?;

    // The wallet starts on WALLET_RPC_URL when given, so the switch/add-chain
    // path can be exercised against another network.
    let wallet_url = match env::var("WALLET_RPC_URL") {
        Ok(raw) => Url::parse(&raw).context("WALLET_RPC_URL must be a valid URL")?,
        Err(_) => config
            .chain
            .rpc_endpoints
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("No RPC endpoint configured"))?,
    };

    let wallet = LocalKeyWallet::connect(&private_key, wallet_url, config.wallet_timeout)
        .await
        .context("Failed to open local wallet")?;
    info!("Using local wallet {:?}", wallet.address());

    let session = SessionController::new(&config, Arc::new(wallet));
    Ok(AppState { config, session })
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "injective_counter=debug,counter_console=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let state = match build_state().await {
        Ok(state) => state,
        Err(e) => {
            error!("❌ Failed to start: {:#}", e);
            return;
        }
    };

    let _listener = state.session.listen();
    if let Err(e) = state.session.restore().await {
        warn!("Could not restore wallet session: {}", e);
    }

    info!("🚀 Counter console ready on stdin/stdout");
    console::serve(BufReader::new(io::stdin()), io::stdout(), state).await;
    info!("Console shutting down");
}
