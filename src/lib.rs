// src/lib.rs

// Re-export commonly used types
pub use ethers::types::{Address, H256, U256};

pub mod blockchain;
pub mod config;
pub mod console;
pub mod error;
pub mod session;
pub mod wallet;

pub use config::{ChainSpec, Config};
pub use error::{SessionError, WalletError};
pub use session::{Action, SessionController, SessionStatus};

/// State shared with every console request.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: config::Config,
    /// Wallet session and the counter calls running on it
    pub session: session::SessionController,
}
