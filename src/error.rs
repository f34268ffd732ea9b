// src/error.rs

use thiserror::Error;

use crate::session::Action;

/// EIP-1193 provider error codes the session reacts to.
pub mod wallet_codes {
    pub const USER_REJECTED_REQUEST: i64 = 4001;
    pub const DISCONNECTED: i64 = 4900;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Failure reported by the wallet provider boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("wallet error {code}: {message}")]
pub struct WalletError {
    pub code: i64,
    pub message: String,
}

impl WalletError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(wallet_codes::USER_REJECTED_REQUEST, "User rejected the request")
    }

    pub fn unrecognized_chain(chain_id: u64) -> Self {
        Self::new(
            wallet_codes::UNRECOGNIZED_CHAIN,
            format!("Unrecognized chain ID {:#x}", chain_id),
        )
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == wallet_codes::USER_REJECTED_REQUEST
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == wallet_codes::UNRECOGNIZED_CHAIN
    }
}

/// Every failure the session and call layers surface to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("wallet unavailable: {0}")]
    WalletUnavailable(String),
    #[error("request rejected by user")]
    UserRejected,
    #[error("wallet is on chain {actual}, expected {expected}")]
    NetworkMismatch { expected: u64, actual: u64 },
    #[error("network switch failed: {0}")]
    SwitchFailed(String),
    #[error("wallet does not know chain {0}")]
    UnknownChain(u64),
    #[error("read failed: {0}")]
    ReadError(String),
    #[error("decode failed: {0}")]
    DecodeError(String),
    #[error("transaction rejected: {0}")]
    WriteRejected(String),
    #[error("{0} already in progress")]
    Busy(Action),
    #[error("session is not ready")]
    NotReady,
    #[error("only the contract owner can reset the counter")]
    Forbidden,
    #[error("no read provider available")]
    NoProviderAvailable,
    #[error("executor cannot sign transactions")]
    NotAuthorized,
    #[error("network changed while the call was pending")]
    NetworkChanged,
    #[error("counter is already zero")]
    BelowZero,
}

impl SessionError {
    /// Failures worth retrying as-is, as opposed to actions that are not permitted.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::WalletUnavailable(_)
                | SessionError::SwitchFailed(_)
                | SessionError::UnknownChain(_)
                | SessionError::ReadError(_)
                | SessionError::NoProviderAvailable
                | SessionError::NetworkChanged
                | SessionError::Busy(_)
        )
    }

    /// Human-readable status line for the UI.
    pub fn status_message(&self) -> String {
        let hint = if self.is_transient() {
            "please retry"
        } else {
            "action not permitted"
        };
        match self {
            SessionError::WalletUnavailable(_) => {
                format!("No wallet available ({}). Install or unlock a wallet.", hint)
            }
            SessionError::UserRejected => "Request rejected in wallet.".to_string(),
            SessionError::NetworkMismatch { expected, .. } => {
                format!("Please switch to chain {} in your wallet.", expected)
            }
            other => format!("{} ({})", capitalize(&other.to_string()), hint),
        }
    }

    /// Maps a failed `wallet_switchEthereumChain`; only an unknown chain is
    /// recoverable by adding it first.
    pub fn from_switch(err: WalletError, chain_id: u64) -> Self {
        if err.is_unrecognized_chain() {
            SessionError::UnknownChain(chain_id)
        } else {
            SessionError::SwitchFailed(err.message)
        }
    }

    /// Maps a wallet failure on a generic request.
    pub fn from_wallet(err: WalletError) -> Self {
        if err.is_user_rejection() {
            SessionError::UserRejected
        } else {
            SessionError::WalletUnavailable(err.message)
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_rejection_maps_to_user_rejected() {
        let err = SessionError::from_wallet(WalletError::user_rejected());
        assert_eq!(err, SessionError::UserRejected);
    }

    #[test]
    fn status_message_tells_retry_from_not_permitted() {
        let transient = SessionError::ReadError("timeout".into()).status_message();
        let refused = SessionError::Forbidden.status_message();

        assert!(transient.contains("please retry"));
        assert!(refused.contains("action not permitted"));
        assert!(refused.starts_with("Only the contract owner"));
    }

    #[test]
    fn unrecognized_chain_code() {
        let err = WalletError::unrecognized_chain(1439);
        assert!(err.is_unrecognized_chain());
        assert!(err.message.contains("0x59f"));
    }

    #[test]
    fn only_unknown_chain_switch_failure_is_recoverable() {
        assert_eq!(
            SessionError::from_switch(WalletError::unrecognized_chain(1439), 1439),
            SessionError::UnknownChain(1439)
        );
        assert!(matches!(
            SessionError::from_switch(WalletError::user_rejected(), 1439),
            SessionError::SwitchFailed(_)
        ));
    }
}
