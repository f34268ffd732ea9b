// src/session/state.rs

use std::fmt;

use chrono::{DateTime, Utc};
use ethers_core::types::{Address, H256};
use serde::Serialize;
use uuid::Uuid;

use crate::blockchain::abi::ContractMethod;
use crate::error::SessionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Disconnected,
    /// Account request or network check in flight.
    Connecting,
    WrongNetwork,
    Ready,
}

/// Connected account, observed chain and the readiness derived from both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Session {
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    pub status: SessionStatus,
}

impl Session {
    pub fn disconnected() -> Self {
        Self {
            account: None,
            chain_id: None,
            status: SessionStatus::Disconnected,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == SessionStatus::Ready
    }

    /// `0x1234...abcd`, as shown next to the disconnect button.
    pub fn short_account(&self) -> Option<String> {
        self.account.map(|a| {
            let full = format!("{:?}", a);
            format!("{}...{}", &full[..6], &full[full.len() - 4..])
        })
    }
}

/// User-triggered state-changing actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Action {
    Increment,
    Decrement,
    Reset,
}

impl Action {
    pub fn method(&self) -> ContractMethod {
        match self {
            Action::Increment => ContractMethod::Increment,
            Action::Decrement => ContractMethod::Decrement,
            Action::Reset => ContractMethod::Reset,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Increment => "increment",
            Action::Decrement => "decrement",
            Action::Reset => "reset",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallStatus {
    Submitted,
    Confirmed,
    Failed(SessionError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCall {
    pub id: Uuid,
    pub action: Action,
    pub submitted_at: DateTime<Utc>,
    /// Set once the wallet accepted the transaction.
    pub tx_hash: Option<H256>,
    pub status: CallStatus,
}

impl PendingCall {
    pub fn new(action: Action) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            submitted_at: Utc::now(),
            tx_hash: None,
            status: CallStatus::Submitted,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.status == CallStatus::Submitted
    }
}
