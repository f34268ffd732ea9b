// src/session/mod.rs

pub mod controller;
pub mod coordinator;
pub mod state;

pub use controller::{SessionController, WalletListener};
pub use coordinator::{CallCoordinator, CounterSnapshot};
pub use state::{Action, CallStatus, PendingCall, Session, SessionStatus};
