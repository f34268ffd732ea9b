//! Counter contract client.
//!
//! Binds the fixed contract address to an executor and exposes typed reads,
//! writes, finality tracking and `ValueChanged` subscriptions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers_core::types::{Address, Filter, TransactionRequest, H256};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::blockchain::abi::{
    decode_output, decode_value_changed, ContractMethod, ReadOutput, ValueChanged,
    VALUE_CHANGED_SIGNATURE,
};
use crate::blockchain::rpc::ChainReader;
use crate::error::SessionError;
use crate::wallet::WalletProvider;

/// Who executes calls on a bound handle.
#[derive(Clone)]
pub enum Executor {
    /// Wallet-backed; can read and write.
    Signer {
        wallet: Arc<dyn WalletProvider>,
        account: Address,
        reader: Arc<dyn ChainReader>,
    },
    /// Plain endpoint; reads only.
    ReadOnly(Arc<dyn ChainReader>),
}

impl Executor {
    pub fn signer(wallet: Arc<dyn WalletProvider>, account: Address) -> Self {
        let reader = wallet.provider();
        Executor::Signer {
            wallet,
            account,
            reader,
        }
    }

    pub fn reader(&self) -> &Arc<dyn ChainReader> {
        match self {
            Executor::Signer { reader, .. } => reader,
            Executor::ReadOnly(reader) => reader,
        }
    }

    pub fn is_signer(&self) -> bool {
        matches!(self, Executor::Signer { .. })
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Executor::Signer { account, .. } => write!(f, "Signer({:?})", account),
            Executor::ReadOnly(_) => write!(f, "ReadOnly"),
        }
    }
}

/// A bound, ready-to-call reference to the counter contract.
#[derive(Clone, Debug)]
pub struct ContractHandle {
    id: u64,
    address: Address,
    executor: Executor,
}

impl ContractHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Account of a signer-bound handle.
    pub fn account(&self) -> Option<Address> {
        match &self.executor {
            Executor::Signer { account, .. } => Some(*account),
            Executor::ReadOnly(_) => None,
        }
    }
}

/// Token for a write accepted by the wallet but not yet finalized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTx {
    pub tx_hash: H256,
    pub method: ContractMethod,
    pub submitted_at: DateTime<Utc>,
}

/// Contract events a handle can be subscribed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContractEvent {
    ValueChanged,
}

/// Invoked for every decoded (or undecodable) event.
pub type EventListener =
    Arc<dyn Fn(Result<ValueChanged, SessionError>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
pub struct ContractClient {
    address: Address,
    poll_interval: Duration,
    next_handle_id: Arc<AtomicU64>,
    subscriptions: Arc<DashMap<(u64, ContractEvent), JoinHandle<()>>>,
}

impl ContractClient {
    pub fn new(address: Address, poll_interval: Duration) -> Self {
        Self {
            address,
            poll_interval,
            next_handle_id: Arc::new(AtomicU64::new(1)),
            subscriptions: Arc::new(DashMap::new()),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Wraps an executor; no I/O.
    pub fn bind(&self, executor: Option<Executor>) -> Result<ContractHandle, SessionError> {
        let executor = executor
            .ok_or_else(|| SessionError::WalletUnavailable("no executor to bind".to_string()))?;
        Ok(ContractHandle {
            id: self.next_handle_id.fetch_add(1, Ordering::Relaxed),
            address: self.address,
            executor,
        })
    }

    /// Invokes a view method. Never retries; fallback is the caller's job.
    pub async fn read(
        &self,
        handle: &ContractHandle,
        method: ContractMethod,
    ) -> Result<ReadOutput, SessionError> {
        if !method.is_view() {
            return Err(SessionError::ReadError(format!(
                "{} is not a view method",
                method.signature()
            )));
        }
        let raw = handle
            .executor
            .reader()
            .call(handle.address, method.calldata())
            .await?;
        decode_output(method, &raw)
    }

    /// Submits a state-changing call and returns as soon as the wallet
    /// accepted it; finality is observed separately.
    pub async fn write(
        &self,
        handle: &ContractHandle,
        method: ContractMethod,
    ) -> Result<PendingTx, SessionError> {
        let (wallet, account) = match &handle.executor {
            Executor::Signer {
                wallet, account, ..
            } => (wallet, *account),
            Executor::ReadOnly(_) => return Err(SessionError::NotAuthorized),
        };
        if method.is_view() {
            return Err(SessionError::WriteRejected(format!(
                "{} is a view method",
                method.signature()
            )));
        }

        let tx = TransactionRequest::new()
            .from(account)
            .to(handle.address)
            .data(method.calldata());

        let tx_hash = wallet.send_transaction(tx).await.map_err(|e| {
            if e.is_user_rejection() {
                SessionError::UserRejected
            } else {
                SessionError::WriteRejected(e.message)
            }
        })?;

        info!("Submitted {} as {:?}", method.signature(), tx_hash);
        Ok(PendingTx {
            tx_hash,
            method,
            submitted_at: Utc::now(),
        })
    }

    /// Waits until the execution layer settles `pending`.
    pub async fn await_finality(
        &self,
        handle: &ContractHandle,
        pending: &PendingTx,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let reader = handle.executor.reader().clone();
        let poll = async {
            loop {
                match reader.receipt(pending.tx_hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => debug!("Receipt lookup for {:?} failed: {}", pending.tx_hash, e),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        let receipt = tokio::time::timeout(timeout, poll).await.map_err(|_| {
            SessionError::WriteRejected(format!(
                "{:?} not finalized within {:?}",
                pending.tx_hash, timeout
            ))
        })?;

        match receipt.status.map(|s| s.as_u64()) {
            Some(1) => Ok(()),
            _ => Err(SessionError::WriteRejected(format!(
                "{} reverted in {:?}",
                pending.method.signature(),
                pending.tx_hash
            ))),
        }
    }

    /// Registers the single listener for `(handle, event)`, replacing any
    /// previous one. Logs are polled from `from_block` onward, or from the
    /// block after the first one observed when `None`.
    pub fn subscribe(
        &self,
        handle: &ContractHandle,
        event: ContractEvent,
        from_block: Option<u64>,
        listener: EventListener,
    ) {
        self.unsubscribe(handle, event);

        let reader = handle.executor.reader().clone();
        let base_filter = Filter::new()
            .address(handle.address)
            .event(VALUE_CHANGED_SIGNATURE);
        let interval = self.poll_interval;
        let handle_id = handle.id;

        let task = tokio::spawn(async move {
            let mut cursor = from_block;
            loop {
                match (reader.block_number().await, cursor) {
                    (Ok(latest), None) => cursor = Some(latest + 1),
                    (Ok(latest), Some(from)) if latest >= from => {
                        let filter = base_filter.clone().from_block(from).to_block(latest);
                        match reader.logs(&filter).await {
                            Ok(logs) => {
                                for log in &logs {
                                    listener(decode_value_changed(log)).await;
                                }
                                cursor = Some(latest + 1);
                            }
                            Err(e) => warn!("Log poll for handle {} failed: {}", handle_id, e),
                        }
                    }
                    (Ok(_), Some(_)) => {}
                    (Err(e), _) => warn!("Block poll for handle {} failed: {}", handle_id, e),
                }
                tokio::time::sleep(interval).await;
            }
        });

        debug!("Subscribed handle {} to {:?}", handle.id, event);
        self.subscriptions.insert((handle.id, event), task);
    }

    /// No-op when nothing is registered.
    pub fn unsubscribe(&self, handle: &ContractHandle, event: ContractEvent) {
        if let Some((_, task)) = self.subscriptions.remove(&(handle.id, event)) {
            task.abort();
            debug!("Unsubscribed handle {} from {:?}", handle.id, event);
        }
    }

    pub fn unsubscribe_all(&self, handle: &ContractHandle) {
        self.unsubscribe(handle, ContractEvent::ValueChanged);
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }
}
