//! Wallet/network session state machine.
//!
//! Every input (user connect/disconnect, wallet account or chain
//! notifications) takes a fresh sequence number. Async work started for an
//! older number is discarded when it completes, so only the latest input can
//! commit a contract handle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers_core::types::{Address, U256};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::blockchain::abi::{ContractMethod, ReadOutput};
use crate::blockchain::contract::{ContractClient, ContractEvent, ContractHandle, Executor};
use crate::blockchain::provider_pool::ReadProviderPool;
use crate::config::{ChainSpec, Config};
use crate::error::{wallet_codes, SessionError, WalletError};
use crate::session::coordinator::{CallCoordinator, ReadyView};
use crate::session::state::{Action, PendingCall, Session, SessionStatus};
use crate::wallet::{WalletEvent, WalletProvider};

pub(crate) struct SessionInner {
    session: Session,
    handle: Option<ContractHandle>,
    owner: Option<Address>,
    /// Latest input sequence number.
    seq: u64,
    /// Sequence number of the committed Ready session.
    epoch: Option<u64>,
    last_error: Option<SessionError>,
}

impl SessionInner {
    pub(crate) fn ready_view(&self) -> Option<ReadyView<'_>> {
        if !self.session.is_ready() {
            return None;
        }
        Some(ReadyView {
            handle: self.handle.as_ref()?,
            account: self.session.account?,
            owner: self.owner,
        })
    }
}

struct NetworkCheckFailure {
    observed: Option<u64>,
    error: SessionError,
}

/// Aborts the wallet notification pump when dropped.
pub struct WalletListener {
    task: JoinHandle<()>,
}

impl Drop for WalletListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct SessionController {
    chain: ChainSpec,
    wallet: Arc<dyn WalletProvider>,
    contracts: ContractClient,
    pool: ReadProviderPool,
    coordinator: CallCoordinator,
    wallet_timeout: Duration,
    inner: Arc<Mutex<SessionInner>>,
    updates: Arc<watch::Sender<Session>>,
}

impl SessionController {
    pub fn new(config: &Config, wallet: Arc<dyn WalletProvider>) -> Self {
        let contracts = ContractClient::new(config.contract_address, config.poll_interval);
        let (updates, _) = watch::channel(Session::disconnected());
        Self {
            chain: config.chain.clone(),
            wallet,
            pool: ReadProviderPool::new(config.chain.clone(), config.probe_timeout),
            coordinator: CallCoordinator::new(contracts.clone(), config.finality_timeout),
            contracts,
            wallet_timeout: config.wallet_timeout,
            inner: Arc::new(Mutex::new(SessionInner {
                session: Session::disconnected(),
                handle: None,
                owner: None,
                seq: 0,
                epoch: None,
                last_error: None,
            })),
            updates: Arc::new(updates),
        }
    }

    pub async fn session(&self) -> Session {
        self.inner.lock().await.session.clone()
    }

    pub async fn last_error(&self) -> Option<SessionError> {
        self.inner.lock().await.last_error.clone()
    }

    /// Cached contract owner of the current Ready session.
    pub async fn owner(&self) -> Option<Address> {
        self.inner.lock().await.owner
    }

    pub async fn has_contract_handle(&self) -> bool {
        self.inner.lock().await.handle.is_some()
    }

    pub fn watch(&self) -> watch::Receiver<Session> {
        self.updates.subscribe()
    }

    pub fn coordinator(&self) -> &CallCoordinator {
        &self.coordinator
    }

    pub fn contracts(&self) -> &ContractClient {
        &self.contracts
    }

    pub(crate) async fn lock_inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().await
    }

    pub async fn trigger(&self, action: Action) -> Result<PendingCall, SessionError> {
        self.coordinator.trigger(self, action).await
    }

    // --- User intents ---

    /// Prompts the wallet for accounts and brings the session to Ready, or to
    /// WrongNetwork when the wallet cannot be moved to the target chain.
    pub async fn connect(&self) -> Result<Session, SessionError> {
        let seq = {
            let mut inner = self.inner.lock().await;
            if inner.session.is_ready() {
                return Ok(inner.session.clone());
            }
            inner.seq += 1;
            inner.last_error = None;
            self.transition(&mut inner, SessionStatus::Connecting, SessionError::NotReady)
                .await;
            inner.seq
        };

        info!("Requesting wallet accounts");
        let accounts = match self
            .timed("eth_requestAccounts", self.wallet.request_accounts())
            .await
        {
            Ok(accounts) => accounts,
            Err(e) => return self.fail_connect(seq, SessionError::from_wallet(e)).await,
        };
        let Some(account) = accounts.first().copied() else {
            let err = SessionError::WalletUnavailable("wallet returned no accounts".to_string());
            return self.fail_connect(seq, err).await;
        };

        self.evaluate(seq, account).await
    }

    /// Picks up an already authorized wallet without prompting.
    pub async fn restore(&self) -> Result<Session, SessionError> {
        let accounts = self
            .timed("eth_accounts", self.wallet.accounts())
            .await
            .map_err(SessionError::from_wallet)?;
        if accounts.is_empty() {
            return Ok(self.session().await);
        }
        self.on_accounts_changed(accounts).await
    }

    /// Idempotent; cancels any in-flight connect or network check.
    pub async fn disconnect(&self) -> Session {
        let mut inner = self.inner.lock().await;
        inner.seq += 1;
        inner.session.account = None;
        inner.session.chain_id = None;
        inner.last_error = None;
        self.transition(&mut inner, SessionStatus::Disconnected, SessionError::NotReady)
            .await;
        info!("Session disconnected");
        inner.session.clone()
    }

    // --- Wallet notifications ---

    pub async fn on_accounts_changed(&self, accounts: Vec<Address>) -> Result<Session, SessionError> {
        let (seq, account) = {
            let mut inner = self.inner.lock().await;
            inner.seq += 1;
            match accounts.first().copied() {
                None => {
                    info!("Wallet reports no accounts");
                    inner.session.account = None;
                    self.transition(&mut inner, SessionStatus::Disconnected, SessionError::NotReady)
                        .await;
                    return Ok(inner.session.clone());
                }
                Some(account) => {
                    if inner.session.is_ready() && inner.session.account == Some(account) {
                        debug!("Account {:?} unchanged, session stays ready", account);
                        return Ok(inner.session.clone());
                    }
                    (inner.seq, account)
                }
            }
        };
        info!("Active account is now {:?}", account);
        self.evaluate(seq, account).await
    }

    pub async fn on_chain_changed(&self, chain_id: u64) -> Result<Session, SessionError> {
        let (seq, account) = {
            let mut inner = self.inner.lock().await;
            let previous = inner.session.chain_id.replace(chain_id);
            info!("Wallet chain changed to {}", chain_id);

            // Without an account there is no session to re-evaluate; a connect
            // in flight will read the chain itself.
            let Some(account) = inner.session.account else {
                return Ok(inner.session.clone());
            };
            inner.seq += 1;

            if !self.chain.matches(chain_id) {
                self.transition(&mut inner, SessionStatus::WrongNetwork, SessionError::NetworkChanged)
                    .await;
                inner.last_error = Some(SessionError::NetworkMismatch {
                    expected: self.chain.chain_id,
                    actual: chain_id,
                });
                return Ok(inner.session.clone());
            }
            if inner.session.is_ready() && previous == Some(chain_id) {
                return Ok(inner.session.clone());
            }
            self.transition(&mut inner, SessionStatus::Connecting, SessionError::NetworkChanged)
                .await;
            (inner.seq, account)
        };
        self.enter_ready(seq, account, chain_id).await
    }

    /// Pumps wallet notifications into the controller in arrival order.
    pub fn listen(&self) -> WalletListener {
        let mut events = self.wallet.subscribe();
        let controller = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let result = match events.recv().await {
                    Ok(WalletEvent::AccountsChanged(accounts)) => {
                        controller.on_accounts_changed(accounts).await
                    }
                    Ok(WalletEvent::ChainChanged(chain_id)) => {
                        controller.on_chain_changed(chain_id).await
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} wallet notifications, re-syncing", missed);
                        controller.restore().await
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Err(e) = result {
                    warn!("Wallet notification left session degraded: {}", e);
                }
            }
            debug!("Wallet notification stream closed");
        });
        WalletListener { task }
    }

    // --- Reads ---

    /// Re-reads the counter for the current Ready session.
    pub async fn refresh(&self) -> Result<U256, SessionError> {
        let (handle, epoch) = {
            let inner = self.inner.lock().await;
            match (&inner.handle, inner.epoch) {
                (Some(handle), Some(epoch)) if inner.session.is_ready() => (handle.clone(), epoch),
                _ => return Err(SessionError::NotReady),
            }
        };
        let value = self.read_value(&handle).await?;
        self.coordinator.update_value(epoch, value).await;
        Ok(value)
    }

    /// Reads through the handle, then once through the read endpoints.
    async fn read_with_fallback(
        &self,
        handle: &ContractHandle,
        method: ContractMethod,
    ) -> Result<ReadOutput, SessionError> {
        match self.contracts.read(handle, method).await {
            Err(SessionError::ReadError(reason)) => {
                warn!(
                    "Primary read of {} failed ({}), trying read endpoints",
                    method.signature(),
                    reason
                );
                let provider = self.pool.resolve().await?;
                let fallback = self
                    .contracts
                    .bind(Some(Executor::ReadOnly(Arc::new(provider))))?;
                self.contracts.read(&fallback, method).await
            }
            other => other,
        }
    }

    async fn read_value(&self, handle: &ContractHandle) -> Result<U256, SessionError> {
        self.read_with_fallback(handle, ContractMethod::GetValue)
            .await?
            .into_uint()
    }

    async fn read_owner(&self, handle: &ContractHandle) -> Result<Address, SessionError> {
        self.read_with_fallback(handle, ContractMethod::Owner)
            .await?
            .into_address()
    }

    // --- Transitions ---

    async fn evaluate(&self, seq: u64, account: Address) -> Result<Session, SessionError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.seq != seq {
                debug!("Skipping superseded network check {}", seq);
                return Ok(inner.session.clone());
            }
            inner.session.account = Some(account);
            self.transition(&mut inner, SessionStatus::Connecting, SessionError::NetworkChanged)
                .await;
        }

        match self.ensure_network().await {
            Ok(chain_id) => self.enter_ready(seq, account, chain_id).await,
            Err(failure) => self.enter_wrong_network(seq, failure).await,
        }
    }

    /// Moves the wallet onto the target chain if needed: switch, and on an
    /// unknown-chain answer add the chain and retry the switch once.
    async fn ensure_network(&self) -> Result<u64, NetworkCheckFailure> {
        let current = self
            .timed("eth_chainId", self.wallet.chain_id())
            .await
            .map_err(|e| NetworkCheckFailure {
                observed: None,
                error: SessionError::from_wallet(e),
            })?;
        if self.chain.matches(current) {
            return Ok(current);
        }

        let target = self.chain.chain_id;
        let switch_failed = |e: WalletError| NetworkCheckFailure {
            observed: Some(current),
            error: SessionError::SwitchFailed(e.message),
        };

        info!("Wallet on chain {}, requesting switch to {}", current, target);
        match self
            .timed("wallet_switchEthereumChain", self.wallet.switch_chain(target))
            .await
            .map_err(|e| SessionError::from_switch(e, target))
        {
            Ok(()) => {}
            Err(unknown @ SessionError::UnknownChain(_)) => {
                warn!("{}, adding it", unknown);
                self.timed("wallet_addEthereumChain", self.wallet.add_chain(&self.chain))
                    .await
                    .map_err(switch_failed)?;
                self.timed("wallet_switchEthereumChain", self.wallet.switch_chain(target))
                    .await
                    .map_err(switch_failed)?;
            }
            Err(error) => {
                return Err(NetworkCheckFailure {
                    observed: Some(current),
                    error,
                })
            }
        }

        let switched = self
            .timed("eth_chainId", self.wallet.chain_id())
            .await
            .map_err(switch_failed)?;
        if self.chain.matches(switched) {
            Ok(switched)
        } else {
            Err(NetworkCheckFailure {
                observed: Some(switched),
                error: SessionError::NetworkMismatch {
                    expected: target,
                    actual: switched,
                },
            })
        }
    }

    async fn enter_ready(
        &self,
        seq: u64,
        account: Address,
        chain_id: u64,
    ) -> Result<Session, SessionError> {
        let handle = self
            .contracts
            .bind(Some(Executor::signer(self.wallet.clone(), account)))?;

        let owner = match self.read_owner(&handle).await {
            Ok(owner) => Some(owner),
            Err(e) => {
                warn!("Could not read contract owner: {}", e);
                None
            }
        };
        let value = self.read_value(&handle).await;
        let from_block = match handle.executor().reader().block_number().await {
            Ok(block) => Some(block + 1),
            Err(e) => {
                debug!("Subscribing from latest block: {}", e);
                None
            }
        };

        let mut inner = self.inner.lock().await;
        if inner.seq != seq {
            debug!("Discarding superseded bind {}", seq);
            return Ok(inner.session.clone());
        }

        inner.session.account = Some(account);
        inner.session.chain_id = Some(chain_id);
        self.contracts.subscribe(
            &handle,
            ContractEvent::ValueChanged,
            from_block,
            self.coordinator.listener(seq),
        );
        inner.handle = Some(handle);
        inner.owner = owner;
        inner.epoch = Some(seq);
        inner.last_error = value.as_ref().err().cloned();
        self.coordinator.open(seq, value).await;

        inner.session.status = SessionStatus::Ready;
        self.updates.send_replace(inner.session.clone());
        info!("Session ready for {:?} on chain {}", account, chain_id);
        Ok(inner.session.clone())
    }

    async fn enter_wrong_network(
        &self,
        seq: u64,
        failure: NetworkCheckFailure,
    ) -> Result<Session, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.seq != seq {
            debug!("Discarding superseded network check {}", seq);
            return Ok(inner.session.clone());
        }
        if failure.observed.is_some() {
            inner.session.chain_id = failure.observed;
        }
        self.transition(&mut inner, SessionStatus::WrongNetwork, SessionError::NetworkChanged)
            .await;
        warn!("Session on wrong network: {}", failure.error);
        inner.last_error = Some(failure.error.clone());
        Err(failure.error)
    }

    async fn fail_connect(&self, seq: u64, err: SessionError) -> Result<Session, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.seq == seq {
            warn!("Connect failed: {}", err);
            inner.session.account = None;
            inner.last_error = Some(err.clone());
            self.transition(&mut inner, SessionStatus::Disconnected, SessionError::NotReady)
                .await;
        }
        Err(err)
    }

    /// Sets `status`, tearing the Ready session down first if there is one.
    async fn transition(&self, inner: &mut SessionInner, status: SessionStatus, reason: SessionError) {
        if let Some(handle) = inner.handle.take() {
            self.contracts.unsubscribe_all(&handle);
            debug!("Tore down contract handle {}", handle.id());
        }
        inner.owner = None;
        inner.epoch = None;
        self.coordinator.close(reason).await;

        inner.session.status = status;
        self.updates.send_replace(inner.session.clone());
    }

    async fn timed<T>(
        &self,
        what: &str,
        request: impl Future<Output = Result<T, WalletError>>,
    ) -> Result<T, WalletError> {
        tokio::time::timeout(self.wallet_timeout, request)
            .await
            .unwrap_or_else(|_| {
                Err(WalletError::new(
                    wallet_codes::DISCONNECTED,
                    format!("{} timed out after {:?}", what, self.wallet_timeout),
                ))
            })
    }
}
