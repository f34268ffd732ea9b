// src/session/coordinator.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ethers_core::types::{Address, H256, U256};
use futures::FutureExt;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blockchain::abi::{narrow, ValueChanged};
use crate::blockchain::contract::{ContractClient, ContractHandle, EventListener};
use crate::error::SessionError;
use crate::session::controller::SessionController;
use crate::session::state::{Action, CallStatus, PendingCall};

pub const STATUS_PROCESSING: &str = "Transaction processing...";
pub const STATUS_SUCCEEDED: &str = "Transaction succeeded!";

/// What the UI needs to render the counter panel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Last value read or confirmed by an event; `None` outside a Ready session.
    pub value: Option<U256>,
    pub calls: Vec<PendingCall>,
    pub status: Option<String>,
    pub error: Option<SessionError>,
}

impl CounterSnapshot {
    pub fn display_value(&self) -> Result<Option<u64>, SessionError> {
        self.value.map(narrow).transpose()
    }

    pub fn is_busy(&self, action: Action) -> bool {
        self.calls
            .iter()
            .any(|c| c.action == action && c.is_submitted())
    }

    pub fn call(&self, action: Action) -> Option<&PendingCall> {
        self.calls.iter().find(|c| c.action == action)
    }
}

/// View of a Ready session, borrowed for one admission decision.
pub(crate) struct ReadyView<'a> {
    pub handle: &'a ContractHandle,
    pub account: Address,
    pub owner: Option<Address>,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    /// Ready session whose events may update this state.
    epoch: Option<u64>,
    value: Option<U256>,
    /// Latest call per action.
    calls: HashMap<Action, PendingCall>,
    status: Option<String>,
    error: Option<SessionError>,
}

impl CoordinatorState {
    fn snapshot(&self) -> CounterSnapshot {
        let mut calls: Vec<PendingCall> = self.calls.values().cloned().collect();
        calls.sort_by_key(|c| c.submitted_at);
        CounterSnapshot {
            value: self.value,
            calls,
            status: self.status.clone(),
            error: self.error.clone(),
        }
    }

    /// Applies the admission rules and registers the call as Submitted.
    fn admit(
        &mut self,
        ready: Option<ReadyView<'_>>,
        action: Action,
    ) -> Result<(ContractHandle, PendingCall), SessionError> {
        if self.calls.get(&action).is_some_and(PendingCall::is_submitted) {
            return Err(SessionError::Busy(action));
        }
        let ready = ready.ok_or(SessionError::NotReady)?;
        if action == Action::Reset && ready.owner != Some(ready.account) {
            return Err(SessionError::Forbidden);
        }
        // Mirrors the contract's own guard so the call is never sent. An
        // unknown value is left to the contract.
        if action == Action::Decrement && self.value.is_some_and(|v| v.is_zero()) {
            return Err(SessionError::BelowZero);
        }

        let call = PendingCall::new(action);
        self.calls.insert(action, call.clone());
        self.status = Some(STATUS_PROCESSING.to_string());
        self.error = None;
        Ok((ready.handle.clone(), call))
    }

    fn fail(&mut self, id: Uuid, action: Action, err: SessionError) {
        if let Some(call) = self.calls.get_mut(&action) {
            if call.id == id && call.is_submitted() {
                call.status = CallStatus::Failed(err.clone());
                self.status = None;
                self.error = Some(err);
            }
        }
    }

    /// Confirms the call a `ValueChanged` settles: the one whose transaction
    /// emitted it, otherwise the oldest still submitted.
    fn confirm(&mut self, tx_hash: Option<H256>) -> Option<Action> {
        let by_hash = tx_hash.and_then(|hash| {
            self.calls
                .values()
                .find(|c| c.is_submitted() && c.tx_hash == Some(hash))
        });
        let action = by_hash
            .or_else(|| {
                self.calls
                    .values()
                    .filter(|c| c.is_submitted())
                    .min_by_key(|c| c.submitted_at)
            })
            .map(|c| c.action)?;
        if let Some(call) = self.calls.get_mut(&action) {
            call.status = CallStatus::Confirmed;
        }
        Some(action)
    }
}

/// Serializes state-changing calls per action and resolves the counter from
/// confirmed events.
#[derive(Clone)]
pub struct CallCoordinator {
    contracts: ContractClient,
    finality_timeout: Duration,
    state: Arc<Mutex<CoordinatorState>>,
    updates: Arc<watch::Sender<CounterSnapshot>>,
}

impl CallCoordinator {
    pub fn new(contracts: ContractClient, finality_timeout: Duration) -> Self {
        let (updates, _) = watch::channel(CounterSnapshot::default());
        Self {
            contracts,
            finality_timeout,
            state: Arc::new(Mutex::new(CoordinatorState::default())),
            updates: Arc::new(updates),
        }
    }

    pub async fn snapshot(&self) -> CounterSnapshot {
        self.state.lock().await.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<CounterSnapshot> {
        self.updates.subscribe()
    }

    fn publish(&self, state: &CoordinatorState) {
        self.updates.send_replace(state.snapshot());
    }

    /// Runs one user action end to end: admission, submission, finality.
    ///
    /// The returned call stays `Submitted` until the matching `ValueChanged`
    /// arrives, unless the event was already seen. A call abandoned by a
    /// teardown returns the teardown reason.
    pub async fn trigger(
        &self,
        session: &SessionController,
        action: Action,
    ) -> Result<PendingCall, SessionError> {
        let (handle, call) = {
            let inner = session.lock_inner().await;
            let mut state = self.state.lock().await;
            let admitted = state.admit(inner.ready_view(), action);
            if let Err(e) = &admitted {
                debug!("Rejected {}: {}", action, e);
            }
            let admitted = admitted?;
            self.publish(&state);
            admitted
        };

        info!("Submitting {}", action);
        let pending = match self.contracts.write(&handle, action.method()).await {
            Ok(p) => p,
            Err(e) => {
                warn!("{} was not submitted: {}", action, e);
                self.fail(call.id, action, e.clone()).await;
                return Err(e);
            }
        };

        {
            let mut state = self.state.lock().await;
            if let Some(c) = state.calls.get_mut(&action) {
                if c.id == call.id {
                    c.tx_hash = Some(pending.tx_hash);
                }
            }
            self.publish(&state);
        }

        if let Err(e) = self
            .contracts
            .await_finality(&handle, &pending, self.finality_timeout)
            .await
        {
            warn!("{} failed to finalize: {}", action, e);
            self.fail(call.id, action, e.clone()).await;
            return Err(e);
        }
        debug!("{} finalized in {:?}", action, pending.tx_hash);

        let state = self.state.lock().await;
        let call = state
            .calls
            .get(&action)
            .filter(|c| c.id == call.id)
            .cloned()
            .unwrap_or(call);
        // The session may have been torn down while the transaction settled.
        match &call.status {
            CallStatus::Failed(e) => Err(e.clone()),
            _ => Ok(call),
        }
    }

    async fn fail(&self, id: Uuid, action: Action, err: SessionError) {
        let mut state = self.state.lock().await;
        state.fail(id, action, err);
        self.publish(&state);
    }

    /// Listener for `ValueChanged` delivered to the Ready session `epoch`.
    pub fn listener(&self, epoch: u64) -> EventListener {
        let coordinator = self.clone();
        Arc::new(move |event: Result<ValueChanged, SessionError>| {
            let coordinator = coordinator.clone();
            async move { coordinator.on_value_changed(epoch, event).await }.boxed()
        })
    }

    pub async fn on_value_changed(&self, epoch: u64, event: Result<ValueChanged, SessionError>) {
        let mut state = self.state.lock().await;
        if state.epoch != Some(epoch) {
            debug!("Dropping ValueChanged for closed session {}", epoch);
            return;
        }
        match event {
            Ok(event) => {
                info!("ValueChanged({})", event.new_value);
                state.value = Some(event.new_value);
                if let Some(action) = state.confirm(event.tx_hash) {
                    debug!("{} confirmed", action);
                    state.status = Some(STATUS_SUCCEEDED.to_string());
                }
            }
            Err(e) => {
                warn!("Undecodable ValueChanged: {}", e);
                state.error = Some(e);
            }
        }
        self.publish(&state);
    }

    /// Starts a Ready session, seeding the counter from a fresh read.
    pub(crate) async fn open(&self, epoch: u64, value: Result<U256, SessionError>) {
        let mut state = self.state.lock().await;
        state.epoch = Some(epoch);
        state.status = None;
        match value {
            Ok(v) => {
                state.value = Some(v);
                state.error = None;
            }
            Err(e) => {
                state.value = None;
                state.error = Some(e);
            }
        }
        self.publish(&state);
    }

    /// Ends the Ready session; submitted calls fail with `reason`.
    pub(crate) async fn close(&self, reason: SessionError) {
        let mut state = self.state.lock().await;
        if state.epoch.take().is_none() && !state.calls.values().any(PendingCall::is_submitted) {
            return;
        }
        for call in state.calls.values_mut().filter(|c| c.is_submitted()) {
            warn!("{} abandoned: {}", call.action, reason);
            call.status = CallStatus::Failed(reason.clone());
        }
        state.value = None;
        state.status = None;
        self.publish(&state);
    }

    pub(crate) async fn update_value(&self, epoch: u64, value: U256) {
        let mut state = self.state.lock().await;
        if state.epoch == Some(epoch) {
            state.value = Some(value);
            self.publish(&state);
        }
    }
}
