//! In-memory wallet and counter chain used by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ethers_core::abi::{encode, Token};
use ethers_core::types::{
    Address, Bytes, Filter, Log, TransactionReceipt, TransactionRequest, H256, U256,
};
use tokio::sync::{broadcast, Notify};
use url::Url;

use injective_counter::blockchain::abi::{value_changed_topic, ContractMethod};
use injective_counter::blockchain::rpc::ChainReader;
use injective_counter::config::{ChainSpec, Config, COUNTER_CONTRACT_ADDRESS};
use injective_counter::error::{SessionError, WalletError};
use injective_counter::session::{CounterSnapshot, Session, SessionController};
use injective_counter::wallet::{WalletEvent, WalletProvider};

pub const TARGET_CHAIN: u64 = 1439;
pub const DEAD_ENDPOINT: &str = "http://127.0.0.1:1/";

pub fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

pub fn bob() -> Address {
    Address::repeat_byte(0xb0)
}

pub fn test_config(rpc_endpoints: &[&str]) -> Config {
    let mut chain = ChainSpec::injective_testnet();
    chain.rpc_endpoints = rpc_endpoints
        .iter()
        .map(|u| Url::parse(u).unwrap())
        .collect();
    Config {
        chain,
        contract_address: COUNTER_CONTRACT_ADDRESS,
        probe_timeout: Duration::from_millis(500),
        wallet_timeout: Duration::from_millis(500),
        finality_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(10),
        tx_private_key: None,
    }
}

// --- Fake chain ---

struct ChainState {
    value: U256,
    owner: Address,
    block: u64,
    next_tx: u64,
    logs: Vec<Log>,
    receipts: HashMap<H256, TransactionReceipt>,
    fail_reads: bool,
    revert_next: bool,
    leave_pending: bool,
}

/// Counter contract living in memory; every transaction mines one block.
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new(value: u64, owner: Address) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                value: U256::from(value),
                owner,
                block: 100,
                next_tx: 1,
                logs: Vec::new(),
                receipts: HashMap::new(),
                fail_reads: false,
                revert_next: false,
                leave_pending: false,
            }),
        })
    }

    pub fn value(&self) -> U256 {
        self.state.lock().unwrap().value
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    /// Transactions are accepted but never mined: no receipt, no log.
    pub fn leave_pending(&self) {
        self.state.lock().unwrap().leave_pending = true;
    }

    pub fn revert_next(&self) {
        self.state.lock().unwrap().revert_next = true;
    }

    fn execute(&self, method: ContractMethod) -> H256 {
        let mut state = self.state.lock().unwrap();
        let tx_hash = H256::from_low_u64_be(state.next_tx);
        state.next_tx += 1;
        if state.leave_pending {
            return tx_hash;
        }
        state.block += 1;
        let block = state.block;

        let reverted = std::mem::take(&mut state.revert_next)
            || (method == ContractMethod::Decrement && state.value.is_zero());
        if !reverted {
            state.value = match method {
                ContractMethod::Increment => state.value + 1,
                ContractMethod::Decrement => state.value - 1,
                ContractMethod::Reset => U256::zero(),
                _ => state.value,
            };
            let log = Log {
                address: COUNTER_CONTRACT_ADDRESS,
                topics: vec![value_changed_topic()],
                data: Bytes::from(encode(&[Token::Uint(state.value)])),
                block_number: Some(block.into()),
                transaction_hash: Some(tx_hash),
                ..Default::default()
            };
            state.logs.push(log);
        }

        let receipt = TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(block.into()),
            status: Some(if reverted { 0u64 } else { 1u64 }.into()),
            ..Default::default()
        };
        state.receipts.insert(tx_hash, receipt);
        tx_hash
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn chain_id(&self) -> Result<u64, SessionError> {
        Ok(TARGET_CHAIN)
    }

    async fn call(&self, _to: Address, data: Bytes) -> Result<Bytes, SessionError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(SessionError::ReadError("wallet RPC unreachable".to_string()));
        }
        let token = match ContractMethod::from_calldata(&data) {
            Some(ContractMethod::GetValue) => Token::Uint(state.value),
            Some(ContractMethod::Owner) => Token::Address(state.owner),
            _ => return Err(SessionError::ReadError("execution reverted".to_string())),
        };
        Ok(Bytes::from(encode(&[token])))
    }

    async fn block_number(&self) -> Result<u64, SessionError> {
        Ok(self.state.lock().unwrap().block)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, SessionError> {
        let from = filter.get_from_block().map(|b| b.as_u64()).unwrap_or(0);
        let to = filter.get_to_block().map(|b| b.as_u64()).unwrap_or(u64::MAX);
        let state = self.state.lock().unwrap();
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                let block = log.block_number.map(|b| b.as_u64()).unwrap_or(0);
                block >= from && block <= to
            })
            .cloned()
            .collect())
    }

    async fn receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>, SessionError> {
        Ok(self.state.lock().unwrap().receipts.get(&tx_hash).cloned())
    }
}

// --- Fake wallet ---

struct WalletState {
    accounts: Vec<Address>,
    chain_id: u64,
    known_chains: HashSet<u64>,
    switch_failures: VecDeque<WalletError>,
    add_failure: Option<WalletError>,
    reject_accounts: bool,
    reject_sends: bool,
    refuse_switches: bool,
}

/// Scriptable stand-in for an injected browser wallet.
pub struct FakeWallet {
    pub chain: Arc<FakeChain>,
    state: Mutex<WalletState>,
    calls: Mutex<Vec<&'static str>>,
    sends: AtomicUsize,
    send_gate: Mutex<Option<Arc<Notify>>>,
    switch_gate: Mutex<Option<Arc<Notify>>>,
    accounts_gate: Mutex<Option<Arc<Notify>>>,
    events: broadcast::Sender<WalletEvent>,
}

impl FakeWallet {
    pub fn new(chain: Arc<FakeChain>, account: Address, chain_id: u64) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            chain,
            state: Mutex::new(WalletState {
                accounts: vec![account],
                chain_id,
                known_chains: HashSet::from([chain_id]),
                switch_failures: VecDeque::new(),
                add_failure: None,
                reject_accounts: false,
                reject_sends: false,
                refuse_switches: false,
            }),
            calls: Mutex::new(Vec::new()),
            sends: AtomicUsize::new(0),
            send_gate: Mutex::new(None),
            switch_gate: Mutex::new(None),
            accounts_gate: Mutex::new(None),
            events,
        })
    }

    pub fn knows_chain(&self, chain_id: u64) {
        self.state.lock().unwrap().known_chains.insert(chain_id);
    }

    pub fn fail_next_switch(&self, err: WalletError) {
        self.state.lock().unwrap().switch_failures.push_back(err);
    }

    /// Every switch request is declined by the user.
    pub fn refuse_switches(&self) {
        self.state.lock().unwrap().refuse_switches = true;
    }

    pub fn reject_accounts(&self) {
        self.state.lock().unwrap().reject_accounts = true;
    }

    pub fn reject_sends(&self) {
        self.state.lock().unwrap().reject_sends = true;
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.state.lock().unwrap().accounts = accounts;
    }

    pub fn set_chain(&self, chain_id: u64) {
        self.state.lock().unwrap().chain_id = chain_id;
    }

    /// Sends block until the returned gate is notified.
    pub fn hold_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.send_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Chain switches block until the returned gate is notified.
    pub fn hold_switches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.switch_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Account prompts block until the returned gate is notified.
    pub fn hold_account_requests(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.accounts_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn emit(&self, event: WalletEvent) {
        let _ = self.events.send(event);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl WalletProvider for FakeWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        self.record("request_accounts");
        let gate = self.accounts_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let state = self.state.lock().unwrap();
        if state.reject_accounts {
            return Err(WalletError::user_rejected());
        }
        Ok(state.accounts.clone())
    }

    async fn accounts(&self) -> Result<Vec<Address>, WalletError> {
        self.record("accounts");
        Ok(self.state.lock().unwrap().accounts.clone())
    }

    async fn chain_id(&self) -> Result<u64, WalletError> {
        Ok(self.state.lock().unwrap().chain_id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        self.record("switch_chain");
        let gate = self.switch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.state.lock().unwrap();
        if state.refuse_switches {
            return Err(WalletError::user_rejected());
        }
        if let Some(err) = state.switch_failures.pop_front() {
            return Err(err);
        }
        if !state.known_chains.contains(&chain_id) {
            return Err(WalletError::unrecognized_chain(chain_id));
        }
        state.chain_id = chain_id;
        Ok(())
    }

    async fn add_chain(&self, spec: &ChainSpec) -> Result<(), WalletError> {
        self.record("add_chain");
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.add_failure.take() {
            return Err(err);
        }
        state.known_chains.insert(spec.chain_id);
        Ok(())
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<H256, WalletError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let gate = self.send_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.state.lock().unwrap().reject_sends {
            return Err(WalletError::user_rejected());
        }
        let method = tx
            .data
            .as_ref()
            .and_then(|data| ContractMethod::from_calldata(data))
            .ok_or_else(|| WalletError::new(-32602, "unknown calldata"))?;
        Ok(self.chain.execute(method))
    }

    fn provider(&self) -> Arc<dyn ChainReader> {
        self.chain.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

// --- Helpers ---

pub fn controller(wallet: &Arc<FakeWallet>, config: &Config) -> SessionController {
    SessionController::new(config, wallet.clone())
}

/// Waits until the counter snapshot satisfies `pred`.
pub async fn wait_counter(
    session: &SessionController,
    pred: impl Fn(&CounterSnapshot) -> bool,
) -> CounterSnapshot {
    let mut rx = session.coordinator().watch();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if pred(&snapshot) {
                return snapshot;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("counter never reached the expected state")
}

/// Waits until the session satisfies `pred`.
pub async fn wait_session(
    session: &SessionController,
    pred: impl Fn(&Session) -> bool,
) -> Session {
    let mut rx = session.watch();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = rx.borrow_and_update().clone();
            if pred(&current) {
                return current;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("session never reached the expected state")
}
