//! Shared fixtures and in-memory collaborators for integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use treb_core::clients::{
    ChainClient, DeploymentEvent, DeploymentEventKind, ExecutionResult, ReceiptStatus,
    SafeApiClient, SafeProposal, SafeTxState, ScriptRequest, ScriptRunner, TransactionEvent,
};
use treb_core::error::{Result, TrebError};
use treb_core::registry::RegistryStore;
use treb_core::types::{
    ChainId, Confirmation, Deployment, DeploymentKind, DeploymentMethod, SafeBatchEntry,
    SafeTransaction, SafeTxStatus, TransactionStatus,
};

/// `0x` + 40 hex digits ending in `suffix`.
pub fn addr(suffix: &str) -> String {
    format!("0x{:0>40}", suffix)
}

pub fn deployment(namespace: &str, chain_id: ChainId, contract: &str, address: &str) -> Deployment {
    Deployment::new(
        namespace,
        chain_id,
        contract,
        None,
        address,
        DeploymentKind::Singleton,
    )
}

pub fn labeled(
    namespace: &str,
    chain_id: ChainId,
    contract: &str,
    label: &str,
    address: &str,
) -> Deployment {
    Deployment::new(
        namespace,
        chain_id,
        contract,
        Some(label.to_string()),
        address,
        DeploymentKind::Singleton,
    )
}

pub fn proxy(
    namespace: &str,
    chain_id: ChainId,
    contract: &str,
    address: &str,
    implementation: &str,
) -> Deployment {
    Deployment::new(
        namespace,
        chain_id,
        contract,
        None,
        address,
        DeploymentKind::proxy(implementation, None),
    )
}

pub fn event(contract: &str, address: &str) -> DeploymentEvent {
    DeploymentEvent {
        contract_name: contract.to_string(),
        label: None,
        address: address.to_string(),
        kind: DeploymentEventKind::Singleton,
        implementation: None,
        admin: None,
        strategy: DeploymentMethod::Create2,
        salt: Some("0x01".to_string()),
        init_code_hash: None,
        factory: None,
        constructor_args: None,
        bytecode_hash: "0xbeef".to_string(),
        artifact_path: format!("src/{}.sol:{}", contract, contract),
        compiler_version: "0.8.24".to_string(),
        transaction: Some(0),
        tags: Vec::new(),
    }
}

pub fn broadcast(hash: &str, status: TransactionStatus) -> TransactionEvent {
    TransactionEvent {
        hash: Some(hash.to_string()),
        status,
        block_number: None,
        sender: addr("de"),
        nonce: Some(1),
        operations: Vec::new(),
        safe_batch_index: None,
    }
}

/// One executed transaction deploying `contract` at `address`.
pub fn deployed(contract: &str, address: &str, hash: &str) -> ExecutionResult {
    ExecutionResult {
        deployments: vec![event(contract, address)],
        transactions: vec![broadcast(hash, TransactionStatus::Executed)],
        safe_proposal: None,
    }
}

/// A result whose deployments are queued in a two-entry Safe batch.
pub fn proposed(safe_tx_hash: &str, contracts: &[(&str, &str)]) -> ExecutionResult {
    let deployments = contracts
        .iter()
        .enumerate()
        .map(|(index, (contract, address))| {
            let mut e = event(contract, address);
            e.transaction = Some(index);
            e
        })
        .collect();
    let transactions = (0..contracts.len())
        .map(|index| TransactionEvent {
            hash: None,
            status: TransactionStatus::Pending,
            block_number: None,
            sender: addr("5afe"),
            nonce: None,
            operations: Vec::new(),
            safe_batch_index: Some(index),
        })
        .collect();
    ExecutionResult {
        deployments,
        transactions,
        safe_proposal: Some(SafeProposal {
            safe_address: addr("5afe"),
            safe_tx_hash: safe_tx_hash.to_string(),
            nonce: 7,
            proposer: addr("de"),
            transactions: contracts
                .iter()
                .map(|_| SafeBatchEntry {
                    to: addr("c7"),
                    value: "0".to_string(),
                    data: "0x".to_string(),
                    operation: 0,
                })
                .collect(),
        }),
    }
}

pub fn confirmation(signer: &str) -> Confirmation {
    Confirmation {
        signer: signer.to_string(),
        signature: format!("sig-{}", signer),
        confirmed_at: Utc::now(),
    }
}

/// A queued Safe batch referencing `transaction_ids`, with no records behind them.
pub fn queued_safe(chain_id: ChainId, hash: &str, transaction_ids: &[&str]) -> SafeTransaction {
    SafeTransaction {
        safe_tx_hash: hash.to_string(),
        safe_address: addr("5afe"),
        chain_id,
        status: SafeTxStatus::Queued,
        nonce: 3,
        transactions: Vec::new(),
        transaction_ids: transaction_ids.iter().map(|s| s.to_string()).collect(),
        proposed_by: addr("de"),
        proposed_at: Utc::now(),
        confirmations: vec![confirmation("sig1")],
        executed_at: None,
        execution_tx_hash: None,
    }
}

pub fn pending_safe_state(signers: &[&str]) -> SafeTxState {
    SafeTxState {
        confirmations: signers.iter().map(|s| confirmation(s)).collect(),
        confirmations_required: 2,
        executed: false,
        execution_tx_hash: None,
        is_successful: None,
        executed_at: None,
    }
}

pub fn executed_safe_state(signers: &[&str], tx_hash: &str) -> SafeTxState {
    SafeTxState {
        executed: true,
        execution_tx_hash: Some(tx_hash.to_string()),
        is_successful: Some(true),
        executed_at: Some(Utc::now()),
        ..pending_safe_state(signers)
    }
}

/// Runs scripts by name from a table of canned results, recording every request.
#[derive(Default)]
pub struct FakeRunner {
    results: Mutex<BTreeMap<String, std::result::Result<ExecutionResult, String>>>,
    requests: Mutex<Vec<ScriptRequest>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(self, script: &str, result: ExecutionResult) -> Self {
        self.results
            .lock()
            .expect("results lock")
            .insert(script.to_string(), Ok(result));
        self
    }

    pub fn fail(self, script: &str, message: &str) -> Self {
        self.results.lock().expect("results lock").insert(
            script.to_string(),
            Err(message.to_string()),
        );
        self
    }

    pub fn requests(&self) -> Vec<ScriptRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.script).collect()
    }
}

#[async_trait]
impl ScriptRunner for FakeRunner {
    async fn run(&self, request: &ScriptRequest) -> Result<ExecutionResult> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let results = self.results.lock().expect("results lock");
        match results.get(&request.script) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => Err(TrebError::external("script-runner", message.clone())),
            None => Ok(ExecutionResult::default()),
        }
    }
}

/// Chain state keyed by lowercase hash/address.
#[derive(Default)]
pub struct FakeChain {
    receipts: Mutex<BTreeMap<String, ReceiptStatus>>,
    code: Mutex<BTreeMap<String, bool>>,
    failing: Mutex<bool>,
    calls: Mutex<Vec<String>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receipt(self, hash: &str, status: ReceiptStatus) -> Self {
        self.receipts
            .lock()
            .expect("receipts lock")
            .insert(hash.to_ascii_lowercase(), status);
        self
    }

    pub fn code(self, address: &str, exists: bool) -> Self {
        self.code
            .lock()
            .expect("code lock")
            .insert(address.to_ascii_lowercase(), exists);
        self
    }

    pub fn unavailable(self) -> Self {
        *self.failing.lock().expect("failing lock") = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn check(&self, call: String) -> Result<()> {
        self.calls.lock().expect("calls lock").push(call);
        if *self.failing.lock().expect("failing lock") {
            return Err(TrebError::external("rpc", "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn get_receipt(&self, chain_id: ChainId, tx_hash: &str) -> Result<ReceiptStatus> {
        self.check(format!("receipt {} {}", chain_id, tx_hash))?;
        Ok(self
            .receipts
            .lock()
            .expect("receipts lock")
            .get(&tx_hash.to_ascii_lowercase())
            .copied()
            .unwrap_or(ReceiptStatus::NotFound))
    }

    async fn address_exists(&self, chain_id: ChainId, address: &str) -> Result<bool> {
        self.check(format!("code {} {}", chain_id, address))?;
        Ok(self
            .code
            .lock()
            .expect("code lock")
            .get(&address.to_ascii_lowercase())
            .copied()
            .unwrap_or(true))
    }
}

/// Safe service answering from a queue of states per safeTxHash.
#[derive(Default)]
pub struct FakeSafe {
    states: Mutex<BTreeMap<String, VecDeque<std::result::Result<SafeTxState, String>>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSafe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(self, hash: &str, state: SafeTxState) -> Self {
        self.states
            .lock()
            .expect("states lock")
            .entry(hash.to_string())
            .or_default()
            .push_back(Ok(state));
        self
    }

    pub fn error(self, hash: &str, message: &str) -> Self {
        self.states
            .lock()
            .expect("states lock")
            .entry(hash.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl SafeApiClient for FakeSafe {
    async fn get_transaction(&self, _chain_id: ChainId, safe_tx_hash: &str) -> Result<SafeTxState> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(safe_tx_hash.to_string());
        let mut states = self.states.lock().expect("states lock");
        let queue = states
            .get_mut(safe_tx_hash)
            .ok_or_else(|| TrebError::external("safe-api", "404 Not Found"))?;
        // The last answer repeats once the queue is drained.
        let answer = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match answer {
            Some(Ok(state)) => Ok(state),
            Some(Err(message)) => Err(TrebError::external("safe-api", message)),
            None => Err(TrebError::external("safe-api", "no answer scripted")),
        }
    }
}

pub fn store_with(deployments: Vec<Deployment>) -> RegistryStore {
    let mut store = RegistryStore::in_memory();
    for d in deployments {
        store.put_deployment(d).expect("fixture deployment should store");
    }
    store
}
