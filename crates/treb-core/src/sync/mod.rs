//! State reconciliation: advance pending records using external authorities.
//!
//! Queries fan out per chain onto a [`JoinSet`]; every resulting mutation is
//! then applied sequentially through `&mut RegistryStore`. A failed query
//! leaves its record untouched and becomes a warning in the report.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::clients::{ChainClient, ReceiptStatus, SafeApiClient, SafeTxState};
use crate::error::{Result, TrebError};
use crate::registry::{PruneReport, PruneSet, RegistryStore};
use crate::types::{
    ChainId, SafeContext, SafeTransaction, SafeTxStatus, Transaction, TransactionStatus,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Also prune records the chain proves never existed.
    pub clean: bool,
    /// Per external call.
    pub timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            clean: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub safe_checked: usize,
    pub safe_executed: usize,
    pub safe_failed: usize,
    pub confirmations_added: usize,
    pub transactions_checked: usize,
    pub transactions_executed: usize,
    pub transactions_failed: usize,
    /// Ids of records that changed, in the order they were written.
    pub updated: Vec<String>,
    pub pruned: PruneReport,
    pub warnings: Vec<String>,
}

impl SyncReport {
    pub fn has_changes(&self) -> bool {
        !self.updated.is_empty() || self.pruned.total() > 0
    }

    fn warn(&mut self, record: &str, err: &TrebError) {
        self.warnings.push(format!("{}: {}", record, err));
    }
}

/// Record key plus the value sent to the collaborator.
type Query = (String, String);

pub struct SyncEngine {
    chain: Arc<dyn ChainClient>,
    safe: Arc<dyn SafeApiClient>,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(chain: Arc<dyn ChainClient>, safe: Arc<dyn SafeApiClient>) -> Self {
        Self {
            chain,
            safe,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// One full reconciliation pass. Never aborts on a single record's failure.
    pub async fn sync(&self, store: &mut RegistryStore) -> SyncReport {
        let mut report = SyncReport::default();

        self.sync_safe_transactions(store, &mut report).await;
        self.sync_pending_transactions(store, &mut report).await;
        if self.options.clean {
            let pruned = self.prune_absent(store, &mut report).await;
            report.pruned = pruned;
        }

        info!(
            safe_checked = report.safe_checked,
            safe_executed = report.safe_executed,
            transactions_checked = report.transactions_checked,
            updated = report.updated.len(),
            warnings = report.warnings.len(),
            "sync finished"
        );
        report
    }

    /// Remove deployments without code and executed transactions without a receipt.
    pub async fn clean(&self, store: &mut RegistryStore) -> SyncReport {
        let mut report = SyncReport::default();
        let pruned = self.prune_absent(store, &mut report).await;
        report.pruned = pruned;
        report
    }

    async fn sync_safe_transactions(&self, store: &mut RegistryStore, report: &mut SyncReport) {
        let mut groups: BTreeMap<ChainId, Vec<Query>> = BTreeMap::new();
        for safe_tx in store.queued_safe_transactions() {
            groups
                .entry(safe_tx.chain_id)
                .or_default()
                .push((safe_tx.safe_tx_hash.clone(), safe_tx.safe_tx_hash.clone()));
        }
        if groups.is_empty() {
            return;
        }

        let results = query_by_chain(
            Arc::clone(&self.safe),
            groups,
            self.options.timeout,
            "safe-api",
            |client, chain_id, hash| async move { client.get_transaction(chain_id, &hash).await },
            report,
        )
        .await;

        for (hash, result) in results {
            report.safe_checked += 1;
            match result {
                Ok(state) => apply_safe_state(store, &hash, state, report),
                Err(err) => {
                    warn!(safe_tx_hash = %hash, error = %err, "could not query Safe transaction");
                    report.warn(&hash, &err);
                }
            }
        }
    }

    async fn sync_pending_transactions(&self, store: &mut RegistryStore, report: &mut SyncReport) {
        let mut groups: BTreeMap<ChainId, Vec<Query>> = BTreeMap::new();
        for tx in store.pending_transactions() {
            if tx.safe_context.is_some() || tx.hash.is_empty() {
                continue;
            }
            groups
                .entry(tx.chain_id)
                .or_default()
                .push((tx.id.clone(), tx.hash.clone()));
        }
        if groups.is_empty() {
            return;
        }

        let results = query_by_chain(
            Arc::clone(&self.chain),
            groups,
            self.options.timeout,
            "rpc",
            |client, chain_id, hash| async move { client.get_receipt(chain_id, &hash).await },
            report,
        )
        .await;

        for (id, result) in results {
            report.transactions_checked += 1;
            let receipt = match result {
                Ok(receipt) => receipt,
                Err(err) => {
                    warn!(transaction = %id, error = %err, "could not fetch receipt");
                    report.warn(&id, &err);
                    continue;
                }
            };
            let Some(mut tx) = store.transaction(&id).cloned() else {
                continue;
            };
            match receipt {
                ReceiptStatus::Success { block_number } => {
                    tx.status = TransactionStatus::Executed;
                    tx.block_number = block_number.or(tx.block_number);
                    report.transactions_executed += 1;
                }
                ReceiptStatus::Reverted { block_number } => {
                    tx.status = TransactionStatus::Failed;
                    tx.block_number = block_number.or(tx.block_number);
                    report.transactions_failed += 1;
                }
                ReceiptStatus::NotFound => {
                    debug!(transaction = %id, "no receipt yet");
                    continue;
                }
            }
            write_transaction(store, tx, report);
        }
    }

    async fn prune_absent(&self, store: &mut RegistryStore, report: &mut SyncReport) -> PruneReport {
        let mut code_checks: BTreeMap<ChainId, Vec<Query>> = BTreeMap::new();
        for deployment in store.all_deployments() {
            if store.awaits_execution(deployment) {
                debug!(deployment = %deployment.id, "skipping code check for unexecuted deployment");
                continue;
            }
            code_checks
                .entry(deployment.chain_id)
                .or_default()
                .push((deployment.id.clone(), deployment.address.clone()));
        }
        let mut receipt_checks: BTreeMap<ChainId, Vec<Query>> = BTreeMap::new();
        for tx in store.transactions() {
            if tx.status == TransactionStatus::Executed && !tx.hash.is_empty() {
                receipt_checks
                    .entry(tx.chain_id)
                    .or_default()
                    .push((tx.id.clone(), tx.hash.clone()));
            }
        }

        let mut absent = PruneSet::default();

        let code = query_by_chain(
            Arc::clone(&self.chain),
            code_checks,
            self.options.timeout,
            "rpc",
            |client, chain_id, address| async move {
                client.address_exists(chain_id, &address).await
            },
            report,
        )
        .await;
        for (id, result) in code {
            match result {
                Ok(false) => {
                    absent.deployments.insert(id);
                }
                Ok(true) => {}
                Err(err) => report.warn(&id, &err),
            }
        }

        let receipts = query_by_chain(
            Arc::clone(&self.chain),
            receipt_checks,
            self.options.timeout,
            "rpc",
            |client, chain_id, hash| async move { client.get_receipt(chain_id, &hash).await },
            report,
        )
        .await;
        for (id, result) in receipts {
            match result {
                Ok(ReceiptStatus::NotFound) => {
                    absent.transactions.insert(id);
                }
                Ok(_) => {}
                Err(err) => report.warn(&id, &err),
            }
        }

        if absent.is_empty() {
            return PruneReport::default();
        }
        store.prune(&absent)
    }
}

/// Run `call` for every query, one task per chain, each call time-bounded.
async fn query_by_chain<C, T, F, Fut>(
    client: Arc<C>,
    groups: BTreeMap<ChainId, Vec<Query>>,
    timeout: Duration,
    service: &'static str,
    call: F,
    report: &mut SyncReport,
) -> BTreeMap<String, Result<T>>
where
    C: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(Arc<C>, ChainId, String) -> Fut + Copy + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for (chain_id, queries) in groups {
        let client = Arc::clone(&client);
        tasks.spawn(async move {
            let mut results = Vec::with_capacity(queries.len());
            for (key, argument) in queries {
                let outcome =
                    match tokio::time::timeout(timeout, call(Arc::clone(&client), chain_id, argument))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(TrebError::external(
                            service,
                            format!("timed out after {:?} on chain {}", timeout, chain_id),
                        )),
                    };
                results.push((key, outcome));
            }
            results
        });
    }

    let mut collected = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(results) => collected.extend(results),
            Err(err) => {
                warn!(service, error = %err, "sync worker did not complete");
                report
                    .warnings
                    .push(format!("{} worker did not complete: {}", service, err));
            }
        }
    }
    collected
}

fn apply_safe_state(
    store: &mut RegistryStore,
    safe_tx_hash: &str,
    state: SafeTxState,
    report: &mut SyncReport,
) {
    let Some(mut safe_tx) = store.safe_transaction(safe_tx_hash).cloned() else {
        return;
    };
    if safe_tx.is_terminal() {
        return;
    }

    let added = safe_tx.merge_confirmations(state.confirmations);
    report.confirmations_added += added;

    if !state.executed {
        if added > 0 {
            debug!(safe_tx_hash, added, "new Safe confirmations");
            write_safe_transaction(store, safe_tx, report);
        }
        return;
    }

    let failed = state.is_successful == Some(false);
    safe_tx.status = if failed {
        SafeTxStatus::Failed
    } else {
        SafeTxStatus::Executed
    };
    safe_tx.execution_tx_hash = state.execution_tx_hash.clone();
    safe_tx.executed_at = Some(state.executed_at.unwrap_or_else(Utc::now));
    if failed {
        report.safe_failed += 1;
    } else {
        report.safe_executed += 1;
    }
    info!(
        chain_id = safe_tx.chain_id,
        safe_tx_hash,
        status = %safe_tx.status,
        execution_tx_hash = state.execution_tx_hash.as_deref().unwrap_or_default(),
        "Safe transaction settled"
    );

    let status = if failed {
        TransactionStatus::Failed
    } else {
        TransactionStatus::Executed
    };
    for (batch_index, tx_id) in safe_tx.transaction_ids.iter().enumerate() {
        let mut tx = store
            .transaction(tx_id)
            .cloned()
            .unwrap_or_else(|| batch_transaction(&safe_tx, tx_id, batch_index));
        tx.status = status;
        if let Some(hash) = &state.execution_tx_hash {
            tx.hash = hash.clone();
        }
        write_transaction(store, tx, report);
    }
    write_safe_transaction(store, safe_tx, report);
}

/// Placeholder for a batch entry whose transaction record was never written.
fn batch_transaction(safe_tx: &SafeTransaction, id: &str, batch_index: usize) -> Transaction {
    Transaction {
        id: id.to_string(),
        chain_id: safe_tx.chain_id,
        hash: String::new(),
        status: TransactionStatus::Pending,
        block_number: None,
        sender: safe_tx.safe_address.clone(),
        nonce: None,
        deployments: Vec::new(),
        operations: Vec::new(),
        safe_context: Some(SafeContext {
            safe_address: safe_tx.safe_address.clone(),
            safe_tx_hash: safe_tx.safe_tx_hash.clone(),
            batch_index,
            proposer: safe_tx.proposed_by.clone(),
        }),
        created_at: Utc::now(),
    }
}

fn write_transaction(store: &mut RegistryStore, tx: Transaction, report: &mut SyncReport) {
    let id = tx.id.clone();
    match store.put_transaction(tx) {
        Ok(()) => report.updated.push(id),
        Err(err) => report.warn(&id, &err),
    }
}

fn write_safe_transaction(store: &mut RegistryStore, safe_tx: SafeTransaction, report: &mut SyncReport) {
    let hash = safe_tx.safe_tx_hash.clone();
    match store.put_safe_transaction(safe_tx) {
        Ok(()) => report.updated.push(hash),
        Err(err) => report.warn(&hash, &err),
    }
}
