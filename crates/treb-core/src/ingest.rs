//! Turns a script's Execution Result into registry records.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, info};

use crate::clients::{
    DeploymentEvent, DeploymentEventKind, ExecutionResult, SafeProposal, TransactionEvent,
};
use crate::error::{Result, TrebError};
use crate::registry::RegistryStore;
use crate::types::{
    ArtifactInfo, ChainId, Deployment, DeploymentKind, DeploymentStrategy, SafeContext,
    SafeTransaction, SafeTxStatus, Transaction, TransactionStatus, normalize_hex, same_address,
};

/// Where the result was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestContext {
    pub namespace: String,
    pub chain_id: ChainId,
    /// Script that produced the result, recorded on each deployment's artifact.
    pub script: Option<String>,
}

impl IngestContext {
    pub fn new(namespace: impl Into<String>, chain_id: ChainId) -> Self {
        Self {
            namespace: namespace.into(),
            chain_id,
            script: None,
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }
}

/// Ids written by one ingest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub deployments: Vec<String>,
    pub transactions: Vec<String>,
    pub safe_transaction: Option<String>,
    /// Proxies whose implementation changed and got a history entry.
    pub upgraded_proxies: Vec<String>,
}

impl IngestSummary {
    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty() && self.transactions.is_empty() && self.safe_transaction.is_none()
    }
}

/// How a deployment event lands in the store.
enum DeploymentWrite {
    Put(Deployment),
    Upgrade {
        proxy_id: String,
        implementation: String,
        transaction_id: Option<String>,
    },
}

/// Ingest `result` into `store`.
///
/// Every record is built and checked before the first mutation, so either the
/// whole result is written or nothing is.
pub fn ingest_result(
    store: &mut RegistryStore,
    ctx: &IngestContext,
    result: &ExecutionResult,
) -> Result<IngestSummary> {
    let proposal = result.safe_proposal.as_ref();

    let mut transactions = result
        .transactions
        .iter()
        .enumerate()
        .map(|(index, event)| build_transaction(ctx, index, event, proposal))
        .collect::<Result<Vec<_>>>()?;
    for tx in &transactions {
        store.check_transaction(tx)?;
    }

    let mut writes = Vec::with_capacity(result.deployments.len());
    let mut claimed: BTreeMap<String, String> = BTreeMap::new();
    let mut claimed_ids: BTreeMap<String, String> = BTreeMap::new();
    for event in &result.deployments {
        let transaction_id = match event.transaction {
            Some(index) => Some(
                transactions
                    .get(index)
                    .map(|tx| tx.id.clone())
                    .ok_or_else(|| {
                        TrebError::validation(format!(
                            "deployment of {} references missing transaction #{}",
                            event.contract_name, index
                        ))
                    })?,
            ),
            None => None,
        };

        let deployment = build_deployment(ctx, event, transaction_id.clone())?;
        store.check_deployment(&deployment)?;

        let address_key = normalize_hex(&deployment.address);
        if let Some(other) = claimed.get(&address_key)
            && *other != deployment.id
        {
            return Err(TrebError::ConsistencyViolation {
                chain_id: deployment.chain_id,
                address: address_key,
                existing: other.clone(),
                incoming: deployment.id,
            });
        }
        if let Some(other) = claimed_ids.get(&deployment.id)
            && *other != address_key
        {
            return Err(TrebError::validation(format!(
                "'{}' was reported at both {} and {}; give one of them a label",
                deployment.id, other, deployment.address
            )));
        }
        claimed.insert(address_key.clone(), deployment.id.clone());
        claimed_ids.insert(deployment.id.clone(), address_key);

        if let Some(index) = event.transaction
            && let Some(tx) = transactions.get_mut(index)
            && !tx.deployments.contains(&deployment.id)
        {
            tx.deployments.push(deployment.id.clone());
        }

        writes.push(plan_write(store, deployment, transaction_id));
    }

    let safe_transaction = proposal
        .map(|p| build_safe_transaction(ctx, p, &transactions))
        .transpose()?;
    if let Some(safe_tx) = &safe_transaction {
        store.check_safe_transaction(safe_tx)?;
    }

    // Every record above passed the same checks the puts below repeat.
    let mut summary = IngestSummary::default();
    for tx in transactions.drain(..) {
        let tx = keep_terminal_status(store, tx);
        summary.transactions.push(tx.id.clone());
        store.put_transaction(tx)?;
    }
    for write in writes {
        match write {
            DeploymentWrite::Put(deployment) => {
                summary.deployments.push(deployment.id.clone());
                store.put_deployment(deployment)?;
            }
            DeploymentWrite::Upgrade {
                proxy_id,
                implementation,
                transaction_id,
            } => {
                store.record_proxy_upgrade(&proxy_id, &implementation, transaction_id)?;
                info!(proxy = %proxy_id, implementation = %implementation, "proxy upgraded");
                summary.deployments.push(proxy_id.clone());
                summary.upgraded_proxies.push(proxy_id);
            }
        }
    }
    if let Some(safe_tx) = safe_transaction {
        summary.safe_transaction = Some(safe_tx.safe_tx_hash.clone());
        if store.safe_transaction(&safe_tx.safe_tx_hash).is_none() {
            store.put_safe_transaction(safe_tx)?;
        } else {
            debug!(safe_tx_hash = %safe_tx.safe_tx_hash, "safe transaction already tracked");
        }
    }

    debug!(
        namespace = %ctx.namespace,
        chain_id = ctx.chain_id,
        deployments = summary.deployments.len(),
        transactions = summary.transactions.len(),
        "execution result ingested"
    );
    Ok(summary)
}

fn build_transaction(
    ctx: &IngestContext,
    index: usize,
    event: &TransactionEvent,
    proposal: Option<&SafeProposal>,
) -> Result<Transaction> {
    let hash = event.hash.as_deref().map(str::trim).unwrap_or_default();

    let (id, status, safe_context) = match (event.safe_batch_index, proposal) {
        (Some(batch_index), Some(proposal)) => (
            Transaction::id_for_safe_entry(&proposal.safe_tx_hash, batch_index),
            TransactionStatus::Pending,
            Some(SafeContext {
                safe_address: proposal.safe_address.clone(),
                safe_tx_hash: proposal.safe_tx_hash.clone(),
                batch_index,
                proposer: proposal.proposer.clone(),
            }),
        ),
        (Some(_), None) => {
            return Err(TrebError::validation(format!(
                "transaction #{} is part of a Safe batch but no proposal was reported",
                index
            )));
        }
        (None, _) if hash.is_empty() => {
            return Err(TrebError::validation(format!(
                "transaction #{} has no hash",
                index
            )));
        }
        (None, _) => (Transaction::id_for_hash(hash), event.status, None),
    };

    Ok(Transaction {
        id,
        chain_id: ctx.chain_id,
        hash: hash.to_string(),
        status,
        block_number: event.block_number,
        sender: event.sender.clone(),
        nonce: event.nonce,
        deployments: Vec::new(),
        operations: event.operations.clone(),
        safe_context,
        created_at: Utc::now(),
    })
}

fn build_deployment(
    ctx: &IngestContext,
    event: &DeploymentEvent,
    transaction_id: Option<String>,
) -> Result<Deployment> {
    if event.contract_name.trim().is_empty() {
        return Err(TrebError::validation("deployment event has no contract name"));
    }
    if event.address.trim().is_empty() {
        return Err(TrebError::validation(format!(
            "deployment of {} has no address",
            event.contract_name
        )));
    }

    let kind = match event.kind {
        DeploymentEventKind::Singleton => DeploymentKind::Singleton,
        DeploymentEventKind::Library => DeploymentKind::Library,
        DeploymentEventKind::Proxy => {
            let implementation = event.implementation.clone().ok_or_else(|| {
                TrebError::validation(format!(
                    "proxy {} was reported without an implementation address",
                    event.contract_name
                ))
            })?;
            DeploymentKind::proxy(implementation, event.admin.clone())
        }
    };

    let mut deployment = Deployment::new(
        ctx.namespace.clone(),
        ctx.chain_id,
        event.contract_name.clone(),
        event.label.clone(),
        event.address.clone(),
        kind,
    )
    .with_strategy(DeploymentStrategy {
        method: event.strategy,
        salt: event.salt.clone(),
        init_code_hash: event.init_code_hash.clone(),
        factory: event.factory.clone(),
        constructor_args: event.constructor_args.clone(),
    })
    .with_artifact(ArtifactInfo {
        path: event.artifact_path.clone(),
        compiler_version: event.compiler_version.clone(),
        bytecode_hash: event.bytecode_hash.clone(),
        script_path: ctx.script.clone(),
    })
    .with_tags(event.tags.iter().cloned());
    deployment.transaction_id = transaction_id;
    Ok(deployment)
}

/// Re-reported deployments keep their history, tags and verification state.
fn plan_write(
    store: &RegistryStore,
    mut deployment: Deployment,
    transaction_id: Option<String>,
) -> DeploymentWrite {
    let Some(existing) = store.deployment(&deployment.id) else {
        return DeploymentWrite::Put(deployment);
    };

    if let (Some(current), Some(incoming)) = (existing.proxy_info(), deployment.proxy_info())
        && !same_address(&current.implementation, &incoming.implementation)
    {
        let implementation = incoming.implementation.clone();
        return DeploymentWrite::Upgrade {
            proxy_id: deployment.id,
            implementation,
            transaction_id,
        };
    }

    if let (Some(current), DeploymentKind::Proxy { proxy_info }) =
        (existing.proxy_info(), &mut deployment.kind)
    {
        proxy_info.history = current.history.clone();
    }
    deployment.created_at = existing.created_at;
    deployment.tags.extend(existing.tags.iter().cloned());
    deployment.verification = existing.verification.clone();
    if deployment.transaction_id.is_none() {
        deployment.transaction_id = existing.transaction_id.clone();
    }
    DeploymentWrite::Put(deployment)
}

/// A replayed result never moves an already settled transaction back to pending.
fn keep_terminal_status(store: &RegistryStore, mut tx: Transaction) -> Transaction {
    if let Some(existing) = store.transaction(&tx.id)
        && !existing.is_pending()
    {
        tx.status = existing.status;
        tx.block_number = tx.block_number.or(existing.block_number);
        if tx.hash.is_empty() {
            tx.hash = existing.hash.clone();
        }
        tx.created_at = existing.created_at;
    }
    tx
}

fn build_safe_transaction(
    ctx: &IngestContext,
    proposal: &SafeProposal,
    transactions: &[Transaction],
) -> Result<SafeTransaction> {
    if proposal.safe_tx_hash.trim().is_empty() {
        return Err(TrebError::validation(
            "Safe proposal was reported without a safeTxHash",
        ));
    }

    let mut batch: Vec<(usize, String)> = transactions
        .iter()
        .filter_map(|tx| {
            tx.safe_context
                .as_ref()
                .map(|sc| (sc.batch_index, tx.id.clone()))
        })
        .collect();
    batch.sort();

    Ok(SafeTransaction {
        safe_tx_hash: proposal.safe_tx_hash.clone(),
        safe_address: proposal.safe_address.clone(),
        chain_id: ctx.chain_id,
        status: SafeTxStatus::Queued,
        nonce: proposal.nonce,
        transactions: proposal.transactions.clone(),
        transaction_ids: batch.into_iter().map(|(_, id)| id).collect(),
        proposed_by: proposal.proposer.clone(),
        proposed_at: Utc::now(),
        confirmations: Vec::new(),
        executed_at: None,
        execution_tx_hash: None,
    })
}
