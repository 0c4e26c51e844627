//! Registry store: the authoritative record set plus its lookup index.
//!
//! One store is opened per process invocation and handed by reference to the
//! resolver, executor and sync engine. Every mutation goes through
//! `&mut RegistryStore`, so writes are serialized by construction.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{Result, TrebError};
use crate::lookup::LookupIndex;
use crate::types::{
    ChainId, Deployment, DeploymentKind, ProxyUpgrade, SafeTransaction, Transaction,
    normalize_hex,
};

use super::document::{AddressView, RegistryDocument, Records, parse_records};

/// Any record the store can hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Deployment(Deployment),
    Transaction(Transaction),
    SafeTransaction(SafeTransaction),
}

/// Borrowed view of a record returned by [`RegistryStore::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRef<'a> {
    Deployment(&'a Deployment),
    Transaction(&'a Transaction),
    SafeTransaction(&'a SafeTransaction),
}

/// Filter for [`RegistryStore::deployments`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentFilter {
    pub namespace: Option<String>,
    pub chain_id: Option<ChainId>,
    pub contract_name: Option<String>,
    pub tag: Option<String>,
}

impl DeploymentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_chain(mut self, chain_id: ChainId) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_contract(mut self, contract_name: impl Into<String>) -> Self {
        self.contract_name = Some(contract_name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn matches(&self, deployment: &Deployment) -> bool {
        self.namespace
            .as_deref()
            .is_none_or(|ns| deployment.namespace == ns)
            && self.chain_id.is_none_or(|c| deployment.chain_id == c)
            && self
                .contract_name
                .as_deref()
                .is_none_or(|name| deployment.contract_name == name)
            && self
                .tag
                .as_deref()
                .is_none_or(|tag| deployment.tags.contains(tag))
    }
}

/// Records proven absent by the caller. Prune is the only deletion path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneSet {
    pub deployments: BTreeSet<String>,
    pub transactions: BTreeSet<String>,
    pub safe_transactions: BTreeSet<String>,
}

impl PruneSet {
    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
            && self.transactions.is_empty()
            && self.safe_transactions.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub deployments: Vec<String>,
    pub transactions: Vec<String>,
    pub safe_transactions: Vec<String>,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.deployments.len() + self.transactions.len() + self.safe_transactions.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistryStore {
    path: Option<PathBuf>,
    address_view_path: Option<PathBuf>,
    records: Records,
    index: LookupIndex,
}

impl RegistryStore {
    /// An empty store with no backing file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the registry at `path`. A missing file yields an empty store bound to it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self {
            path: Some(path.clone()),
            ..Self::default()
        };
        if path.exists() {
            store.load()?;
        }
        Ok(store)
    }

    /// Also write the flattened address-only view to `path` on every save.
    pub fn with_address_view(mut self, path: impl Into<PathBuf>) -> Self {
        self.address_view_path = Some(path.into());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    /// Replace in-memory state with the file contents. Indexes are always rebuilt.
    pub fn load(&mut self) -> Result<()> {
        let path = self.require_path()?.to_path_buf();
        let bytes = fs::read(&path).map_err(|e| TrebError::io(&path, e))?;
        let records = parse_records(&bytes)?;
        self.replace_records(records)?;
        debug!(
            path = %path.display(),
            deployments = self.records.deployments.len(),
            transactions = self.records.transactions.len(),
            safe_transactions = self.records.safe_transactions.len(),
            "registry loaded"
        );
        Ok(())
    }

    /// Atomically persist the full record set (tmp + rename).
    pub fn save(&self) -> Result<()> {
        let path = self.require_path()?;
        let document =
            RegistryDocument::new(&self.records, self.index.clone(), self.address_view());
        let bytes = serde_json::to_vec_pretty(&document)?;
        write_atomic(path, &bytes)?;

        if let Some(view_path) = &self.address_view_path {
            let view = serde_json::to_vec_pretty(&document.addresses)?;
            write_atomic(view_path, &view)?;
        }

        debug!(path = %path.display(), "registry saved");
        Ok(())
    }

    /// Put back a record set previously taken from this store.
    pub fn restore(&mut self, records: Records) {
        self.records = records;
        self.index = self.rebuild_lookups();
    }

    /// Load records from a foreign record set, validating uniqueness.
    pub fn from_records(records: Records) -> Result<Self> {
        let mut store = Self::default();
        store.replace_records(records)?;
        Ok(store)
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    pub fn lookups(&self) -> &LookupIndex {
        &self.index
    }

    /// Recompute the index from the records without touching the maintained one.
    pub fn rebuild_lookups(&self) -> LookupIndex {
        LookupIndex::rebuild(
            &self.records.deployments,
            self.records.transactions.values(),
            self.records.safe_transactions.values(),
        )
    }

    // --- Writes ---

    /// Insert or replace any record.
    pub fn put(&mut self, record: Record) -> Result<()> {
        match record {
            Record::Deployment(d) => self.put_deployment(d),
            Record::Transaction(tx) => self.put_transaction(tx),
            Record::SafeTransaction(safe_tx) => self.put_safe_transaction(safe_tx),
        }
    }

    /// Check that `deployment` could be put without mutating anything.
    pub fn check_deployment(&self, deployment: &Deployment) -> Result<()> {
        let expected = deployment.expected_id();
        if deployment.id != expected {
            return Err(TrebError::validation(format!(
                "deployment id '{}' does not match its fields (expected '{}')",
                deployment.id, expected
            )));
        }

        if let Some(existing) = self
            .index
            .id_for_address(deployment.chain_id, &deployment.address)
            && existing != deployment.id
        {
            return Err(TrebError::ConsistencyViolation {
                chain_id: deployment.chain_id,
                address: normalize_hex(&deployment.address),
                existing: existing.to_string(),
                incoming: deployment.id.clone(),
            });
        }

        if let Some(existing) = self.records.deployments.get(&deployment.id)
            && !crate::types::same_address(&existing.address, &deployment.address)
        {
            return Err(TrebError::validation(format!(
                "'{}' is already deployed at {}; use a different label for the deployment at {}",
                deployment.id, existing.address, deployment.address
            )));
        }

        Ok(())
    }

    pub fn put_deployment(&mut self, deployment: Deployment) -> Result<()> {
        self.check_deployment(&deployment)?;

        if let Some(old) = self.records.deployments.remove(&deployment.id) {
            self.index.unindex_deployment(&old);
        }
        let id = deployment.id.clone();
        self.records.deployments.insert(id.clone(), deployment);
        if let Some(stored) = self.records.deployments.get(&id) {
            self.index.index_deployment(stored, &self.records.deployments);
        }
        debug!(id = %id, "deployment stored");
        Ok(())
    }

    pub fn check_transaction(&self, tx: &Transaction) -> Result<()> {
        if tx.id.is_empty() {
            return Err(TrebError::validation("transaction id must not be empty"));
        }
        Ok(())
    }

    pub fn check_safe_transaction(&self, safe_tx: &SafeTransaction) -> Result<()> {
        if safe_tx.safe_tx_hash.trim().is_empty() {
            return Err(TrebError::validation("safeTxHash must not be empty"));
        }
        Ok(())
    }

    pub fn put_transaction(&mut self, tx: Transaction) -> Result<()> {
        self.check_transaction(&tx)?;
        if let Some(old) = self.records.transactions.get(&tx.id) {
            self.index.unindex_transaction(old);
        }
        self.index.index_transaction(&tx);
        self.records.transactions.insert(tx.id.clone(), tx);
        Ok(())
    }

    pub fn put_safe_transaction(&mut self, safe_tx: SafeTransaction) -> Result<()> {
        self.check_safe_transaction(&safe_tx)?;
        if let Some(old) = self.records.safe_transactions.get(&safe_tx.safe_tx_hash) {
            self.index.unindex_safe_transaction(old);
        }
        self.index.index_safe_transaction(&safe_tx);
        self.records
            .safe_transactions
            .insert(safe_tx.safe_tx_hash.clone(), safe_tx);
        Ok(())
    }

    /// Remove records the caller has confirmed absent on-chain.
    pub fn prune(&mut self, confirmed_absent: &PruneSet) -> PruneReport {
        let mut report = PruneReport::default();

        for id in &confirmed_absent.deployments {
            if let Some(old) = self.records.deployments.remove(id) {
                self.index.unindex_deployment(&old);
                report.deployments.push(id.clone());
            }
        }
        if !report.deployments.is_empty() {
            for tx in self.records.transactions.values_mut() {
                tx.deployments.retain(|id| !report.deployments.contains(id));
            }
        }
        for id in &confirmed_absent.transactions {
            if let Some(old) = self.records.transactions.remove(id) {
                self.index.unindex_transaction(&old);
                report.transactions.push(id.clone());
            }
        }
        for hash in &confirmed_absent.safe_transactions {
            if let Some(old) = self.records.safe_transactions.remove(hash) {
                self.index.unindex_safe_transaction(&old);
                report.safe_transactions.push(hash.clone());
            }
        }

        if report.total() > 0 {
            info!(
                deployments = report.deployments.len(),
                transactions = report.transactions.len(),
                safe_transactions = report.safe_transactions.len(),
                "pruned registry records"
            );
        }
        report
    }

    /// Add a tag. Returns false if it was already present.
    pub fn add_tag(&mut self, id: &str, tag: &str) -> Result<bool> {
        let deployment = self.deployment_mut(id)?;
        let added = deployment.tags.insert(tag.to_string());
        if added {
            deployment.updated_at = Utc::now();
        }
        Ok(added)
    }

    /// Remove a tag. Returns false if it was not present.
    pub fn remove_tag(&mut self, id: &str, tag: &str) -> Result<bool> {
        let deployment = self.deployment_mut(id)?;
        let removed = deployment.tags.remove(tag);
        if removed {
            deployment.updated_at = Utc::now();
        }
        Ok(removed)
    }

    /// Point a proxy at a new implementation, keeping the previous ones in history.
    pub fn record_proxy_upgrade(
        &mut self,
        proxy_id: &str,
        new_implementation: &str,
        transaction_id: Option<String>,
    ) -> Result<()> {
        let mut proxy = self
            .records
            .deployments
            .get(proxy_id)
            .cloned()
            .ok_or_else(|| TrebError::NotFound(proxy_id.to_string()))?;

        let DeploymentKind::Proxy { proxy_info } = &mut proxy.kind else {
            return Err(TrebError::validation(format!(
                "'{}' is not a proxy",
                proxy_id
            )));
        };

        let now = Utc::now();
        if proxy_info.history.is_empty() {
            proxy_info.history.push(ProxyUpgrade {
                implementation: proxy_info.implementation.clone(),
                upgraded_at: proxy.created_at,
                transaction_id: proxy.transaction_id.clone(),
            });
        }
        proxy_info.history.push(ProxyUpgrade {
            implementation: new_implementation.to_string(),
            upgraded_at: now,
            transaction_id,
        });
        proxy_info.implementation = new_implementation.to_string();
        proxy.updated_at = now;

        self.put_deployment(proxy)
    }

    // --- Reads ---

    pub fn get(&self, id: &str) -> Option<RecordRef<'_>> {
        if let Some(d) = self.records.deployments.get(id) {
            return Some(RecordRef::Deployment(d));
        }
        if let Some(tx) = self.records.transactions.get(id) {
            return Some(RecordRef::Transaction(tx));
        }
        self.records
            .safe_transactions
            .get(id)
            .map(RecordRef::SafeTransaction)
    }

    pub fn deployment(&self, id: &str) -> Option<&Deployment> {
        self.records.deployments.get(id)
    }

    pub fn transaction(&self, id: &str) -> Option<&Transaction> {
        self.records.transactions.get(id)
    }

    pub fn safe_transaction(&self, safe_tx_hash: &str) -> Option<&SafeTransaction> {
        self.records.safe_transactions.get(safe_tx_hash)
    }

    pub fn get_by_address(&self, chain_id: ChainId, address: &str) -> Option<&Deployment> {
        self.index
            .id_for_address(chain_id, address)
            .and_then(|id| self.records.deployments.get(id))
    }

    /// Deployments matching `filter`, ordered by id.
    pub fn deployments(&self, filter: &DeploymentFilter) -> Vec<&Deployment> {
        let candidates: Box<dyn Iterator<Item = &String> + '_> =
            match (&filter.namespace, &filter.contract_name) {
                (Some(ns), _) => Box::new(self.index.ids_in_namespace(ns)),
                (None, Some(name)) => Box::new(self.index.ids_for_contract(name)),
                (None, None) => Box::new(self.records.deployments.keys()),
            };

        let mut out: Vec<&Deployment> = candidates
            .filter_map(|id| self.records.deployments.get(id))
            .filter(|d| filter.matches(d))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn all_deployments(&self) -> impl Iterator<Item = &Deployment> {
        self.records.deployments.values()
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.records.transactions.values()
    }

    pub fn safe_transactions(&self) -> impl Iterator<Item = &SafeTransaction> {
        self.records.safe_transactions.values()
    }

    pub fn pending_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.index
            .pending
            .transactions
            .iter()
            .filter_map(|id| self.records.transactions.get(id))
    }

    pub fn queued_safe_transactions(&self) -> impl Iterator<Item = &SafeTransaction> {
        self.index
            .pending
            .safe_transactions
            .iter()
            .filter_map(|hash| self.records.safe_transactions.get(hash))
    }

    /// The deployment's transaction is still pending or sits in a queued Safe
    /// batch, so its address cannot hold code yet.
    pub fn awaits_execution(&self, deployment: &Deployment) -> bool {
        let Some(tx) = deployment
            .transaction_id
            .as_deref()
            .and_then(|id| self.records.transactions.get(id))
        else {
            return false;
        };
        tx.is_pending()
            || tx.safe_context.as_ref().is_some_and(|sc| {
                self.records
                    .safe_transactions
                    .get(&sc.safe_tx_hash)
                    .is_some_and(SafeTransaction::is_queued)
            })
    }

    /// Proxies whose current implementation is not a registered deployment on the same chain.
    pub fn unresolved_proxies(&self) -> Vec<&Deployment> {
        self.records
            .deployments
            .values()
            .filter(|d| d.is_proxy() && self.index.implementation_of(&d.id).is_none())
            .collect()
    }

    /// `chainId -> namespace -> "contract[:label]" -> address`
    pub fn address_view(&self) -> AddressView {
        let mut view = AddressView::new();
        for deployment in self.records.deployments.values() {
            view.entry(deployment.chain_id)
                .or_default()
                .entry(deployment.namespace.clone())
                .or_default()
                .insert(deployment.display_name(), deployment.address.clone());
        }
        view
    }

    fn deployment_mut(&mut self, id: &str) -> Result<&mut Deployment> {
        self.records
            .deployments
            .get_mut(id)
            .ok_or_else(|| TrebError::NotFound(id.to_string()))
    }

    fn require_path(&self) -> Result<&Path> {
        self.path
            .as_deref()
            .ok_or_else(|| TrebError::validation("registry store has no backing file"))
    }

    fn replace_records(&mut self, records: Records) -> Result<()> {
        let mut fresh = Self {
            path: self.path.clone(),
            address_view_path: self.address_view_path.clone(),
            ..Self::default()
        };
        for deployment in records.deployments.into_values() {
            fresh.put_deployment(deployment)?;
        }
        for tx in records.transactions.into_values() {
            fresh.put_transaction(tx)?;
        }
        for safe_tx in records.safe_transactions.into_values() {
            fresh.put_safe_transaction(safe_tx)?;
        }
        fresh.index = fresh.rebuild_lookups();
        *self = fresh;
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| TrebError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "registry.json".to_string());
    let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    fs::write(&tmp_path, bytes).map_err(|e| TrebError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| TrebError::io(path, e))?;
    Ok(())
}
