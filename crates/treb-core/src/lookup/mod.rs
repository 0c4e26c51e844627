//! Derived lookup indexes over the registry records.
//!
//! The index is a cache: [`LookupIndex::rebuild`] recomputes it from the
//! records, and the incremental `index_*`/`unindex_*` deltas applied by the
//! registry store must always end in the same state as a rebuild.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{ChainId, Deployment, SafeTransaction, Transaction, normalize_hex};

/// Read access to the deployment records an index is derived from.
pub trait DeploymentSource {
    fn deployment(&self, id: &str) -> Option<&Deployment>;
}

impl DeploymentSource for BTreeMap<String, Deployment> {
    fn deployment(&self, id: &str) -> Option<&Deployment> {
        self.get(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupIndex {
    /// chainId -> lowercase address -> deployment id
    #[serde(default)]
    pub by_address: BTreeMap<ChainId, BTreeMap<String, String>>,
    /// namespace -> chainId -> deployment ids
    #[serde(default)]
    pub by_namespace: BTreeMap<String, BTreeMap<ChainId, BTreeSet<String>>>,
    /// contract name -> deployment ids
    #[serde(default)]
    pub by_contract: BTreeMap<String, BTreeSet<String>>,
    /// implementation id -> proxy ids that point or pointed to it
    #[serde(default)]
    pub implementations: BTreeMap<String, BTreeSet<String>>,
    /// proxy id -> current implementation id
    #[serde(default)]
    pub proxy_to_impl: BTreeMap<String, String>,
    #[serde(default)]
    pub pending: PendingItems,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingItems {
    /// safeTxHash of every queued multisig batch
    #[serde(default)]
    pub safe_transactions: BTreeSet<String>,
    /// ids of every pending transaction
    #[serde(default)]
    pub transactions: BTreeSet<String>,
}

impl LookupIndex {
    /// Recompute the full index from the record collections.
    pub fn rebuild<'a>(
        deployments: &BTreeMap<String, Deployment>,
        transactions: impl IntoIterator<Item = &'a Transaction>,
        safe_transactions: impl IntoIterator<Item = &'a SafeTransaction>,
    ) -> Self {
        let mut index = Self::default();

        for deployment in deployments.values() {
            index.insert_identity(deployment);
        }
        for proxy in deployments.values().filter(|d| d.is_proxy()) {
            index.link_proxy(proxy);
        }
        for tx in transactions {
            index.index_transaction(tx);
        }
        for safe_tx in safe_transactions {
            index.index_safe_transaction(safe_tx);
        }

        index
    }

    /// Deployment id registered at `(chain_id, address)`.
    pub fn id_for_address(&self, chain_id: ChainId, address: &str) -> Option<&str> {
        self.by_address
            .get(&chain_id)
            .and_then(|m| m.get(&normalize_hex(address)))
            .map(String::as_str)
    }

    pub fn ids_in_namespace(&self, namespace: &str) -> impl Iterator<Item = &String> {
        self.by_namespace
            .get(namespace)
            .into_iter()
            .flat_map(|chains| chains.values().flatten())
    }

    pub fn ids_for_contract(&self, contract_name: &str) -> impl Iterator<Item = &String> {
        self.by_contract.get(contract_name).into_iter().flatten()
    }

    pub fn proxies_of(&self, implementation_id: &str) -> impl Iterator<Item = &String> {
        self.implementations
            .get(implementation_id)
            .into_iter()
            .flatten()
    }

    pub fn implementation_of(&self, proxy_id: &str) -> Option<&str> {
        self.proxy_to_impl.get(proxy_id).map(String::as_str)
    }

    /// Add a deployment that is already present in `records`.
    pub fn index_deployment(&mut self, deployment: &Deployment, records: &impl DeploymentSource) {
        self.insert_identity(deployment);
        if deployment.is_proxy() {
            self.link_proxy(deployment);
        }
        self.link_waiting_proxies(deployment, records);
    }

    /// Remove every entry derived from `deployment`.
    pub fn unindex_deployment(&mut self, deployment: &Deployment) {
        let id = deployment.id.as_str();

        if let Some(addresses) = self.by_address.get_mut(&deployment.chain_id) {
            let key = normalize_hex(&deployment.address);
            if addresses.get(&key).map(String::as_str) == Some(id) {
                addresses.remove(&key);
            }
            if addresses.is_empty() {
                self.by_address.remove(&deployment.chain_id);
            }
        }

        if let Some(chains) = self.by_namespace.get_mut(&deployment.namespace) {
            if let Some(ids) = chains.get_mut(&deployment.chain_id) {
                ids.remove(id);
                if ids.is_empty() {
                    chains.remove(&deployment.chain_id);
                }
            }
            if chains.is_empty() {
                self.by_namespace.remove(&deployment.namespace);
            }
        }

        remove_from_set_map(&mut self.by_contract, &deployment.contract_name, id);

        // As a proxy.
        self.proxy_to_impl.remove(id);
        self.implementations.retain(|_, proxies| {
            proxies.remove(id);
            !proxies.is_empty()
        });

        // As an implementation.
        self.implementations.remove(id);
        self.proxy_to_impl.retain(|_, implementation| implementation != id);
    }

    pub fn index_transaction(&mut self, tx: &Transaction) {
        if tx.is_pending() {
            self.pending.transactions.insert(tx.id.clone());
        } else {
            self.pending.transactions.remove(&tx.id);
        }
    }

    pub fn unindex_transaction(&mut self, tx: &Transaction) {
        self.pending.transactions.remove(&tx.id);
    }

    pub fn index_safe_transaction(&mut self, safe_tx: &SafeTransaction) {
        if safe_tx.is_queued() {
            self.pending
                .safe_transactions
                .insert(safe_tx.safe_tx_hash.clone());
        } else {
            self.pending.safe_transactions.remove(&safe_tx.safe_tx_hash);
        }
    }

    pub fn unindex_safe_transaction(&mut self, safe_tx: &SafeTransaction) {
        self.pending.safe_transactions.remove(&safe_tx.safe_tx_hash);
    }

    fn insert_identity(&mut self, deployment: &Deployment) {
        self.by_address
            .entry(deployment.chain_id)
            .or_default()
            .insert(normalize_hex(&deployment.address), deployment.id.clone());
        self.by_namespace
            .entry(deployment.namespace.clone())
            .or_default()
            .entry(deployment.chain_id)
            .or_default()
            .insert(deployment.id.clone());
        self.by_contract
            .entry(deployment.contract_name.clone())
            .or_default()
            .insert(deployment.id.clone());
    }

    /// Link a proxy to every implementation it references that is registered.
    fn link_proxy(&mut self, proxy: &Deployment) {
        let Some(info) = proxy.proxy_info() else {
            return;
        };

        for address in info.all_implementations() {
            if let Some(impl_id) = self.id_for_address(proxy.chain_id, address) {
                let impl_id = impl_id.to_string();
                self.implementations
                    .entry(impl_id)
                    .or_default()
                    .insert(proxy.id.clone());
            }
        }

        if let Some(impl_id) = self.id_for_address(proxy.chain_id, &info.implementation) {
            let impl_id = impl_id.to_string();
            self.proxy_to_impl.insert(proxy.id.clone(), impl_id);
        }
    }

    /// Link proxies registered before `implementation` existed.
    fn link_waiting_proxies(&mut self, implementation: &Deployment, records: &impl DeploymentSource) {
        let candidates: Vec<String> = self
            .by_address
            .get(&implementation.chain_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();

        for proxy_id in candidates {
            let Some(proxy) = records.deployment(&proxy_id) else {
                continue;
            };
            let Some(info) = proxy.proxy_info() else {
                continue;
            };
            if !info.references(&implementation.address) {
                continue;
            }
            self.implementations
                .entry(implementation.id.clone())
                .or_default()
                .insert(proxy.id.clone());
            if crate::types::same_address(&info.implementation, &implementation.address) {
                self.proxy_to_impl
                    .insert(proxy.id.clone(), implementation.id.clone());
            }
        }
    }
}

fn remove_from_set_map(map: &mut BTreeMap<String, BTreeSet<String>>, key: &str, id: &str) {
    if let Some(ids) = map.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeploymentKind;

    fn singleton(ns: &str, chain: ChainId, name: &str, address: &str) -> Deployment {
        Deployment::new(ns, chain, name, None, address, DeploymentKind::Singleton)
    }

    fn proxy(ns: &str, chain: ChainId, name: &str, address: &str, implementation: &str) -> Deployment {
        Deployment::new(
            ns,
            chain,
            name,
            None,
            address,
            DeploymentKind::proxy(implementation, None),
        )
    }

    fn records(deployments: &[Deployment]) -> BTreeMap<String, Deployment> {
        deployments
            .iter()
            .map(|d| (d.id.clone(), d.clone()))
            .collect()
    }

    #[test]
    fn rebuild_indexes_addresses_case_insensitively() {
        let d = singleton("prod", 1, "Token", "0xAAaa000000000000000000000000000000000001");
        let index = LookupIndex::rebuild(&records(&[d.clone()]), [], []);

        assert_eq!(
            index.id_for_address(1, "0xaaAA000000000000000000000000000000000001"),
            Some("prod/1/Token")
        );
        assert_eq!(index.id_for_address(2, &d.address), None);
    }

    #[test]
    fn proxy_registered_before_implementation_is_linked_later() {
        let implementation = singleton("prod", 1, "TokenImpl", "0x01");
        let proxy = proxy("prod", 1, "TokenProxy", "0x02", "0x01");

        let mut all = BTreeMap::new();
        let mut index = LookupIndex::default();

        all.insert(proxy.id.clone(), proxy.clone());
        index.index_deployment(&proxy, &all);
        assert_eq!(index.implementation_of(&proxy.id), None);

        all.insert(implementation.id.clone(), implementation.clone());
        index.index_deployment(&implementation, &all);
        assert_eq!(index.implementation_of(&proxy.id), Some("prod/1/TokenImpl"));

        assert_eq!(index, LookupIndex::rebuild(&all, [], []));
    }

    #[test]
    fn unindex_removes_links_both_ways() {
        let implementation = singleton("prod", 1, "TokenImpl", "0x01");
        let proxy = proxy("prod", 1, "TokenProxy", "0x02", "0x01");
        let mut all = records(&[implementation.clone(), proxy.clone()]);
        let mut index = LookupIndex::rebuild(&all, [], []);

        index.unindex_deployment(&implementation);
        all.remove(&implementation.id);

        assert_eq!(index.implementation_of(&proxy.id), None);
        assert_eq!(index.proxies_of(&implementation.id).count(), 0);
        assert_eq!(index, LookupIndex::rebuild(&all, [], []));
    }
}
