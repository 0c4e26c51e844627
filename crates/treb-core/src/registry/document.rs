//! On-disk registry document and its versioned loader.
//!
//! Version 2 is the current shape: record collections keyed by id, plus the
//! derived `lookups` and `addresses` sections. Version 1 (or a document
//! without a `version` key) stored records as flat arrays with a lowercase
//! string `type`; it is migrated in memory on load.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TrebError};
use crate::lookup::LookupIndex;
use crate::types::{
    ArtifactInfo, ChainId, Deployment, DeploymentKind, DeploymentStrategy, SafeTransaction,
    Transaction, VerificationInfo,
};

pub const CURRENT_VERSION: u64 = 2;

/// `chainId -> namespace -> "contract[:label]" -> address`
pub type AddressView = BTreeMap<ChainId, BTreeMap<String, BTreeMap<String, String>>>;

/// The record collections, the only source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Records {
    pub deployments: BTreeMap<String, Deployment>,
    pub transactions: BTreeMap<String, Transaction>,
    pub safe_transactions: BTreeMap<String, SafeTransaction>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDocument {
    pub version: u64,
    #[serde(default)]
    pub deployments: BTreeMap<String, Deployment>,
    #[serde(default)]
    pub transactions: BTreeMap<String, Transaction>,
    #[serde(default)]
    pub safe_transactions: BTreeMap<String, SafeTransaction>,
    /// Derived. Discarded on load.
    #[serde(default, skip_deserializing)]
    pub lookups: LookupIndex,
    /// Derived. Discarded on load.
    #[serde(default, skip_deserializing, skip_serializing_if = "BTreeMap::is_empty")]
    pub addresses: AddressView,
}

impl RegistryDocument {
    pub fn new(records: &Records, lookups: LookupIndex, addresses: AddressView) -> Self {
        Self {
            version: CURRENT_VERSION,
            deployments: records.deployments.clone(),
            transactions: records.transactions.clone(),
            safe_transactions: records.safe_transactions.clone(),
            lookups,
            addresses,
        }
    }
}

/// Parse a registry document of any supported version into records.
pub fn parse_records(bytes: &[u8]) -> Result<Records> {
    let value: Value = serde_json::from_slice(bytes)?;
    let version = match value.get("version") {
        None => 1,
        Some(v) => v
            .as_u64()
            .ok_or_else(|| TrebError::validation("registry 'version' must be an integer"))?,
    };

    match version {
        CURRENT_VERSION => {
            let document: RegistryDocument = serde_json::from_value(value)?;
            check_keys("deployments", &document.deployments, |d| &d.id)?;
            check_keys("transactions", &document.transactions, |tx| &tx.id)?;
            check_keys("safeTransactions", &document.safe_transactions, |s| {
                &s.safe_tx_hash
            })?;
            Ok(Records {
                deployments: document.deployments,
                transactions: document.transactions,
                safe_transactions: document.safe_transactions,
            })
        }
        1 => {
            let legacy: LegacyDocument = serde_json::from_value(value)?;
            legacy.migrate()
        }
        other => Err(TrebError::UnsupportedVersion(other)),
    }
}

/// Every record must be filed under its own id.
fn check_keys<T>(
    section: &str,
    records: &BTreeMap<String, T>,
    id_of: impl Fn(&T) -> &String,
) -> Result<()> {
    for (key, record) in records {
        let id = id_of(record);
        if key != id {
            return Err(TrebError::validation(format!(
                "registry {} entry '{}' holds a record with id '{}'",
                section, key, id
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyDocument {
    #[serde(default)]
    deployments: Vec<LegacyDeployment>,
    #[serde(default)]
    transactions: Vec<Transaction>,
    #[serde(default)]
    safe_transactions: Vec<SafeTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyDeployment {
    namespace: String,
    chain_id: ChainId,
    contract_name: String,
    #[serde(default)]
    label: Option<String>,
    address: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    implementation: Option<String>,
    #[serde(default)]
    admin: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    deployment_strategy: DeploymentStrategy,
    #[serde(default)]
    artifact: ArtifactInfo,
    #[serde(default)]
    verification: VerificationInfo,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl LegacyDocument {
    fn migrate(self) -> Result<Records> {
        let mut records = Records::default();

        for legacy in self.deployments {
            let deployment = legacy.into_deployment()?;
            if records.deployments.contains_key(&deployment.id) {
                return Err(TrebError::validation(format!(
                    "legacy registry contains duplicate deployment '{}'",
                    deployment.id
                )));
            }
            records
                .deployments
                .insert(deployment.id.clone(), deployment);
        }
        for tx in self.transactions {
            records.transactions.insert(tx.id.clone(), tx);
        }
        for safe_tx in self.safe_transactions {
            records
                .safe_transactions
                .insert(safe_tx.safe_tx_hash.clone(), safe_tx);
        }

        Ok(records)
    }
}

impl LegacyDeployment {
    fn into_deployment(self) -> Result<Deployment> {
        let kind = match self.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("singleton") | Some("implementation") => DeploymentKind::Singleton,
            Some("library") => DeploymentKind::Library,
            Some("proxy") => {
                let implementation = self.implementation.clone().ok_or_else(|| {
                    TrebError::validation(format!(
                        "legacy proxy {} on chain {} has no implementation",
                        self.address, self.chain_id
                    ))
                })?;
                DeploymentKind::proxy(implementation, self.admin.clone())
            }
            Some(other) => {
                return Err(TrebError::validation(format!(
                    "unknown legacy deployment type '{}'",
                    other
                )));
            }
        };

        let mut deployment = Deployment::new(
            self.namespace,
            self.chain_id,
            self.contract_name,
            self.label,
            self.address,
            kind,
        );
        deployment.transaction_id = self.transaction_id;
        deployment.deployment_strategy = self.deployment_strategy;
        deployment.artifact = self.artifact;
        deployment.verification = self.verification;
        deployment.tags = self.tags.into_iter().collect();
        if let Some(created_at) = self.created_at {
            deployment.created_at = created_at;
            deployment.updated_at = self.updated_at.unwrap_or(created_at);
        }
        Ok(deployment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_version() {
        let err = parse_records(br#"{"version": 7}"#).expect_err("version 7 should fail");
        assert!(matches!(err, TrebError::UnsupportedVersion(7)));
    }

    #[test]
    fn migrates_legacy_document() {
        let legacy = br#"{
            "deployments": [
                {"namespace": "prod", "chainId": 1, "contractName": "TokenImpl",
                 "address": "0x01", "type": "implementation"},
                {"namespace": "prod", "chainId": 1, "contractName": "Token", "label": "main",
                 "address": "0x02", "type": "proxy", "implementation": "0x01",
                 "tags": ["core"]}
            ]
        }"#;

        let records = parse_records(legacy).expect("legacy document should migrate");
        assert_eq!(records.deployments.len(), 2);

        let proxy = &records.deployments["prod/1/Token:main"];
        assert_eq!(
            proxy.proxy_info().map(|p| p.implementation.as_str()),
            Some("0x01")
        );
        assert!(proxy.tags.contains("core"));
        assert_eq!(
            records.deployments["prod/1/TokenImpl"].kind,
            DeploymentKind::Singleton
        );
    }

    #[test]
    fn legacy_proxy_without_implementation_is_rejected() {
        let legacy = br#"{"version": 1, "deployments": [
            {"namespace": "prod", "chainId": 1, "contractName": "P", "address": "0x02", "type": "proxy"}
        ]}"#;
        assert!(matches!(
            parse_records(legacy),
            Err(TrebError::Validation(_))
        ));
    }

    #[test]
    fn derived_sections_are_ignored_on_load() {
        let doc = br#"{"version": 2, "deployments": {}, "lookups": {"byContract": {"Ghost": ["x"]}}}"#;
        let records = parse_records(doc).expect("current document should parse");
        assert!(records.deployments.is_empty());
    }
}
