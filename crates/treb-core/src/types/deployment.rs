//! Deployment records: one on-chain contract instance.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChainId, same_address};

/// A single deployed contract, keyed by `namespace/chainId/contract[:label]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub namespace: String,
    pub chain_id: ChainId,
    pub contract_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub address: String,
    /// Singleton, library or proxy (with its proxy metadata).
    #[serde(flatten)]
    pub kind: DeploymentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub deployment_strategy: DeploymentStrategy,
    #[serde(default)]
    pub artifact: ArtifactInfo,
    #[serde(default)]
    pub verification: VerificationInfo,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// Build a deployment with derived id and fresh timestamps.
    pub fn new(
        namespace: impl Into<String>,
        chain_id: ChainId,
        contract_name: impl Into<String>,
        label: Option<String>,
        address: impl Into<String>,
        kind: DeploymentKind,
    ) -> Self {
        let namespace = namespace.into();
        let contract_name = contract_name.into();
        let label = label.filter(|l| !l.is_empty());
        let now = Utc::now();
        Self {
            id: Self::derive_id(&namespace, chain_id, &contract_name, label.as_deref()),
            namespace,
            chain_id,
            contract_name,
            label,
            address: address.into(),
            kind,
            transaction_id: None,
            deployment_strategy: DeploymentStrategy::default(),
            artifact: ArtifactInfo::default(),
            verification: VerificationInfo::default(),
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// `namespace/chainId/contract[:label]`
    pub fn derive_id(
        namespace: &str,
        chain_id: ChainId,
        contract_name: &str,
        label: Option<&str>,
    ) -> String {
        format!(
            "{}/{}/{}",
            namespace,
            chain_id,
            display_name(contract_name, label)
        )
    }

    /// The id this record should carry given its identifying fields.
    pub fn expected_id(&self) -> String {
        Self::derive_id(
            &self.namespace,
            self.chain_id,
            &self.contract_name,
            self.label.as_deref(),
        )
    }

    /// `contract[:label]`, as shown to users and used for fuzzy matching.
    pub fn display_name(&self) -> String {
        display_name(&self.contract_name, self.label.as_deref())
    }

    pub fn proxy_info(&self) -> Option<&ProxyInfo> {
        match &self.kind {
            DeploymentKind::Proxy { proxy_info } => Some(proxy_info),
            _ => None,
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.kind, DeploymentKind::Proxy { .. })
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_strategy(mut self, strategy: DeploymentStrategy) -> Self {
        self.deployment_strategy = strategy;
        self
    }

    pub fn with_artifact(mut self, artifact: ArtifactInfo) -> Self {
        self.artifact = artifact;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

fn display_name(contract_name: &str, label: Option<&str>) -> String {
    match label {
        Some(label) if !label.is_empty() => format!("{}:{}", contract_name, label),
        _ => contract_name.to_string(),
    }
}

/// Deployment type, tagged in the persisted form by `"type"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentKind {
    Singleton,
    Proxy {
        #[serde(rename = "proxyInfo")]
        proxy_info: ProxyInfo,
    },
    Library,
}

impl DeploymentKind {
    pub fn proxy(implementation: impl Into<String>, admin: Option<String>) -> Self {
        Self::Proxy {
            proxy_info: ProxyInfo {
                implementation: implementation.into(),
                admin,
                history: Vec::new(),
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Singleton => "SINGLETON",
            Self::Proxy { .. } => "PROXY",
            Self::Library => "LIBRARY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInfo {
    /// Current implementation address.
    pub implementation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
    /// Upgrades in the order they happened. Never rewritten.
    #[serde(default)]
    pub history: Vec<ProxyUpgrade>,
}

impl ProxyInfo {
    /// Every implementation address this proxy has pointed to, current included.
    pub fn all_implementations(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.implementation.as_str())
            .chain(self.history.iter().map(|u| u.implementation.as_str()))
    }

    pub fn references(&self, address: &str) -> bool {
        self.all_implementations().any(|a| same_address(a, address))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyUpgrade {
    pub implementation: String,
    pub upgraded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeploymentMethod {
    #[default]
    Create,
    Create2,
    Create3,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStrategy {
    pub method: DeploymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_code_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor_args: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub compiler_version: String,
    #[serde(default)]
    pub bytecode_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Partial,
    Verified,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationInfo {
    pub status: VerificationStatus,
    /// Keyed by verifier name (etherscan, sourcify, ...).
    #[serde(default)]
    pub verifiers: BTreeMap<String, VerifierStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierStatus {
    pub status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
