//! `treb.toml` schema.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::ChainId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrebConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Registry document, relative to the project root.
    #[serde(default = "default_registry")]
    pub registry: PathBuf,
    /// Optional flattened address-only view written next to every save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_view: Option<PathBuf>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            network: None,
            registry: default_registry(),
            address_view: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: ChainId,
    pub rpc_url: Url,
    /// Overrides the built-in Safe Transaction Service for this chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_api_url: Option<Url>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// argv prefix; the script reference is appended.
    #[serde(default = "default_runner_command")]
    pub command: Vec<String>,
    #[serde(default = "default_runner_timeout")]
    pub timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_runner_command(),
            timeout_secs: default_runner_timeout(),
        }
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_timeout")]
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_sync_timeout(),
        }
    }
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TrebConfig {
    /// Resolve a configured network by name.
    pub fn network(&self, name: &str) -> anyhow::Result<&NetworkConfig> {
        self.networks.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.networks.keys().map(String::as_str).collect();
            if known.is_empty() {
                anyhow::anyhow!("Unknown network '{}': no networks are configured", name)
            } else {
                anyhow::anyhow!(
                    "Unknown network '{}'. Configured networks: {}",
                    name,
                    known.join(", ")
                )
            }
        })
    }

    /// Name of the network to use when none is given explicitly.
    pub fn default_network(&self) -> Option<&str> {
        self.defaults.network.as_deref().or_else(|| {
            if self.networks.len() == 1 {
                self.networks.keys().next().map(String::as_str)
            } else {
                None
            }
        })
    }

    pub fn rpc_endpoints(&self) -> BTreeMap<ChainId, Url> {
        self.networks
            .values()
            .map(|n| (n.chain_id, n.rpc_url.clone()))
            .collect()
    }

    pub fn safe_api_overrides(&self) -> BTreeMap<ChainId, Url> {
        self.networks
            .values()
            .filter_map(|n| n.safe_api_url.clone().map(|url| (n.chain_id, url)))
            .collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.defaults.namespace.trim().is_empty() {
            anyhow::bail!("defaults.namespace must not be empty");
        }
        if self.runner.command.is_empty() {
            anyhow::bail!("runner.command must name a program");
        }
        let mut seen: BTreeMap<ChainId, &str> = BTreeMap::new();
        for (name, network) in &self.networks {
            if let Some(other) = seen.insert(network.chain_id, name) {
                anyhow::bail!(
                    "networks '{}' and '{}' both use chain id {}",
                    other,
                    name,
                    network.chain_id
                );
            }
        }
        if let Some(network) = &self.defaults.network {
            self.network(network)?;
        }
        Ok(())
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_registry() -> PathBuf {
    PathBuf::from(".treb/registry.json")
}

fn default_runner_command() -> Vec<String> {
    vec!["forge".to_string(), "script".to_string()]
}

fn default_runner_timeout() -> u64 {
    600
}

fn default_sync_timeout() -> u64 {
    30
}
