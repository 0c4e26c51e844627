//! Application context for unified dependency injection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::clients::{
    ChainClient, CommandScriptRunner, RpcChainClient, SafeApiClient, SafeServiceClient,
    ScriptRunner,
};
use crate::config::{CONFIG_FILE, TrebConfig, global_config_path, load_config};
use crate::orchestration::{Executor, RunConfig};
use crate::registry::RegistryStore;
use crate::sync::{SyncEngine, SyncOptions};

/// Unified application context.
///
/// The CLI creates this once per invocation and builds the registry store and
/// collaborators from it.
#[derive(Debug, Clone)]
pub struct AppContext {
    project_root: PathBuf,
    config_path: PathBuf,
    config: TrebConfig,
}

impl AppContext {
    /// Load configuration for `project_root`, layering the global config under
    /// the project's `treb.toml` (or `config_path` when given).
    pub fn load(project_root: PathBuf, config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        Self::load_with_global(project_root, config_path, global_config_path())
    }

    /// Same as [`AppContext::load`] with an explicit global config (for testing).
    pub fn load_with_global(
        project_root: PathBuf,
        config_path: Option<PathBuf>,
        global: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let config_path = config_path.unwrap_or_else(|| project_root.join(CONFIG_FILE));
        let config = load_config(global.as_deref(), &config_path)?;
        Ok(Self {
            project_root,
            config_path,
            config,
        })
    }

    /// Build a context around an already parsed configuration.
    pub fn from_config(project_root: PathBuf, config: TrebConfig) -> Self {
        Self {
            config_path: project_root.join(CONFIG_FILE),
            project_root,
            config,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config(&self) -> &TrebConfig {
        &self.config
    }

    pub fn registry_path(&self) -> PathBuf {
        self.resolve(&self.config.defaults.registry)
    }

    /// Open the registry store, attaching the address-view output if configured.
    pub fn open_store(&self) -> anyhow::Result<RegistryStore> {
        let path = self.registry_path();
        let store = RegistryStore::open(&path)
            .with_context(|| format!("Failed to open registry: {}", path.display()))?;
        Ok(match &self.config.defaults.address_view {
            Some(view) => store.with_address_view(self.resolve(view)),
            None => store,
        })
    }

    /// Run settings for `network` (or the default network) and `namespace`.
    pub fn run_config(
        &self,
        network: Option<&str>,
        namespace: Option<&str>,
    ) -> anyhow::Result<RunConfig> {
        let network_name = network
            .or_else(|| self.config.default_network())
            .context("No network given and no default network configured")?;
        let network = self.config.network(network_name)?;
        let namespace = namespace.unwrap_or(&self.config.defaults.namespace);
        Ok(RunConfig::new(network_name, network.chain_id, namespace))
    }

    pub fn script_runner(&self) -> anyhow::Result<Arc<dyn ScriptRunner>> {
        let runner = CommandScriptRunner::new(&self.config.runner.command, self.config.runner.timeout())
            .context("Invalid runner configuration")?;
        Ok(Arc::new(runner))
    }

    pub fn chain_client(&self) -> anyhow::Result<Arc<dyn ChainClient>> {
        let client = RpcChainClient::new(self.config.rpc_endpoints(), self.config.sync.timeout())
            .context("Failed to build RPC client")?;
        Ok(Arc::new(client))
    }

    pub fn safe_client(&self) -> anyhow::Result<Arc<dyn SafeApiClient>> {
        let client =
            SafeServiceClient::new(self.config.safe_api_overrides(), self.config.sync.timeout())
                .context("Failed to build Safe API client")?;
        Ok(Arc::new(client))
    }

    pub fn executor(&self) -> anyhow::Result<Executor> {
        Ok(Executor::new(self.script_runner()?).with_timeout(self.config.runner.timeout()))
    }

    pub fn sync_engine(&self, clean: bool) -> anyhow::Result<SyncEngine> {
        Ok(
            SyncEngine::new(self.chain_client()?, self.safe_client()?).with_options(SyncOptions {
                clean,
                timeout: self.config.sync.timeout(),
            }),
        )
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_treb_toml_str;

    #[test]
    fn run_config_uses_defaults() {
        let config = parse_treb_toml_str(
            r#"
[defaults]
namespace = "staging"

[networks.sepolia]
chain_id = 11155111
rpc_url = "https://rpc.sepolia.example"
"#,
        )
        .expect("config should parse");
        let ctx = AppContext::from_config(PathBuf::from("/project"), config);

        let run = ctx.run_config(None, None).expect("single network is the default");
        assert_eq!(run.network, "sepolia");
        assert_eq!(run.chain_id, 11155111);
        assert_eq!(run.namespace, "staging");

        let run = ctx
            .run_config(Some("sepolia"), Some("production"))
            .expect("explicit network");
        assert_eq!(run.namespace, "production");
        assert!(ctx.run_config(Some("mainnet"), None).is_err());
    }

    #[test]
    fn registry_path_is_relative_to_project() {
        let ctx = AppContext::from_config(PathBuf::from("/project"), TrebConfig::default());
        assert_eq!(
            ctx.registry_path(),
            PathBuf::from("/project/.treb/registry.json")
        );
    }

    #[test]
    fn opens_missing_registry_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let ctx = AppContext::from_config(dir.path().to_path_buf(), TrebConfig::default());
        let store = ctx.open_store().expect("store should open");
        assert!(store.is_persistent());
        assert_eq!(store.all_deployments().count(), 0);
    }
}
