//! Configuration loading
//!
//! Two layers, merged key by key:
//! - Global: `<config dir>/treb/treb.toml`
//! - Project: `treb.toml` at the project root (or an explicit `--config` path)

pub mod merge;
pub mod parser;
pub mod schema;

use std::path::{Path, PathBuf};

use tracing::debug;

pub use merge::merge_tables;
pub use parser::{from_table, parse_treb_toml_str, read_table};
pub use schema::{DefaultsConfig, NetworkConfig, RunnerConfig, SyncConfig, TrebConfig};

/// Project config file name.
pub const CONFIG_FILE: &str = "treb.toml";

/// Location of the global config file, if the platform has a config dir.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("treb").join(CONFIG_FILE))
}

/// Load and merge the global and project layers. Missing files are skipped.
pub fn load_config(global: Option<&Path>, project: &Path) -> anyhow::Result<TrebConfig> {
    let mut table = toml::Table::new();
    for path in global.into_iter().chain(std::iter::once(project)) {
        if path.exists() {
            debug!(path = %path.display(), "loading config layer");
            merge_tables(&mut table, read_table(path)?);
        }
    }
    from_table(table)
}
