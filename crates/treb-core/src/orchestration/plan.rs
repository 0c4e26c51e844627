//! Orchestration plan document (YAML).
//!
//! ```yaml
//! group: Protocol
//! components:
//!   Token:
//!     script: script/DeployToken.s.sol
//!   Vault:
//!     script: script/DeployVault.s.sol
//!     deps: [Token]
//!     env:
//!       FEE_BPS: 30
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_yaml::Value;

use crate::error::{Result, TrebError};

/// One declared unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub script: String,
    pub deps: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Parsed plan, components in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestrationPlan {
    pub group: String,
    pub components: Vec<Component>,
}

#[derive(Debug, Deserialize)]
struct RawComponent {
    #[serde(default)]
    script: String,
    #[serde(default)]
    deps: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, Value>,
}

impl OrchestrationPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| TrebError::io(path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let document: Value = serde_yaml::from_str(content)?;
        let root = document
            .as_mapping()
            .ok_or_else(|| TrebError::validation("orchestration plan must be a mapping"))?;

        let group = root
            .get("group")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let declared = match root.get("components") {
            Some(Value::Mapping(map)) => map,
            Some(Value::Null) | None => {
                return Err(TrebError::validation("orchestration plan declares no components"));
            }
            Some(_) => {
                return Err(TrebError::validation(
                    "'components' must map component names to their definitions",
                ));
            }
        };

        let mut components = Vec::with_capacity(declared.len());
        // serde_yaml mappings iterate in document order.
        for (key, value) in declared {
            let name = key
                .as_str()
                .ok_or_else(|| TrebError::validation("component names must be strings"))?
                .to_string();
            let raw: RawComponent = serde_yaml::from_value(value.clone())?;
            if raw.script.trim().is_empty() {
                return Err(TrebError::validation(format!(
                    "component '{}' has no script",
                    name
                )));
            }

            let env = raw
                .env
                .into_iter()
                .map(|(k, v)| scalar_to_string(&v).map(|v| (k.clone(), v)).ok_or_else(|| {
                    TrebError::validation(format!(
                        "env value for '{}' in component '{}' must be a scalar",
                        k, name
                    ))
                }))
                .collect::<Result<BTreeMap<_, _>>>()?;

            components.push(Component {
                name,
                script: raw.script,
                deps: raw.deps,
                env,
            });
        }

        Ok(Self { group, components })
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
