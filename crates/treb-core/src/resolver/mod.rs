//! Deployment resolver: human identifier -> registry record.
//!
//! Resolution is pure. It never prompts and never guesses between several
//! candidates; callers decide how to disambiguate an [`Resolution::Ambiguous`].
//!
//! Match families, first one with any candidate wins:
//! 1. address (case-insensitive hex)
//! 2. exact deployment id
//! 3. structured identifier: `contract[:label]`, `namespace/contract[:label]`,
//!    `chainId/contract[:label]`, `namespace/chainId/contract[:label]`
//! 4. case-insensitive substring of `contract[:label]`

use crate::error::{Result, TrebError};
use crate::registry::RegistryStore;
use crate::types::{ChainId, Deployment, is_address, same_address};

/// Narrows the candidate set before any matching happens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveFilter {
    pub namespace: Option<String>,
    pub chain_id: Option<ChainId>,
}

impl ResolveFilter {
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

    fn admits(&self, deployment: &Deployment) -> bool {
        self.namespace
            .as_deref()
            .is_none_or(|ns| deployment.namespace == ns)
            && self.chain_id.is_none_or(|c| deployment.chain_id == c)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    Found(&'a Deployment),
    /// Candidates ordered by id.
    Ambiguous(Vec<&'a Deployment>),
    NotFound,
}

impl<'a> Resolution<'a> {
    /// Convert to a hard result, for unattended callers.
    pub fn into_result(self, identifier: &str) -> Result<&'a Deployment> {
        match self {
            Self::Found(d) => Ok(d),
            Self::Ambiguous(candidates) => Err(TrebError::AmbiguousMatch {
                identifier: identifier.to_string(),
                candidates: candidates.iter().map(|d| d.id.clone()).collect(),
            }),
            Self::NotFound => Err(TrebError::NotFound(identifier.to_string())),
        }
    }

    /// Every candidate, whatever the outcome.
    pub fn candidates(&self) -> Vec<&'a Deployment> {
        match self {
            Self::Found(d) => vec![*d],
            Self::Ambiguous(candidates) => candidates.clone(),
            Self::NotFound => Vec::new(),
        }
    }
}

/// Decomposed structured identifier. `None` segments match anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredIdentifier {
    pub namespace: Option<String>,
    pub chain_id: Option<ChainId>,
    pub contract_name: String,
    pub label: Option<String>,
}

impl StructuredIdentifier {
    /// Parse one of the supported structured forms. Returns `None` for anything else.
    pub fn parse(identifier: &str) -> Option<Self> {
        let segments: Vec<&str> = identifier.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }

        let (namespace, chain_id, contract) = match segments.as_slice() {
            [contract] => (None, None, *contract),
            [scope, contract] => match scope.parse::<ChainId>() {
                Ok(chain_id) => (None, Some(chain_id), *contract),
                Err(_) => (Some(scope.to_string()), None, *contract),
            },
            [namespace, chain, contract] => {
                let chain_id = chain.parse::<ChainId>().ok()?;
                (Some(namespace.to_string()), Some(chain_id), *contract)
            }
            _ => return None,
        };

        let (contract_name, label) = match contract.split_once(':') {
            Some((name, label)) if !name.is_empty() && !label.is_empty() => {
                (name.to_string(), Some(label.to_string()))
            }
            Some(_) => return None,
            None => (contract.to_string(), None),
        };

        Some(Self {
            namespace,
            chain_id,
            contract_name,
            label,
        })
    }

    pub fn matches(&self, deployment: &Deployment) -> bool {
        deployment.contract_name == self.contract_name
            && self
                .label
                .as_deref()
                .is_none_or(|label| deployment.label.as_deref() == Some(label))
            && self
                .namespace
                .as_deref()
                .is_none_or(|ns| deployment.namespace == ns)
            && self.chain_id.is_none_or(|c| deployment.chain_id == c)
    }
}

pub struct DeploymentResolver<'a> {
    store: &'a RegistryStore,
}

impl<'a> DeploymentResolver<'a> {
    pub fn new(store: &'a RegistryStore) -> Self {
        Self { store }
    }

    pub fn resolve(&self, identifier: &str, filter: &ResolveFilter) -> Resolution<'a> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Resolution::NotFound;
        }

        let candidates: Vec<&'a Deployment> = self
            .store
            .all_deployments()
            .filter(|d| filter.admits(d))
            .collect();

        if is_address(identifier) {
            return into_resolution(
                candidates
                    .iter()
                    .copied()
                    .filter(|d| same_address(&d.address, identifier))
                    .collect(),
            );
        }

        if let Some(exact) = candidates.iter().copied().find(|d| d.id == identifier) {
            return Resolution::Found(exact);
        }

        if let Some(structured) = StructuredIdentifier::parse(identifier) {
            let matched: Vec<&'a Deployment> = candidates
                .iter()
                .copied()
                .filter(|d| structured.matches(d))
                .collect();
            if !matched.is_empty() {
                return into_resolution(matched);
            }
        }

        let needle = identifier.to_lowercase();
        into_resolution(
            candidates
                .into_iter()
                .filter(|d| d.display_name().to_lowercase().contains(&needle))
                .collect(),
        )
    }

    /// Resolve, turning ambiguity into an error.
    pub fn resolve_one(&self, identifier: &str, filter: &ResolveFilter) -> Result<&'a Deployment> {
        self.resolve(identifier, filter).into_result(identifier)
    }
}

fn into_resolution(mut matched: Vec<&Deployment>) -> Resolution<'_> {
    matched.sort_by(|a, b| a.id.cmp(&b.id));
    match matched.len() {
        0 => Resolution::NotFound,
        1 => Resolution::Found(matched[0]),
        _ => Resolution::Ambiguous(matched),
    }
}
