//! Error types for registry, resolution, orchestration and sync operations.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrebError {
    #[error("no deployment matches '{0}'")]
    NotFound(String),

    #[error("'{identifier}' matches {} deployments: {}", candidates.len(), candidates.join(", "))]
    AmbiguousMatch {
        identifier: String,
        candidates: Vec<String>,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(
        "address {address} on chain {chain_id} is already registered as '{existing}', refusing to register '{incoming}'"
    )]
    ConsistencyViolation {
        chain_id: u64,
        address: String,
        existing: String,
        incoming: String,
    },

    #[error("{service} error: {message}")]
    ExternalService { service: String, message: String },

    #[error("unsupported registry document version: {0}")]
    UnsupportedVersion(u64),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, TrebError>;

impl TrebError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures of an external authority (RPC, Safe API, script runner).
    pub fn is_external(&self) -> bool {
        matches!(self, Self::ExternalService { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_message_lists_candidates() {
        let err = TrebError::AmbiguousMatch {
            identifier: "Counter".to_string(),
            candidates: vec!["a/1/Counter".to_string(), "b/1/Counter".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "'Counter' matches 2 deployments: a/1/Counter, b/1/Counter"
        );
    }

    #[test]
    fn external_errors_are_flagged() {
        assert!(TrebError::external("safe-api", "timeout").is_external());
        assert!(!TrebError::validation("cycle").is_external());
    }
}
