//! Treb Core Library
//!
//! Deployment registry, dependency-graph orchestration and state
//! reconciliation for smart-contract deployments across many chains and
//! namespaces.

pub mod clients;
pub mod config;
pub mod context;
pub mod error;
pub mod ingest;
pub mod lookup;
pub mod orchestration;
pub mod registry;
pub mod resolver;
pub mod sync;
pub mod types;

/// Re-exports of commonly used types
pub mod prelude {
    // Records
    pub use crate::types::{
        ChainId, Deployment, DeploymentKind, SafeTransaction, SafeTxStatus, Transaction,
        TransactionStatus,
    };

    // Registry
    pub use crate::registry::{DeploymentFilter, PruneSet, Record, RegistryStore};
    pub use crate::resolver::{DeploymentResolver, Resolution, ResolveFilter};

    // Orchestration
    pub use crate::orchestration::{
        ComponentState, ExecutionPlan, Executor, OrchestrationPlan, RunConfig, RunReport,
    };

    // Sync
    pub use crate::sync::{SyncEngine, SyncOptions, SyncReport};

    // Collaborators
    pub use crate::clients::{ChainClient, ExecutionResult, SafeApiClient, ScriptRunner};

    // Application
    pub use crate::config::TrebConfig;
    pub use crate::context::AppContext;
    pub use crate::error::{Result, TrebError};
}
