//! External collaborators: script runner, chain RPC and Safe API.
//!
//! Each is an async trait so tests and alternative backends can stand in for
//! the HTTP/process implementations provided here.

pub mod chain;
pub mod runner;
pub mod safe;

pub use chain::{ChainClient, ReceiptStatus, RpcChainClient};
pub use runner::{
    CommandScriptRunner, DeploymentEvent, DeploymentEventKind, ExecutionResult, SafeProposal,
    ScriptRequest, ScriptRunner, TransactionEvent,
};
pub use safe::{SafeApiClient, SafeServiceClient, SafeTxState};
