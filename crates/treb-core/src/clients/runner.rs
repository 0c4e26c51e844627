//! Script runner collaborator: executes one deployment script.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, TrebError};
use crate::types::{
    DeploymentMethod, Operation, SafeBatchEntry, TransactionStatus,
};

/// Everything a script run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRequest {
    /// Component name, or the script itself for direct runs.
    pub name: String,
    pub script: String,
    pub network: String,
    pub namespace: String,
    /// Run-level env merged with the component's overrides (component wins).
    pub env: BTreeMap<String, String>,
    pub dry_run: bool,
    pub debug: bool,
}

/// Abstracted output of one script execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    #[serde(default)]
    pub deployments: Vec<DeploymentEvent>,
    #[serde(default)]
    pub transactions: Vec<TransactionEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_proposal: Option<SafeProposal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentEventKind {
    #[default]
    Singleton,
    Proxy,
    Library,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEvent {
    pub contract_name: String,
    #[serde(default)]
    pub label: Option<String>,
    pub address: String,
    #[serde(rename = "type", default)]
    pub kind: DeploymentEventKind,
    /// Implementation address, for proxies.
    #[serde(default)]
    pub implementation: Option<String>,
    #[serde(default)]
    pub admin: Option<String>,
    #[serde(default)]
    pub strategy: DeploymentMethod,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub init_code_hash: Option<String>,
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default)]
    pub constructor_args: Option<String>,
    #[serde(default)]
    pub bytecode_hash: String,
    #[serde(default)]
    pub artifact_path: String,
    #[serde(default)]
    pub compiler_version: String,
    /// Index into [`ExecutionResult::transactions`] of the creating transaction.
    #[serde(default)]
    pub transaction: Option<usize>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    /// Absent for entries that were queued in a multisig batch.
    #[serde(default)]
    pub hash: Option<String>,
    pub status: TransactionStatus,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    /// Position inside the queued Safe batch, if it was proposed rather than broadcast.
    #[serde(default)]
    pub safe_batch_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeProposal {
    pub safe_address: String,
    pub safe_tx_hash: String,
    pub nonce: u64,
    pub proposer: String,
    #[serde(default)]
    pub transactions: Vec<SafeBatchEntry>,
}

#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, request: &ScriptRequest) -> Result<ExecutionResult>;
}

/// Runs an external command and reads the Execution Result from its stdout.
///
/// The script reference is appended as the last argument. The last non-empty
/// stdout line must be an [`ExecutionResult`] JSON document.
#[derive(Debug, Clone)]
pub struct CommandScriptRunner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandScriptRunner {
    pub fn new(command: &[String], timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| TrebError::validation("runner command must not be empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    fn build_command(&self, request: &ScriptRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&request.script)
            .env("NETWORK", &request.network)
            .env("NAMESPACE", &request.namespace)
            .env("DRY_RUN", request.dry_run.to_string())
            .env("DEBUG", request.debug.to_string())
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ScriptRunner for CommandScriptRunner {
    async fn run(&self, request: &ScriptRequest) -> Result<ExecutionResult> {
        debug!(component = %request.name, script = %request.script, "spawning script runner");
        let output = tokio::time::timeout(self.timeout, self.build_command(request).output())
            .await
            .map_err(|_| {
                TrebError::external(
                    "script-runner",
                    format!("'{}' timed out after {:?}", request.script, self.timeout),
                )
            })?
            .map_err(|e| {
                TrebError::external(
                    "script-runner",
                    format!("failed to spawn '{}': {}", self.program, e),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TrebError::external(
                "script-runner",
                format!(
                    "'{}' exited with {}: {}",
                    request.script,
                    output.status,
                    stderr.trim()
                ),
            ));
        }

        parse_execution_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Extract the Execution Result from the last non-empty stdout line.
pub fn parse_execution_output(stdout: &str) -> Result<ExecutionResult> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| TrebError::external("script-runner", "script produced no output"))?;
    serde_json::from_str(line).map_err(|e| {
        TrebError::external(
            "script-runner",
            format!("could not parse execution result: {}", e),
        )
    })
}
