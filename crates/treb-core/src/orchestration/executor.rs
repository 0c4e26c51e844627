//! Runs an execution plan against a script runner and records the results.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clients::{ExecutionResult, ScriptRequest, ScriptRunner};
use crate::error::{Result, TrebError};
use crate::ingest::{IngestContext, IngestSummary, ingest_result};
use crate::registry::RegistryStore;
use crate::types::ChainId;

use super::graph::{ExecutionPlan, PlannedComponent};
use super::plan::OrchestrationPlan;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Run-wide settings shared by every component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub network: String,
    pub chain_id: ChainId,
    pub namespace: String,
    pub dry_run: bool,
    pub debug: bool,
    pub env: BTreeMap<String, String>,
}

impl RunConfig {
    pub fn new(network: impl Into<String>, chain_id: ChainId, namespace: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            chain_id,
            namespace: namespace.into(),
            dry_run: false,
            debug: false,
            env: BTreeMap::new(),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Env for one script: run env, then network/namespace, then the
    /// component's overrides. Dry-run and debug flags cannot be overridden.
    pub fn merged_env(&self, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        env.insert("NETWORK".to_string(), self.network.clone());
        env.insert("NAMESPACE".to_string(), self.namespace.clone());
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.insert("DRY_RUN".to_string(), self.dry_run.to_string());
        env.insert("DEBUG".to_string(), self.debug.to_string());
        env
    }

    fn request(&self, name: &str, script: &str, overrides: &BTreeMap<String, String>) -> ScriptRequest {
        ScriptRequest {
            name: name.to_string(),
            script: script.to_string(),
            network: self.network.clone(),
            namespace: self.namespace.clone(),
            env: self.merged_env(overrides),
            dry_run: self.dry_run,
            debug: self.debug,
        }
    }

    fn ingest_context(&self, script: &str) -> IngestContext {
        IngestContext::new(self.namespace.clone(), self.chain_id).with_script(script)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentOutcome {
    pub name: String,
    pub rank: usize,
    pub state: ComponentState,
    /// Failure message, or the reason a component was skipped.
    pub detail: Option<String>,
    /// Records written (empty for dry runs).
    pub ingested: IngestSummary,
    /// Deployments the script reported, persisted or not.
    pub reported_deployments: usize,
}

impl ComponentOutcome {
    fn pending(step: &PlannedComponent) -> Self {
        Self {
            name: step.component.name.clone(),
            rank: step.rank,
            state: ComponentState::Pending,
            detail: None,
            ingested: IngestSummary::default(),
            reported_deployments: 0,
        }
    }
}

/// Outcome of the whole plan, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub group: String,
    pub dry_run: bool,
    pub outcomes: Vec<ComponentOutcome>,
    /// Proxy ids in the run's namespace/chain whose implementation is not registered.
    pub unresolved_proxies: Vec<String>,
}

impl RunReport {
    pub fn outcome(&self, name: &str) -> Option<&ComponentOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    pub fn count(&self, state: ComponentState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    /// Every component succeeded and every proxy link resolves.
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.state == ComponentState::Succeeded)
            && self.unresolved_proxies.is_empty()
    }
}

/// Drives components through the script runner in plan order.
pub struct Executor {
    runner: Arc<dyn ScriptRunner>,
    timeout: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl Executor {
    pub fn new(runner: Arc<dyn ScriptRunner>) -> Self {
        Self {
            runner,
            timeout: DEFAULT_TIMEOUT,
            cancel: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Components not started once `flag` is set are skipped.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Plan and execute. Planning errors are returned before any script runs.
    pub async fn run(
        &self,
        plan: &OrchestrationPlan,
        config: &RunConfig,
        store: &mut RegistryStore,
    ) -> Result<RunReport> {
        let execution = ExecutionPlan::build(plan)?;
        Ok(self.execute(&execution, config, store).await)
    }

    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        config: &RunConfig,
        store: &mut RegistryStore,
    ) -> RunReport {
        info!(
            group = %plan.group,
            components = plan.len(),
            network = %config.network,
            namespace = %config.namespace,
            dry_run = config.dry_run,
            "starting orchestration"
        );

        let mut outcomes: Vec<ComponentOutcome> =
            plan.steps.iter().map(ComponentOutcome::pending).collect();
        let mut blocked: BTreeMap<String, String> = BTreeMap::new();

        for (index, step) in plan.steps.iter().enumerate() {
            let name = &step.component.name;
            let outcome = &mut outcomes[index];

            if let Some(failed) = blocked.get(name) {
                outcome.state = ComponentState::Skipped;
                outcome.detail = Some(format!("dependency '{}' failed", failed));
                info!(component = %name, dependency = %failed, "skipping component");
                continue;
            }
            if self.is_cancelled() {
                outcome.state = ComponentState::Skipped;
                outcome.detail = Some("cancelled".to_string());
                continue;
            }

            outcome.state = ComponentState::Running;
            info!(component = %name, script = %step.component.script, rank = step.rank, "running component");

            let request = config.request(name, &step.component.script, &step.component.env);
            let run = self.invoke(&request).await.and_then(|result| {
                outcome.reported_deployments = result.deployments.len();
                if config.dry_run {
                    return Ok(IngestSummary::default());
                }
                record(store, &config.ingest_context(&step.component.script), &result)
            });

            match run {
                Ok(summary) => {
                    outcome.state = ComponentState::Succeeded;
                    outcome.ingested = summary;
                    info!(
                        component = %name,
                        deployments = outcome.reported_deployments,
                        "component succeeded"
                    );
                }
                Err(err) => {
                    warn!(component = %name, error = %err, "component failed");
                    outcome.state = ComponentState::Failed;
                    outcome.detail = Some(err.to_string());
                    for dependent in plan.transitive_dependents(name) {
                        blocked.entry(dependent).or_insert_with(|| name.clone());
                    }
                }
            }
        }

        let unresolved_proxies = if config.dry_run {
            Vec::new()
        } else {
            store
                .unresolved_proxies()
                .into_iter()
                .filter(|d| d.chain_id == config.chain_id && d.namespace == config.namespace)
                .map(|d| d.id.clone())
                .collect()
        };
        for id in &unresolved_proxies {
            warn!(proxy = %id, "proxy implementation is not registered");
        }

        let report = RunReport {
            group: plan.group.clone(),
            dry_run: config.dry_run,
            outcomes,
            unresolved_proxies,
        };
        info!(
            succeeded = report.count(ComponentState::Succeeded),
            failed = report.count(ComponentState::Failed),
            skipped = report.count(ComponentState::Skipped),
            "orchestration finished"
        );
        report
    }

    /// Run a single script outside of any plan and record its result.
    pub async fn run_script(
        &self,
        script: &str,
        config: &RunConfig,
        store: &mut RegistryStore,
    ) -> Result<IngestSummary> {
        let request = config.request(script, script, &BTreeMap::new());
        let result = self.invoke(&request).await?;
        if config.dry_run {
            return Ok(IngestSummary::default());
        }
        record(store, &config.ingest_context(script), &result)
    }

    async fn invoke(&self, request: &ScriptRequest) -> Result<ExecutionResult> {
        match tokio::time::timeout(self.timeout, self.runner.run(request)).await {
            Ok(result) => result,
            Err(_) => Err(TrebError::external(
                "script-runner",
                format!("'{}' timed out after {:?}", request.script, self.timeout),
            )),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Ingest and persist, so the next script sees the new addresses.
///
/// A failed save rolls the in-memory store back, so a later save cannot
/// persist records of a component reported as failed.
fn record(
    store: &mut RegistryStore,
    ctx: &IngestContext,
    result: &ExecutionResult,
) -> Result<IngestSummary> {
    if !store.is_persistent() {
        return ingest_result(store, ctx, result);
    }

    let before = store.records().clone();
    let summary = ingest_result(store, ctx, result)?;
    if let Err(err) = store.save() {
        store.restore(before);
        warn!(error = %err, "registry save failed; component records rolled back");
        return Err(err);
    }
    debug!(deployments = summary.deployments.len(), "registry saved after component");
    Ok(summary)
}
