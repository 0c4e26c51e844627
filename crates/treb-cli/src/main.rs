//! Treb - deployment registry and orchestration
//!
//! Usage:
//!   treb list                     # List registered deployments
//!   treb show Counter:v2          # Show one deployment
//!   treb orchestrate deploy.yaml  # Run a dependency-ordered deployment plan
//!   treb sync                     # Reconcile pending records with chain and Safe API

mod interactive;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use treb_core::context::AppContext;
use treb_core::error::TrebError;
use treb_core::orchestration::{ComponentState, OrchestrationPlan, RunReport};
use treb_core::registry::{DeploymentFilter, RegistryStore};
use treb_core::resolver::{DeploymentResolver, Resolution, ResolveFilter};
use treb_core::sync::SyncReport;
use treb_core::types::{ChainId, Deployment};

use crate::interactive::Mode;

#[derive(Parser)]
#[command(name = "treb")]
#[command(about = "Deterministic deployment registry and orchestration", long_about = None)]
struct Cli {
    /// Never prompt; ambiguous identifiers become errors
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Project config file (default: ./treb.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered deployments
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Only this contract name
        #[arg(long)]
        contract: Option<String>,

        /// Only deployments carrying this tag
        #[arg(long)]
        tag: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show a single deployment
    Show {
        /// Address, id, `[namespace/][chainId/]contract[:label]` or a name fragment
        identifier: String,

        #[command(flatten)]
        scope: ScopeArgs,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Add or remove a tag
    Tag(TagArgs),

    /// Run a dependency-ordered deployment plan
    Orchestrate {
        /// Plan document (YAML)
        plan: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Run a single deployment script and record its result
    Run {
        /// Script reference passed to the runner
        script: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Reconcile pending transactions and Safe batches
    Sync {
        /// Also remove records the chain proves never existed
        #[arg(long)]
        clean: bool,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove deployments and transactions that do not exist on-chain
    Prune {
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Print the address-only view (chainId -> namespace -> contract -> address)
    Addresses {
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[derive(Args, Default)]
struct ScopeArgs {
    /// Only this namespace
    #[arg(long, short)]
    namespace: Option<String>,

    /// Only this chain id
    #[arg(long)]
    chain: Option<ChainId>,
}

impl ScopeArgs {
    fn resolve_filter(&self) -> ResolveFilter {
        ResolveFilter {
            namespace: self.namespace.clone(),
            chain_id: self.chain,
        }
    }
}

#[derive(Args)]
struct TagArgs {
    /// Deployment identifier
    identifier: String,

    /// Tag to add
    #[arg(long, conflicts_with = "remove", required_unless_present = "remove")]
    add: Option<String>,

    /// Tag to remove
    #[arg(long)]
    remove: Option<String>,

    /// Apply to every matching deployment
    #[arg(long)]
    all: bool,

    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Args)]
struct RunArgs {
    /// Network name from treb.toml (default: [defaults].network)
    #[arg(long)]
    network: Option<String>,

    /// Namespace (default: [defaults].namespace)
    #[arg(long, short)]
    namespace: Option<String>,

    /// Simulate without broadcasting or recording anything
    #[arg(long)]
    dry_run: bool,

    /// Pass DEBUG=true to scripts
    #[arg(long)]
    debug: bool,

    /// Extra env for every script (KEY=VALUE)
    #[arg(long, value_name = "KEY=VALUE")]
    env: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "treb=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mode = Mode::detect(cli.non_interactive);
    let project_root = std::env::current_dir().context("Failed to determine current directory")?;
    let ctx = AppContext::load(project_root, cli.config.clone())?;
    tracing::debug!(config = %ctx.config_path().display(), interactive = mode.is_interactive(), "loaded configuration");

    let result = run_cli(&ctx, cli.command, mode).await;
    if let Err(err) = &result
        && is_ambiguity(err)
    {
        eprintln!("hint: narrow the identifier or pass --namespace/--chain");
    }
    result
}

async fn run_cli(ctx: &AppContext, command: Commands, mode: Mode) -> Result<()> {
    match command {
        Commands::List {
            scope,
            contract,
            tag,
            format,
        } => run_list(ctx, scope, contract, tag, format),
        Commands::Show {
            identifier,
            scope,
            format,
        } => run_show(ctx, &identifier, &scope, format, mode),
        Commands::Tag(args) => run_tag(ctx, args, mode),
        Commands::Orchestrate { plan, run } => run_orchestrate(ctx, &plan, run).await,
        Commands::Run { script, run } => run_script(ctx, &script, run).await,
        Commands::Sync { clean, format } => run_sync(ctx, clean, format).await,
        Commands::Prune { yes } => run_prune(ctx, yes, mode).await,
        Commands::Addresses { scope } => run_addresses(ctx, &scope),
    }
}

fn run_list(
    ctx: &AppContext,
    scope: ScopeArgs,
    contract: Option<String>,
    tag: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let store = ctx.open_store()?;
    let filter = DeploymentFilter {
        namespace: scope.namespace,
        chain_id: scope.chain,
        contract_name: contract,
        tag,
    };
    let deployments = store.deployments(&filter);

    match format {
        OutputFormat::Table => print_deployment_table(&deployments),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&deployments)?),
    }
    Ok(())
}

fn run_show(
    ctx: &AppContext,
    identifier: &str,
    scope: &ScopeArgs,
    format: OutputFormat,
    mode: Mode,
) -> Result<()> {
    let store = ctx.open_store()?;
    let deployment = resolve_single(&store, identifier, scope, mode)?;

    match format {
        OutputFormat::Table => print_deployment_details(&store, deployment),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(deployment)?),
    }
    Ok(())
}

/// Resolve to exactly one deployment, prompting only in interactive mode.
fn resolve_single<'a>(
    store: &'a RegistryStore,
    identifier: &str,
    scope: &ScopeArgs,
    mode: Mode,
) -> Result<&'a Deployment> {
    let resolver = DeploymentResolver::new(store);
    match resolver.resolve(identifier, &scope.resolve_filter()) {
        Resolution::Ambiguous(candidates) if mode.is_interactive() => {
            interactive::choose_deployment(identifier, &candidates)?
                .ok_or_else(|| anyhow::anyhow!("No deployment selected"))
        }
        resolution => Ok(resolution.into_result(identifier)?),
    }
}

fn run_tag(ctx: &AppContext, args: TagArgs, mode: Mode) -> Result<()> {
    let mut store = ctx.open_store()?;

    let ids: Vec<String> = {
        let resolver = DeploymentResolver::new(&store);
        match resolver.resolve(&args.identifier, &args.scope.resolve_filter()) {
            Resolution::Ambiguous(candidates) if args.all => {
                let action = tag_action(&args);
                if mode.is_interactive() && !interactive::confirm_batch(&action, &candidates)? {
                    println!("Cancelled.");
                    return Ok(());
                }
                candidates.iter().map(|d| d.id.clone()).collect()
            }
            Resolution::Ambiguous(candidates) if mode.is_interactive() => {
                match interactive::choose_deployment(&args.identifier, &candidates)? {
                    Some(deployment) => vec![deployment.id.clone()],
                    None => {
                        println!("Cancelled.");
                        return Ok(());
                    }
                }
            }
            resolution => vec![resolution.into_result(&args.identifier)?.id.clone()],
        }
    };

    for id in &ids {
        let changed = match (&args.add, &args.remove) {
            (Some(tag), _) => store.add_tag(id, tag)?,
            (None, Some(tag)) => store.remove_tag(id, tag)?,
            (None, None) => anyhow::bail!("Nothing to do: pass --add or --remove"),
        };
        if changed {
            println!("{} {} {}", style("✓").green(), tag_action(&args), id);
        } else {
            println!("• {} unchanged", id);
        }
    }
    store.save()?;
    Ok(())
}

fn tag_action(args: &TagArgs) -> String {
    match (&args.add, &args.remove) {
        (Some(tag), _) => format!("add tag '{}'", tag),
        (None, Some(tag)) => format!("remove tag '{}'", tag),
        (None, None) => "tag".to_string(),
    }
}

async fn run_orchestrate(ctx: &AppContext, plan_path: &Path, args: RunArgs) -> Result<()> {
    let plan = OrchestrationPlan::load(plan_path)
        .with_context(|| format!("Failed to load plan: {}", plan_path.display()))?;
    let config = build_run_config(ctx, &args)?;
    let mut store = ctx.open_store()?;

    let executor = ctx.executor()?.with_cancellation(cancel_on_ctrl_c());
    let report = executor.run(&plan, &config, &mut store).await?;
    print_run_report(&report);

    if !report.is_success() {
        anyhow::bail!(
            "Orchestration incomplete: {} failed, {} skipped, {} unresolved proxies",
            report.count(ComponentState::Failed),
            report.count(ComponentState::Skipped),
            report.unresolved_proxies.len()
        );
    }
    Ok(())
}

async fn run_script(ctx: &AppContext, script: &str, args: RunArgs) -> Result<()> {
    let config = build_run_config(ctx, &args)?;
    let mut store = ctx.open_store()?;

    let summary = ctx.executor()?.run_script(script, &config, &mut store).await?;
    if config.dry_run {
        println!("Dry run of {} finished; nothing recorded.", script);
        return Ok(());
    }
    if store.is_persistent() {
        store.save()?;
    }
    for id in &summary.deployments {
        println!("{} {}", style("✓").green(), id);
    }
    for id in &summary.upgraded_proxies {
        println!("  upgraded {}", id);
    }
    if let Some(hash) = &summary.safe_transaction {
        println!("  queued Safe transaction {}", hash);
    }
    Ok(())
}

fn build_run_config(
    ctx: &AppContext,
    args: &RunArgs,
) -> Result<treb_core::orchestration::RunConfig> {
    let mut config = ctx
        .run_config(args.network.as_deref(), args.namespace.as_deref())?
        .with_dry_run(args.dry_run)
        .with_debug(args.debug);
    for pair in &args.env {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Invalid env '{}', expected KEY=VALUE", pair))?;
        config = config.with_env(key, value);
    }
    Ok(config)
}

/// Components not yet started are skipped after Ctrl-C.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let signal = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the running component finishes...");
            signal.store(true, Ordering::SeqCst);
        }
    });
    flag
}

async fn run_sync(ctx: &AppContext, clean: bool, format: OutputFormat) -> Result<()> {
    let mut store = ctx.open_store()?;
    let report = ctx.sync_engine(clean)?.sync(&mut store).await;
    if report.has_changes() {
        store.save()?;
    }

    match format {
        OutputFormat::Table => print_sync_report(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sync_report_json(&report))?),
    }
    Ok(())
}

async fn run_prune(ctx: &AppContext, yes: bool, mode: Mode) -> Result<()> {
    if !yes {
        if !mode.is_interactive() {
            anyhow::bail!("Refusing to prune without confirmation; pass --yes");
        }
        if !interactive::confirm("Remove registry entries that do not exist on-chain?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let mut store = ctx.open_store()?;
    let report = ctx.sync_engine(true)?.clean(&mut store).await;
    if report.pruned.total() > 0 {
        store.save()?;
    }

    if report.pruned.total() == 0 {
        println!("Nothing to prune.");
    }
    for id in report
        .pruned
        .deployments
        .iter()
        .chain(&report.pruned.transactions)
        .chain(&report.pruned.safe_transactions)
    {
        println!("{} removed {}", style("-").red(), id);
    }
    for warning in &report.warnings {
        println!("  ⚠ {}", warning);
    }
    Ok(())
}

fn run_addresses(ctx: &AppContext, scope: &ScopeArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let mut view = store.address_view();
    if let Some(chain) = scope.chain {
        view.retain(|chain_id, _| *chain_id == chain);
    }
    if let Some(namespace) = &scope.namespace {
        for namespaces in view.values_mut() {
            namespaces.retain(|ns, _| ns == namespace);
        }
        view.retain(|_, namespaces| !namespaces.is_empty());
    }
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

fn print_deployment_table(deployments: &[&Deployment]) {
    if deployments.is_empty() {
        println!("No deployments found.");
        return;
    }

    println!("{:<44} {:<10} {:<44} Tags", "Id", "Type", "Address");
    println!("{}", "-".repeat(110));
    for deployment in deployments {
        let tags: Vec<&str> = deployment.tags.iter().map(String::as_str).collect();
        println!(
            "{:<44} {:<10} {:<44} {}",
            deployment.id,
            deployment.kind.as_str(),
            deployment.address,
            tags.join(",")
        );
    }
}

fn print_deployment_details(store: &RegistryStore, deployment: &Deployment) {
    println!("{}", style(&deployment.id).bold());
    println!("  Address:   {}", deployment.address);
    println!("  Type:      {}", deployment.kind.as_str());
    println!("  Namespace: {}", deployment.namespace);
    println!("  Chain:     {}", deployment.chain_id);
    println!("  Strategy:  {:?}", deployment.deployment_strategy.method);
    if let Some(salt) = &deployment.deployment_strategy.salt {
        println!("  Salt:      {}", salt);
    }
    if !deployment.artifact.path.is_empty() {
        println!("  Artifact:  {}", deployment.artifact.path);
    }
    println!("  Verified:  {:?}", deployment.verification.status);

    if let Some(proxy) = deployment.proxy_info() {
        let implementation = store
            .get_by_address(deployment.chain_id, &proxy.implementation)
            .map(|d| d.id.clone())
            .unwrap_or_else(|| style("unregistered").yellow().to_string());
        println!("  Implementation: {} ({})", proxy.implementation, implementation);
        for upgrade in &proxy.history {
            println!(
                "    {} -> {}",
                upgrade.upgraded_at.format("%Y-%m-%d %H:%M"),
                upgrade.implementation
            );
        }
    }
    let proxies: Vec<&str> = store
        .lookups()
        .proxies_of(&deployment.id)
        .map(String::as_str)
        .collect();
    if !proxies.is_empty() {
        println!("  Proxies:   {}", proxies.join(", "));
    }

    if let Some(tx) = deployment
        .transaction_id
        .as_deref()
        .and_then(|id| store.transaction(id))
    {
        println!("  Transaction: {} ({})", tx.id, tx.status);
        if let Some(safe) = &tx.safe_context {
            println!("    via Safe {} ({})", safe.safe_address, safe.safe_tx_hash);
        }
    }
    if !deployment.tags.is_empty() {
        let tags: Vec<&str> = deployment.tags.iter().map(String::as_str).collect();
        println!("  Tags:      {}", tags.join(", "));
    }
}

fn print_run_report(report: &RunReport) {
    let heading = if report.dry_run {
        format!("{} (dry run)", report.group)
    } else {
        report.group.clone()
    };
    println!("{}", style(heading).bold());

    for outcome in &report.outcomes {
        let marker = match outcome.state {
            ComponentState::Succeeded => style("✓").green(),
            ComponentState::Failed => style("✗").red(),
            ComponentState::Skipped => style("-").yellow(),
            ComponentState::Pending | ComponentState::Running => style("?").dim(),
        };
        println!(
            "  {} [{}] {} ({}, {} deployments)",
            marker,
            outcome.rank,
            outcome.name,
            outcome.state,
            outcome.reported_deployments
        );
        if let Some(detail) = &outcome.detail {
            println!("      {}", detail);
        }
    }
    for proxy in &report.unresolved_proxies {
        println!("  ⚠ proxy {} points at an unregistered implementation", proxy);
    }
}

fn print_sync_report(report: &SyncReport) {
    println!(
        "Safe transactions: {} checked, {} executed, {} failed, {} new confirmations",
        report.safe_checked, report.safe_executed, report.safe_failed, report.confirmations_added
    );
    println!(
        "Transactions:      {} checked, {} executed, {} failed",
        report.transactions_checked, report.transactions_executed, report.transactions_failed
    );
    if report.pruned.total() > 0 {
        println!("Pruned:            {} records", report.pruned.total());
    }
    for warning in &report.warnings {
        println!("  ⚠ {}", warning);
    }
}

fn sync_report_json(report: &SyncReport) -> serde_json::Value {
    json!({
        "safeTransactions": {
            "checked": report.safe_checked,
            "executed": report.safe_executed,
            "failed": report.safe_failed,
            "confirmationsAdded": report.confirmations_added,
        },
        "transactions": {
            "checked": report.transactions_checked,
            "executed": report.transactions_executed,
            "failed": report.transactions_failed,
        },
        "updated": report.updated,
        "pruned": {
            "deployments": report.pruned.deployments,
            "transactions": report.pruned.transactions,
            "safeTransactions": report.pruned.safe_transactions,
        },
        "warnings": report.warnings,
    })
}

fn is_ambiguity(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<TrebError>(),
        Some(TrebError::AmbiguousMatch { .. })
    )
}
