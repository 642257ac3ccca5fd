pub mod dag;
pub mod deploy;
pub mod history;
pub mod reconfigure;
pub mod resume;
pub mod validate;
pub mod versions;

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use confstore::{ConfigStore, SqliteBackend};
use deployment::{
    DeploymentPlan, DeploymentRecord, DeploymentState, Engine, Executor, RunOptions,
    SqliteDeploymentStore,
};
use opgraph::FilterSpec;

use crate::Context;
use crate::cli::{RunArgs, SelectionArgs};
use crate::interrupt;
use crate::progress::RunProgress;
use crate::runner::{CommandExecutor, MockExecutor};
use crate::ui;

/// Deployment records and configuration history share one database
pub fn open_deployments(ctx: &Context) -> Result<SqliteDeploymentStore> {
    let path = ctx.config.database_path()?;
    SqliteDeploymentStore::open(&path)
        .with_context(|| format!("Could not open database {}", path.display()))
}

pub fn open_versions(ctx: &Context) -> Result<ConfigStore<SqliteBackend>> {
    let path = ctx.config.database_path()?;
    let backend = SqliteBackend::open(&path)
        .with_context(|| format!("Could not open database {}", path.display()))?;
    Ok(ConfigStore::new(backend))
}

/// Filter requested on the command line, if any
pub fn filter_spec(selection: &SelectionArgs) -> Option<FilterSpec> {
    match (&selection.glob, &selection.regex) {
        (Some(glob), _) => Some(FilterSpec::glob(glob)),
        (None, Some(regex)) => Some(FilterSpec::regex(regex)),
        (None, None) => None,
    }
}

/// Executor for a run: the configured command, or the mock with `--mock`
pub fn executor(ctx: &Context, args: &RunArgs) -> Result<Box<dyn Executor>> {
    if args.mock {
        log::info!("Using mock executor");
        return Ok(Box::new(MockExecutor));
    }
    let config = ctx
        .config
        .config
        .executor
        .as_ref()
        .context("No [executor] configured (add one to tdeploy.toml or pass --mock)")?;
    Ok(Box::new(CommandExecutor::new(
        config,
        ctx.config.working_dir(),
    )))
}

/// Print the numbered plan
pub fn print_plan(title: &str, plan: &DeploymentPlan) {
    ui::header(title);
    ui::kv("Scope", &plan.scope.to_string());
    if let Some(filter) = &plan.filter {
        ui::kv("Filter", &filter.to_string());
    }
    println!();
    for line in plan.preview() {
        println!("  {line}");
    }
}

/// Confirm with user
pub fn confirm_proceed(prompt: &str, yes: bool) -> Result<bool> {
    use dialoguer::Confirm;

    if yes {
        return Ok(true);
    }
    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(true)
        .interact()?;
    Ok(confirmed)
}

/// Confirm, run the plan and report the outcome
///
/// Returns an error if the deployment did not succeed so the process exits
/// non-zero.
pub fn execute(
    ctx: &Context,
    plan: &DeploymentPlan,
    options: &RunOptions,
    args: &RunArgs,
) -> Result<()> {
    let store = open_deployments(ctx)?;
    let versions = open_versions(ctx)?;
    let executor = executor(ctx, args)?;

    println!();
    if !confirm_proceed(&format!("Run {} operations?", plan.len()), args.yes)? {
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }

    let options = options.clone();
    interrupt::cancel_on_ctrl_c(options.cancel.clone())?;

    let mut progress = RunProgress::new(plan.len(), ctx.quiet);
    let record = Engine::new(&store)
        .with_versions(&versions)
        .run(plan, executor.as_ref(), &options, &mut progress)?;

    print_summary(&record);
    match record.state {
        DeploymentState::Success => Ok(()),
        state => anyhow::bail!(
            "Deployment #{} ended in {state}; run `tdeploy resume {}` to retry",
            record.id,
            record.id
        ),
    }
}

pub fn print_summary(record: &DeploymentRecord) {
    let summary = record.summary();
    println!();
    println!(
        "{} Deployment #{}: {}",
        "→".cyan(),
        record.id,
        ui::state_label(record.state).bold()
    );
    ui::kv("Executed", &summary.executed().to_string());
    if summary.noop > 0 {
        ui::kv("No-op", &summary.noop.to_string());
    }
    if summary.carried_over > 0 {
        ui::kv("Already done", &summary.carried_over.to_string());
    }
    if summary.failure > 0 {
        ui::kv("Failed", &summary.failure.to_string().red().to_string());
    }
    if summary.held > 0 {
        ui::kv("Held", &summary.held.to_string().yellow().to_string());
    }
    if let (Some(start), Some(end)) = (record.started_at, record.ended_at) {
        ui::kv("Duration", &ui::format_duration(start, end));
    }
}
