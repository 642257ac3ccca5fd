//! `tdeploy resume`

use anyhow::{Context as AnyhowContext, Result};
use deployment::{DeploymentPlan, DeploymentStore, RunOptions};

use super::{execute, open_deployments, print_plan};
use crate::Context;
use crate::cli::RunArgs;
use crate::ui;

pub fn run(ctx: &Context, id: Option<u64>, args: &RunArgs) -> Result<()> {
    let graph = ctx.config.graph()?;
    let store = open_deployments(ctx)?;
    let record = match id {
        Some(id) => store
            .get(id)?
            .with_context(|| format!("Deployment #{id} not found"))?,
        None => store.last()?.context("No deployment recorded yet")?,
    };

    let plan = DeploymentPlan::resume(&graph, &record)?;
    print_plan(&format!("Resuming deployment #{}", record.id), &plan);

    let remaining = record.remaining();
    println!();
    ui::kv(
        "Already done",
        &(plan.len() - remaining.len()).to_string(),
    );
    ui::kv("Remaining", &remaining.len().to_string());

    let options = RunOptions {
        resume_from: Some(record.id),
        ..Default::default()
    };
    execute(ctx, &plan, &options, args)
}
