//! `tdeploy deploy`

use anyhow::Result;
use deployment::{DeploymentPlan, DeploymentState, DeploymentStore, RunOptions};

use super::{execute, open_deployments, print_plan};
use crate::Context;
use crate::cli::DeployArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &DeployArgs) -> Result<()> {
    let graph = ctx.config.graph()?;
    let plan = if args.operations.is_empty() {
        DeploymentPlan::from_dag(&graph, &super::dag::request(&args.selection))?
    } else {
        DeploymentPlan::from_operations(&graph, &args.operations)?
    };

    print_plan("Deployment plan", &plan);

    if args.dry_run {
        println!();
        ui::info("Dry run - nothing executed");
        return Ok(());
    }

    hint_unfinished(&open_deployments(ctx)?, &plan)?;

    let options = RunOptions {
        stop_on_failure: !args.keep_going,
        ..Default::default()
    };
    execute(ctx, &plan, &options, &args.run)
}

/// Point at `resume` when the same scope did not finish last time
fn hint_unfinished(store: &dyn DeploymentStore, plan: &DeploymentPlan) -> Result<()> {
    if let Some(previous) = store.latest_for_scope(&plan.scope)?
        && previous.state != DeploymentState::Success
    {
        ui::warn(&format!(
            "Deployment #{} of the same scope ended in {}; `tdeploy resume {}` skips what already succeeded",
            previous.id, previous.state, previous.id
        ));
    }
    Ok(())
}
