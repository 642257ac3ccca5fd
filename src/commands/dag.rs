//! `tdeploy dag`

use anyhow::Result;
use deployment::{DeploymentPlan, PlanRequest};

use super::{filter_spec, print_plan};
use crate::Context;
use crate::cli::SelectionArgs;

pub fn run(ctx: &Context, selection: &SelectionArgs) -> Result<()> {
    let graph = ctx.config.graph()?;
    let plan = DeploymentPlan::from_dag(&graph, &request(selection))?;
    print_plan("Plan", &plan);
    Ok(())
}

pub fn request(selection: &SelectionArgs) -> PlanRequest {
    PlanRequest {
        targets: selection.targets.clone(),
        sources: selection.sources.clone(),
        filter: filter_spec(selection),
    }
}
