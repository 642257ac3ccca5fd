//! `tdeploy reconfigure`

use anyhow::Result;
use deployment::{
    DeploymentPlan, DeploymentStore, ImpactResolver, RunOptions, ServiceChange, pending_changes,
};

use super::{execute, open_deployments, open_versions, print_plan};
use crate::Context;
use crate::cli::RunArgs;
use crate::ui;

pub fn run(ctx: &Context, services: &[String], dry_run: bool, args: &RunArgs) -> Result<()> {
    let graph = ctx.config.graph()?;
    let versions = open_versions(ctx)?;
    let deployed = open_deployments(ctx)?.deployed_versions()?;

    let services: Vec<String> = if services.is_empty() {
        graph.services().into_iter().map(String::from).collect()
    } else {
        for service in services {
            if !graph.services().contains(service.as_str()) {
                anyhow::bail!("Service '{service}' has no operations in the graph");
            }
        }
        services.to_vec()
    };

    let changes = pending_changes(&versions, &deployed, &services)?;
    if changes.is_empty() {
        ui::success("Deployed configuration is up to date");
        return Ok(());
    }

    ui::header("Configuration changes");
    for change in &changes {
        print_change(change);
    }

    let mapper = ctx.config.mapper()?;
    let impact = ImpactResolver::new(&graph, &versions, &mapper).resolve(&changes)?;
    for (service, files) in &impact.changed_files {
        for file in files {
            ui::dim(&format!("{service}: {file}"));
        }
    }
    if impact.is_empty() {
        println!();
        ui::info("No operation is impacted by these changes");
        return Ok(());
    }

    let plan = DeploymentPlan::from_impact(&graph, &impact)?;
    print_plan("Reconfiguration plan", &plan);

    if dry_run {
        println!();
        ui::info("Dry run - nothing executed");
        return Ok(());
    }

    execute(ctx, &plan, &RunOptions::default(), args)
}

fn print_change(change: &ServiceChange) {
    let from = change
        .from
        .as_ref()
        .map_or_else(|| "never deployed".to_string(), |v| v.short().to_string());
    ui::kv(&change.service, &format!("{from} → {}", change.to.short()));
}
