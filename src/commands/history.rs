//! `tdeploy history` and `tdeploy show`

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use deployment::{DeploymentRecord, DeploymentStore};

use super::open_deployments;
use crate::Context;
use crate::ui;

pub fn list(ctx: &Context, limit: usize) -> Result<()> {
    let records = open_deployments(ctx)?.list(limit)?;
    if records.is_empty() {
        ui::info("No deployment recorded yet");
        return Ok(());
    }

    ui::header("Deployments");
    for record in &records {
        println!("  {}", history_row(record));
    }
    Ok(())
}

fn history_row(record: &DeploymentRecord) -> String {
    let summary = record.summary();
    let mut counts = format!("{}/{} done", summary.success, summary.total());
    if summary.failure > 0 {
        counts.push_str(&format!(", {} failed", summary.failure));
    }
    if summary.held > 0 {
        counts.push_str(&format!(", {} held", summary.held));
    }
    format!(
        "{:>5}  {}  {:<15}  {}  {}  {}",
        format!("#{}", record.id).bold(),
        ui::format_time(record.created_at).dimmed(),
        ui::state_label(record.state),
        record.kind,
        record.scope,
        counts.dimmed()
    )
}

pub fn show(ctx: &Context, id: u64, json: bool) -> Result<()> {
    let record = open_deployments(ctx)?
        .get(id)?
        .with_context(|| format!("Deployment #{id} not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    ui::header(&format!("Deployment #{}", record.id));
    ui::kv("State", &ui::state_label(record.state).to_string());
    ui::kv("Kind", &record.kind.to_string());
    ui::kv("Scope", &record.scope.to_string());
    if let Some(filter) = &record.filter {
        ui::kv("Filter", &filter.to_string());
    }
    ui::kv("Created", &ui::format_time(record.created_at));
    if let (Some(start), Some(end)) = (record.started_at, record.ended_at) {
        ui::kv("Duration", &ui::format_duration(start, end));
    }

    if !record.service_versions.is_empty() {
        ui::section("Configuration");
        for (service, version) in &record.service_versions {
            ui::kv(service, version.short());
        }
    }

    ui::section("Operations");
    for outcome in &record.outcomes {
        ui::outcome_line(outcome);
        if ctx.verbose > 0 && !outcome.payload.is_empty() {
            for line in outcome.payload.lines() {
                ui::dim(&format!("    {line}"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployment::{DeploymentScope, DeploymentState, OperationOutcome, OperationState, PlanKind};
    use opgraph::OperationKey;

    #[test]
    fn test_history_row_counts() {
        colored::control::set_override(false);
        let ops: Vec<OperationKey> = ["hdfs_config", "hdfs_start", "yarn_start"]
            .iter()
            .map(|name| OperationKey::parse(name).unwrap())
            .collect();
        let mut record = DeploymentRecord::new(
            PlanKind::Dag,
            DeploymentScope::All,
            None,
            ops.clone(),
        );
        record.id = 7;
        record.state = DeploymentState::Failure;
        record.outcomes = ops
            .into_iter()
            .zip([OperationState::Success, OperationState::Failure, OperationState::Held])
            .map(|(op, state)| {
                let mut outcome = OperationOutcome::pending(op, false);
                outcome.state = state;
                outcome
            })
            .collect();

        let row = history_row(&record);
        assert!(row.contains("#7"));
        assert!(row.contains("failure"));
        assert!(row.contains("1/3 done, 1 failed, 1 held"));
    }
}
