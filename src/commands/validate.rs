//! `tdeploy validate`

use anyhow::Result;
use deployment::{RuleSet, verify_rules};
use opgraph::{DependencyGraph, Registry};
use std::path::Path;

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, rules: Option<&Path>) -> Result<()> {
    let sources = ctx.config.operation_sources();
    if sources.is_empty() {
        anyhow::bail!("No operation sources configured (set `operations` in tdeploy.toml)");
    }

    ui::header("Operations");
    for source in &sources {
        ui::dim(&source.display().to_string());
    }

    let built = Registry::load(&sources)
        .and_then(|registry| DependencyGraph::build_with(&registry, ctx.config.policy()));
    let graph = match built {
        Ok(graph) => graph,
        Err(opgraph::Error::Validation(err)) => {
            println!();
            for issue in err.issues() {
                ui::error(&issue.to_string());
            }
            anyhow::bail!("{} validation issue(s)", err.issues().len());
        }
        Err(e) => return Err(e.into()),
    };

    let noops = graph.operations().iter().filter(|op| op.is_noop()).count();
    println!();
    ui::success(&format!(
        "{} operations across {} services ({} no-op)",
        graph.len(),
        graph.services().len(),
        noops
    ));
    if !ctx.config.config.strict_lifecycle {
        ui::dim("strict_lifecycle = false: rule violations are only logged (use -v)");
    }

    let Some(rules) = rules else {
        return Ok(());
    };

    let rule_set = RuleSet::load(rules)?;
    ui::section(&format!("Reconfiguration rules ({})", rules.display()));
    let violations = verify_rules(&graph, &rule_set)?;
    if violations.is_empty() {
        ui::success(&format!("{} rule(s) hold", rule_set.rules.len()));
        return Ok(());
    }
    for violation in &violations {
        ui::error(&violation.to_string());
    }
    anyhow::bail!("{} rule violation(s)", violations.len())
}
