//! Progress display for deployment runs

use colored::Colorize;
use deployment::{DeploymentRecord, OperationOutcome, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};
use opgraph::OperationKey;
use std::time::Duration;

use crate::ui;

/// Spinner plus one line per finished operation
pub struct RunProgress {
    bar: ProgressBar,
    total: usize,
    quiet: bool,
}

impl RunProgress {
    pub fn new(total: usize, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::with_template("{spinner:.green} [{pos}/{len}] {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        };
        Self { bar, total, quiet }
    }
}

impl ProgressCallback for RunProgress {
    fn on_run_start(&mut self, record: &DeploymentRecord) {
        if !self.quiet {
            println!(
                "{} Deployment #{} ({} operations)",
                "→".cyan(),
                record.id,
                self.total
            );
        }
    }

    fn on_operation_start(&mut self, _index: usize, operation: &OperationKey) {
        self.bar.set_message(operation.to_string());
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn on_operation_complete(&mut self, _index: usize, outcome: &OperationOutcome) {
        self.bar.inc(1);
        if !self.quiet {
            self.bar.suspend(|| ui::outcome_line(outcome));
        }
    }

    fn on_run_complete(&mut self, _record: &DeploymentRecord) {
        self.bar.finish_and_clear();
    }
}
