use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use deployment::{DeploymentState, OperationOutcome, OperationState};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Deployment Formatting
// ============================================================================

/// Colored deployment state
pub fn state_label(state: DeploymentState) -> ColoredString {
    match state {
        DeploymentState::Pending => state.as_str().dimmed(),
        DeploymentState::Running => state.as_str().cyan(),
        DeploymentState::Success => state.as_str().green(),
        DeploymentState::Failure => state.as_str().red(),
        DeploymentState::PartialFailure => state.as_str().yellow(),
    }
}

/// Symbol shown in front of an operation outcome
pub fn outcome_symbol(outcome: &OperationOutcome) -> ColoredString {
    match outcome.state {
        OperationState::Success if outcome.carried_over => "↷".dimmed(),
        OperationState::Success if outcome.noop => "○".dimmed(),
        OperationState::Success => "✓".green(),
        OperationState::Failure => "✗".red(),
        OperationState::Held => "⊘".yellow(),
        OperationState::Pending => "·".dimmed(),
        OperationState::Running => "…".cyan(),
    }
}

/// Print one outcome line, with the error indented below it
pub fn outcome_line(outcome: &OperationOutcome) {
    let note = if outcome.carried_over {
        " (already done)"
    } else if outcome.noop {
        " (noop)"
    } else if outcome.state == OperationState::Held {
        " (held)"
    } else {
        ""
    };
    let duration = match (outcome.started_at, outcome.ended_at) {
        (Some(start), Some(end)) if !outcome.carried_over => {
            format!(" {}", format_duration(start, end).dimmed())
        }
        _ => String::new(),
    };
    println!(
        "  {} {}{}{}",
        outcome_symbol(outcome),
        outcome.operation,
        note.dimmed(),
        duration
    );
    if let Some(error) = &outcome.error {
        println!("      {}", error.to_string().red());
    }
}

/// Format the time between two instants, e.g. `1m 05s`
pub fn format_duration(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let millis = (end - start).num_milliseconds().max(0);
    let secs = millis / 1000;
    if secs >= 3600 {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}.{}s", secs, (millis % 1000) / 100)
    } else {
        format!("{millis}ms")
    }
}

/// Format a timestamp for tables
pub fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Keep the last lines of a command's output
pub fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

// ============================================================================
// Tests
// ============================================================================
