//! `tdeploy versions`

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use confstore::{ChangeSet, ConfigStore, HistoryBackend, Version, VersionedConfig};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use super::open_versions;
use crate::Context;
use crate::cli::VersionsCommand;
use crate::ui;

pub fn run(ctx: &Context, cmd: VersionsCommand) -> Result<()> {
    let store = open_versions(ctx)?;
    match cmd {
        VersionsCommand::List => list(&store),
        VersionsCommand::Log { service } => log(&store, &service),
        VersionsCommand::Commit {
            service,
            dir,
            message,
        } => commit(&store, &service, &dir, &message),
        VersionsCommand::Diff {
            service,
            from,
            to,
            content,
        } => diff(&store, &service, &from, to.as_deref(), content),
    }
}

fn list<B: HistoryBackend>(store: &ConfigStore<B>) -> Result<()> {
    let services = store.services()?;
    if services.is_empty() {
        ui::info("No configuration committed yet (see `tdeploy versions commit`)");
        return Ok(());
    }

    ui::header("Configuration versions");
    let width = services.iter().map(String::len).max().unwrap_or(0);
    for service in &services {
        let head = store.head(service)?;
        println!(
            "  {:<width$}  {}  {}  {}",
            service.bold(),
            head.id.short().yellow(),
            format!("#{}", head.sequence).dimmed(),
            head.message
        );
    }
    Ok(())
}

fn log<B: HistoryBackend>(store: &ConfigStore<B>, service: &str) -> Result<()> {
    let history = store.history(service)?;
    ui::header(&format!("{service} ({} versions)", history.len()));
    for version in history.iter().rev() {
        print_version(version);
    }
    Ok(())
}

fn print_version(version: &Version) {
    println!(
        "  {} {} {}",
        version.id.short().yellow(),
        ui::format_time(version.created_at).dimmed(),
        version.message
    );
    ui::dim(&format!("{} file(s)", version.files.len()));
}

fn commit<B: HistoryBackend>(
    store: &ConfigStore<B>,
    service: &str,
    dir: &Path,
    message: &str,
) -> Result<()> {
    let change = snapshot_dir(dir, message)?;
    if change.writes.is_empty() {
        anyhow::bail!("No files found under {}", dir.display());
    }

    match store.commit(service, &change) {
        Ok(version) => {
            ui::success(&format!(
                "{service} is now at {} ({} file(s))",
                version.id.short(),
                version.files.len()
            ));
            if let Some(parent) = &version.parent {
                let changed = store.diff(service, parent, &version.id)?;
                for path in changed {
                    ui::dim(&path);
                }
            }
            Ok(())
        }
        Err(confstore::Error::NoChanges { .. }) => {
            ui::info(&format!("{service}: nothing changed since the current version"));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Every regular file under `dir`, keyed by its `/`-separated relative path
fn snapshot_dir(dir: &Path, message: &str) -> Result<ChangeSet> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }

    let mut change = ChangeSet::new(message).replacing();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir)?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let content = fs::read(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        change = change.write(key, content);
    }
    Ok(change)
}

fn diff<B: HistoryBackend>(
    store: &ConfigStore<B>,
    service: &str,
    from: &str,
    to: Option<&str>,
    content: bool,
) -> Result<()> {
    let from = store.resolve(service, from)?;
    let to = match to {
        Some(prefix) => store.resolve(service, prefix)?,
        None => store.current_version(service)?,
    };

    let changed = store.diff(service, &from, &to)?;
    ui::header(&format!("{service}: {} → {}", from.short(), to.short()));
    if changed.is_empty() {
        ui::dim("(no changes)");
        return Ok(());
    }

    for path in &changed {
        let before = store.read_file(service, &from, path)?;
        let after = store.read_file(service, &to, path)?;
        let marker = match (&before, &after) {
            (None, Some(_)) => "+".green(),
            (Some(_), None) => "-".red(),
            _ => "~".yellow(),
        };
        println!("  {marker} {path}");
        if content {
            print_content_diff(before.as_deref(), after.as_deref());
        }
    }
    Ok(())
}

fn print_content_diff(before: Option<&[u8]>, after: Option<&[u8]>) {
    let before = String::from_utf8_lossy(before.unwrap_or_default());
    let after = String::from_utf8_lossy(after.unwrap_or_default());

    let diff = similar::TextDiff::from_lines(before.as_ref(), after.as_ref());
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => print!("      {}", format!("- {change}").red()),
            similar::ChangeTag::Insert => print!("      {}", format!("+ {change}").green()),
            similar::ChangeTag::Equal => {}
        }
        if change.missing_newline() {
            println!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confstore::MemoryBackend;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_dir_uses_relative_paths() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("conf/nested")).unwrap();
        fs::write(temp.path().join("conf/core-site.xml"), "<core/>").unwrap();
        fs::write(temp.path().join("conf/nested/log4j.properties"), "level=INFO").unwrap();

        let change = snapshot_dir(&temp.path().join("conf"), "initial").unwrap();
        assert!(change.replace);
        assert_eq!(change.message, "initial");
        let keys: Vec<&str> = change.writes.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["core-site.xml", "nested/log4j.properties"]);
        assert_eq!(change.writes["core-site.xml"], b"<core/>");
    }

    #[test]
    fn test_snapshot_dir_rejects_files() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        assert!(snapshot_dir(&file, "m").is_err());
    }

    #[test]
    fn test_commit_twice_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("hdfs-site.xml"), "<hdfs/>").unwrap();
        let store = ConfigStore::new(MemoryBackend::new());

        commit(&store, "hdfs", temp.path(), "first").unwrap();
        commit(&store, "hdfs", temp.path(), "again").unwrap();
        assert_eq!(store.history("hdfs").unwrap().len(), 1);
    }

    #[test]
    fn test_commit_removes_deleted_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.conf"), "a").unwrap();
        fs::write(temp.path().join("b.conf"), "b").unwrap();
        let store = ConfigStore::new(MemoryBackend::new());
        commit(&store, "yarn", temp.path(), "first").unwrap();

        fs::remove_file(temp.path().join("b.conf")).unwrap();
        commit(&store, "yarn", temp.path(), "drop b").unwrap();

        let head = store.head("yarn").unwrap();
        assert_eq!(head.files.keys().collect::<Vec<_>>(), vec!["a.conf"]);
        let first = store.resolve("yarn", &head.parent.unwrap().to_string()).unwrap();
        let changed = store.diff("yarn", &first, &head.id).unwrap();
        assert!(changed.contains("b.conf"));
    }
}
