//! Path resolution for tdeploy
//!
//! # Environment Variables
//!
//! - `TDEPLOY_CONFIG` - Explicit config file
//! - `TDEPLOY_CONFIG_DIR` - Override config directory
//! - `TDEPLOY_STATE_DIR` - Override state directory (holds the database)
//!
//! # Config File Resolution Priority
//!
//! 1. `--config` flag
//! 2. `TDEPLOY_CONFIG` environment variable
//! 3. `./tdeploy.toml`
//! 4. `<config dir>/tdeploy.toml`
//!
//! For config_dir():
//! 1. `TDEPLOY_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/tdeploy` (if set)
//! 3. `~/.config/tdeploy`
//!
//! For state_dir():
//! 1. `TDEPLOY_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/tdeploy` (if set)
//! 3. `~/.local/state/tdeploy`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for an explicit config file
pub const ENV_CONFIG: &str = "TDEPLOY_CONFIG";

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "TDEPLOY_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "TDEPLOY_STATE_DIR";

/// Name of the config file
pub const CONFIG_FILE: &str = "tdeploy.toml";

/// Name of the default database file
pub const DATABASE_FILE: &str = "tdeploy.db";

/// Directory of tdeploy's config files
pub fn config_dir() -> Result<PathBuf> {
    app_dir(ENV_CONFIG_DIR, "XDG_CONFIG_HOME", &[".config"])
}

/// Directory of tdeploy's state (the default database lives here)
pub fn state_dir() -> Result<PathBuf> {
    app_dir(ENV_STATE_DIR, "XDG_STATE_HOME", &[".local", "state"])
}

/// Override variable, then the XDG base, then a fallback under home
fn app_dir(override_var: &str, xdg_var: &str, home_parts: &[&str]) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(override_var) {
        let path = expand(&dir);
        log::debug!("{override_var} set: {}", path.display());
        return Ok(path);
    }

    if let Ok(base) = std::env::var(xdg_var) {
        let path = PathBuf::from(base).join("tdeploy");
        log::debug!("{xdg_var} set: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home_parts
        .iter()
        .fold(home, |path, part| path.join(part))
        .join("tdeploy");
    log::debug!("Falling back to {}", path.display());
    Ok(path)
}

/// Default database location
pub fn default_database() -> Result<PathBuf> {
    Ok(state_dir()?.join(DATABASE_FILE))
}

/// Locate the config file to load, if any
///
/// An explicit path (flag or `TDEPLOY_CONFIG`) is returned even if it does not
/// exist so that loading it reports the error. Otherwise the first existing
/// candidate wins.
pub fn config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        return Ok(Some(path.to_path_buf()));
    }
    if let Ok(path) = std::env::var(ENV_CONFIG) {
        return Ok(Some(expand(&path)));
    }

    let local = PathBuf::from(CONFIG_FILE);
    if local.is_file() {
        return Ok(Some(local));
    }

    let global = config_dir()?.join(CONFIG_FILE);
    if global.is_file() {
        return Ok(Some(global));
    }

    log::debug!("No {CONFIG_FILE} found, using defaults");
    Ok(None)
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Resolve a config-relative path
///
/// Relative paths are taken relative to the directory holding the config
/// file, so a config can be used from anywhere.
pub fn resolve(base: Option<&Path>, path: &str) -> PathBuf {
    let expanded = expand(path);
    match base {
        Some(base) if expanded.is_relative() => base.join(expanded),
        _ => expanded,
    }
}
