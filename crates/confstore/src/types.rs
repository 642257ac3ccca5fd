//! Data types for the confstore crate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Content hash identifying a version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }

    /// Hash of the parent id and the sorted file manifest
    pub(crate) fn compute(
        service: &str,
        parent: Option<&VersionId>,
        files: &BTreeMap<String, String>,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(service.as_bytes());
        hasher.update(b"\0");
        if let Some(parent) = parent {
            hasher.update(parent.as_str().as_bytes());
        }
        hasher.update(b"\0");
        for (path, hash) in files {
            hasher.update(path.as_bytes());
            hasher.update(b"\0");
            hasher.update(hash.as_bytes());
            hasher.update(b"\n");
        }
        Self(hasher.finalize().to_hex().to_string())
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One entry in a service's linear history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Content hash of this version
    pub id: VersionId,
    /// Owning service
    pub service: String,
    /// Position in the history, starting at 1
    pub sequence: u64,
    /// Previous version, `None` for the first one
    pub parent: Option<VersionId>,
    /// Commit message
    pub message: String,
    /// When the version was recorded
    pub created_at: DateTime<Utc>,
    /// File path to BLAKE3 content hash
    pub files: BTreeMap<String, String>,
}

impl Version {
    /// Paths whose content differs between two file manifests
    pub fn changed_paths(&self, other: &Version) -> BTreeSet<String> {
        diff_manifests(&self.files, &other.files)
    }
}

/// Paths added, removed or modified between two manifests
pub(crate) fn diff_manifests(
    from: &BTreeMap<String, String>,
    to: &BTreeMap<String, String>,
) -> BTreeSet<String> {
    let mut changed = BTreeSet::new();
    for (path, hash) in from {
        if to.get(path) != Some(hash) {
            changed.insert(path.clone());
        }
    }
    for path in to.keys() {
        if !from.contains_key(path) {
            changed.insert(path.clone());
        }
    }
    changed
}

/// Description of a commit
///
/// By default writes and removals apply on top of the current version. A
/// replacing change set starts from an empty file set instead, so files it
/// does not write are dropped.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub message: String,
    pub writes: BTreeMap<String, Vec<u8>>,
    pub removals: BTreeSet<String>,
    pub replace: bool,
}

impl ChangeSet {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Write (or overwrite) a file
    pub fn write(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.writes.insert(path.into(), content.into());
        self
    }

    /// Remove a file
    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.removals.insert(path.into());
        self
    }

    /// Replace the whole file set with this change set's writes
    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }

    /// Apply to a base manifest, returning the new manifest
    ///
    /// `hash` maps file content to its content key.
    pub(crate) fn apply(
        &self,
        base: &BTreeMap<String, String>,
        mut hash: impl FnMut(&[u8]) -> String,
    ) -> BTreeMap<String, String> {
        let mut files = if self.replace {
            BTreeMap::new()
        } else {
            base.clone()
        };
        for path in &self.removals {
            if files.remove(path).is_none() {
                log::debug!("Removal of {path} ignored: not present");
            }
        }
        for (path, content) in &self.writes {
            files.insert(path.clone(), hash(content));
        }
        files
    }
}
