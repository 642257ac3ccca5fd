//! Versioned configuration store
//!
//! Each service owns a linear history. Commits to one service are
//! serialised through a per-service lock; commits to different services
//! proceed independently.

use crate::backend::HistoryBackend;
use crate::error::{Error, Result};
use crate::types::{ChangeSet, Version, VersionId, diff_manifests};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

/// Read-side view of versioned configuration used during deployments
pub trait VersionedConfig: Send + Sync {
    /// Latest version of a service
    fn current_version(&self, service: &str) -> Result<VersionId>;

    /// Paths changed between two versions of a service
    fn diff(&self, service: &str, from: &VersionId, to: &VersionId) -> Result<BTreeSet<String>>;
}

/// Per-service configuration history on top of a [`HistoryBackend`]
pub struct ConfigStore<B: HistoryBackend> {
    backend: B,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<B: HistoryBackend> ConfigStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Services with a history
    pub fn services(&self) -> Result<Vec<String>> {
        self.backend.services()
    }

    /// Latest version of a service
    pub fn head(&self, service: &str) -> Result<Version> {
        self.backend
            .head(service)?
            .ok_or_else(|| Error::UnknownService {
                service: service.to_string(),
            })
    }

    /// Full history of a service, oldest first
    pub fn history(&self, service: &str) -> Result<Vec<Version>> {
        let versions = self.backend.versions(service)?;
        if versions.is_empty() {
            return Err(Error::UnknownService {
                service: service.to_string(),
            });
        }
        Ok(versions)
    }

    /// A specific version of a service
    pub fn version(&self, service: &str, id: &VersionId) -> Result<Version> {
        self.history(service)?
            .into_iter()
            .find(|v| &v.id == id)
            .ok_or_else(|| Error::UnknownVersion {
                service: service.to_string(),
                version: id.to_string(),
            })
    }

    /// Find the version whose id starts with `prefix`
    pub fn resolve(&self, service: &str, prefix: &str) -> Result<VersionId> {
        let mut matches = self
            .history(service)?
            .into_iter()
            .filter(|v| v.id.as_str().starts_with(prefix));

        match (matches.next(), matches.next()) {
            (Some(found), None) if !prefix.is_empty() => Ok(found.id),
            (None, _) => Err(Error::UnknownVersion {
                service: service.to_string(),
                version: prefix.to_string(),
            }),
            _ => Err(Error::AmbiguousVersion {
                service: service.to_string(),
                prefix: prefix.to_string(),
            }),
        }
    }

    /// Content of a file as of a version, `None` if the version lacks it
    pub fn read_file(&self, service: &str, id: &VersionId, path: &str) -> Result<Option<Vec<u8>>> {
        let version = self.version(service, id)?;
        match version.files.get(path) {
            Some(hash) => self.backend.get_blob(hash),
            None => Ok(None),
        }
    }

    /// Record a new version atop the service's history
    ///
    /// The first commit for an unknown service starts its history.
    pub fn commit(&self, service: &str, change: &ChangeSet) -> Result<Version> {
        let lock = self.service_lock(service);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let head = self.backend.head(service)?;
        let base = head.as_ref().map(|v| v.files.clone()).unwrap_or_default();

        let mut blobs = Vec::new();
        let files = change.apply(&base, |content| {
            let hash = blake3::hash(content).to_hex().to_string();
            blobs.push((hash.clone(), content.to_vec()));
            hash
        });

        if files == base {
            return Err(Error::NoChanges {
                service: service.to_string(),
            });
        }

        for (hash, content) in &blobs {
            self.backend.put_blob(hash, content)?;
        }

        let parent = head.as_ref().map(|v| v.id.clone());
        let version = Version {
            id: VersionId::compute(service, parent.as_ref(), &files),
            service: service.to_string(),
            sequence: head.as_ref().map_or(1, |v| v.sequence + 1),
            parent,
            message: change.message.clone(),
            created_at: Utc::now(),
            files,
        };
        self.backend.append(&version)?;

        log::info!(
            "Committed {} version {} ({} files)",
            service,
            version.id.short(),
            version.files.len()
        );
        Ok(version)
    }

    fn service_lock(&self, service: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(service.to_string()).or_default())
    }
}

impl<B: HistoryBackend> VersionedConfig for ConfigStore<B> {
    fn current_version(&self, service: &str) -> Result<VersionId> {
        Ok(self.head(service)?.id)
    }

    fn diff(&self, service: &str, from: &VersionId, to: &VersionId) -> Result<BTreeSet<String>> {
        let history = self.history(service)?;
        let find = |id: &VersionId| {
            history
                .iter()
                .find(|v| &v.id == id)
                .ok_or_else(|| Error::UnknownVersion {
                    service: service.to_string(),
                    version: id.to_string(),
                })
        };
        let from = find(from)?;
        let to = find(to)?;
        Ok(diff_manifests(&from.files, &to.files))
    }
}

impl<T: VersionedConfig + ?Sized> VersionedConfig for Arc<T> {
    fn current_version(&self, service: &str) -> Result<VersionId> {
        (**self).current_version(service)
    }

    fn diff(&self, service: &str, from: &VersionId, to: &VersionId) -> Result<BTreeSet<String>> {
        (**self).diff(service, from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn store() -> ConfigStore<MemoryBackend> {
        ConfigStore::new(MemoryBackend::new())
    }

    #[test]
    fn test_first_commit_creates_history() {
        let store = store();
        assert!(matches!(
            store.current_version("hdfs"),
            Err(Error::UnknownService { .. })
        ));

        let v1 = store
            .commit("hdfs", &ChangeSet::new("init").write("hdfs-site.xml", "a"))
            .unwrap();
        assert_eq!(v1.sequence, 1);
        assert!(v1.parent.is_none());
        assert_eq!(store.current_version("hdfs").unwrap(), v1.id);
        assert_eq!(store.services().unwrap(), vec!["hdfs"]);
    }

    #[test]
    fn test_commit_without_changes_fails() {
        let store = store();
        store
            .commit("hdfs", &ChangeSet::new("init").write("hdfs-site.xml", "a"))
            .unwrap();
        let err = store
            .commit("hdfs", &ChangeSet::new("again").write("hdfs-site.xml", "a"))
            .unwrap_err();
        assert!(matches!(err, Error::NoChanges { .. }));

        let err = store.commit("yarn", &ChangeSet::new("empty")).unwrap_err();
        assert!(matches!(err, Error::NoChanges { .. }));
    }

    #[test]
    fn test_diff_between_versions() {
        let store = store();
        let v1 = store
            .commit(
                "hdfs",
                &ChangeSet::new("init")
                    .write("hdfs-site.xml", "a")
                    .write("core-site.xml", "b"),
            )
            .unwrap();
        let v2 = store
            .commit("hdfs", &ChangeSet::new("tune").write("hdfs-site.xml", "c"))
            .unwrap();

        let changed: Vec<String> = store.diff("hdfs", &v1.id, &v2.id).unwrap().into_iter().collect();
        assert_eq!(changed, vec!["hdfs-site.xml"]);
        assert!(store.diff("hdfs", &v2.id, &v2.id).unwrap().is_empty());

        let err = store
            .diff("hdfs", &v1.id, &VersionId::from("missing"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownVersion { .. }));
        let err = store.diff("yarn", &v1.id, &v2.id).unwrap_err();
        assert!(matches!(err, Error::UnknownService { .. }));
    }

    #[test]
    fn test_resolve_and_read_file() {
        let store = store();
        let v1 = store
            .commit("hdfs", &ChangeSet::new("init").write("hdfs-site.xml", "a"))
            .unwrap();
        let v2 = store
            .commit("hdfs", &ChangeSet::new("drop").remove("hdfs-site.xml").write("x", "y"))
            .unwrap();

        assert_eq!(store.resolve("hdfs", v1.id.short()).unwrap(), v1.id);
        assert!(matches!(
            store.resolve("hdfs", ""),
            Err(Error::AmbiguousVersion { .. })
        ));
        assert!(matches!(
            store.resolve("hdfs", "zz"),
            Err(Error::UnknownVersion { .. })
        ));

        assert_eq!(
            store.read_file("hdfs", &v1.id, "hdfs-site.xml").unwrap().unwrap(),
            b"a"
        );
        assert!(store.read_file("hdfs", &v2.id, "hdfs-site.xml").unwrap().is_none());
    }
}
