//! Storage backends for version histories
//!
//! A backend only stores what it is given. Linearity is checked on append:
//! the new version's parent must be the current head of its service.

use crate::error::{Error, Result};
use crate::types::Version;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Durable storage for per-service histories and file contents
pub trait HistoryBackend: Send + Sync {
    /// Services with at least one version, sorted
    fn services(&self) -> Result<Vec<String>>;

    /// Full history of a service, oldest first (empty when unknown)
    fn versions(&self, service: &str) -> Result<Vec<Version>>;

    /// Latest version of a service
    fn head(&self, service: &str) -> Result<Option<Version>>;

    /// Append a version atop the current head
    fn append(&self, version: &Version) -> Result<()>;

    /// Store file content under its hash
    fn put_blob(&self, hash: &str, content: &[u8]) -> Result<()>;

    /// Load file content by hash
    fn get_blob(&self, hash: &str) -> Result<Option<Vec<u8>>>;
}

/// Check that `version` extends `head`
pub(crate) fn check_linear(head: Option<&Version>, version: &Version) -> Result<()> {
    let expected = head.map(|v| v.id.to_string());
    let found = version.parent.as_ref().map(ToString::to_string);
    if expected != found {
        return Err(Error::NonLinearHistory {
            service: version.service.clone(),
            expected,
            found,
        });
    }
    Ok(())
}

#[derive(Default)]
struct MemoryInner {
    histories: BTreeMap<String, Vec<Version>>,
    blobs: HashMap<String, Vec<u8>>,
}

/// In-process backend, mostly for tests and dry runs
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl HistoryBackend for MemoryBackend {
    fn services(&self) -> Result<Vec<String>> {
        Ok(self.lock().histories.keys().cloned().collect())
    }

    fn versions(&self, service: &str) -> Result<Vec<Version>> {
        Ok(self
            .lock()
            .histories
            .get(service)
            .cloned()
            .unwrap_or_default())
    }

    fn head(&self, service: &str) -> Result<Option<Version>> {
        Ok(self
            .lock()
            .histories
            .get(service)
            .and_then(|history| history.last().cloned()))
    }

    fn append(&self, version: &Version) -> Result<()> {
        let mut inner = self.lock();
        let head = inner
            .histories
            .get(&version.service)
            .and_then(|history| history.last());
        check_linear(head, version)?;
        inner
            .histories
            .entry(version.service.clone())
            .or_default()
            .push(version.clone());
        Ok(())
    }

    fn put_blob(&self, hash: &str, content: &[u8]) -> Result<()> {
        self.lock()
            .blobs
            .entry(hash.to_string())
            .or_insert_with(|| content.to_vec());
        Ok(())
    }

    fn get_blob(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().blobs.get(hash).cloned())
    }
}
