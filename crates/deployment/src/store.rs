//! Deployment record persistence

use crate::error::{Error, Result};
use crate::types::{DeploymentId, DeploymentRecord, DeploymentScope, DeploymentState};
use confstore::VersionId;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Durable storage for deployment records
///
/// Writes must be durable when the call returns: the engine relies on it to
/// leave an accurate record behind if the process dies mid-run.
pub trait DeploymentStore: Send + Sync {
    /// Persist a new record, assigning its id
    fn create(&self, record: &mut DeploymentRecord) -> Result<DeploymentId>;

    /// Overwrite a record and its outcomes
    fn update(&self, record: &DeploymentRecord) -> Result<()>;

    fn get(&self, id: DeploymentId) -> Result<Option<DeploymentRecord>>;

    /// Most recently created record
    fn last(&self) -> Result<Option<DeploymentRecord>>;

    /// Most recently created record with the given scope
    fn latest_for_scope(&self, scope: &DeploymentScope) -> Result<Option<DeploymentRecord>>;

    /// Newest first
    fn list(&self, limit: usize) -> Result<Vec<DeploymentRecord>>;

    /// Configuration version deployed per service
    ///
    /// Taken from the newest successful or partially failed record that
    /// touched the service.
    fn deployed_versions(&self) -> Result<BTreeMap<String, VersionId>>;
}

/// Counts as having deployed its recorded versions
pub(crate) fn counts_as_deployed(state: DeploymentState) -> bool {
    matches!(
        state,
        DeploymentState::Success | DeploymentState::PartialFailure
    )
}

/// In-process store, for tests and one-off runs
#[derive(Default)]
pub struct MemoryDeploymentStore {
    records: Mutex<Vec<DeploymentRecord>>,
}

impl MemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Vec<DeploymentRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl DeploymentStore for MemoryDeploymentStore {
    fn create(&self, record: &mut DeploymentRecord) -> Result<DeploymentId> {
        let mut records = self.records();
        record.id = records.len() as DeploymentId + 1;
        records.push(record.clone());
        Ok(record.id)
    }

    fn update(&self, record: &DeploymentRecord) -> Result<()> {
        let mut records = self.records();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => return Err(Error::DeploymentNotFound { id: record.id }),
        }
        Ok(())
    }

    fn get(&self, id: DeploymentId) -> Result<Option<DeploymentRecord>> {
        Ok(self.records().iter().find(|r| r.id == id).cloned())
    }

    fn last(&self) -> Result<Option<DeploymentRecord>> {
        Ok(self.records().last().cloned())
    }

    fn latest_for_scope(&self, scope: &DeploymentScope) -> Result<Option<DeploymentRecord>> {
        Ok(self
            .records()
            .iter()
            .rev()
            .find(|r| &r.scope == scope)
            .cloned())
    }

    fn list(&self, limit: usize) -> Result<Vec<DeploymentRecord>> {
        Ok(self.records().iter().rev().take(limit).cloned().collect())
    }

    fn deployed_versions(&self) -> Result<BTreeMap<String, VersionId>> {
        let mut versions = BTreeMap::new();
        for record in self.records().iter().rev() {
            if !counts_as_deployed(record.state) {
                continue;
            }
            for (service, version) in &record.service_versions {
                versions
                    .entry(service.clone())
                    .or_insert_with(|| version.clone());
            }
        }
        Ok(versions)
    }
}
