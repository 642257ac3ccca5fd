//! # Confstore
//!
//! Per-service configuration history for cluster deployments.
//!
//! Every service owns an append-only, linear sequence of versions. A version
//! is a manifest of file paths to BLAKE3 content hashes, identified by the
//! hash of its parent id and manifest. File contents are stored once per
//! distinct hash.
//!
//! ## Example
//!
//! ```
//! use confstore::{ChangeSet, ConfigStore, MemoryBackend, VersionedConfig};
//!
//! let store = ConfigStore::new(MemoryBackend::new());
//! let v1 = store.commit("hdfs", &ChangeSet::new("initial").write("hdfs-site.xml", "<a/>"))?;
//! let v2 = store.commit("hdfs", &ChangeSet::new("tuning").write("hdfs-site.xml", "<b/>"))?;
//!
//! let changed = store.diff("hdfs", &v1.id, &v2.id)?;
//! assert!(changed.contains("hdfs-site.xml"));
//! # Ok::<(), confstore::Error>(())
//! ```

mod backend;
mod error;
mod sqlite;
mod store;
mod types;

pub use backend::{HistoryBackend, MemoryBackend};
pub use error::{Error, Result};
pub use sqlite::SqliteBackend;
pub use store::{ConfigStore, VersionedConfig};
pub use types::{ChangeSet, Version, VersionId};
