//! Storage seam consumed by the reconstruction core.
//!
//! The core never talks to a database directly. It reads anchors and
//! activities and commits reconstructed chains through [`Store`]:
//!
//! - [`sqlite::SqliteStore`] is the on-disk implementation used by the CLI
//! - [`memory::MemoryStore`] keeps everything in process, with injectable
//!   load failures for exercising partial-failure behaviour

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::ErrorCode;
use crate::model::{Activity, Instant, Oid, VersionDocument, VersionId};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Failure talking to, or reading data from, a [`Store`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{}: {0}", ErrorCode::StoreUnavailable.code())]
    Unavailable(String),
    #[error("{}: sqlite: {0}", ErrorCode::StoreUnavailable.code())]
    Sqlite(#[from] rusqlite::Error),
    #[error("{}: cannot prepare store directory {}: {source}", ErrorCode::StoreUnavailable.code(), .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: malformed {what}: {detail}", ErrorCode::MalformedRecord.code())]
    Malformed { what: String, detail: String },
    #[error("{}: store schema v{found} is newer than supported v{supported}", ErrorCode::SchemaMismatch.code())]
    SchemaTooNew { found: u32, supported: u32 },
}

impl StoreError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable(_) | Self::Sqlite(_) | Self::Io { .. } => {
                ErrorCode::StoreUnavailable
            }
            Self::Malformed { .. } => ErrorCode::MalformedRecord,
            Self::SchemaTooNew { .. } => ErrorCode::SchemaMismatch,
        }
    }

    pub(crate) fn malformed(what: impl Into<String>, detail: impl ToString) -> Self {
        Self::Malformed {
            what: what.into(),
            detail: detail.to_string(),
        }
    }
}

/// Counts from one delete + insert swap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapStats {
    pub removed: usize,
    pub inserted: usize,
}

/// Backing store for version documents and activity records.
///
/// Implementations are shared by reference across worker threads.
pub trait Store: Send + Sync {
    /// Every `oid` that has at least one version document, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn all_oids(&self) -> Result<Vec<Oid>, StoreError>;

    /// All version documents whose `oid` is in `oids`, in any order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or a document is malformed.
    fn get_versions(&self, oids: &[Oid]) -> Result<Vec<VersionDocument>, StoreError>;

    /// Activity records per `oid`, each list ordered by `when` ascending.
    /// Entities without activities may be absent from the map.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or a record is malformed.
    fn get_activities(&self, oids: &[Oid]) -> Result<HashMap<Oid, Vec<Activity>>, StoreError>;

    /// Instant the entity is known to have been created, if recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the value is malformed.
    fn get_creation_instant(&self, oid: &Oid) -> Result<Option<Instant>, StoreError>;

    /// Creation instants of several entities; entities without one are absent.
    ///
    /// The default asks [`Store::get_creation_instant`] once per entity.
    ///
    /// # Errors
    ///
    /// Returns the first error raised for any entity.
    fn get_creation_instants(&self, oids: &[Oid]) -> Result<HashMap<Oid, Instant>, StoreError> {
        let mut found = HashMap::with_capacity(oids.len());
        for oid in oids {
            if let Some(at) = self.get_creation_instant(oid)? {
                found.insert(oid.clone(), at);
            }
        }
        Ok(found)
    }

    /// Delete versions by id, returning how many existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn delete_versions(&self, ids: &[VersionId]) -> Result<usize, StoreError>;

    /// Insert versions. Documents with an `id` keep it; the rest get a fresh one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written or an id already exists.
    fn insert_versions(&self, versions: &[VersionDocument]) -> Result<Vec<VersionId>, StoreError>;

    /// Replace superseded versions with reconstructed ones.
    ///
    /// The default deletes then inserts; stores with transactions should
    /// override this so both happen together.
    ///
    /// # Errors
    ///
    /// Returns an error if either half fails.
    fn swap_versions(
        &self,
        remove: &[VersionId],
        insert: &[VersionDocument],
    ) -> Result<SwapStats, StoreError> {
        let removed = self.delete_versions(remove)?;
        let inserted = self.insert_versions(insert)?.len();
        Ok(SwapStats { removed, inserted })
    }
}
