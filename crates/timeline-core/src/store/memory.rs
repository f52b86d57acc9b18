//! In-process [`Store`] implementation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{Store, StoreError, SwapStats};
use crate::model::{Activity, Instant, Oid, VersionDocument, VersionId};

#[derive(Debug, Default)]
struct Inner {
    versions: BTreeMap<VersionId, VersionDocument>,
    activities: Vec<Activity>,
    creations: HashMap<Oid, Instant>,
    failing: HashSet<Oid>,
    next_id: i64,
}

impl Inner {
    fn check_loadable(&self, oids: &[Oid]) -> Result<(), StoreError> {
        match oids.iter().find(|oid| self.failing.contains(*oid)) {
            Some(oid) => Err(StoreError::Unavailable(format!(
                "injected load failure for {oid}"
            ))),
            None => Ok(()),
        }
    }

    fn insert(&mut self, version: &VersionDocument) -> Result<VersionId, StoreError> {
        let id = match version.id {
            Some(id) if self.versions.contains_key(&id) => {
                return Err(StoreError::Unavailable(format!(
                    "version id {id} already exists"
                )));
            }
            Some(id) => id,
            None => VersionId(self.next_id + 1),
        };
        self.next_id = self.next_id.max(id.0);

        let mut stored = version.clone();
        stored.id = Some(id);
        self.versions.insert(id, stored);
        Ok(id)
    }
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".to_string()))
    }

    /// Store one version, returning its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the version carries an id that already exists.
    pub fn add_version(&self, version: VersionDocument) -> Result<VersionId, StoreError> {
        self.lock()?.insert(&version)
    }

    /// Append activity records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store mutex is poisoned.
    pub fn add_activities(
        &self,
        activities: impl IntoIterator<Item = Activity>,
    ) -> Result<(), StoreError> {
        self.lock()?.activities.extend(activities);
        Ok(())
    }

    /// Record the creation instant of an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store mutex is poisoned.
    pub fn set_creation_instant(&self, oid: impl Into<Oid>, at: Instant) -> Result<(), StoreError> {
        self.lock()?.creations.insert(oid.into(), at);
        Ok(())
    }

    /// Make every read touching `oid` fail until the store is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store mutex is poisoned.
    pub fn fail_loads_for(&self, oid: impl Into<Oid>) -> Result<(), StoreError> {
        self.lock()?.failing.insert(oid.into());
        Ok(())
    }

    /// Versions of one entity ordered by `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store mutex is poisoned.
    pub fn versions_of(&self, oid: &Oid) -> Result<Vec<VersionDocument>, StoreError> {
        let inner = self.lock()?;
        let mut versions: Vec<_> = inner
            .versions
            .values()
            .filter(|version| &version.oid == oid)
            .cloned()
            .collect();
        drop(inner);
        versions.sort_by_key(|v| (v.start, v.end.unwrap_or(Instant::MAX)));
        Ok(versions)
    }

    /// Every stored version, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store mutex is poisoned.
    pub fn all_versions(&self) -> Result<Vec<VersionDocument>, StoreError> {
        Ok(self.lock()?.versions.values().cloned().collect())
    }
}

impl Store for MemoryStore {
    fn all_oids(&self) -> Result<Vec<Oid>, StoreError> {
        let inner = self.lock()?;
        let mut oids: Vec<Oid> = inner.versions.values().map(|v| v.oid.clone()).collect();
        drop(inner);
        oids.sort();
        oids.dedup();
        Ok(oids)
    }

    fn get_versions(&self, oids: &[Oid]) -> Result<Vec<VersionDocument>, StoreError> {
        let inner = self.lock()?;
        inner.check_loadable(oids)?;
        let wanted: HashSet<&Oid> = oids.iter().collect();
        Ok(inner
            .versions
            .values()
            .filter(|version| wanted.contains(&version.oid))
            .cloned()
            .collect())
    }

    fn get_activities(&self, oids: &[Oid]) -> Result<HashMap<Oid, Vec<Activity>>, StoreError> {
        let inner = self.lock()?;
        inner.check_loadable(oids)?;
        let wanted: HashSet<&Oid> = oids.iter().collect();
        let mut grouped: HashMap<Oid, Vec<Activity>> = HashMap::new();
        for activity in inner.activities.iter().filter(|a| wanted.contains(&a.oid)) {
            grouped
                .entry(activity.oid.clone())
                .or_default()
                .push(activity.clone());
        }
        drop(inner);
        for list in grouped.values_mut() {
            list.sort_by_key(|activity| activity.when);
        }
        Ok(grouped)
    }

    fn get_creation_instant(&self, oid: &Oid) -> Result<Option<Instant>, StoreError> {
        Ok(self.lock()?.creations.get(oid).copied())
    }

    fn delete_versions(&self, ids: &[VersionId]) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        Ok(ids
            .iter()
            .filter(|id| inner.versions.remove(*id).is_some())
            .count())
    }

    fn insert_versions(&self, versions: &[VersionDocument]) -> Result<Vec<VersionId>, StoreError> {
        let mut inner = self.lock()?;
        versions.iter().map(|version| inner.insert(version)).collect()
    }

    fn swap_versions(
        &self,
        remove: &[VersionId],
        insert: &[VersionDocument],
    ) -> Result<SwapStats, StoreError> {
        // Hold the lock across both halves so readers never see a partial swap.
        let mut inner = self.lock()?;
        let before = inner.versions.clone();
        let next_id = inner.next_id;
        let removed = remove
            .iter()
            .filter(|id| inner.versions.remove(*id).is_some())
            .count();
        for version in insert {
            if let Err(error) = inner.insert(version) {
                inner.versions = before;
                inner.next_id = next_id;
                return Err(error);
            }
        }
        Ok(SwapStats {
            removed,
            inserted: insert.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::model::{Activity, Oid, VersionDocument, VersionId};
    use crate::store::Store;
    use serde_json::json;

    #[test]
    fn insert_assigns_fresh_ids_and_keeps_explicit_ones() {
        let store = MemoryStore::new();
        let first = store
            .add_version(VersionDocument::new("1", 10))
            .expect("insert");
        let explicit = store
            .add_version(VersionDocument::new("2", 10).with_id(VersionId(40)))
            .expect("insert explicit");
        let next = store
            .add_version(VersionDocument::new("3", 10))
            .expect("insert after explicit");

        assert_eq!(first, VersionId(1));
        assert_eq!(explicit, VersionId(40));
        assert_eq!(next, VersionId(41));
        assert!(
            store
                .add_version(VersionDocument::new("4", 10).with_id(VersionId(40)))
                .is_err()
        );
    }

    #[test]
    fn activities_are_grouped_and_sorted() {
        let store = MemoryStore::new();
        store
            .add_activities([
                Activity::new("1", 30, "a", json!(1), json!(2)),
                Activity::new("2", 5, "a", json!(1), json!(2)),
                Activity::new("1", 10, "a", json!(0), json!(1)),
            ])
            .expect("add activities");

        let grouped = store
            .get_activities(&[Oid::from("1")])
            .expect("load activities");
        assert_eq!(grouped.len(), 1);
        let whens: Vec<_> = grouped[&Oid::from("1")].iter().map(|a| a.when).collect();
        assert_eq!(whens, vec![10, 30]);
    }

    #[test]
    fn injected_failure_only_affects_requested_oids() {
        let store = MemoryStore::new();
        store.add_version(VersionDocument::new("1", 10)).expect("insert");
        store.add_version(VersionDocument::new("3", 10)).expect("insert");
        store.fail_loads_for("3").expect("inject");

        assert!(store.get_versions(&[Oid::from("1")]).is_ok());
        assert!(store.get_versions(&[Oid::from("1"), Oid::from("3")]).is_err());
        assert!(store.get_activities(&[Oid::from("3")]).is_err());
    }

    #[test]
    fn swap_replaces_versions() {
        let store = MemoryStore::new();
        let id = store
            .add_version(VersionDocument::new("1", 10))
            .expect("insert");

        let stats = store
            .swap_versions(
                &[id],
                &[
                    VersionDocument::new("1", 5).with_end(10),
                    VersionDocument::new("1", 10).with_id(id),
                ],
            )
            .expect("swap");

        assert_eq!((stats.removed, stats.inserted), (1, 2));
        let versions = store.versions_of(&Oid::from("1")).expect("read back");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].id, Some(id));
    }
}
