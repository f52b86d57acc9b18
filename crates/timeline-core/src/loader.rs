//! Snapshot loader: everything one chunk needs, fetched up front.

use std::collections::HashMap;

use crate::model::{Activity, Instant, Oid, VersionDocument};
use crate::store::{Store, StoreError};

/// Reconstruction input for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    /// Earliest stored version; reconstruction walks backwards from it.
    pub anchor: VersionDocument,
    /// Every recorded activity of the entity, ordered by `when`.
    pub activities: Vec<Activity>,
    pub creation: Option<Instant>,
}

/// Load anchors, activities and creation instants for `oids`.
///
/// Snapshots come back in the order of `oids`. Entities without any stored
/// version are skipped.
///
/// # Errors
///
/// Returns the first [`StoreError`] raised while reading; the chunk is then
/// abandoned as a whole.
pub fn load_chunk<S: Store + ?Sized>(
    store: &S,
    oids: &[Oid],
) -> Result<Vec<EntitySnapshot>, StoreError> {
    let mut anchors: HashMap<Oid, VersionDocument> = HashMap::with_capacity(oids.len());
    for version in store.get_versions(oids)? {
        let earlier = anchors
            .get(&version.oid)
            .is_none_or(|anchor| anchor_key(&version) < anchor_key(anchor));
        if earlier {
            anchors.insert(version.oid.clone(), version);
        }
    }

    let mut activities = store.get_activities(oids)?;
    let anchored: Vec<Oid> = oids
        .iter()
        .filter(|oid| anchors.contains_key(*oid))
        .cloned()
        .collect();
    let mut creations = store.get_creation_instants(&anchored)?;

    let mut snapshots = Vec::with_capacity(anchors.len());
    for oid in oids {
        let Some(anchor) = anchors.remove(oid) else {
            tracing::trace!(%oid, "no stored version, skipping");
            continue;
        };
        snapshots.push(EntitySnapshot {
            anchor,
            activities: activities.remove(oid).unwrap_or_default(),
            creation: creations.remove(oid),
        });
    }
    Ok(snapshots)
}

// Zero-width versions sort before the open or wider one sharing their start.
fn anchor_key(version: &VersionDocument) -> (Instant, Instant) {
    (version.start, version.end.unwrap_or(Instant::MAX))
}
