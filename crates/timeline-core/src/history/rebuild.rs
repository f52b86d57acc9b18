//! Backward reconstruction of one entity's version chain.
//!
//! The anchor is the earliest stored version of an entity. Every recorded
//! activity that happened before the anchor's `start` is undone, newest first,
//! and each undo splits off an older version that holds the pre-change value:
//!
//! ```text
//! anchor            [200, ∞)  status=open
//! activity @150     status: new -> open
//!
//! result            [150, 150) status=new      (older, start widened by creation instant)
//!                   [150, ∞)   status=open     (anchor, keeps its store id)
//! ```
//!
//! Several activities at the same instant share a single boundary: the second
//! one amends the version the first one split off instead of splitting again.

use serde_json::Value;

use super::undo::undo_change;
use crate::inconsistency::{InconsistencyLog, flag_inconsistency};
use crate::model::{Activity, Instant, VersionDocument};

/// Output of [`rebuild_history`] for one entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rebuilt {
    /// Reconstructed versions ordered oldest first. Empty when the stored
    /// anchor needs no change.
    pub versions: Vec<VersionDocument>,
    /// Number of activities that disagreed with the derived state.
    pub inconsistencies: usize,
}

impl Rebuilt {
    /// True when the anchor should be left untouched.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Reconstruct the versions preceding `anchor` from its entity's activities.
///
/// Only activities strictly before `anchor.start` that touch a field tracked
/// by the anchor are considered. When `creation` is earlier than the oldest
/// derived version, that version's `start` is moved back to it; this alone
/// counts as a change and yields a one-version batch.
///
/// The entry carrying the anchor's identity keeps `anchor.id`; every derived
/// entry has no id so the store assigns one on insert.
#[must_use]
pub fn rebuild_history(
    anchor: &VersionDocument,
    activities: &[Activity],
    creation: Option<Instant>,
    log: &InconsistencyLog,
) -> Rebuilt {
    let mut relevant: Vec<&Activity> = activities
        .iter()
        .filter(|activity| activity.when < anchor.start && anchor.fields.contains_key(&activity.field))
        .collect();
    relevant.sort_by(|a, b| b.when.cmp(&a.when).then_with(|| b.field.cmp(&a.field)));

    // Newest first; the last entry is always the oldest version so far.
    let mut batch = vec![anchor.clone()];
    let mut inconsistencies = 0;

    for activity in relevant {
        let Some(oldest) = batch.pop() else {
            break;
        };
        let (newer, mut older) = split_at(oldest, &mut batch, activity.when);

        let current = older
            .fields
            .get(&activity.field)
            .cloned()
            .unwrap_or(Value::Null);
        let undone = undo_change(&current, &activity.removed, &activity.added);
        older.fields.insert(activity.field.clone(), undone.value);
        if undone.inconsistent {
            flag_inconsistency(log, &mut older, activity, &current);
            inconsistencies += 1;
        }

        batch.push(newer);
        batch.push(older);
    }

    let split = batch.len() > 1;
    let mut extended = false;
    if let (Some(created), Some(oldest)) = (creation, batch.last_mut()) {
        if created < oldest.start {
            oldest.start = created;
            extended = true;
        }
    }

    if !split && !extended {
        return Rebuilt {
            versions: Vec::new(),
            inconsistencies,
        };
    }

    batch.reverse();
    tracing::trace!(
        oid = %anchor.oid,
        versions = batch.len(),
        inconsistencies,
        "rebuilt version chain"
    );
    Rebuilt {
        versions: batch,
        inconsistencies,
    }
}

/// Return `(newer, older)` around a boundary at `when`.
///
/// If `oldest` already ends at `when` it was split off by an activity at the
/// same instant, so it is amended in place and its newer neighbour is taken
/// back off the stack. Otherwise a fresh zero-width version is split off.
fn split_at(
    mut oldest: VersionDocument,
    batch: &mut Vec<VersionDocument>,
    when: Instant,
) -> (VersionDocument, VersionDocument) {
    if oldest.end == Some(when) {
        if let Some(newer) = batch.pop() {
            return (newer, oldest);
        }
    }

    let mut older = oldest.detached();
    older.corrupted.clear();
    older.start = when;
    older.end = Some(when);
    oldest.start = when;
    (oldest, older)
}
