use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Instant, Oid};

/// One observed field-level change.
///
/// For list-valued fields `removed` and `added` hold the elements taken out
/// of and put into the collection, not full replacement values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub oid: Oid,
    pub when: Instant,
    pub field: String,
    #[serde(default)]
    pub removed: Value,
    #[serde(default)]
    pub added: Value,
}

impl Activity {
    pub fn new(
        oid: impl Into<Oid>,
        when: Instant,
        field: impl Into<String>,
        removed: Value,
        added: Value,
    ) -> Self {
        Self {
            oid: oid.into(),
            when,
            field: field.into(),
            removed,
            added,
        }
    }

    /// True when both sides of the change are lists (set-like delta).
    #[must_use]
    pub fn is_list_delta(&self) -> bool {
        self.removed.is_array() && self.added.is_array()
    }
}
