//! Reversing a single recorded change.
//!
//! Activities are append-only; reconstruction never edits them. To derive the
//! state *before* an activity we apply its inverse to the state *after* it:
//!
//! | Field shape | Inverse |
//! |---|---|
//! | scalar | the value becomes `removed` |
//! | list (`removed` and `added` both lists) | drop one occurrence of each `added` element, append each `removed` element |
//!
//! The inverse also reports whether the post-change state actually matched
//! what the activity claims it produced. A mismatch does not stop the undo:
//! the activity's `removed` side is trusted and applied anyway.

use serde_json::Value;

/// Result of undoing one activity against a field value.
#[derive(Debug, Clone, PartialEq)]
pub struct Undone {
    /// The field value before the activity happened.
    pub value: Value,
    /// True when the post-change value disagreed with the activity's `added`.
    pub inconsistent: bool,
}

/// Derive the pre-change value of a field from its post-change value.
///
/// `current` is the field value after the activity; `removed`/`added` are the
/// activity's recorded sides.
#[must_use]
pub fn undo_change(current: &Value, removed: &Value, added: &Value) -> Undone {
    match (removed, added) {
        (Value::Array(removed), Value::Array(added)) => undo_list_change(current, removed, added),
        _ => Undone {
            value: removed.clone(),
            inconsistent: current != added,
        },
    }
}

fn undo_list_change(current: &Value, removed: &[Value], added: &[Value]) -> Undone {
    let (mut items, mut inconsistent) = match current {
        Value::Null => (Vec::new(), false),
        Value::Array(items) => (items.clone(), false),
        // A scalar where a collection was expected: keep it as the only
        // element so nothing is silently dropped.
        other => (vec![other.clone()], true),
    };

    for element in added {
        if let Some(position) = items.iter().position(|item| item == element) {
            items.remove(position);
        } else {
            inconsistent = true;
        }
    }
    items.extend(removed.iter().cloned());

    Undone {
        value: Value::Array(items),
        inconsistent,
    }
}
