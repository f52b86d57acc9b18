//! Data model shared by the loader, the reconstruction algorithm and stores.

pub mod activity;
pub mod version;

pub use activity::Activity;
pub use version::{Oid, VersionDocument, VersionId};

/// Instant on the activity timeline, in microseconds since the Unix epoch.
pub type Instant = i64;

/// Name of the JSON type of `value`, used in inconsistency reports.
#[must_use]
pub const fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::json_type_name;
    use serde_json::json;

    #[test]
    fn json_type_names_cover_all_variants() {
        assert_eq!(json_type_name(&json!(null)), "null");
        assert_eq!(json_type_name(&json!(true)), "bool");
        assert_eq!(json_type_name(&json!(1.5)), "number");
        assert_eq!(json_type_name(&json!("x")), "string");
        assert_eq!(json_type_name(&json!(["x"])), "array");
        assert_eq!(json_type_name(&json!({"k": 1})), "object");
    }
}
