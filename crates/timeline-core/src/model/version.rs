use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use super::Instant;

/// Opaque, stable identifier grouping every version of one logical entity.
///
/// Deserializes from either a JSON string or a JSON integer, since upstream
/// extractors emit both.
///
/// Ordering is numeric between two all-digit ids (`2 < 10`), places numeric
/// ids before textual ones, and is lexicographic otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Oid(String);

impl Oid {
    /// Wrap a raw identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits with leading zeros stripped, when the id is a plain integer.
    fn numeric_digits(&self) -> Option<&str> {
        let text = self.0.as_str();
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let trimmed = text.trim_start_matches('0');
        Some(if trimmed.is_empty() { "0" } else { trimmed })
    }
}

impl Ord for Oid {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric_digits(), other.numeric_digits()) {
            (Some(a), Some(b)) => a
                .len()
                .cmp(&b.len())
                .then_with(|| a.cmp(b))
                // "01" and "1" are distinct ids; keep the order total.
                .then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Oid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Oid {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Oid {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<u64> for Oid {
    fn from(raw: u64) -> Self {
        Self(raw.to_string())
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawOid {
            Text(String),
            Int(i64),
        }

        Ok(match RawOid::deserialize(deserializer)? {
            RawOid::Text(text) => Self(text),
            RawOid::Int(int) => Self(int.to_string()),
        })
    }
}

/// Store-assigned identifier of one version document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub i64);

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of one entity during the half-open interval `[start, end)`.
///
/// `end == None` marks the currently valid version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionDocument {
    /// Assigned by the store on insert; `None` for versions not yet stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<VersionId>,
    pub oid: Oid,
    pub start: Instant,
    #[serde(default)]
    pub end: Option<Instant>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Fields whose recorded activity disagreed with the derived state,
    /// mapped to the `added` value the activity claimed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub corrupted: BTreeMap<String, Value>,
}

impl VersionDocument {
    /// Create a currently valid version with no fields.
    pub fn new(oid: impl Into<Oid>, start: Instant) -> Self {
        Self {
            id: None,
            oid: oid.into(),
            start,
            end: None,
            fields: BTreeMap::new(),
            corrupted: BTreeMap::new(),
        }
    }

    /// Builder: set the store id.
    #[must_use]
    pub fn with_id(mut self, id: VersionId) -> Self {
        self.id = Some(id);
        self
    }

    /// Builder: close the interval at `end`.
    #[must_use]
    pub fn with_end(mut self, end: Instant) -> Self {
        self.end = Some(end);
        self
    }

    /// Builder: set one field value.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// True when this is the currently valid version.
    #[must_use]
    pub const fn is_current(&self) -> bool {
        self.end.is_none()
    }

    /// True when `instant` falls inside `[start, end)`.
    #[must_use]
    pub fn contains(&self, instant: Instant) -> bool {
        instant >= self.start && self.end.is_none_or(|end| instant < end)
    }

    /// True when at least one field was flagged during reconstruction.
    #[must_use]
    pub fn is_corrupted(&self) -> bool {
        !self.corrupted.is_empty()
    }

    /// Copy of this version with the store id removed.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            id: None,
            ..self.clone()
        }
    }
}
