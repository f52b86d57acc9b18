//! SQLite-backed version store.
//!
//! Connection defaults:
//! - `journal_mode = WAL` so chunk workers can read while another commits
//! - `busy_timeout = 5s` to ride out writer contention between workers
//!
//! Each store call opens its own connection. Workers therefore never share a
//! `Connection`, and [`SqliteStore`] stays `Send + Sync` without a mutex.

pub mod migrations;
pub mod schema;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, params_from_iter};
use serde_json::Value;

use super::{Store, StoreError, SwapStats};
use crate::model::{Activity, Instant, Oid, VersionDocument, VersionId, json_type_name};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on bound parameters per `IN (...)` query.
const MAX_BIND_PARAMS: usize = 500;

/// Version store persisted in a single SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    creation_field: Option<String>,
}

impl SqliteStore {
    /// Open (or create) the store at `path` and migrate it to the latest schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the database cannot
    /// be opened or migrated, or it was written by a newer schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let store = Self {
            path: path.to_path_buf(),
            creation_field: None,
        };
        let mut conn = store.connect()?;
        let version = migrations::upgrade(&mut conn)?;
        tracing::debug!(path = %path.display(), schema_version = version, "version store ready");
        Ok(store)
    }

    /// Read creation instants from this field of an entity's earliest version.
    ///
    /// The field may hold integer microseconds or an RFC 3339 timestamp.
    #[must_use]
    pub fn with_creation_field(mut self, field: impl Into<String>) -> Self {
        self.creation_field = Some(field.into());
        self
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured creation field, if any.
    #[must_use]
    pub fn creation_field(&self) -> Option<&str> {
        self.creation_field.as_deref()
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        configure_connection(&conn)?;
        Ok(conn)
    }

    /// Append activity records to the change log.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be encoded or the write fails.
    pub fn append_activities(&self, activities: &[Activity]) -> Result<usize, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO activities (oid, when_us, field, removed_json, added_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for activity in activities {
                stmt.execute(params![
                    activity.oid.as_str(),
                    activity.when,
                    activity.field,
                    encode_json("activity removed value", &activity.removed)?,
                    encode_json("activity added value", &activity.added)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(activities.len())
    }

    /// Microsecond timestamp of the last committed swap (0 if none).
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata row cannot be read.
    pub fn last_swap_at(&self) -> Result<i64, StoreError> {
        let conn = self.connect()?;
        Ok(conn.query_row(
            "SELECT last_swap_at_us FROM store_meta WHERE id = 1",
            [],
            |row| row.get(0),
        )?)
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn encode_json(what: &str, value: &impl serde::Serialize) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|error| StoreError::malformed(what, error))
}

struct RawVersion {
    id: i64,
    oid: String,
    start_us: i64,
    end_us: Option<i64>,
    fields_json: String,
    corrupted_json: Option<String>,
}

impl RawVersion {
    fn decode(self) -> Result<VersionDocument, StoreError> {
        let fields: BTreeMap<String, Value> = serde_json::from_str(&self.fields_json)
            .map_err(|error| StoreError::malformed(format!("fields of version {}", self.id), error))?;
        let corrupted: BTreeMap<String, Value> = match self.corrupted_json {
            Some(json) => serde_json::from_str(&json).map_err(|error| {
                StoreError::malformed(format!("corrupted map of version {}", self.id), error)
            })?,
            None => BTreeMap::new(),
        };
        Ok(VersionDocument {
            id: Some(VersionId(self.id)),
            oid: Oid::from(self.oid),
            start: self.start_us,
            end: self.end_us,
            fields,
            corrupted,
        })
    }
}

fn insert_all(conn: &Connection, versions: &[VersionDocument]) -> Result<Vec<VersionId>, StoreError> {
    let mut with_id = conn.prepare(
        "INSERT INTO versions (id, oid, start_us, end_us, fields_json, corrupted_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    let mut without_id = conn.prepare(
        "INSERT INTO versions (oid, start_us, end_us, fields_json, corrupted_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;

    let mut ids = Vec::with_capacity(versions.len());
    for version in versions {
        let fields_json = encode_json("version fields", &version.fields)?;
        let corrupted_json = if version.corrupted.is_empty() {
            None
        } else {
            Some(encode_json("version corrupted map", &version.corrupted)?)
        };

        let id = match version.id {
            Some(id) => {
                with_id.execute(params![
                    id.0,
                    version.oid.as_str(),
                    version.start,
                    version.end,
                    fields_json,
                    corrupted_json,
                ])?;
                id
            }
            None => {
                without_id.execute(params![
                    version.oid.as_str(),
                    version.start,
                    version.end,
                    fields_json,
                    corrupted_json,
                ])?;
                VersionId(conn.last_insert_rowid())
            }
        };
        ids.push(id);
    }
    Ok(ids)
}

fn delete_all(conn: &Connection, ids: &[VersionId]) -> Result<usize, StoreError> {
    let mut removed = 0;
    for batch in ids.chunks(MAX_BIND_PARAMS) {
        let sql = format!(
            "DELETE FROM versions WHERE id IN ({})",
            placeholders(batch.len())
        );
        removed += conn.execute(&sql, params_from_iter(batch.iter().map(|id| id.0)))?;
    }
    Ok(removed)
}

const EARLIEST_FIELDS_SQL: &str = "SELECT fields_json FROM versions WHERE oid = ?1
     ORDER BY start_us, end_us IS NULL, end_us LIMIT 1";

/// Creation instant held in `field` of the entity's earliest version.
fn creation_of(
    stmt: &mut rusqlite::Statement<'_>,
    oid: &Oid,
    field: &str,
) -> Result<Option<Instant>, StoreError> {
    let fields_json: Option<String> = stmt
        .query_row([oid.as_str()], |row| row.get(0))
        .optional()?;
    let Some(fields_json) = fields_json else {
        return Ok(None);
    };
    let fields: BTreeMap<String, Value> = serde_json::from_str(&fields_json)
        .map_err(|error| StoreError::malformed(format!("fields of {oid}"), error))?;
    fields
        .get(field)
        .map_or(Ok(None), |value| creation_from_value(oid, field, value))
}

fn creation_from_value(oid: &Oid, field: &str, value: &Value) -> Result<Option<Instant>, StoreError> {
    let what = || format!("creation field `{field}` of {oid}");
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => number
            .as_i64()
            .map(Some)
            .ok_or_else(|| StoreError::malformed(what(), format!("{number} is not integer microseconds"))),
        Value::String(text) => chrono::DateTime::parse_from_rfc3339(text)
            .map(|at| Some(at.timestamp_micros()))
            .map_err(|error| StoreError::malformed(what(), error)),
        other => Err(StoreError::malformed(
            what(),
            format!(
                "expected integer or RFC 3339 string, got {}",
                json_type_name(other)
            ),
        )),
    }
}

impl Store for SqliteStore {
    fn all_oids(&self) -> Result<Vec<Oid>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT DISTINCT oid FROM versions")?;
        let mut oids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|oid| oid.map(Oid::from))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        // SQLite collates text; integer ids need `Oid`'s numeric order.
        oids.sort();
        Ok(oids)
    }

    fn get_versions(&self, oids: &[Oid]) -> Result<Vec<VersionDocument>, StoreError> {
        let conn = self.connect()?;
        let mut versions = Vec::new();
        for batch in oids.chunks(MAX_BIND_PARAMS) {
            let sql = format!(
                "SELECT id, oid, start_us, end_us, fields_json, corrupted_json
                 FROM versions
                 WHERE oid IN ({})
                 ORDER BY oid, start_us, end_us IS NULL, end_us",
                placeholders(batch.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(batch.iter().map(Oid::as_str)), |row| {
                Ok(RawVersion {
                    id: row.get(0)?,
                    oid: row.get(1)?,
                    start_us: row.get(2)?,
                    end_us: row.get(3)?,
                    fields_json: row.get(4)?,
                    corrupted_json: row.get(5)?,
                })
            })?;
            for row in rows {
                versions.push(row?.decode()?);
            }
        }
        Ok(versions)
    }

    fn get_activities(&self, oids: &[Oid]) -> Result<HashMap<Oid, Vec<Activity>>, StoreError> {
        let conn = self.connect()?;
        let mut grouped: HashMap<Oid, Vec<Activity>> = HashMap::new();
        for batch in oids.chunks(MAX_BIND_PARAMS) {
            let sql = format!(
                "SELECT activity_id, oid, when_us, field, removed_json, added_json
                 FROM activities
                 WHERE oid IN ({})
                 ORDER BY oid, when_us, activity_id",
                placeholders(batch.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(batch.iter().map(Oid::as_str)), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;
            for row in rows {
                let (activity_id, oid, when, field, removed_json, added_json) = row?;
                let decode = |json: &str| {
                    serde_json::from_str::<Value>(json).map_err(|error| {
                        StoreError::malformed(format!("activity {activity_id}"), error)
                    })
                };
                let activity = Activity {
                    oid: Oid::from(oid),
                    when,
                    field,
                    removed: decode(&removed_json)?,
                    added: decode(&added_json)?,
                };
                grouped
                    .entry(activity.oid.clone())
                    .or_default()
                    .push(activity);
            }
        }
        Ok(grouped)
    }

    fn get_creation_instant(&self, oid: &Oid) -> Result<Option<Instant>, StoreError> {
        let Some(field) = self.creation_field.as_deref() else {
            return Ok(None);
        };
        let conn = self.connect()?;
        let mut stmt = conn.prepare(EARLIEST_FIELDS_SQL)?;
        creation_of(&mut stmt, oid, field)
    }

    fn get_creation_instants(&self, oids: &[Oid]) -> Result<HashMap<Oid, Instant>, StoreError> {
        let mut found = HashMap::new();
        let Some(field) = self.creation_field.as_deref() else {
            return Ok(found);
        };
        // One connection and one prepared statement for the whole chunk.
        let conn = self.connect()?;
        let mut stmt = conn.prepare(EARLIEST_FIELDS_SQL)?;
        for oid in oids {
            if let Some(at) = creation_of(&mut stmt, oid, field)? {
                found.insert(oid.clone(), at);
            }
        }
        Ok(found)
    }

    fn delete_versions(&self, ids: &[VersionId]) -> Result<usize, StoreError> {
        let conn = self.connect()?;
        delete_all(&conn, ids)
    }

    fn insert_versions(&self, versions: &[VersionDocument]) -> Result<Vec<VersionId>, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ids = insert_all(&tx, versions)?;
        tx.commit()?;
        Ok(ids)
    }

    fn swap_versions(
        &self,
        remove: &[VersionId],
        insert: &[VersionDocument],
    ) -> Result<SwapStats, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = delete_all(&tx, remove)?;
        let inserted = insert_all(&tx, insert)?.len();
        tx.execute(
            "UPDATE store_meta SET last_swap_at_us = ?1 WHERE id = 1",
            [chrono::Utc::now().timestamp_micros()],
        )?;
        tx.commit()?;
        Ok(SwapStats { removed, inserted })
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_BUSY_TIMEOUT, SqliteStore, migrations};
    use crate::model::{Activity, Oid, VersionDocument, VersionId};
    use crate::store::{Store, StoreError};
    use rusqlite::Connection;
    use serde_json::json;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = SqliteStore::open(&dir.path().join("db/timeline.sqlite3")).expect("open store");
        (dir, store)
    }

    #[test]
    fn open_sets_wal_busy_timeout_and_schema() {
        let (_dir, store) = temp_store();
        let conn = store.connect().expect("connect");

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("query busy_timeout");
        assert_eq!(u128::from(busy_timeout_ms), DEFAULT_BUSY_TIMEOUT.as_millis());

        let version = migrations::schema_version(&conn).expect("schema version");
        assert_eq!(version, migrations::LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("timeline.sqlite3");
        {
            let conn = Connection::open(&path).expect("open raw");
            conn.pragma_update(None, "user_version", 99_i64)
                .expect("bump version");
        }
        assert!(matches!(
            SqliteStore::open(&path),
            Err(StoreError::SchemaTooNew { found: 99, .. })
        ));
    }

    #[test]
    fn versions_round_trip_with_corruption_marks() {
        let (_dir, store) = temp_store();
        let mut older = VersionDocument::new("a", 100)
            .with_end(150)
            .with_field("tags", json!(["x"]));
        older.corrupted.insert("tags".into(), json!(["y"]));
        let current = VersionDocument::new("a", 150).with_field("tags", json!(["x", "y"]));

        let ids = store
            .insert_versions(&[older.clone(), current])
            .expect("insert");
        assert_eq!(ids.len(), 2);

        let loaded = store.get_versions(&[Oid::from("a")]).expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, Some(ids[0]));
        assert_eq!(loaded[0].corrupted, older.corrupted);
        assert_eq!(loaded[1].end, None);
        assert!(loaded[1].corrupted.is_empty());
        assert_eq!(store.all_oids().expect("oids"), vec![Oid::from("a")]);
    }

    #[test]
    fn activities_come_back_grouped_in_time_order() {
        let (_dir, store) = temp_store();
        store
            .append_activities(&[
                Activity::new("a", 30, "status", json!("b"), json!("c")),
                Activity::new("a", 10, "status", json!("a"), json!("b")),
                Activity::new("b", 20, "tags", json!([]), json!(["t"])),
            ])
            .expect("append");

        let grouped = store
            .get_activities(&[Oid::from("a"), Oid::from("b"), Oid::from("zzz")])
            .expect("load");
        let whens: Vec<_> = grouped[&Oid::from("a")].iter().map(|a| a.when).collect();
        assert_eq!(whens, vec![10, 30]);
        assert_eq!(grouped[&Oid::from("b")][0].added, json!(["t"]));
        assert!(!grouped.contains_key(&Oid::from("zzz")));
    }

    #[test]
    fn swap_is_atomic() {
        let (_dir, store) = temp_store();
        let ids = store
            .insert_versions(&[
                VersionDocument::new("a", 100),
                VersionDocument::new("b", 100),
            ])
            .expect("insert");

        // Re-using b's live id makes the insert half fail; the delete of a
        // must roll back with it.
        let result = store.swap_versions(
            &[ids[0]],
            &[VersionDocument::new("a", 50).with_id(ids[1])],
        );
        assert!(result.is_err());
        assert_eq!(store.get_versions(&[Oid::from("a")]).expect("load").len(), 1);
        assert_eq!(store.last_swap_at().expect("meta"), 0);

        let stats = store
            .swap_versions(
                &[ids[0]],
                &[
                    VersionDocument::new("a", 50).with_end(100),
                    VersionDocument::new("a", 100).with_id(ids[0]),
                ],
            )
            .expect("swap");
        assert_eq!((stats.removed, stats.inserted), (1, 2));
        let loaded = store.get_versions(&[Oid::from("a")]).expect("load");
        assert_eq!(loaded[1].id, Some(ids[0]));
        assert!(store.last_swap_at().expect("meta") > 0);
    }

    #[test]
    fn creation_instant_reads_configured_field_of_earliest_version() {
        let (_dir, store) = temp_store();
        let store = store.with_creation_field("created");
        store
            .insert_versions(&[
                VersionDocument::new("int", 500).with_field("created", json!(42)),
                VersionDocument::new("text", 500)
                    .with_field("created", json!("1970-01-01T00:00:01Z")),
                VersionDocument::new("none", 500).with_field("created", json!(null)),
                VersionDocument::new("bad", 500).with_field("created", json!(true)),
            ])
            .expect("insert");

        assert_eq!(store.get_creation_instant(&Oid::from("int")).expect("int"), Some(42));
        assert_eq!(
            store.get_creation_instant(&Oid::from("text")).expect("text"),
            Some(1_000_000)
        );
        assert_eq!(store.get_creation_instant(&Oid::from("none")).expect("none"), None);
        assert_eq!(store.get_creation_instant(&Oid::from("missing")).expect("missing"), None);
        assert!(matches!(
            store.get_creation_instant(&Oid::from("bad")),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn creation_instants_are_read_for_a_whole_chunk() {
        let (_dir, store) = temp_store();
        let store = store.with_creation_field("created");
        store
            .insert_versions(&[
                VersionDocument::new("a", 500).with_field("created", json!(7)),
                VersionDocument::new("a", 100)
                    .with_end(500)
                    .with_field("created", json!(3)),
                VersionDocument::new("b", 500).with_field("status", json!("open")),
                VersionDocument::new("c", 500)
                    .with_field("created", json!("1970-01-01T00:00:02Z")),
            ])
            .expect("insert");

        let oids = [Oid::from("a"), Oid::from("b"), Oid::from("c"), Oid::from("zz")];
        let found = store.get_creation_instants(&oids).expect("batch");

        assert_eq!(found.len(), 2);
        assert_eq!(found.get(&Oid::from("a")), Some(&3));
        assert_eq!(found.get(&Oid::from("c")), Some(&2_000_000));
        for oid in &oids {
            assert_eq!(
                found.get(oid).copied(),
                store.get_creation_instant(oid).expect("single")
            );
        }
    }

    #[test]
    fn all_oids_orders_integer_ids_numerically() {
        let (_dir, store) = temp_store();
        store
            .insert_versions(&[
                VersionDocument::new("10", 1),
                VersionDocument::new("2", 1),
                VersionDocument::new("x", 1),
                VersionDocument::new("1", 1),
            ])
            .expect("insert");

        let oids = store.all_oids().expect("oids");
        let oids: Vec<&str> = oids.iter().map(Oid::as_str).collect();
        assert_eq!(oids, vec!["1", "2", "10", "x"]);
    }

    #[test]
    fn creation_instant_is_absent_without_configured_field() {
        let (_dir, store) = temp_store();
        store
            .insert_versions(&[VersionDocument::new("int", 500).with_field("created", json!(42))])
            .expect("insert");
        assert_eq!(store.get_creation_instant(&Oid::from("int")).expect("read"), None);
    }

    #[test]
    fn malformed_fields_surface_as_load_errors() {
        let (_dir, store) = temp_store();
        let conn = store.connect().expect("connect");
        conn.execute(
            "INSERT INTO versions (oid, start_us, fields_json) VALUES ('a', 1, 'not json')",
            [],
        )
        .expect("raw insert");

        let error = store
            .get_versions(&[Oid::from("a")])
            .expect_err("malformed row");
        assert!(matches!(error, StoreError::Malformed { .. }));
        assert_eq!(error.code().code(), "E3002");
    }

    #[test]
    fn delete_reports_only_existing_rows() {
        let (_dir, store) = temp_store();
        let ids = store
            .insert_versions(&[VersionDocument::new("a", 1)])
            .expect("insert");
        assert_eq!(
            store
                .delete_versions(&[ids[0], VersionId(999)])
                .expect("delete"),
            1
        );
    }
}
