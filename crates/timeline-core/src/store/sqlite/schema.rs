//! SQLite schema for the version store.
//!
//! - `versions` holds one row per version document; `end_us IS NULL` marks
//!   the current version of an entity
//! - `activities` is the append-only change log, never mutated by
//!   reconstruction
//! - `store_meta` tracks schema version and the last completed swap

/// Migration v1: version and activity tables plus store metadata.
pub const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    oid TEXT NOT NULL CHECK (length(oid) > 0),
    start_us INTEGER NOT NULL,
    end_us INTEGER,
    fields_json TEXT NOT NULL DEFAULT '{}',
    corrupted_json TEXT,
    CHECK (end_us IS NULL OR end_us >= start_us)
);

CREATE TABLE IF NOT EXISTS activities (
    activity_id INTEGER PRIMARY KEY AUTOINCREMENT,
    oid TEXT NOT NULL CHECK (length(oid) > 0),
    when_us INTEGER NOT NULL,
    field TEXT NOT NULL CHECK (length(trim(field)) > 0),
    removed_json TEXT NOT NULL DEFAULT 'null',
    added_json TEXT NOT NULL DEFAULT 'null'
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_swap_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO store_meta (id, schema_version, last_swap_at_us)
VALUES (1, 1, 0);
"#;

/// Migration v2: read-path indexes for chunk loads.
pub const MIGRATION_V2_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_versions_oid_start
    ON versions(oid, start_us);

CREATE INDEX IF NOT EXISTS idx_versions_current
    ON versions(oid) WHERE end_us IS NULL;

CREATE INDEX IF NOT EXISTS idx_activities_oid_when
    ON activities(oid, when_us);
"#;

/// Indexes that must exist once all migrations have run.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_versions_oid_start",
    "idx_versions_current",
    "idx_activities_oid_when",
];
