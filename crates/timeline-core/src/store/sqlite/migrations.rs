//! Schema upgrades for the version store.
//!
//! `PRAGMA user_version` is the source of truth for the applied schema;
//! `store_meta.schema_version` mirrors it for tools that only read tables.
//! All pending steps run in one `IMMEDIATE` transaction, so concurrent
//! openers either see the old schema or the latest one.

use rusqlite::{Connection, TransactionBehavior};

use super::schema;
use crate::store::StoreError;

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

struct Step {
    version: u32,
    sql: &'static str,
}

const STEPS: [Step; 2] = [
    Step {
        version: 1,
        sql: schema::MIGRATION_V1_SQL,
    },
    Step {
        version: 2,
        sql: schema::MIGRATION_V2_SQL,
    },
];

/// Schema version recorded in the file; 0 for a fresh database.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read or holds a negative value.
pub fn schema_version(conn: &Connection) -> Result<u32, StoreError> {
    let raw: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    u32::try_from(raw)
        .map_err(|_| StoreError::malformed("schema version", format!("user_version = {raw}")))
}

const fn refuse_newer(found: u32) -> Result<(), StoreError> {
    if found > LATEST_SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found,
            supported: LATEST_SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// Bring the database to [`LATEST_SCHEMA_VERSION`], returning the version
/// it ends at.
///
/// # Errors
///
/// Returns [`StoreError::SchemaTooNew`] for a file written by a newer
/// binary, or the SQLite error that stopped a step. A failed upgrade leaves
/// the previous schema in place.
pub fn upgrade(conn: &mut Connection) -> Result<u32, StoreError> {
    let found = schema_version(conn)?;
    refuse_newer(found)?;
    if found == LATEST_SCHEMA_VERSION {
        return Ok(found);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    // Another opener may have upgraded while we waited for the write lock.
    let found = schema_version(&tx)?;
    refuse_newer(found)?;
    for step in STEPS.iter().filter(|step| step.version > found) {
        tx.execute_batch(step.sql)?;
        tracing::debug!(version = step.version, "applied schema step");
    }
    tx.execute(
        "UPDATE store_meta SET schema_version = ?1 WHERE id = 1",
        [i64::from(LATEST_SCHEMA_VERSION)],
    )?;
    tx.pragma_update(None, "user_version", i64::from(LATEST_SCHEMA_VERSION))?;
    tx.commit()?;

    tracing::info!(from = found, to = LATEST_SCHEMA_VERSION, "store schema upgraded");
    Ok(LATEST_SCHEMA_VERSION)
}
