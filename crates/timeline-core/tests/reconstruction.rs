//! End-to-end reconstruction runs against both store implementations.
//!
//! Covers:
//! - the single-activity scenario, with and without a creation instant
//! - partial failure: committed chunks stay committed, failures are reported
//! - idempotent re-runs
//! - the inconsistency log file written beside a SQLite store

use std::io::{BufRead, BufReader};

use serde_json::json;
use tempfile::TempDir;
use timeline_core::history::check_partition;
use timeline_core::model::{Activity, Oid, VersionDocument};
use timeline_core::store::{MemoryStore, SqliteStore, Store};
use timeline_core::{Inconsistency, ReconstructError, ReconstructOptions, reconstruct};

fn open_ticket(oid: &str) -> VersionDocument {
    VersionDocument::new(oid, 200).with_field("status", json!("open"))
}

fn opened_at_150(oid: &str) -> Activity {
    Activity::new(oid, 150, "status", json!("new"), json!("open"))
}

fn sqlite_store(dir: &TempDir) -> SqliteStore {
    SqliteStore::open(&dir.path().join(".timeline/timeline.sqlite3")).expect("open sqlite store")
}

#[test]
fn single_activity_scenario_on_memory_store() {
    let store = MemoryStore::new();
    let anchor_id = store.add_version(open_ticket("1")).expect("seed version");
    store.add_activities([opened_at_150("1")]).expect("seed activity");

    let report = reconstruct(&store, &ReconstructOptions::default()).expect("run");

    assert_eq!(report.chunks_committed, 1);
    assert_eq!(report.versions_removed, 1);
    assert_eq!(report.versions_inserted, 2);

    let versions = store.versions_of(&Oid::from("1")).expect("read back");
    let layout: Vec<_> = versions
        .iter()
        .map(|v| (v.start, v.end, v.fields["status"].clone()))
        .collect();
    assert_eq!(
        layout,
        vec![(150, Some(150), json!("new")), (150, None, json!("open"))]
    );
    assert_eq!(versions[1].id, Some(anchor_id));
    check_partition(&versions).expect("partition holds");
}

#[test]
fn single_activity_scenario_with_creation_instant_on_sqlite() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = sqlite_store(&dir).with_creation_field("created_at");
    store
        .insert_versions(&[open_ticket("1").with_field("created_at", json!(100))])
        .expect("seed version");
    store
        .append_activities(&[opened_at_150("1")])
        .expect("seed activity");

    reconstruct(&store, &ReconstructOptions::default().with_max_workers(2)).expect("run");

    let versions = store.get_versions(&[Oid::from("1")]).expect("read back");
    let layout: Vec<_> = versions
        .iter()
        .map(|v| (v.start, v.end, v.fields["status"].clone()))
        .collect();
    assert_eq!(
        layout,
        vec![(100, Some(150), json!("new")), (150, None, json!("open"))]
    );
    check_partition(&versions).expect("partition holds");
}

#[test]
fn failing_chunk_does_not_undo_committed_chunks() {
    let store = MemoryStore::new();
    for oid in ["1", "2", "3", "4"] {
        store.add_version(open_ticket(oid)).expect("seed version");
        store.add_activities([opened_at_150(oid)]).expect("seed activity");
    }
    store.fail_loads_for("3").expect("inject failure");

    let options = ReconstructOptions::default()
        .with_oids(["1", "2", "3", "4"])
        .with_chunk_size(2)
        .with_max_workers(1);
    let error = reconstruct(&store, &options).expect_err("second chunk fails");

    let ReconstructError::ChunksFailed { first, report } = &error else {
        panic!("unexpected error: {error}");
    };
    assert_eq!(first.index, 1);
    assert_eq!(first.first_oid, Oid::from("3"));
    assert_eq!(report.chunks_total, 2);
    assert_eq!(report.chunks_committed, 1);
    assert_eq!(report.chunks_failed, 1);
    assert_eq!(report.chunks_skipped, 0);

    for committed in ["1", "2"] {
        assert_eq!(store.versions_of(&Oid::from(committed)).expect("read").len(), 2);
    }
    for untouched in ["3", "4"] {
        assert_eq!(store.versions_of(&Oid::from(untouched)).expect("read").len(), 1);
    }
}

#[test]
fn chunks_after_a_failure_are_not_started() {
    let store = MemoryStore::new();
    for oid in ["1", "2", "3", "4", "5"] {
        store.add_version(open_ticket(oid)).expect("seed version");
        store.add_activities([opened_at_150(oid)]).expect("seed activity");
    }
    store.fail_loads_for("1").expect("inject failure");

    let options = ReconstructOptions::default()
        .with_chunk_size(1)
        .with_max_workers(1);
    let error = reconstruct(&store, &options).expect_err("first chunk fails");
    let report = error.report().expect("partial report");

    assert_eq!(report.chunks_failed, 1);
    assert_eq!(report.chunks_committed + report.chunks_skipped, 4);
    assert!(report.chunks_skipped >= 1);
}

#[test]
fn second_run_changes_nothing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = sqlite_store(&dir);
    store
        .insert_versions(&[
            open_ticket("1").with_field("priority", json!(5)),
            open_ticket("2"),
        ])
        .expect("seed versions");
    store
        .append_activities(&[
            opened_at_150("1"),
            Activity::new("1", 120, "priority", json!(1), json!(5)),
            opened_at_150("2"),
        ])
        .expect("seed activities");

    let options = ReconstructOptions::default().with_chunk_size(1);
    let first = reconstruct(&store, &options).expect("first run");
    assert_eq!(first.entities_rebuilt, 2);
    let after_first = store
        .get_versions(&[Oid::from("1"), Oid::from("2")])
        .expect("read");
    let swapped_at = store.last_swap_at().expect("meta");

    let second = reconstruct(&store, &options).expect("second run");
    assert_eq!(second.entities_rebuilt, 0);
    assert_eq!(second.versions_inserted, 0);
    assert_eq!(
        store
            .get_versions(&[Oid::from("1"), Oid::from("2")])
            .expect("read"),
        after_first
    );
    assert_eq!(store.last_swap_at().expect("meta"), swapped_at);
}

#[test]
fn inconsistencies_are_logged_and_marked() {
    let dir = tempfile::tempdir().expect("temp dir");
    let log_path = dir.path().join(".timeline/activity_inconsistencies.jsonl");
    let store = sqlite_store(&dir);
    store
        .insert_versions(&[open_ticket("7").with_field("priority", json!(5))])
        .expect("seed version");
    store
        .append_activities(&[Activity::new("7", 150, "priority", json!(3), json!(7))])
        .expect("seed activity");

    let report = reconstruct(
        &store,
        &ReconstructOptions::default().with_inconsistency_log(&log_path),
    )
    .expect("run");

    assert_eq!(report.inconsistencies, 1);
    assert_eq!(report.inconsistency_log.as_deref(), Some(log_path.as_path()));

    let versions = store.get_versions(&[Oid::from("7")]).expect("read back");
    assert_eq!(versions[0].fields["priority"], json!(3));
    assert_eq!(versions[0].corrupted.get("priority"), Some(&json!(7)));

    let file = std::fs::File::open(&log_path).expect("log written");
    let entries: Vec<Inconsistency> = BufReader::new(file)
        .lines()
        .map(|line| serde_json::from_str(&line.expect("line")).expect("entry"))
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].oid, Oid::from("7"));
    assert_eq!(entries[0].current, json!(5));
    assert_eq!(entries[0].added_type, "number");
}

#[test]
fn many_workers_commit_every_chunk() {
    let store = MemoryStore::new();
    let oids: Vec<String> = (0..40).map(|n| format!("{n:03}")).collect();
    for oid in &oids {
        store.add_version(open_ticket(oid)).expect("seed version");
        store.add_activities([opened_at_150(oid)]).expect("seed activity");
    }

    let report = reconstruct(
        &store,
        &ReconstructOptions::default()
            .with_chunk_size(3)
            .with_max_workers(4),
    )
    .expect("run");

    assert_eq!(report.chunks_total, 14);
    assert!(report.is_complete());
    assert_eq!(report.entities_rebuilt, 40);
    check_partition(&store.all_versions().expect("read")).expect("partition holds");
}
