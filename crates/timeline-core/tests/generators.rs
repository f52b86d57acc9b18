#![allow(dead_code)]

use proptest::prelude::*;
use serde_json::{Value, json};
use timeline_core::model::{Activity, Instant, VersionDocument, VersionId};

pub const ANCHOR_START: Instant = 1_000;

fn arb_status() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(json!("new")),
        Just(json!("open")),
        Just(json!("closed")),
        Just(Value::Null),
    ]
}

fn arb_tags() -> impl Strategy<Value = Value> {
    prop::collection::vec(prop_oneof![Just("a"), Just("b"), Just("c")], 0..3)
        .prop_map(|tags| json!(tags))
}

pub fn arb_anchor() -> impl Strategy<Value = VersionDocument> {
    (arb_status(), 0_i64..10, arb_tags()).prop_map(|(status, priority, tags)| {
        VersionDocument::new("p", ANCHOR_START)
            .with_id(VersionId(1))
            .with_field("status", status)
            .with_field("priority", json!(priority))
            .with_field("tags", tags)
    })
}

/// Activities on tracked and untracked fields, some after the anchor start.
pub fn arb_activity() -> impl Strategy<Value = Activity> {
    let when = 0_i64..(ANCHOR_START + 200);
    prop_oneof![
        (when.clone(), arb_status(), arb_status())
            .prop_map(|(when, removed, added)| Activity::new("p", when, "status", removed, added)),
        (when.clone(), 0_i64..10, 0_i64..10).prop_map(|(when, removed, added)| {
            Activity::new("p", when, "priority", json!(removed), json!(added))
        }),
        (when.clone(), arb_tags(), arb_tags())
            .prop_map(|(when, removed, added)| Activity::new("p", when, "tags", removed, added)),
        when.prop_map(|when| Activity::new("p", when, "owner", json!("x"), json!("y"))),
    ]
}

pub fn arb_activities() -> impl Strategy<Value = Vec<Activity>> {
    prop::collection::vec(arb_activity(), 0..24)
}

pub fn arb_creation() -> impl Strategy<Value = Option<Instant>> {
    prop::option::of(0_i64..(ANCHOR_START + 200))
}
