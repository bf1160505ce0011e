#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property-based tests for row translation and frame decoding.
//!
//! Uses proptest to verify:
//! 1. `task_from_row` never panics, whatever the row holds.
//! 2. A task written with `task_to_row` reads back unchanged.
//! 3. Missing `status`/`priority` fall back to their defaults.
//! 4. A translated task never has `updated_at` before `created_at`.
//! 5. Frame decoding never panics on arbitrary text.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{Value, json};
use taskify_proto::codec;
use taskify_proto::ids::{TaskId, TeamId, UserId};
use taskify_proto::task::{Task, TaskPriority, TaskStatus};
use taskify_proto::wire::{Row, format_timestamp, into_row, task_from_row, task_to_row};

// --- Arbitrary implementations ---

/// Millisecond timestamps between 2000 and 2100, the precision rows carry.
fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (946_684_800_000i64..4_102_444_800_000).prop_map(|ms| Utc.timestamp_millis_opt(ms).unwrap())
}

fn arb_id() -> impl Strategy<Value = String> {
    "[a-z0-9-]{1,16}"
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        (arb_id(), "\\PC{1,40}", "\\PC{0,60}"),
        prop::sample::select(TaskPriority::ALL.to_vec()),
        prop::sample::select(TaskStatus::ALL.to_vec()),
        (arb_timestamp(), arb_timestamp(), 0i64..1_000_000_000),
        (arb_id(), prop::option::of(arb_id()), prop::option::of(arb_id())),
    )
        .prop_map(
            |((id, title, description), priority, status, (due, created, edited), refs)| {
                let (created_by, assigned_to, team_id) = refs;
                Task {
                    id: TaskId::new(id),
                    title,
                    description,
                    priority,
                    status,
                    due_date: due,
                    created_at: created,
                    updated_at: created + chrono::Duration::milliseconds(edited),
                    created_by: UserId::new(created_by),
                    assigned_to: assigned_to.map(UserId::new),
                    team_id: team_id.map(TeamId::new),
                }
            },
        )
}

/// Any JSON scalar, including the wrong types for every column.
fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "\\PC{0,24}".prop_map(Value::String),
        arb_timestamp().prop_map(|ts| Value::String(format_timestamp(ts))),
    ]
}

/// Rows mixing real task columns with garbage values.
fn arb_row() -> impl Strategy<Value = Row> {
    let column = prop::sample::select(vec![
        "id",
        "title",
        "description",
        "priority",
        "status",
        "due_date",
        "created_at",
        "updated_at",
        "created_by",
        "assigned_to",
        "team_id",
        "extra",
    ]);
    prop::collection::vec((column, arb_scalar()), 0..14).prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    })
}

// --- Property tests ---

proptest! {
    /// Garbage in gives an error, never a panic.
    #[test]
    fn task_from_row_never_panics(row in arb_row()) {
        let _ = task_from_row(&row);
    }

    /// The full row form of a task is lossless.
    #[test]
    fn task_row_preserves_task(task in arb_task()) {
        let decoded = task_from_row(&task_to_row(&task)).expect("row should translate");
        prop_assert_eq!(decoded, task);
    }

    /// Only the required columns present: enums take their defaults and
    /// `updated_at` follows `created_at`.
    #[test]
    fn sparse_row_takes_defaults(
        id in arb_id(),
        due in arb_timestamp(),
        created in arb_timestamp(),
    ) {
        let row = into_row(json!({
            "id": id,
            "title": "Sparse",
            "created_by": "u1",
            "due_date": format_timestamp(due),
            "created_at": format_timestamp(created),
        }))
        .expect("object literal");
        let task = task_from_row(&row).expect("required columns present");
        prop_assert_eq!(task.status, TaskStatus::Todo);
        prop_assert_eq!(task.priority, TaskPriority::Medium);
        prop_assert_eq!(task.updated_at, task.created_at);
        prop_assert_eq!(task.description, "");
    }

    /// `updated_at` is clamped to `created_at` when the row disagrees.
    #[test]
    fn updated_never_precedes_created(row in arb_row()) {
        if let Ok(task) = task_from_row(&row) {
            prop_assert!(task.updated_at >= task.created_at);
        }
    }

    /// Both frame decoders reject arbitrary text without panicking.
    #[test]
    fn frame_decoding_never_panics(text in "\\PC{0,200}") {
        let _ = codec::decode_client(&text);
        let _ = codec::decode_server(&text);
    }
}
