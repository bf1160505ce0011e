#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property-based tests for the derived task views and the entity store.
//!
//! Uses proptest to verify:
//! 1. `completion_rate` stays within 0..=100 and matches rounded percentage.
//! 2. `overdue` is exactly "open and due strictly before now".
//! 3. `by_recency` is sorted newest first and keeps every task.
//! 4. `recent` never exceeds its limit.
//! 5. Filters only ever narrow the list.
//! 6. `replace_all` is idempotent and keeps ids unique.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use taskify::store::EntityStore;
use taskify::tasks::views;
use taskify::tasks::{TaskFilter, TaskSummary};
use taskify_proto::ids::{TaskId, UserId};
use taskify_proto::task::{Task, TaskPriority, TaskStatus};

// --- Strategies ---

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Offsets in minutes around `base()`, wide enough to cross day boundaries.
fn arb_offset() -> impl Strategy<Value = i64> {
    -10_000i64..10_000
}

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

fn arb_priority() -> impl Strategy<Value = TaskPriority> {
    prop::sample::select(TaskPriority::ALL.to_vec())
}

fn arb_user() -> impl Strategy<Value = Option<UserId>> {
    prop::option::of(prop::sample::select(vec!["u1", "u2", "u3"]).prop_map(UserId::new))
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        0u32..50,
        "[a-zA-Z ]{1,20}",
        arb_status(),
        arb_priority(),
        arb_offset(),
        arb_offset(),
        0i64..5_000,
        arb_user(),
    )
        .prop_map(
            |(id, title, status, priority, due, created, edited, assignee)| {
                let created_at = base() + Duration::minutes(created);
                Task {
                    id: TaskId::new(format!("t{id}")),
                    title,
                    description: String::new(),
                    priority,
                    status,
                    due_date: base() + Duration::minutes(due),
                    created_at,
                    updated_at: created_at + Duration::minutes(edited),
                    created_by: UserId::new("u1"),
                    assigned_to: assignee,
                    team_id: None,
                }
            },
        )
}

fn arb_tasks() -> impl Strategy<Value = Vec<Task>> {
    prop::collection::vec(arb_task(), 0..40)
}

// --- Property tests ---

proptest! {
    /// The rate is a rounded percentage and never leaves 0..=100.
    #[test]
    fn completion_rate_is_rounded_percentage(tasks in arb_tasks()) {
        let rate = views::completion_rate(&tasks);
        prop_assert!(rate <= 100);
        if tasks.is_empty() {
            prop_assert_eq!(rate, 0);
        } else {
            let completed = tasks.iter().filter(|t| t.is_completed()).count();
            #[allow(clippy::cast_precision_loss)]
            let exact = 100.0 * completed as f64 / tasks.len() as f64;
            prop_assert!((f64::from(rate) - exact).abs() <= 0.5);
        }
    }

    /// Overdue means open and due strictly before now, nothing else.
    #[test]
    fn overdue_is_open_and_strictly_past(tasks in arb_tasks(), now in arb_offset()) {
        let now = base() + Duration::minutes(now);
        let overdue = views::overdue(now, &tasks);
        for task in &overdue {
            prop_assert!(task.status != TaskStatus::Completed);
            prop_assert!(task.due_date < now);
        }
        let expected = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed && t.due_date < now)
            .count();
        prop_assert_eq!(overdue.len(), expected);
    }

    /// Newest first, nothing lost.
    #[test]
    fn by_recency_sorts_newest_first(tasks in arb_tasks()) {
        let sorted = views::by_recency(&tasks);
        prop_assert_eq!(sorted.len(), tasks.len());
        for pair in sorted.windows(2) {
            prop_assert!(pair[0].updated_at >= pair[1].updated_at);
        }
    }

    /// `recent` is a prefix of `by_recency` capped at `limit`.
    #[test]
    fn recent_respects_limit(tasks in arb_tasks(), limit in 0usize..10) {
        let recent = views::recent(limit, &tasks);
        prop_assert!(recent.len() <= limit);
        let full = views::by_recency(&tasks);
        prop_assert_eq!(&recent[..], &full[..recent.len()]);
    }

    /// A filter never adds tasks, and the default filter keeps them all.
    #[test]
    fn filters_only_narrow(
        tasks in arb_tasks(),
        status in prop::option::of(arb_status()),
        priority in prop::option::of(arb_priority()),
        search in "[a-z]{0,3}",
    ) {
        prop_assert_eq!(TaskFilter::default().apply(&tasks), tasks.clone());
        let filter = TaskFilter { search, status, priority };
        let kept = filter.apply(&tasks);
        prop_assert!(kept.len() <= tasks.len());
        for task in &kept {
            prop_assert!(status.is_none_or(|s| s == task.status));
            prop_assert!(priority.is_none_or(|p| p == task.priority));
        }
    }

    /// Summary counters agree with the individual views.
    #[test]
    fn summary_agrees_with_views(tasks in arb_tasks(), now in arb_offset()) {
        let now = base() + Duration::minutes(now);
        let user = UserId::new("u2");
        let summary = TaskSummary::for_user(&user, now, &tasks);
        let mine = views::assigned_to(&user, &tasks);
        prop_assert_eq!(summary.assigned, mine.len());
        prop_assert_eq!(summary.overdue, views::overdue(now, &mine).len());
        prop_assert!(summary.completed <= summary.assigned);
        prop_assert_eq!(summary.completion_rate, views::completion_rate(&mine));
    }

    /// Replacing with the same set twice yields the same store, with one
    /// entry per id.
    #[test]
    fn replace_all_is_idempotent(tasks in arb_tasks()) {
        let mut store = EntityStore::new();
        store.replace_all(tasks.clone());
        let once = store.list().to_vec();
        store.replace_all(tasks.clone());
        prop_assert_eq!(store.list(), &once[..]);

        let mut ids: Vec<&TaskId> = once.iter().map(|t| &t.id).collect();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), once.len());
        for task in &once {
            prop_assert!(store.contains(&task.id));
        }
    }
}
