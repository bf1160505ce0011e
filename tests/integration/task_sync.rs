// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::needless_continue,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::manual_let_else,
    clippy::future_not_send,
    clippy::redundant_pub_crate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for task synchronization against in-process tables.
//!
//! Covers the optimistic mutation paths (accepted, rejected, unreachable),
//! replay of queued changes, and the change feed driving re-fetches through
//! a [`Session`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use taskify::feed::{FeedSignal, FeedState};
use taskify::remote::loopback::LoopbackTables;
use taskify::remote::{RemoteError, SyncAdapter};
use taskify::session::{Session, SessionOptions, SharedIdentity};
use taskify::sync::{Notice, NoticeLevel, Notifier, SyncError};
use taskify::tasks::{TaskManager, TransitionPolicy};
use taskify_proto::feed::ChangeEvent;
use taskify_proto::hub::FailureCode;
use taskify_proto::ids::{RecordId, TaskId, UserId};
use taskify_proto::task::{TaskChanges, TaskDraft, TaskStatus};
use taskify_proto::user::Identity;
use taskify_proto::wire::{Table, into_row};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Optimistic mutations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_without_assignee_stores_creator_and_defaults() {
    let (tables, tasks, _notices) = manager();
    let task = tasks.create_task(draft("A")).await.unwrap();

    assert_eq!(task.created_by, UserId::new("u1"));
    assert_eq!(task.assigned_to, None);
    assert_eq!(task.status, TaskStatus::Todo);
    assert!(!task.id.is_provisional());

    let rows = tables.rows(Table::Tasks);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["created_by"], "u1");
    assert!(rows[0].get("assigned_to").is_none_or(serde_json::Value::is_null));
    assert_eq!(tasks.tasks(), vec![task]);
}

#[tokio::test]
async fn rejected_create_rolls_back_and_notifies() {
    let (tables, tasks, mut notices) = manager();
    tables.fail_next(RemoteError::rejected(FailureCode::Validation, "title taken"));

    let err = tasks.create_task(draft("A")).await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteRejected { .. }));
    assert!(tasks.tasks().is_empty());
    assert!(tables.rows(Table::Tasks).is_empty());

    let notices = drain(&mut notices);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert_eq!(notices[0].title, "Could not create task");
}

#[tokio::test]
async fn rejected_update_restores_remote_state() {
    let (tables, tasks, mut notices) = manager();
    let task = tasks.create_task(draft("A")).await.unwrap();
    tables.fail_next(RemoteError::rejected(FailureCode::Forbidden, "read only"));

    let err = tasks
        .set_status(&task.id, TaskStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RemoteRejected { .. }));
    assert_eq!(tasks.get_task(&task.id).unwrap().status, TaskStatus::Todo);
    assert!(drain(&mut notices).iter().any(|n| n.level == NoticeLevel::Error));
}

#[tokio::test]
async fn rejected_delete_brings_task_back() {
    let (tables, tasks, _notices) = manager();
    let task = tasks.create_task(draft("A")).await.unwrap();
    tables.fail_next(RemoteError::rejected(FailureCode::Forbidden, "not yours"));

    assert!(tasks.delete_task(&task.id).await.is_err());
    assert_eq!(tasks.get_task(&task.id), Some(task));
}

#[tokio::test]
async fn mutating_unknown_task_is_not_found_without_remote_call() {
    let (tables, tasks, _notices) = manager();
    let ghost = TaskId::new("ghost");
    let calls = tables.calls();

    assert!(matches!(
        tasks.set_status(&ghost, TaskStatus::Review).await,
        Err(SyncError::NotFound(_))
    ));
    assert!(matches!(
        tasks.delete_task(&ghost).await,
        Err(SyncError::NotFound(_))
    ));
    assert_eq!(tables.calls(), calls);
}

#[tokio::test]
async fn signed_out_create_is_a_local_no_op() {
    let tables = Arc::new(LoopbackTables::new());
    let tasks = TaskManager::new(
        SyncAdapter::new(Arc::clone(&tables)),
        SharedIdentity::new(None),
        Notifier::disabled(),
        TransitionPolicy::Permissive,
    );
    assert!(matches!(
        tasks.create_task(draft("A")).await,
        Err(SyncError::PreconditionFailed(_))
    ));
    assert_eq!(tables.calls(), 0);
}

// ---------------------------------------------------------------------------
// Offline queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offline_create_stays_visible_and_flushes_later() {
    let (tables, tasks, mut notices) = manager();
    tables.set_offline(true);

    let err = tasks.create_task(draft("Offline")).await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteUnavailable(_)));
    let shown = tasks.tasks();
    assert_eq!(shown.len(), 1);
    assert!(shown[0].id.is_provisional());
    assert_eq!(tasks.collection().pending_len(), 1);
    assert_eq!(drain(&mut notices)[0].level, NoticeLevel::Warning);

    // Still offline: nothing moves.
    let report = tasks.flush_pending().await;
    assert_eq!((report.applied, report.remaining), (0, 1));

    tables.set_offline(false);
    let report = tasks.flush_pending().await;
    assert_eq!((report.applied, report.rejected, report.remaining), (1, 0, 0));

    let shown = tasks.tasks();
    assert_eq!(shown.len(), 1);
    assert!(!shown[0].id.is_provisional());
    assert_eq!(shown[0].title, "Offline");
    assert_eq!(tables.rows(Table::Tasks).len(), 1);
}

#[tokio::test]
async fn queued_changes_replay_in_order() {
    let (tables, tasks, _notices) = manager();
    let task = tasks.create_task(draft("A")).await.unwrap();
    tables.set_offline(true);

    let renamed = TaskChanges::default().with_title("Renamed");
    assert!(tasks.update_task(&task.id, &renamed).await.is_err());
    assert_eq!(tasks.get_task(&task.id).unwrap().title, "Renamed");
    assert!(tasks.delete_task(&task.id).await.is_err());
    assert!(tasks.get_task(&task.id).is_none());
    assert_eq!(tasks.collection().pending_len(), 2);

    tables.set_offline(false);
    let report = tasks.flush_pending().await;
    assert_eq!(report.applied, 2);
    assert!(tables.rows(Table::Tasks).is_empty());
    assert!(tasks.tasks().is_empty());
}

#[tokio::test]
async fn refresh_keeps_queued_changes_on_top() {
    let (tables, tasks, _notices) = manager();
    let task = tasks.create_task(draft("A")).await.unwrap();
    tables.fail_next(RemoteError::Unavailable("blip".to_string()));
    assert!(tasks.set_status(&task.id, TaskStatus::Review).await.is_err());

    tasks.refresh().await.unwrap();
    assert_eq!(tasks.get_task(&task.id).unwrap().status, TaskStatus::Review);
    assert_eq!(tables.rows(Table::Tasks)[0]["status"], "todo");
}

#[tokio::test]
async fn deleting_offline_created_task_drops_its_queued_create() {
    let (tables, tasks, _notices) = manager();
    tables.set_offline(true);
    assert!(tasks.create_task(draft("Never sent")).await.is_err());
    let provisional = tasks.tasks()[0].id.clone();

    tasks.delete_task(&provisional).await.unwrap();
    assert_eq!(tasks.collection().pending_len(), 0);

    tables.set_offline(false);
    let report = tasks.flush_pending().await;
    assert_eq!(report.applied, 0);
    assert!(tables.rows(Table::Tasks).is_empty());
}

#[tokio::test]
async fn provisional_task_cannot_be_edited() {
    let (tables, tasks, _notices) = manager();
    tables.set_offline(true);
    assert!(tasks.create_task(draft("Pending")).await.is_err());
    let provisional = tasks.tasks()[0].id.clone();

    assert!(matches!(
        tasks.set_status(&provisional, TaskStatus::InProgress).await,
        Err(SyncError::PreconditionFailed(_))
    ));
}

// ---------------------------------------------------------------------------
// Field semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn updated_at_advances_on_every_update() {
    let (_tables, tasks, _notices) = manager();
    let created = tasks.create_task(draft("A")).await.unwrap();
    assert!(created.updated_at >= created.created_at);

    tokio::time::sleep(Duration::from_millis(5)).await;
    tasks
        .update_task(&created.id, &TaskChanges::default().with_title("B"))
        .await
        .unwrap();
    tasks.refresh().await.unwrap();
    let first = tasks.get_task(&created.id).unwrap();
    assert!(first.updated_at > created.updated_at);
    assert_eq!(first.created_at, created.created_at);

    tokio::time::sleep(Duration::from_millis(5)).await;
    tasks.set_status(&created.id, TaskStatus::InProgress).await.unwrap();
    tasks.refresh().await.unwrap();
    let second = tasks.get_task(&created.id).unwrap();
    assert!(second.updated_at > first.updated_at);
}

#[tokio::test]
async fn partial_update_leaves_assignee_alone_until_cleared() {
    let (tables, tasks, _notices) = manager();
    let task = tasks
        .create_task(draft("A").assigned_to(UserId::new("u2")))
        .await
        .unwrap();

    tasks
        .update_task(&task.id, &TaskChanges::default().with_title("Retitled"))
        .await
        .unwrap();
    tasks.refresh().await.unwrap();
    assert_eq!(
        tasks.get_task(&task.id).unwrap().assigned_to,
        Some(UserId::new("u2"))
    );

    tasks.assign(&task.id, None).await.unwrap();
    tasks.refresh().await.unwrap();
    assert_eq!(tasks.get_task(&task.id).unwrap().assigned_to, None);
    assert!(
        tables.rows(Table::Tasks)[0]
            .get("assigned_to")
            .is_none_or(serde_json::Value::is_null)
    );
}

#[tokio::test]
async fn unassigned_task_stays_in_creators_view() {
    let (_tables, tasks, _notices) = manager();
    tasks.create_task(draft("Mine")).await.unwrap();
    let all = tasks.tasks();
    assert_eq!(taskify::tasks::views::created_by(&UserId::new("u1"), &all).len(), 1);
    assert!(tasks.tasks_assigned_to(&UserId::new("u1")).is_empty());
}

#[tokio::test]
async fn workflow_policy_refuses_skips_but_store_accepts_any_status() {
    let tables = Arc::new(LoopbackTables::new());
    let identity = SharedIdentity::new(Some(ada()));
    let strict = TaskManager::new(
        SyncAdapter::new(Arc::clone(&tables)),
        identity.clone(),
        Notifier::disabled(),
        TransitionPolicy::Workflow,
    );
    let lenient = TaskManager::new(
        SyncAdapter::new(Arc::clone(&tables)),
        identity,
        Notifier::disabled(),
        TransitionPolicy::Permissive,
    );

    let task = strict.create_task(draft("A")).await.unwrap();
    assert!(strict.set_status(&task.id, TaskStatus::Completed).await.is_err());

    lenient.refresh().await.unwrap();
    let done = lenient.set_status(&task.id, TaskStatus::Completed).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
}

// ---------------------------------------------------------------------------
// Change feed through a session
// ---------------------------------------------------------------------------

#[tokio::test]
async fn foreign_insert_notifies_and_refreshes() {
    let tables = Arc::new(LoopbackTables::new());
    let (mut session, mut notices) = start_session(&tables).await;

    tables
        .foreign_insert(Table::Tasks, foreign_row("From Grace"))
        .unwrap();
    let signal = next_signal(&mut session).await;
    assert!(matches!(signal, FeedSignal::Changed(_)));

    let titles: Vec<String> = session.tasks().tasks().into_iter().map(|t| t.title).collect();
    assert_eq!(titles, vec!["From Grace".to_string()]);
    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.title, "New task created");
    assert_eq!(notice.detail, "\"From Grace\" was added");

    session.close().await;
}

#[tokio::test]
async fn change_notice_follows_the_refresh() {
    let tables = Arc::new(LoopbackTables::new());
    let (mut session, mut notices) = start_session(&tables).await;

    tables
        .foreign_insert(Table::Tasks, foreign_row("From Grace"))
        .unwrap();
    let signal = tokio::time::timeout(Duration::from_secs(5), session.recv_signal())
        .await
        .expect("timed out waiting for a feed signal")
        .expect("feed closed");

    // Received but not applied: nothing visible, nothing announced.
    assert!(session.tasks().tasks().is_empty());
    assert!(notices.try_recv().is_err());

    session.dispatch(&signal).await;
    let notice = notices.try_recv().expect("notice sent by dispatch");
    assert_eq!(notice.detail, "\"From Grace\" was added");
    assert_eq!(session.tasks().tasks().len(), 1);

    session.close().await;
}

#[tokio::test]
async fn own_change_echo_is_idempotent() {
    let tables = Arc::new(LoopbackTables::new());
    let (mut session, _notices) = start_session(&tables).await;

    let task = session.tasks().create_task(draft("Echo")).await.unwrap();
    let before = session.tasks().tasks();
    // The create's own event comes back through the feed.
    next_signal(&mut session).await;
    assert_eq!(session.tasks().tasks(), before);
    assert_eq!(session.tasks().get_task(&task.id), Some(task));

    session.close().await;
}

#[tokio::test]
async fn deleted_event_for_unknown_task_is_harmless() {
    let tables = Arc::new(LoopbackTables::new());
    let (mut session, mut notices) = start_session(&tables).await;
    session.tasks().create_task(draft("Keep")).await.unwrap();
    next_signal(&mut session).await;
    drain(&mut notices);

    let ghost = into_row(json!({"id": "ghost", "title": "Gone"})).unwrap();
    tables.publish_event(ChangeEvent::deleted(Table::Tasks, ghost));
    let signal = next_signal(&mut session).await;

    assert!(matches!(signal, FeedSignal::Changed(_)));
    assert_eq!(session.tasks().tasks().len(), 1);
    assert_eq!(notices.recv().await.unwrap().title, "Task deleted");

    session.close().await;
}

#[tokio::test]
async fn foreign_delete_removes_task() {
    let tables = Arc::new(LoopbackTables::new());
    let (mut session, _notices) = start_session(&tables).await;
    let row = tables.foreign_insert(Table::Tasks, foreign_row("Doomed")).unwrap();
    next_signal(&mut session).await;
    assert_eq!(session.tasks().tasks().len(), 1);

    tables
        .foreign_delete(Table::Tasks, row["id"].as_str().unwrap())
        .unwrap();
    next_signal(&mut session).await;
    assert!(session.tasks().tasks().is_empty());

    session.close().await;
}

#[tokio::test]
async fn interrupted_feed_resubscribes_and_resyncs() {
    let tables = Arc::new(LoopbackTables::new());
    let (mut session, _notices) = start_session(&tables).await;

    // A change slips in while nobody is listening.
    tables.interrupt_feed(Table::Tasks);
    tables.seed(
        Table::Tasks,
        into_row(json!({
            "id": "missed",
            "title": "Missed",
            "created_by": "u2",
            "due_date": "2024-05-01T00:00:00Z",
            "created_at": "2024-04-01T00:00:00Z",
            "updated_at": "2024-04-01T00:00:00Z",
        }))
        .unwrap(),
    );

    let signal = next_signal(&mut session).await;
    assert_eq!(signal, FeedSignal::Resync { table: Table::Tasks });
    assert!(session.tasks().get_task(&TaskId::new("missed")).is_some());
    wait_for_subscriber(&tables, Table::Tasks).await;
    assert_eq!(tables.subscriber_count(Table::Tasks), 1);

    session.close().await;
}

#[tokio::test]
async fn close_tears_down_every_subscription_once() {
    let tables = Arc::new(LoopbackTables::new());
    let (mut session, _notices) = start_session(&tables).await;
    for table in taskify::session::WATCHED_TABLES {
        assert_eq!(tables.subscriber_count(table), 1);
    }

    session.close().await;
    for (_, state) in session.feed_states() {
        assert_eq!(state, FeedState::Disconnected);
    }
    for table in taskify::session::WATCHED_TABLES {
        assert_eq!(tables.subscriber_count(table), 0);
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn ada() -> Identity {
    Identity::new("u1", "Ada", "ada@example.com")
}

fn draft(title: &str) -> TaskDraft {
    TaskDraft::new(title, Utc::now() + ChronoDuration::days(1))
}

fn foreign_row(title: &str) -> taskify_proto::wire::Row {
    into_row(json!({
        "title": title,
        "created_by": "u2",
        "due_date": "2024-05-01T00:00:00Z",
    }))
    .unwrap()
}

fn manager() -> (
    Arc<LoopbackTables>,
    TaskManager<LoopbackTables>,
    mpsc::Receiver<Notice>,
) {
    let tables = Arc::new(LoopbackTables::new());
    let (notifier, notices) = Notifier::channel(32);
    let tasks = TaskManager::new(
        SyncAdapter::new(Arc::clone(&tables)),
        SharedIdentity::new(Some(ada())),
        notifier,
        TransitionPolicy::Permissive,
    );
    (tables, tasks, notices)
}

fn drain(notices: &mut mpsc::Receiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        out.push(notice);
    }
    out
}

async fn start_session(
    tables: &Arc<LoopbackTables>,
) -> (Session<LoopbackTables>, mpsc::Receiver<Notice>) {
    let options = SessionOptions {
        resubscribe_delay: Duration::from_millis(10),
        ..SessionOptions::default()
    };
    let started = Session::start(Arc::clone(tables), ada(), options).await;
    for table in taskify::session::WATCHED_TABLES {
        wait_for_subscriber(tables, table).await;
    }
    started
}

async fn wait_for_subscriber(tables: &LoopbackTables, table: Table) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while tables.subscriber_count(table) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("listener never subscribed");
}

async fn next_signal(session: &mut Session<LoopbackTables>) -> FeedSignal {
    tokio::time::timeout(Duration::from_secs(5), session.next_signal())
        .await
        .expect("timed out waiting for a feed signal")
        .expect("feed closed")
}
