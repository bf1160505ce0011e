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

//! End-to-end tests: real `taskify-hub` server, real WebSocket clients.
//!
//! Each test binds a hub on an ephemeral port and connects one or two
//! [`HubClient`]s to it. These validate:
//! - rows written by one client reach another client's session via the feed
//! - remote refusals come back as typed rejections
//! - losing the hub leaves the session usable, with changes queued

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use taskify::feed::{FeedSignal, FeedState};
use taskify::remote::hub::{HubClient, HubOptions};
use taskify::remote::{RemoteError, SyncAdapter, TableClient};
use taskify::session::{Session, SessionOptions};
use taskify::sync::{Notice, SyncError};
use taskify_hub::hub::{HubState, start_server_with_state};
use taskify_proto::hub::FailureCode;
use taskify_proto::ids::{RecordId, TaskId};
use taskify_proto::task::{Task, TaskChanges, TaskDraft, TaskStatus};
use taskify_proto::user::Identity;
use taskify_proto::wire::{Query, Table};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn task_created_by_one_client_reaches_the_other() {
    let (url, _state) = start_hub().await;
    let (mut ada, _ada_notices) = session(&url, ada()).await;
    let (mut grace, mut grace_notices) = session(&url, grace()).await;

    let task = ada.tasks().create_task(draft("Ship it")).await.unwrap();
    assert!(!task.id.is_provisional());

    let signal = next_signal(&mut grace).await;
    assert!(matches!(signal, FeedSignal::Changed(_)));
    assert_eq!(grace.tasks().get_task(&task.id), Some(task.clone()));
    let notice = grace_notices.recv().await.unwrap();
    assert_eq!(notice.detail, "\"Ship it\" was added");

    // Grace moves it along; Ada hears about it.
    next_signal(&mut ada).await;
    grace
        .tasks()
        .set_status(&task.id, TaskStatus::InProgress)
        .await
        .unwrap();
    let signal = next_signal(&mut ada).await;
    assert_eq!(signal.table(), Table::Tasks);
    assert_eq!(
        ada.tasks().get_task(&task.id).unwrap().status,
        TaskStatus::InProgress
    );

    ada.close().await;
    grace.close().await;
}

#[tokio::test]
async fn team_join_code_works_across_clients() {
    let (url, _state) = start_hub().await;
    let (mut ada, _a) = session(&url, ada()).await;
    let (mut grace, _g) = session(&url, grace()).await;

    let team = ada.teams().create_team("Core", None).await.unwrap();
    assert_eq!(team.join_code.len(), 8);
    assert!(team
        .join_code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

    let joined = grace
        .teams()
        .join_team_by_code(&team.join_code.to_lowercase())
        .await
        .unwrap();
    assert_eq!(joined.id, team.id);
    let names: Vec<String> = grace
        .teams()
        .members_view()
        .iter()
        .map(|v| v.display_name().to_string())
        .collect();
    assert_eq!(names, vec!["Ada".to_string(), "Grace".to_string()]);

    ada.close().await;
    grace.close().await;
}

#[tokio::test]
async fn refused_requests_come_back_typed() {
    let (url, _state) = start_hub().await;
    let client = Arc::new(HubClient::connect(&url, HubOptions::default()).await.unwrap());
    let adapter = SyncAdapter::new(Arc::clone(&client));

    let err = adapter
        .update::<Task>(&TaskId::new("missing"), &TaskChanges::status(TaskStatus::Review))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let mut bad = draft("No creator");
    bad.created_by = None;
    let err = adapter.create::<Task>(&bad).await.unwrap_err();
    assert!(matches!(err, RemoteError::Rejected { .. }));

    let rows = client.select(&Query::new(Table::Tasks)).await.unwrap();
    assert!(rows.is_empty());
    client.close().await;
}

#[tokio::test]
async fn malformed_rows_are_skipped_not_fatal() {
    let (url, state) = start_hub().await;
    state
        .tables
        .seed(
            Table::Tasks,
            taskify_proto::wire::into_row(serde_json::json!({"id": "broken", "title": "No dates"}))
                .unwrap(),
        )
        .await;
    let (mut ada, _n) = session(&url, ada()).await;
    ada.tasks().create_task(draft("Fine")).await.unwrap();

    let titles: Vec<String> = ada.tasks().tasks().into_iter().map(|t| t.title).collect();
    assert_eq!(titles, vec!["Fine".to_string()]);
    ada.close().await;
}

#[tokio::test]
async fn losing_the_hub_queues_changes() {
    let (url, state) = start_hub().await;
    let client = Arc::new(HubClient::connect(&url, HubOptions::default()).await.unwrap());
    let options = SessionOptions {
        resubscribe_delay: Duration::from_millis(20),
        ..SessionOptions::default()
    };
    let (mut ada, mut notices) = Session::start(Arc::clone(&client), ada(), options).await;
    wait_until(|| all_subscribed(&ada)).await;
    let kept = ada.tasks().create_task(draft("Before")).await.unwrap();

    state.close_all_connections().await;
    wait_until(|| !client.is_connected()).await;
    wait_until(|| {
        ada.feed_states()
            .iter()
            .all(|(_, s)| *s == FeedState::Reconnecting)
    })
    .await;

    let err = ada.tasks().create_task(draft("After")).await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteUnavailable(_)));
    assert_eq!(ada.tasks().tasks().len(), 2);
    assert_eq!(ada.tasks().get_task(&kept.id), Some(kept));
    assert!(drain(&mut notices).iter().any(|n| n.title == "Working offline"));

    let report = ada.flush_pending().await;
    assert_eq!(report.remaining, 1);
    ada.close().await;
}

#[tokio::test]
async fn closing_a_session_ends_hub_subscriptions() {
    let (url, state) = start_hub().await;
    let client = Arc::new(HubClient::connect(&url, HubOptions::default()).await.unwrap());
    let options = SessionOptions {
        resubscribe_delay: Duration::from_millis(20),
        ..SessionOptions::default()
    };
    let (mut ada, _notices) = Session::start(Arc::clone(&client), ada(), options).await;
    wait_until(|| all_subscribed(&ada)).await;
    wait_until(|| state.tables.subscriber_count(Table::Tasks) == 1).await;

    ada.close().await;
    wait_until(|| {
        taskify::session::WATCHED_TABLES
            .iter()
            .all(|t| state.tables.subscriber_count(*t) == 0)
    })
    .await;
    // The connection itself stays up for other users of the client.
    assert!(client.is_connected());
    client.close().await;
}

#[tokio::test]
async fn unreachable_hub_is_unavailable() {
    let options = HubOptions {
        connect_timeout: Duration::from_secs(2),
        ..HubOptions::default()
    };
    // Port 9 (discard) is almost never served on loopback.
    let result = HubClient::connect("ws://127.0.0.1:9/ws", options).await;
    assert!(matches!(result, Err(RemoteError::Unavailable(_))));
}

#[tokio::test]
async fn rejected_update_over_the_wire_reverts() {
    let (url, state) = start_hub().await;
    let (mut ada, _n) = session(&url, ada()).await;
    let task = ada.tasks().create_task(draft("Original")).await.unwrap();

    // Another client deletes it behind Ada's back.
    let other = HubClient::connect(&url, HubOptions::default()).await.unwrap();
    other.delete(Table::Tasks, task.id.as_str()).await.unwrap();
    assert!(state.tables.rows(Table::Tasks).await.is_empty());

    let err = ada
        .tasks()
        .update_task(&task.id, &TaskChanges::default().with_title("Edited"))
        .await;
    // Either the feed already removed it locally or the hub refused it.
    match err {
        Err(SyncError::NotFound(_)) => {}
        Err(SyncError::RemoteRejected { code, .. }) => assert_eq!(code, FailureCode::NotFound),
        other => panic!("expected a refusal, got {other:?}"),
    }
    ada.tasks().refresh().await.unwrap();
    assert!(ada.tasks().get_task(&task.id).is_none());
    ada.close().await;
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn ada() -> Identity {
    Identity::new("u1", "Ada", "ada@example.com")
}

fn grace() -> Identity {
    Identity::new("u2", "Grace", "grace@example.com")
}

fn draft(title: &str) -> TaskDraft {
    TaskDraft::new(title, Utc::now() + ChronoDuration::days(2))
}

async fn start_hub() -> (String, Arc<HubState>) {
    let state = Arc::new(HubState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("hub failed to start");
    (format!("ws://{addr}/ws"), state)
}

async fn session(url: &str, identity: Identity) -> (Session<HubClient>, mpsc::Receiver<Notice>) {
    let client = Arc::new(HubClient::connect(url, HubOptions::default()).await.unwrap());
    let options = SessionOptions {
        resubscribe_delay: Duration::from_millis(20),
        ..SessionOptions::default()
    };
    let started = Session::start(client, identity, options).await;
    wait_until(|| all_subscribed(&started.0)).await;
    started
}

fn all_subscribed(session: &Session<HubClient>) -> bool {
    session
        .feed_states()
        .iter()
        .all(|(_, s)| *s == FeedState::Subscribed)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next_signal(session: &mut Session<HubClient>) -> FeedSignal {
    tokio::time::timeout(Duration::from_secs(5), session.next_signal())
        .await
        .expect("timed out waiting for a feed signal")
        .expect("feed closed")
}

fn drain(notices: &mut mpsc::Receiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        out.push(notice);
    }
    out
}
