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

//! Integration tests for team management: creating teams, joining by code,
//! leaving, membership roles and the current-team selection.
//!
//! Two users share one set of in-process tables, each with their own
//! [`TeamManager`], the way two clients share a hub.

use std::sync::Arc;
use std::time::Duration;

use taskify::feed::FeedSignal;
use taskify::remote::loopback::LoopbackTables;
use taskify::remote::SyncAdapter;
use taskify::session::{Session, SessionOptions, SharedIdentity};
use taskify::sync::{Notice, Notifier, SyncError};
use taskify::teams::TeamManager;
use taskify_proto::ids::TeamId;
use taskify_proto::team::{TeamChanges, TeamRole};
use taskify_proto::user::{Identity, Profile};
use taskify_proto::wire::Table;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Creating teams
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_team_makes_creator_admin_and_current() {
    let tables = Arc::new(LoopbackTables::new());
    let (ada, mut notices) = client(&tables, &ada()).await;

    let team = ada.create_team("  Core  ", Some("Platform work")).await.unwrap();
    assert_eq!(team.name, "Core");
    assert_eq!(team.join_code.len(), 8);
    assert!(team.join_code.chars().all(|c| c.is_ascii_alphanumeric()));

    assert_eq!(ada.teams(), vec![team.clone()]);
    assert_eq!(ada.current_team_id(), Some(team.id.clone()));

    let view = ada.members_view();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].member.role, TeamRole::Admin);
    assert_eq!(view[0].display_name(), "Ada");

    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.title, "Team created");
    assert!(notice.detail.contains(&team.join_code));
}

#[tokio::test]
async fn blank_team_name_is_refused_locally() {
    let tables = Arc::new(LoopbackTables::new());
    let (ada, _notices) = client(&tables, &ada()).await;
    let calls = tables.calls();

    assert!(matches!(
        ada.create_team("   ", None).await,
        Err(SyncError::Invalid(_))
    ));
    assert_eq!(tables.calls(), calls);
}

#[tokio::test]
async fn rename_team_updates_everyone_after_refresh() {
    let tables = Arc::new(LoopbackTables::new());
    let (ada, _n) = client(&tables, &ada()).await;
    let (grace, _g) = client(&tables, &grace()).await;
    let team = ada.create_team("Core", None).await.unwrap();
    grace.join_team_by_code(&team.join_code).await.unwrap();

    let changes = TeamChanges {
        name: Some("Platform".to_string()),
        ..TeamChanges::default()
    };
    ada.update_team(&team.id, &changes).await.unwrap();
    grace.refresh_teams().await.unwrap();
    assert_eq!(grace.current_team().unwrap().name, "Platform");
}

// ---------------------------------------------------------------------------
// Joining and leaving
// ---------------------------------------------------------------------------

#[tokio::test]
async fn join_by_code_is_case_insensitive() {
    let tables = Arc::new(LoopbackTables::new());
    let (ada, _n) = client(&tables, &ada()).await;
    let (grace, mut notices) = client(&tables, &grace()).await;
    let team = ada.create_team("Core", None).await.unwrap();

    let code = format!("  {}  ", team.join_code.to_ascii_lowercase());
    let joined = grace.join_team_by_code(&code).await.unwrap();
    assert_eq!(joined.id, team.id);
    assert_eq!(grace.current_team_id(), Some(team.id.clone()));
    assert_eq!(notices.recv().await.unwrap().title, "Joined team");

    let roles: Vec<TeamRole> = grace.members().into_iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![TeamRole::Admin, TeamRole::Member]);
    let names: Vec<String> = grace
        .members_view()
        .iter()
        .map(|v| v.display_name().to_string())
        .collect();
    assert_eq!(names, vec!["Ada".to_string(), "Grace".to_string()]);
}

#[tokio::test]
async fn joining_twice_keeps_one_membership() {
    let tables = Arc::new(LoopbackTables::new());
    let (ada, _n) = client(&tables, &ada()).await;
    let (grace, mut notices) = client(&tables, &grace()).await;
    let team = ada.create_team("Core", None).await.unwrap();

    grace.join_team_by_code(&team.join_code).await.unwrap();
    grace.join_team_by_code(&team.join_code).await.unwrap();

    assert_eq!(tables.rows(Table::TeamMembers).len(), 2);
    let titles: Vec<String> = drain(&mut notices).into_iter().map(|n| n.title).collect();
    assert_eq!(titles, vec!["Joined team".to_string(), "Already a member".to_string()]);
}

#[tokio::test]
async fn unknown_join_code_is_not_found() {
    let tables = Arc::new(LoopbackTables::new());
    let (grace, _n) = client(&tables, &grace()).await;
    assert!(matches!(
        grace.join_team_by_code("NOPE1234").await,
        Err(SyncError::NotFound(_))
    ));
    assert!(grace.teams().is_empty());
}

#[tokio::test]
async fn creator_cannot_leave_but_members_can() {
    let tables = Arc::new(LoopbackTables::new());
    let (ada, _n) = client(&tables, &ada()).await;
    let (grace, _g) = client(&tables, &grace()).await;
    let team = ada.create_team("Core", None).await.unwrap();
    grace.join_team_by_code(&team.join_code).await.unwrap();

    assert!(matches!(
        ada.leave_team(&team.id).await,
        Err(SyncError::PreconditionFailed(_))
    ));

    grace.leave_team(&team.id).await.unwrap();
    assert!(grace.teams().is_empty());
    assert_eq!(grace.current_team_id(), None);
    assert!(grace.members().is_empty());
    assert_eq!(tables.rows(Table::TeamMembers).len(), 1);
}

// ---------------------------------------------------------------------------
// Current team and members
// ---------------------------------------------------------------------------

#[tokio::test]
async fn switching_teams_loads_that_teams_members() {
    let tables = Arc::new(LoopbackTables::new());
    let (ada, _n) = client(&tables, &ada()).await;
    let (grace, _g) = client(&tables, &grace()).await;
    let core = ada.create_team("Core", None).await.unwrap();
    let docs = ada.create_team("Docs", None).await.unwrap();
    grace.join_team_by_code(&docs.join_code).await.unwrap();
    assert_eq!(ada.current_team_id(), Some(docs.id.clone()));

    ada.set_current_team(Some(core.id.clone())).await.unwrap();
    assert_eq!(ada.members().len(), 1);

    ada.set_current_team(Some(docs.id.clone())).await.unwrap();
    assert_eq!(ada.members().len(), 2);

    assert!(matches!(
        ada.set_current_team(Some(TeamId::new("elsewhere"))).await,
        Err(SyncError::NotFound(_))
    ));
    assert_eq!(ada.current_team_id(), Some(docs.id));
}

#[tokio::test]
async fn admin_changes_roles_and_removes_members() {
    let tables = Arc::new(LoopbackTables::new());
    let (ada, _n) = client(&tables, &ada()).await;
    let (grace, _g) = client(&tables, &grace()).await;
    let team = ada.create_team("Core", None).await.unwrap();
    grace.join_team_by_code(&team.join_code).await.unwrap();
    ada.load_members().await.unwrap();

    let grace_member = ada
        .members()
        .into_iter()
        .find(|m| m.user_id.as_str() == "u2")
        .unwrap();
    let promoted = ada
        .change_member_role(&grace_member.id, TeamRole::Admin)
        .await
        .unwrap();
    assert_eq!(promoted.role, TeamRole::Admin);

    ada.remove_member(&grace_member.id).await.unwrap();
    assert_eq!(ada.members().len(), 1);
    grace.refresh_teams().await.unwrap();
    assert!(grace.teams().is_empty());
}

#[tokio::test]
async fn deleting_current_team_cascades_and_moves_on() {
    let tables = Arc::new(LoopbackTables::new());
    let (ada, _n) = client(&tables, &ada()).await;
    let core = ada.create_team("Core", None).await.unwrap();
    let docs = ada.create_team("Docs", None).await.unwrap();
    assert_eq!(ada.current_team_id(), Some(docs.id.clone()));

    ada.delete_team(&docs.id).await.unwrap();
    assert_eq!(ada.current_team_id(), Some(core.id.clone()));
    assert_eq!(ada.members().len(), 1);
    let remaining: Vec<String> = tables
        .rows(Table::TeamMembers)
        .iter()
        .map(|m| m["team_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(remaining, vec![core.id.to_string()]);
}

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_member_shows_up_through_the_feed() {
    let tables = Arc::new(LoopbackTables::new());
    let options = SessionOptions {
        resubscribe_delay: Duration::from_millis(10),
        ..SessionOptions::default()
    };
    let (mut session, _notices) = Session::start(Arc::clone(&tables), ada(), options).await;
    for table in taskify::session::WATCHED_TABLES {
        wait_for_subscriber(&tables, table).await;
    }
    let team = session.teams().create_team("Core", None).await.unwrap();
    drain_signals(&mut session).await;

    let (grace, _g) = client(&tables, &grace()).await;
    grace.join_team_by_code(&team.join_code).await.unwrap();

    let signal = tokio::time::timeout(Duration::from_secs(5), session.next_signal())
        .await
        .expect("timed out waiting for membership event")
        .expect("feed closed");
    assert_eq!(signal.table(), Table::TeamMembers);
    assert!(matches!(signal, FeedSignal::Changed(_)));
    assert_eq!(session.teams().members().len(), 2);

    session.close().await;
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

/// A team manager signed in as `identity`, with its profile row in place.
async fn client(
    tables: &Arc<LoopbackTables>,
    identity: &Identity,
) -> (TeamManager<LoopbackTables>, mpsc::Receiver<Notice>) {
    let adapter = SyncAdapter::new(Arc::clone(tables));
    adapter.ensure_profile(&Profile::from(identity)).await.unwrap();
    let (notifier, notices) = Notifier::channel(32);
    let manager = TeamManager::new(adapter, SharedIdentity::new(Some(identity.clone())), notifier);
    (manager, notices)
}

fn drain(notices: &mut mpsc::Receiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        out.push(notice);
    }
    out
}

/// Applies every signal already queued, waiting briefly for stragglers.
async fn drain_signals(session: &mut Session<LoopbackTables>) {
    while let Ok(Some(_)) =
        tokio::time::timeout(Duration::from_millis(100), session.next_signal()).await
    {}
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
