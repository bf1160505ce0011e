//! Signed-in session: wires managers, listeners and the cache together.
//!
//! A [`Session`] owns everything that lives between sign-in and sign-out:
//! the task and team managers, one [`FeedListener`] per watched table and
//! the snapshot cache. The presentation layer drives it by awaiting
//! [`Session::next_signal`] and reading the managers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use taskify_proto::ids::UserId;
use taskify_proto::snapshot::Snapshot;
use taskify_proto::user::{Identity, Profile};
use taskify_proto::wire::Table;
use tokio::sync::mpsc;

use crate::cache::SnapshotCache;
use crate::feed::{ChangeFeed, DEFAULT_RESUBSCRIBE_DELAY, FeedListener, FeedSignal, FeedState};
use crate::remote::{SyncAdapter, TableClient};
use crate::sync::{FlushReport, Notice, Notifier};
use crate::tasks::{TaskManager, TransitionPolicy};
use crate::teams::TeamManager;

/// Tables a session listens to.
pub const WATCHED_TABLES: [Table; 3] = [Table::Tasks, Table::Teams, Table::TeamMembers];

/// The signed-in user, shared by every manager of a session.
#[derive(Debug, Clone, Default)]
pub struct SharedIdentity(Arc<RwLock<Option<Identity>>>);

impl SharedIdentity {
    #[must_use]
    pub fn new(identity: Option<Identity>) -> Self {
        Self(Arc::new(RwLock::new(identity)))
    }

    #[must_use]
    pub fn get(&self) -> Option<Identity> {
        self.0.read().clone()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.0.read().as_ref().map(|i| i.id.clone())
    }

    pub fn set(&self, identity: Identity) {
        *self.0.write() = Some(identity);
    }

    pub fn clear(&self) {
        *self.0.write() = None;
    }
}

/// Tunables for [`Session::start`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub notice_buffer: usize,
    pub signal_buffer: usize,
    pub resubscribe_delay: Duration,
    pub policy: TransitionPolicy,
    /// `None` disables the snapshot cache.
    pub cache: Option<SnapshotCache>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            notice_buffer: 64,
            signal_buffer: 256,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
            policy: TransitionPolicy::Permissive,
            cache: None,
        }
    }
}

/// A signed-in session against one remote.
pub struct Session<C> {
    identity: SharedIdentity,
    tasks: TaskManager<C>,
    teams: TeamManager<C>,
    listeners: Vec<FeedListener>,
    signals: mpsc::Receiver<FeedSignal>,
    cache: Option<SnapshotCache>,
}

impl<C> Session<C>
where
    C: TableClient + ChangeFeed + 'static,
{
    /// Signs `identity` in and brings the collections up.
    ///
    /// Never fails: an unreachable remote leaves the cached (or empty)
    /// state in place and the listeners keep trying to subscribe.
    pub async fn start(
        client: Arc<C>,
        identity: Identity,
        options: SessionOptions,
    ) -> (Self, mpsc::Receiver<Notice>) {
        let (notifier, notices) = Notifier::channel(options.notice_buffer);
        let shared = SharedIdentity::new(Some(identity.clone()));
        let adapter = SyncAdapter::new(Arc::clone(&client));
        let tasks = TaskManager::new(adapter.clone(), shared.clone(), notifier.clone(), options.policy);
        let teams = TeamManager::new(adapter.clone(), shared.clone(), notifier);

        let (signal_tx, signals) = mpsc::channel(options.signal_buffer.max(1));
        let mut session = Self {
            identity: shared,
            tasks,
            teams,
            listeners: Vec::new(),
            signals,
            cache: options.cache,
        };
        tracing::info!(user_id = %identity.id, "session starting");

        session.warm_start(&identity.id);

        if let Err(e) = adapter.ensure_profile(&Profile::from(&identity)).await {
            tracing::warn!(user_id = %identity.id, error = %e, "could not ensure profile row");
        }

        let tasks_ok = session
            .tasks
            .refresh()
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "initial task fetch failed"))
            .is_ok();
        let teams_ok = session
            .teams
            .refresh_teams()
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "initial team fetch failed"))
            .is_ok();
        if tasks_ok && teams_ok {
            session.save_cache();
        }

        for table in WATCHED_TABLES {
            let mut listener = FeedListener::new(table, options.resubscribe_delay);
            listener.start(Arc::clone(&client), signal_tx.clone());
            session.listeners.push(listener);
        }

        (session, notices)
    }

    #[must_use]
    pub const fn tasks(&self) -> &TaskManager<C> {
        &self.tasks
    }

    #[must_use]
    pub const fn teams(&self) -> &TeamManager<C> {
        &self.teams
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.identity.get()
    }

    /// State of each listener, in [`WATCHED_TABLES`] order.
    #[must_use]
    pub fn feed_states(&self) -> Vec<(Table, FeedState)> {
        self.listeners.iter().map(|l| (l.table(), l.state())).collect()
    }

    /// Waits for the next feed signal and applies it.
    ///
    /// Returns `None` once every listener has stopped.
    pub async fn next_signal(&mut self) -> Option<FeedSignal> {
        let signal = self.recv_signal().await?;
        self.dispatch(&signal).await;
        Some(signal)
    }

    /// Waits for the next feed signal without applying it.
    ///
    /// Cancel safe, unlike [`Self::next_signal`]; pair it with
    /// [`Self::dispatch`] inside `tokio::select!`.
    pub async fn recv_signal(&mut self) -> Option<FeedSignal> {
        self.signals.recv().await
    }

    /// Re-fetches the collection a signal concerns. Does nothing once the
    /// session is closed.
    pub async fn dispatch(&self, signal: &FeedSignal) {
        if self.identity.get().is_none() {
            return;
        }
        let result = match signal.table() {
            Table::Tasks => self.tasks.handle_signal(signal).await,
            Table::Teams | Table::TeamMembers => self.teams.handle_signal(signal).await,
            Table::Profiles => Ok(()),
        };
        match result {
            Ok(()) => self.save_cache(),
            Err(e) => tracing::warn!(table = %signal.table(), error = %e, "refresh after change failed"),
        }
    }

    /// Replays every manager's queued mutations.
    pub async fn flush_pending(&self) -> FlushReport {
        let tasks = self.tasks.flush_pending().await;
        let teams = self.teams.flush_pending().await;
        FlushReport {
            applied: tasks.applied + teams.applied,
            rejected: tasks.rejected + teams.rejected,
            remaining: tasks.remaining + teams.remaining,
        }
    }

    /// Stops the listeners, saves the cache and signs out.
    ///
    /// Signals still queued are discarded unapplied, so [`Self::next_signal`]
    /// returns `None` from here on.
    pub async fn close(&mut self) {
        for listener in &mut self.listeners {
            listener.stop().await;
        }
        self.signals.close();
        let mut discarded = 0usize;
        while self.signals.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "dropped feed signals queued at close");
        }
        self.save_cache();
        self.identity.clear();
        tracing::info!("session closed");
    }

    fn warm_start(&self, user: &UserId) {
        let Some(cache) = &self.cache else {
            return;
        };
        match cache.load(user) {
            Ok(Some(snapshot)) => {
                let current = snapshot
                    .members
                    .first()
                    .map(|m| m.team_id.clone())
                    .or_else(|| snapshot.teams.first().map(|t| t.id.clone()));
                tracing::info!(
                    tasks = snapshot.tasks.len(),
                    teams = snapshot.teams.len(),
                    saved_at = %snapshot.saved_at,
                    "warm start from snapshot"
                );
                self.tasks.collection().restore(snapshot.tasks);
                self.teams.teams_collection().restore(snapshot.teams);
                self.teams.members_collection().restore(snapshot.members);
                self.teams.adopt_current(current);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(path = %cache.path().display(), error = %e, "snapshot unreadable"),
        }
    }

    fn save_cache(&self) {
        let (Some(cache), Some(user)) = (&self.cache, self.identity.user_id()) else {
            return;
        };
        let mut snapshot = Snapshot::new(user, Utc::now());
        snapshot.tasks = self.tasks.tasks();
        snapshot.teams = self.teams.teams();
        snapshot.members = self.teams.members();
        if let Err(e) = cache.save(&snapshot) {
            tracing::warn!(path = %cache.path().display(), error = %e, "snapshot not saved");
        }
    }
}
