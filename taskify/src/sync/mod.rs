//! Optimistic mutation coordinator.
//!
//! A [`Collection`] owns one [`EntityStore`] and keeps it in step with the
//! remote. Every mutation follows the same shape:
//!
//! 1. Check preconditions locally (no remote call on failure).
//! 2. Apply the change to the store so observers see it at once.
//! 3. Send it through the [`SyncAdapter`].
//! 4. On rejection, re-fetch and replace the store. On unavailability, keep
//!    the optimistic state and queue the mutation for [`Collection::flush_pending`].
//!
//! Reconciliation is always re-fetch-and-replace. Fetches are ticketed so a
//! slow fetch never overwrites newer state.

mod notice;
mod pending;

pub use notice::{Notice, NoticeLevel, Notifier};
pub use pending::PendingMutation;

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use taskify_proto::hub::FailureCode;
use taskify_proto::ids::RecordId;
use taskify_proto::task::DraftError;
use taskify_proto::wire::Query;
use tokio::sync::watch;

use crate::remote::{RemoteError, Resource, SyncAdapter, TableClient};
use crate::store::EntityStore;
use pending::PendingQueue;

/// Errors surfaced by sync operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The remote could not be reached. Local state keeps the change and the
    /// mutation is queued.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote refused the change. Local state has been resynchronized.
    #[error("remote rejected the change ({code}): {message}")]
    RemoteRejected { code: FailureCode, message: String },

    /// The entity is not in the local store.
    #[error("{0} not found")]
    NotFound(String),

    /// The operation does not apply in the current state.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Client-side validation failed.
    #[error("invalid input: {0}")]
    Invalid(String),
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Unavailable(reason) => Self::RemoteUnavailable(reason),
            RemoteError::Rejected { code, message } => Self::RemoteRejected { code, message },
        }
    }
}

impl From<DraftError> for SyncError {
    fn from(e: DraftError) -> Self {
        Self::Invalid(e.to_string())
    }
}

/// Result of [`Collection::flush_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Mutations the remote accepted.
    pub applied: usize,
    /// Mutations the remote refused; they were dropped.
    pub rejected: usize,
    /// Mutations still queued because the remote is unavailable.
    pub remaining: usize,
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

struct Inner<R: Resource> {
    store: EntityStore<R>,
    /// Highest fetch ticket whose result may be applied over.
    watermark: u64,
    pending: PendingQueue<R>,
}

/// One synchronized collection of `R`.
pub struct Collection<R: Resource, C> {
    adapter: SyncAdapter<C>,
    inner: Mutex<Inner<R>>,
    query: Mutex<Query>,
    tickets: AtomicU64,
    snapshot: watch::Sender<Vec<R>>,
    notifier: Notifier,
}

impl<R: Resource, C: TableClient> Collection<R, C> {
    /// Creates an empty collection scoped by `query`.
    #[must_use]
    pub fn new(adapter: SyncAdapter<C>, query: Query, notifier: Notifier) -> Self {
        let (snapshot, _) = watch::channel(Vec::new());
        Self {
            adapter,
            inner: Mutex::new(Inner {
                store: EntityStore::new(),
                watermark: 0,
                pending: PendingQueue::default(),
            }),
            query: Mutex::new(query),
            tickets: AtomicU64::new(0),
            snapshot,
            notifier,
        }
    }

    #[must_use]
    pub const fn adapter(&self) -> &SyncAdapter<C> {
        &self.adapter
    }

    #[must_use]
    pub const fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Current entities in store order.
    #[must_use]
    pub fn list(&self) -> Vec<R> {
        self.inner.lock().store.list().to_vec()
    }

    #[must_use]
    pub fn get(&self, id: &R::Id) -> Option<R> {
        self.inner.lock().store.get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().store.is_empty()
    }

    /// Number of mutations waiting for the remote.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Receiver that sees every new store state.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Vec<R>> {
        self.snapshot.subscribe()
    }

    #[must_use]
    pub fn query(&self) -> Query {
        self.query.lock().clone()
    }

    /// Changes the fetch scope. Takes effect on the next refresh.
    pub fn set_query(&self, query: Query) {
        *self.query.lock() = query;
    }

    /// Seeds an empty store from cached data. Returns `false` and leaves
    /// the store alone if it already holds anything.
    pub fn restore(&self, entities: Vec<R>) -> bool {
        let mut inner = self.inner.lock();
        if !inner.store.is_empty() {
            return false;
        }
        inner.store.replace_all(entities);
        self.publish(&inner);
        true
    }

    /// Empties the store and the pending queue.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.store.clear();
        inner.pending.clear();
        inner.watermark = self.tickets.load(Ordering::SeqCst);
        self.publish(&inner);
    }

    /// Re-fetches the collection and replaces the store.
    ///
    /// Queued mutations are re-applied on top of the fetched state. Returns
    /// `false` if the result was discarded because newer state had already
    /// been applied.
    ///
    /// # Errors
    ///
    /// Returns the remote failure; the store is left untouched.
    pub async fn refresh(&self) -> Result<bool, SyncError> {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let query = self.query();
        let fetched = self.adapter.fetch_all::<R>(&query).await?;

        let mut inner = self.inner.lock();
        if ticket <= inner.watermark {
            tracing::debug!(table = %R::TABLE, ticket, watermark = inner.watermark, "discarding stale fetch");
            return Ok(false);
        }
        inner.watermark = ticket;
        inner.store.replace_all(fetched);
        let Inner { store, pending, .. } = &mut *inner;
        pending.reapply(store);
        self.publish(&inner);
        tracing::debug!(table = %R::TABLE, count = inner.store.len(), "refreshed");
        Ok(true)
    }

    /// Creates an entity optimistically.
    ///
    /// A provisional entity is shown at once and replaced by the stored one
    /// when the remote accepts it.
    ///
    /// # Errors
    ///
    /// - [`SyncError::RemoteRejected`] if the draft cannot be sent or the
    ///   remote refuses it; the provisional entity is gone.
    /// - [`SyncError::RemoteUnavailable`] if the remote is unreachable; the
    ///   provisional entity stays and the create is queued.
    pub async fn create(&self, draft: &R::Draft) -> Result<R, SyncError> {
        let provisional = R::provisional(draft, Utc::now()).map_err(|e| {
            SyncError::RemoteRejected {
                code: FailureCode::Validation,
                message: e.to_string(),
            }
        })?;
        let temp_id = provisional.id().clone();
        self.apply_local(|store| store.upsert(provisional.clone()));

        match self.adapter.create::<R>(draft).await {
            Ok(created) => {
                self.apply_local(|store| store.swap(&temp_id, created.clone()));
                tracing::info!(table = %R::TABLE, id = %created.id(), "created");
                self.resync_quietly().await;
                Ok(created)
            }
            Err(e @ RemoteError::Unavailable(_)) => {
                self.inner.lock().pending.push(PendingMutation::Create {
                    entity: provisional,
                    draft: draft.clone(),
                });
                Err(self.queued(&e))
            }
            Err(e) => {
                self.apply_local(|store| {
                    store.remove(&temp_id);
                });
                Err(self.rejected("create", e).await)
            }
        }
    }

    /// Applies `changes` optimistically and sends them.
    ///
    /// Empty changes return the current entity without a remote call.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotFound`] if `id` is not in the store.
    /// - [`SyncError::PreconditionFailed`] if the entity is still provisional.
    /// - Remote failures as for [`create`](Self::create).
    pub async fn update(&self, id: &R::Id, changes: &R::Changes) -> Result<R, SyncError> {
        let stamped_at = Utc::now();
        let next = {
            let mut inner = self.inner.lock();
            let Some(current) = inner.store.get(id) else {
                return Err(not_found::<R>(id));
            };
            if id.is_provisional() {
                return Err(provisional::<R>(id));
            }
            if R::changes_is_empty(changes) {
                return Ok(current.clone());
            }
            let mut next = current.clone();
            next.apply_changes(changes, stamped_at);
            inner.store.upsert(next.clone());
            inner.watermark = self.tickets.load(Ordering::SeqCst);
            self.publish(&inner);
            next
        };

        match self.adapter.update::<R>(id, changes).await {
            Ok(()) => {
                tracing::debug!(table = %R::TABLE, %id, "updated");
                Ok(next)
            }
            Err(e @ RemoteError::Unavailable(_)) => {
                self.inner.lock().pending.push(PendingMutation::Update {
                    id: id.clone(),
                    changes: changes.clone(),
                    stamped_at,
                });
                Err(self.queued(&e))
            }
            Err(e) => Err(self.rejected("update", e).await),
        }
    }

    /// Removes an entity optimistically and deletes it remotely.
    ///
    /// Deleting a provisional entity only drops it and its queued create.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotFound`] if `id` is not in the store.
    /// - Remote failures as for [`create`](Self::create).
    pub async fn delete(&self, id: &R::Id) -> Result<(), SyncError> {
        {
            let mut inner = self.inner.lock();
            if inner.store.remove(id).is_none() {
                return Err(not_found::<R>(id));
            }
            inner.watermark = self.tickets.load(Ordering::SeqCst);
            if id.is_provisional() {
                let dropped = inner.pending.forget(id);
                self.publish(&inner);
                tracing::debug!(table = %R::TABLE, %id, dropped, "discarded provisional entity");
                return Ok(());
            }
            self.publish(&inner);
        }

        match self.adapter.delete::<R>(id).await {
            Ok(()) => {
                tracing::debug!(table = %R::TABLE, %id, "deleted");
                Ok(())
            }
            Err(e @ RemoteError::Unavailable(_)) => {
                self.inner
                    .lock()
                    .pending
                    .push(PendingMutation::Delete { id: id.clone() });
                Err(self.queued(&e))
            }
            Err(e) => Err(self.rejected("delete", e).await),
        }
    }

    /// Replays queued mutations in order, then resynchronizes.
    ///
    /// Accepted and refused mutations leave the queue; the first one that
    /// still cannot reach the remote stops the replay.
    pub async fn flush_pending(&self) -> FlushReport {
        let mut report = FlushReport::default();
        loop {
            let Some(queued) = self.inner.lock().pending.front().cloned() else {
                break;
            };
            let outcome = match &queued.mutation {
                PendingMutation::Create { entity, draft } => {
                    self.adapter.create::<R>(draft).await.map(|created| {
                        let temp_id = entity.id().clone();
                        self.apply_local(|store| store.swap(&temp_id, created));
                    })
                }
                PendingMutation::Update { id, changes, .. } => {
                    self.adapter.update::<R>(id, changes).await
                }
                PendingMutation::Delete { id } => self.adapter.delete::<R>(id).await,
            };
            match outcome {
                Ok(()) => {
                    report.applied += 1;
                    self.inner.lock().pending.remove(queued.seq);
                }
                Err(RemoteError::Unavailable(reason)) => {
                    tracing::debug!(table = %R::TABLE, %reason, "flush stopped, remote unavailable");
                    break;
                }
                Err(e) => {
                    report.rejected += 1;
                    self.inner.lock().pending.remove(queued.seq);
                    tracing::warn!(
                        table = %R::TABLE,
                        id = %queued.mutation.target(),
                        verb = queued.mutation.verb(),
                        error = %e,
                        "queued mutation rejected"
                    );
                    self.notifier.notify(Notice::error(
                        format!("Could not {} {}", queued.mutation.verb(), R::NOUN),
                        e.to_string(),
                    ));
                }
            }
        }
        report.remaining = self.pending_len();
        if report.applied + report.rejected > 0 {
            self.resync_quietly().await;
        }
        if report != FlushReport::default() {
            tracing::info!(
                table = %R::TABLE,
                applied = report.applied,
                rejected = report.rejected,
                remaining = report.remaining,
                "flushed pending mutations"
            );
        }
        report
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Mutates the store, fences older fetches and publishes the result.
    fn apply_local(&self, f: impl FnOnce(&mut EntityStore<R>)) {
        let mut inner = self.inner.lock();
        f(&mut inner.store);
        inner.watermark = self.tickets.load(Ordering::SeqCst);
        self.publish(&inner);
    }

    fn publish(&self, inner: &Inner<R>) {
        self.snapshot.send_replace(inner.store.list().to_vec());
    }

    async fn resync_quietly(&self) {
        if let Err(e) = self.refresh().await {
            tracing::warn!(table = %R::TABLE, error = %e, "resync failed");
        }
    }

    fn queued(&self, e: &RemoteError) -> SyncError {
        tracing::warn!(table = %R::TABLE, error = %e, "remote unavailable, change queued");
        self.notifier.notify(Notice::warning(
            "Working offline",
            format!("Your {} change will be sent when the connection returns.", R::NOUN),
        ));
        SyncError::from(e.clone())
    }

    async fn rejected(&self, verb: &str, e: RemoteError) -> SyncError {
        tracing::warn!(table = %R::TABLE, verb, error = %e, "remote rejected change, resyncing");
        self.resync_quietly().await;
        self.notifier.notify(Notice::error(
            format!("Could not {verb} {}", R::NOUN),
            e.to_string(),
        ));
        SyncError::from(e)
    }
}

fn not_found<R: Resource>(id: &R::Id) -> SyncError {
    SyncError::NotFound(format!("{} {id}", R::NOUN))
}

fn provisional<R: Resource>(id: &R::Id) -> SyncError {
    SyncError::PreconditionFailed(format!("{} {id} has not been saved yet", R::NOUN))
}
