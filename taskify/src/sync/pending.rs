//! Mutations waiting for the remote to come back.

use chrono::{DateTime, Utc};

use crate::remote::Resource;
use crate::store::EntityStore;

/// A mutation that was applied locally but could not reach the remote.
#[derive(Debug, Clone)]
pub enum PendingMutation<R: Resource> {
    /// `entity` is the provisional stand-in shown locally.
    Create { entity: R, draft: R::Draft },
    /// `stamped_at` is the clock reading the optimistic write used.
    Update {
        id: R::Id,
        changes: R::Changes,
        stamped_at: DateTime<Utc>,
    },
    Delete { id: R::Id },
}

impl<R: Resource> PendingMutation<R> {
    /// Id of the entity the mutation targets.
    #[must_use]
    pub fn target(&self) -> &R::Id {
        match self {
            Self::Create { entity, .. } => entity.id(),
            Self::Update { id, .. } | Self::Delete { id } => id,
        }
    }

    /// Re-applies the mutation on top of freshly fetched state so queued
    /// work stays visible until it is flushed.
    ///
    /// Updates reuse their original stamp, so re-applying onto the same
    /// fetched state always yields the same entity.
    pub fn reapply(&self, store: &mut EntityStore<R>) {
        match self {
            Self::Create { entity, .. } => {
                if !store.contains(entity.id()) {
                    store.upsert(entity.clone());
                }
            }
            Self::Update {
                id,
                changes,
                stamped_at,
            } => {
                if let Some(current) = store.get(id) {
                    let mut next = current.clone();
                    next.apply_changes(changes, *stamped_at);
                    store.upsert(next);
                }
            }
            Self::Delete { id } => {
                store.remove(id);
            }
        }
    }

    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// A queued mutation with its position in the queue.
#[derive(Debug, Clone)]
pub(crate) struct Queued<R: Resource> {
    pub seq: u64,
    pub mutation: PendingMutation<R>,
}

/// FIFO of mutations awaiting a flush.
#[derive(Debug)]
pub(crate) struct PendingQueue<R: Resource> {
    items: Vec<Queued<R>>,
    next_seq: u64,
}

impl<R: Resource> Default for PendingQueue<R> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<R: Resource> PendingQueue<R> {
    pub fn push(&mut self, mutation: PendingMutation<R>) {
        self.next_seq += 1;
        self.items.push(Queued {
            seq: self.next_seq,
            mutation,
        });
    }

    pub fn front(&self) -> Option<&Queued<R>> {
        self.items.first()
    }

    /// Removes the entry with `seq`. Entries dropped meanwhile are ignored.
    pub fn remove(&mut self, seq: u64) {
        self.items.retain(|q| q.seq != seq);
    }

    /// Drops every entry targeting `id`.
    pub fn forget(&mut self, id: &R::Id) -> usize {
        let before = self.items.len();
        self.items.retain(|q| q.mutation.target() != id);
        before - self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn reapply(&self, store: &mut EntityStore<R>) {
        for queued in &self.items {
            queued.mutation.reapply(store);
        }
    }
}
