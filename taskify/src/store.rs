//! Entity store: an ordered, id-addressable in-memory collection.
//!
//! Holds the current known set of one entity type in insertion order. The
//! store performs no I/O and has no side effects beyond the mutation itself;
//! all writes from the application go through [`crate::sync::Collection`].

use std::collections::HashMap;

use taskify_proto::ids::{MemberId, RecordId, TaskId, TeamId};
use taskify_proto::task::Task;
use taskify_proto::team::{Team, TeamMember};

/// A record held by an [`EntityStore`].
pub trait Entity: Clone + Send + Sync + 'static {
    /// Identifier type.
    type Id: RecordId;

    /// Returns the record's id.
    fn id(&self) -> &Self::Id;
}

impl Entity for Task {
    type Id = TaskId;

    fn id(&self) -> &TaskId {
        &self.id
    }
}

impl Entity for Team {
    type Id = TeamId;

    fn id(&self) -> &TeamId {
        &self.id
    }
}

impl Entity for TeamMember {
    type Id = MemberId;

    fn id(&self) -> &MemberId {
        &self.id
    }
}

/// Ordered collection of entities keyed by id.
#[derive(Debug, Clone)]
pub struct EntityStore<E: Entity> {
    items: Vec<E>,
    index: HashMap<E::Id, usize>,
}

impl<E: Entity> Default for EntityStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> EntityStore<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// All entities in insertion order.
    #[must_use]
    pub fn list(&self) -> &[E] {
        &self.items
    }

    #[must_use]
    pub fn get(&self, id: &E::Id) -> Option<&E> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    #[must_use]
    pub fn contains(&self, id: &E::Id) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Swaps in a complete new set. Duplicate ids keep the first position
    /// and the last value.
    pub fn replace_all(&mut self, entities: impl IntoIterator<Item = E>) {
        self.items.clear();
        self.index.clear();
        for entity in entities {
            self.upsert(entity);
        }
    }

    /// Inserts at the end if the id is unseen, else replaces in place.
    pub fn upsert(&mut self, entity: E) {
        if let Some(&i) = self.index.get(entity.id()) {
            self.items[i] = entity;
        } else {
            self.index.insert(entity.id().clone(), self.items.len());
            self.items.push(entity);
        }
    }

    /// Removes an entity. Absent ids are a no-op.
    pub fn remove(&mut self, id: &E::Id) -> Option<E> {
        let i = self.index.remove(id)?;
        let removed = self.items.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    /// Replaces the entity stored under `old` with `entity`, keeping its
    /// position. Falls back to [`upsert`](Self::upsert) if `old` is absent.
    /// If `entity`'s id is already present elsewhere, `old` is dropped
    /// instead.
    pub fn swap(&mut self, old: &E::Id, entity: E) {
        if self.contains(entity.id()) && entity.id() != old {
            self.remove(old);
            self.upsert(entity);
            return;
        }
        match self.index.remove(old) {
            Some(i) => {
                self.index.insert(entity.id().clone(), i);
                self.items[i] = entity;
            }
            None => self.upsert(entity),
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }
}
