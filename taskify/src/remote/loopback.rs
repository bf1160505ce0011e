//! In-process remote store for tests and offline demos.
//!
//! Wraps a [`MemoryTables`] engine behind the [`TableClient`] and
//! [`ChangeFeed`] traits, publishing change events on per-table
//! [`tokio::sync::broadcast`] channels. Faults can be injected to exercise
//! the unavailable and rejected paths.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use taskify_proto::feed::ChangeEvent;
use taskify_proto::tables::{MemoryTables, TableError};
use taskify_proto::wire::{Query, Row, Table};
use tokio::sync::broadcast;

use super::{RemoteError, TableClient};
use crate::feed::ChangeFeed;

/// Default per-table event buffer.
const DEFAULT_EVENT_BUFFER: usize = 256;

/// In-process remote store.
pub struct LoopbackTables {
    tables: Mutex<MemoryTables>,
    feeds: Mutex<HashMap<Table, broadcast::Sender<ChangeEvent>>>,
    faults: Mutex<VecDeque<RemoteError>>,
    offline: AtomicBool,
    calls: AtomicUsize,
    event_buffer: usize,
}

impl Default for LoopbackTables {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTables {
    #[must_use]
    pub fn new() -> Self {
        Self::with_event_buffer(DEFAULT_EVENT_BUFFER)
    }

    /// Creates loopback tables whose feeds buffer `event_buffer` events per
    /// subscriber before lagging.
    #[must_use]
    pub fn with_event_buffer(event_buffer: usize) -> Self {
        Self {
            tables: Mutex::new(MemoryTables::new()),
            feeds: Mutex::new(HashMap::new()),
            faults: Mutex::new(VecDeque::new()),
            offline: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            event_buffer,
        }
    }

    /// Stores a row verbatim without validation or events.
    pub fn seed(&self, table: Table, row: Row) {
        self.tables.lock().seed(table, row);
    }

    /// Current rows of `table`.
    #[must_use]
    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.tables.lock().rows(table).to_vec()
    }

    /// Makes the next table call fail with `error`. Queued faults are
    /// consumed in order.
    pub fn fail_next(&self, error: RemoteError) {
        self.faults.lock().push_back(error);
    }

    /// While offline, every table call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of table calls received (including failed ones).
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Applies a write as if another client made it, publishing its events.
    ///
    /// # Errors
    ///
    /// Returns the engine's [`TableError`] if the write is refused.
    pub fn foreign_insert(&self, table: Table, row: Row) -> Result<Row, TableError> {
        let (row, events) = self.tables.lock().insert(table, row)?;
        self.publish(events);
        Ok(row)
    }

    /// # Errors
    ///
    /// Returns the engine's [`TableError`] if the write is refused.
    pub fn foreign_update(&self, table: Table, id: &str, row: Row) -> Result<Row, TableError> {
        let (row, events) = self.tables.lock().update(table, id, row)?;
        self.publish(events);
        Ok(row)
    }

    /// # Errors
    ///
    /// Returns the engine's [`TableError`] if the row is absent.
    pub fn foreign_delete(&self, table: Table, id: &str) -> Result<(), TableError> {
        let events = self.tables.lock().delete(table, id)?;
        self.publish(events);
        Ok(())
    }

    /// Publishes an arbitrary event to subscribers of its table.
    pub fn publish_event(&self, event: ChangeEvent) {
        self.publish(vec![event]);
    }

    /// Drops the feed for `table`, closing every subscriber's receiver as a
    /// lost connection would.
    pub fn interrupt_feed(&self, table: Table) {
        self.feeds.lock().remove(&table);
    }

    /// Number of live subscribers on `table`.
    #[must_use]
    pub fn subscriber_count(&self, table: Table) -> usize {
        self.feeds
            .lock()
            .get(&table)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        let feeds = self.feeds.lock();
        for event in events {
            if let Some(tx) = feeds.get(&event.table) {
                // No subscribers is fine.
                let _ = tx.send(event);
            }
        }
    }

    fn begin_call(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("loopback offline".to_string()));
        }
        self.faults.lock().pop_front().map_or(Ok(()), Err)
    }
}

fn rejected(e: &TableError) -> RemoteError {
    RemoteError::rejected(e.code(), e.to_string())
}

impl TableClient for LoopbackTables {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, RemoteError> {
        self.begin_call()?;
        Ok(self.tables.lock().select(query))
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, RemoteError> {
        self.begin_call()?;
        let (row, events) = self
            .tables
            .lock()
            .insert(table, row)
            .map_err(|e| rejected(&e))?;
        self.publish(events);
        Ok(row)
    }

    async fn update(&self, table: Table, id: &str, row: Row) -> Result<Row, RemoteError> {
        self.begin_call()?;
        let (row, events) = self
            .tables
            .lock()
            .update(table, id, row)
            .map_err(|e| rejected(&e))?;
        self.publish(events);
        Ok(row)
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), RemoteError> {
        self.begin_call()?;
        let events = self
            .tables
            .lock()
            .delete(table, id)
            .map_err(|e| rejected(&e))?;
        self.publish(events);
        Ok(())
    }
}

impl ChangeFeed for LoopbackTables {
    async fn subscribe(&self, table: Table) -> Result<broadcast::Receiver<ChangeEvent>, RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("loopback offline".to_string()));
        }
        let mut feeds = self.feeds.lock();
        let tx = feeds
            .entry(table)
            .or_insert_with(|| broadcast::channel(self.event_buffer).0);
        Ok(tx.subscribe())
    }

    /// Receivers end their own subscription when dropped.
    async fn unsubscribe(&self, _table: Table) -> Result<(), RemoteError> {
        Ok(())
    }
}
