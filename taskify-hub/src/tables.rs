//! Shared table storage for the hub.
//!
//! [`HubTables`] wraps the synchronous [`MemoryTables`] engine behind a
//! [`RwLock`] and fans every change it produces out to a per-table
//! broadcast channel. Connections subscribe to those channels; nothing in
//! here knows about sockets.

use std::collections::HashMap;

use rand::Rng;
use taskify_proto::feed::ChangeEvent;
use taskify_proto::hub::{HubReply, HubRequest};
use taskify_proto::tables::MemoryTables;
use taskify_proto::team::JOIN_CODE_LENGTH;
use taskify_proto::wire::{Row, Table};
use tokio::sync::{RwLock, broadcast};

/// Default number of change events buffered per table before a slow
/// subscriber lags.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates an 8-character upper-case alphanumeric join code.
#[must_use]
pub fn random_join_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LENGTH)
        .map(|_| char::from(JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())]))
        .collect()
}

/// Tables plus their change channels.
pub struct HubTables {
    tables: RwLock<MemoryTables>,
    feeds: HashMap<Table, broadcast::Sender<ChangeEvent>>,
}

impl Default for HubTables {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl HubTables {
    /// Creates empty tables with random join codes.
    #[must_use]
    pub fn new(event_buffer: usize) -> Self {
        Self::with_tables(MemoryTables::with_join_codes(random_join_code), event_buffer)
    }

    /// Wraps existing tables.
    #[must_use]
    pub fn with_tables(tables: MemoryTables, event_buffer: usize) -> Self {
        let feeds = Table::ALL
            .into_iter()
            .map(|table| (table, broadcast::channel(event_buffer.max(1)).0))
            .collect();
        Self {
            tables: RwLock::new(tables),
            feeds,
        }
    }

    /// Runs a data request and publishes the changes it produced.
    ///
    /// Events are published while the write lock is held, so subscribers
    /// see them in commit order.
    pub async fn execute(&self, request: HubRequest) -> HubReply {
        let mut tables = self.tables.write().await;
        let (reply, events) = tables.execute(request);
        for event in events {
            self.publish(event);
        }
        reply
    }

    /// Starts receiving change events for `table`.
    #[must_use]
    pub fn subscribe(&self, table: Table) -> broadcast::Receiver<ChangeEvent> {
        self.feed(table).subscribe()
    }

    /// Number of live receivers for `table`.
    #[must_use]
    pub fn subscriber_count(&self, table: Table) -> usize {
        self.feed(table).receiver_count()
    }

    /// Stores a row verbatim without publishing anything.
    pub async fn seed(&self, table: Table, row: Row) {
        self.tables.write().await.seed(table, row);
    }

    /// Copy of every row in `table`.
    pub async fn rows(&self, table: Table) -> Vec<Row> {
        self.tables.read().await.rows(table).to_vec()
    }

    fn publish(&self, event: ChangeEvent) {
        let table = event.table;
        // No receivers is the common case between sessions.
        if self.feed(table).send(event).is_err() {
            tracing::trace!(%table, "change dropped, no subscribers");
        }
    }

    fn feed(&self, table: Table) -> &broadcast::Sender<ChangeEvent> {
        // Every table gets a channel in `with_tables`.
        &self.feeds[&table]
    }
}
