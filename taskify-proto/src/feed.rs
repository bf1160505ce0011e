//! Change-feed events pushed by the remote store.
//!
//! The JSON shape matches the realtime payload the remote publishes:
//! `{"eventType": "INSERT" | "UPDATE" | "DELETE", "table": ..., "new": {...}, "old": {...}}`.
//! Delivery is at-least-once and unordered.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::wire::{Row, Table, row_id};

/// Kind of remote mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    #[serde(rename = "INSERT")]
    Created,
    #[serde(rename = "UPDATE")]
    Updated,
    #[serde(rename = "DELETE")]
    Deleted,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        })
    }
}

/// One remote mutation notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    pub table: Table,
    /// Row after the change (absent for deletes).
    #[serde(rename = "new", default)]
    pub new_record: Option<Row>,
    /// Row before the change (absent for inserts).
    #[serde(rename = "old", default)]
    pub old_record: Option<Row>,
}

impl ChangeEvent {
    #[must_use]
    pub const fn created(table: Table, row: Row) -> Self {
        Self {
            kind: ChangeKind::Created,
            table,
            new_record: Some(row),
            old_record: None,
        }
    }

    #[must_use]
    pub const fn updated(table: Table, old: Row, new: Row) -> Self {
        Self {
            kind: ChangeKind::Updated,
            table,
            new_record: Some(new),
            old_record: Some(old),
        }
    }

    #[must_use]
    pub const fn deleted(table: Table, old: Row) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            table,
            new_record: None,
            old_record: Some(old),
        }
    }

    /// Id of the affected row, taken from the new record, else the old one.
    #[must_use]
    pub fn record_id(&self) -> Option<&str> {
        self.new_record
            .as_ref()
            .and_then(row_id)
            .or_else(|| self.old_record.as_ref().and_then(row_id))
    }

    /// The `title` column of the affected row, if any.
    #[must_use]
    pub fn record_title(&self) -> Option<&str> {
        self.new_record
            .as_ref()
            .or(self.old_record.as_ref())
            .and_then(|row| row.get("title"))
            .and_then(Value::as_str)
    }
}
