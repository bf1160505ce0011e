//! Frame protocol between Taskify clients and the hub.
//!
//! Every client frame carries a `request_id`; the hub answers each with
//! exactly one [`ServerFrame::Reply`] holding the same id. Change
//! notifications for subscribed tables arrive as [`ServerFrame::Change`]
//! frames interleaved with replies. Frames are JSON text.

use serde::{Deserialize, Serialize};

use crate::feed::ChangeEvent;
use crate::wire::{Query, Row, Table};

/// A request from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HubRequest {
    /// Select rows matching a query.
    Select { query: Query },
    /// Insert a row; the hub assigns id and timestamps.
    Insert { table: Table, row: Row },
    /// Update the supplied columns of one row.
    Update { table: Table, id: String, row: Row },
    /// Delete one row.
    Delete { table: Table, id: String },
    /// Start receiving change events for a table.
    Subscribe { table: Table },
    /// Stop receiving change events for a table.
    Unsubscribe { table: Table },
}

/// Envelope for a client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub request_id: u64,
    pub request: HubRequest,
}

/// Why the hub refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// The row failed validation.
    Validation,
    /// A uniqueness constraint was violated.
    Conflict,
    /// The target row does not exist.
    NotFound,
    /// The caller may not perform this operation.
    Forbidden,
    /// The request or reply could not be decoded.
    Malformed,
    /// The hub failed internally.
    Internal,
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Malformed => "malformed",
            Self::Internal => "internal",
        })
    }
}

/// Outcome of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HubReply {
    Rows { rows: Vec<Row> },
    Row { row: Row },
    Ack,
    Subscribed { table: Table },
    Unsubscribed { table: Table },
    Failure { code: FailureCode, message: String },
}

impl HubReply {
    pub fn failure(code: FailureCode, message: impl Into<String>) -> Self {
        Self::Failure {
            code,
            message: message.into(),
        }
    }
}

/// A frame sent by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Reply { request_id: u64, reply: HubReply },
    Change { event: ChangeEvent },
}
