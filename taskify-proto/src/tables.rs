//! In-memory table engine with the remote store's write rules.
//!
//! Backs both the hub server and the in-process loopback used by tests.
//! The engine is synchronous and does no I/O; every write returns the
//! [`ChangeEvent`]s it produced so the caller can publish them.
//!
//! Write rules:
//! - ids are assigned on insert (UUID v7), except `profiles`, whose id is the
//!   user id supplied by the caller
//! - `created_at`, `updated_at` (tasks) and `joined_at` (members) are stamped
//!   by the engine; `updated_at` is refreshed on every task update
//! - teams get a unique join code from the configured generator
//! - `(team_id, user_id)` is unique in `team_members`
//! - immutable columns cannot be updated
//! - deleting a team deletes its memberships

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::feed::ChangeEvent;
use crate::hub::{FailureCode, HubReply, HubRequest};
use crate::task::{MAX_TASK_TITLE_LENGTH, TaskPriority, TaskStatus};
use crate::team::{JOIN_CODE_LENGTH, TeamRole};
use crate::wire::{Query, Row, Table, format_timestamp, parse_timestamp, row_id};

/// Why a write was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// The row failed validation.
    #[error("{0}")]
    Validation(String),

    /// A uniqueness constraint was violated.
    #[error("{0}")]
    Conflict(String),

    /// The target row does not exist.
    #[error("{table} row {id} not found")]
    NotFound {
        /// Table that was searched.
        table: Table,
        /// Requested id.
        id: String,
    },
}

impl TableError {
    /// The protocol failure code for this error.
    #[must_use]
    pub const fn code(&self) -> FailureCode {
        match self {
            Self::Validation(_) => FailureCode::Validation,
            Self::Conflict(_) => FailureCode::Conflict,
            Self::NotFound { .. } => FailureCode::NotFound,
        }
    }
}

/// Result of a write: the stored row plus the events to publish.
pub type WriteOutcome = (Row, Vec<ChangeEvent>);

/// Generates a random-looking join code from a fresh UUID.
#[must_use]
pub fn uuid_join_code() -> String {
    let simple = Uuid::now_v7().simple().to_string();
    simple[simple.len() - JOIN_CODE_LENGTH..].to_ascii_uppercase()
}

/// The tables of one remote store.
#[derive(Debug)]
pub struct MemoryTables {
    tables: HashMap<Table, Vec<Row>>,
    join_code: fn() -> String,
}

impl Default for MemoryTables {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTables {
    /// Creates empty tables using [`uuid_join_code`] for join codes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_join_codes(uuid_join_code)
    }

    /// Creates empty tables with a custom join-code generator.
    #[must_use]
    pub fn with_join_codes(join_code: fn() -> String) -> Self {
        Self {
            tables: Table::ALL.into_iter().map(|t| (t, Vec::new())).collect(),
            join_code,
        }
    }

    /// All rows of `table` in insertion order.
    #[must_use]
    pub fn rows(&self, table: Table) -> &[Row] {
        self.tables.get(&table).map_or(&[], Vec::as_slice)
    }

    /// Stores a row verbatim, bypassing validation. Emits no events.
    pub fn seed(&mut self, table: Table, row: Row) {
        self.table_mut(table).push(row);
    }

    /// Runs a select.
    #[must_use]
    pub fn select(&self, query: &Query) -> Vec<Row> {
        query.apply(self.rows(query.table))
    }

    /// Executes a data request (select, insert, update, delete) and maps
    /// the outcome to a protocol reply. Subscription requests are the
    /// caller's concern and answered with a `malformed` failure.
    pub fn execute(&mut self, request: HubRequest) -> (HubReply, Vec<ChangeEvent>) {
        let result = match request {
            HubRequest::Select { query } => {
                return (HubReply::Rows { rows: self.select(&query) }, Vec::new());
            }
            HubRequest::Insert { table, row } => self.insert(table, row),
            HubRequest::Update { table, id, row } => self.update(table, &id, row),
            HubRequest::Delete { table, id } => {
                return match self.delete(table, &id) {
                    Ok(events) => (HubReply::Ack, events),
                    Err(e) => (HubReply::failure(e.code(), e.to_string()), Vec::new()),
                };
            }
            HubRequest::Subscribe { .. } | HubRequest::Unsubscribe { .. } => {
                return (
                    HubReply::failure(FailureCode::Malformed, "not a data request"),
                    Vec::new(),
                );
            }
        };
        match result {
            Ok((row, events)) => (HubReply::Row { row }, events),
            Err(e) => (HubReply::failure(e.code(), e.to_string()), Vec::new()),
        }
    }

    /// Inserts a row, assigning server-side columns.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Validation`] for missing or malformed columns and
    /// [`TableError::Conflict`] for uniqueness violations.
    pub fn insert(&mut self, table: Table, mut row: Row) -> Result<WriteOutcome, TableError> {
        let now = Value::String(format_timestamp(Utc::now()));
        match table {
            Table::Tasks => {
                validate_task(&row, true)?;
                row.entry("description").or_insert_with(|| "".into());
                row.entry("priority")
                    .or_insert_with(|| TaskPriority::default().as_str().into());
                row.entry("status")
                    .or_insert_with(|| TaskStatus::default().as_str().into());
                row.insert("created_at".into(), now.clone());
                row.insert("updated_at".into(), now);
                assign_id(&mut row);
            }
            Table::Teams => {
                require_text(&row, "name")?;
                require_text(&row, "created_by")?;
                let code = self.fresh_join_code();
                row.insert("join_code".into(), code.into());
                row.insert("created_at".into(), now);
                assign_id(&mut row);
            }
            Table::TeamMembers => {
                let team_id = require_text(&row, "team_id")?.to_string();
                let user_id = require_text(&row, "user_id")?.to_string();
                validate_enum::<TeamRole>(&row, "role")?;
                if !self.rows(Table::Teams).iter().any(|t| row_id(t) == Some(&team_id)) {
                    return Err(TableError::Validation(format!("team {team_id} does not exist")));
                }
                if self.find_member(&team_id, &user_id).is_some() {
                    return Err(TableError::Conflict(format!(
                        "user {user_id} is already a member of team {team_id}"
                    )));
                }
                row.entry("role")
                    .or_insert_with(|| TeamRole::default().as_str().into());
                row.insert("joined_at".into(), now);
                assign_id(&mut row);
            }
            Table::Profiles => {
                let id = require_text(&row, "id")?.to_string();
                if self.position(table, &id).is_some() {
                    return Err(TableError::Conflict(format!("profile {id} already exists")));
                }
            }
        }
        self.table_mut(table).push(row.clone());
        let event = ChangeEvent::created(table, row.clone());
        Ok((row, vec![event]))
    }

    /// Updates the supplied columns of one row.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::NotFound`] if the row is absent and
    /// [`TableError::Validation`] for immutable or malformed columns.
    pub fn update(&mut self, table: Table, id: &str, changes: Row) -> Result<WriteOutcome, TableError> {
        let index = self.position(table, id).ok_or_else(|| TableError::NotFound {
            table,
            id: id.to_string(),
        })?;
        if let Some(column) = changes.keys().find(|c| immutable_columns(table).contains(&c.as_str())) {
            return Err(TableError::Validation(format!("column `{column}` is immutable")));
        }
        match table {
            Table::Tasks => validate_task(&changes, false)?,
            Table::Teams => {
                if changes.contains_key("name") {
                    require_text(&changes, "name")?;
                }
            }
            Table::TeamMembers => validate_enum::<TeamRole>(&changes, "role")?,
            Table::Profiles => {}
        }

        let rows = self.table_mut(table);
        let old = rows[index].clone();
        let row = &mut rows[index];
        for (column, value) in changes {
            row.insert(column, value);
        }
        if table == Table::Tasks {
            row.insert("updated_at".into(), format_timestamp(Utc::now()).into());
        }
        let new = row.clone();
        Ok((new.clone(), vec![ChangeEvent::updated(table, old, new)]))
    }

    /// Deletes one row. Deleting a team also deletes its memberships.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::NotFound`] if the row is absent.
    pub fn delete(&mut self, table: Table, id: &str) -> Result<Vec<ChangeEvent>, TableError> {
        let index = self.position(table, id).ok_or_else(|| TableError::NotFound {
            table,
            id: id.to_string(),
        })?;
        let old = self.table_mut(table).remove(index);
        let mut events = vec![ChangeEvent::deleted(table, old)];

        if table == Table::Teams {
            let members = self.table_mut(Table::TeamMembers);
            let (gone, kept): (Vec<Row>, Vec<Row>) = members
                .drain(..)
                .partition(|m| m.get("team_id").and_then(Value::as_str) == Some(id));
            *members = kept;
            events.extend(
                gone.into_iter()
                    .map(|m| ChangeEvent::deleted(Table::TeamMembers, m)),
            );
        }
        Ok(events)
    }

    fn table_mut(&mut self, table: Table) -> &mut Vec<Row> {
        self.tables.entry(table).or_default()
    }

    fn position(&self, table: Table, id: &str) -> Option<usize> {
        self.rows(table).iter().position(|r| row_id(r) == Some(id))
    }

    fn find_member(&self, team_id: &str, user_id: &str) -> Option<&Row> {
        self.rows(Table::TeamMembers).iter().find(|m| {
            m.get("team_id").and_then(Value::as_str) == Some(team_id)
                && m.get("user_id").and_then(Value::as_str) == Some(user_id)
        })
    }

    fn fresh_join_code(&self) -> String {
        loop {
            let code = (self.join_code)();
            let taken = self
                .rows(Table::Teams)
                .iter()
                .any(|t| t.get("join_code").and_then(Value::as_str) == Some(code.as_str()));
            if !taken {
                return code;
            }
        }
    }
}

const fn immutable_columns(table: Table) -> &'static [&'static str] {
    match table {
        Table::Tasks => &["id", "created_by", "created_at", "updated_at"],
        Table::Teams => &["id", "created_by", "created_at", "join_code"],
        Table::TeamMembers => &["id", "team_id", "user_id", "joined_at"],
        Table::Profiles => &["id"],
    }
}

fn assign_id(row: &mut Row) {
    row.insert("id".into(), Uuid::now_v7().to_string().into());
}

fn require_text<'a>(row: &'a Row, column: &'static str) -> Result<&'a str, TableError> {
    match row.get(column) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        _ => Err(TableError::Validation(format!("`{column}` is required"))),
    }
}

fn validate_enum<T: std::str::FromStr>(row: &Row, column: &'static str) -> Result<(), TableError>
where
    T::Err: std::fmt::Display,
{
    match row.get(column) {
        None => Ok(()),
        Some(Value::String(s)) => s
            .parse::<T>()
            .map(|_| ())
            .map_err(|e| TableError::Validation(e.to_string())),
        Some(other) => Err(TableError::Validation(format!(
            "`{column}` must be a string, got {other}"
        ))),
    }
}

fn validate_timestamp(row: &Row, column: &'static str) -> Result<(), TableError> {
    match row.get(column) {
        None => Ok(()),
        Some(Value::String(s)) => parse_timestamp(column, s)
            .map(|_| ())
            .map_err(|e| TableError::Validation(e.to_string())),
        Some(other) => Err(TableError::Validation(format!(
            "`{column}` must be a timestamp, got {other}"
        ))),
    }
}

/// Validates task columns. On insert, `title`, `created_by` and `due_date`
/// are required; on update, only supplied columns are checked.
fn validate_task(row: &Row, inserting: bool) -> Result<(), TableError> {
    if inserting || row.contains_key("title") {
        let title = require_text(row, "title")?;
        if title.chars().count() > MAX_TASK_TITLE_LENGTH {
            return Err(TableError::Validation(format!(
                "`title` exceeds {MAX_TASK_TITLE_LENGTH} characters"
            )));
        }
    }
    if inserting {
        require_text(row, "created_by")?;
        require_text(row, "due_date")?;
    }
    validate_timestamp(row, "due_date")?;
    validate_enum::<TaskPriority>(row, "priority")?;
    validate_enum::<TaskStatus>(row, "status")?;
    Ok(())
}
