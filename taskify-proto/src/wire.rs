//! Row-level wire representation and the translation boundary.
//!
//! The remote store speaks snake_case JSON rows. Every entity type has one
//! explicit mapping function per direction here; nothing outside this module
//! looks at raw column names. Rows coming in are validated and defaulted:
//!
//! - missing `description` becomes `""`
//! - missing `priority` becomes `medium`, missing `status` becomes `todo`
//! - missing `updated_at` becomes `created_at`
//! - unknown enum values and malformed timestamps are errors
//!
//! Timestamps travel as RFC 3339 strings with millisecond precision in UTC,
//! which also makes them sort lexicographically in time order.

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{MemberId, TaskId, TeamId, UserId};
use crate::patch::Patch;
use crate::task::{Task, TaskChanges, TaskDraft, TaskPriority, TaskStatus};
use crate::team::{MemberChanges, MemberDraft, Team, TeamChanges, TeamDraft, TeamMember, TeamRole};
use crate::user::Profile;

/// A single remote row.
pub type Row = serde_json::Map<String, Value>;

/// Remote tables known to the sync core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Tasks,
    TeamMembers,
    Teams,
    Profiles,
}

impl Table {
    pub const ALL: [Self; 4] = [Self::Tasks, Self::TeamMembers, Self::Teams, Self::Profiles];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::TeamMembers => "team_members",
            Self::Teams => "teams",
            Self::Profiles => "profiles",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to translate a remote row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// A required column is absent or null.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A column holds a value of the wrong shape.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Column name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The payload is not a JSON object.
    #[error("row is not a JSON object")]
    NotAnObject,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// A single column filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// Column equals the value. A missing column compares as `null`.
    Eq { column: String, value: Value },
    /// Column equals one of the values.
    In { column: String, values: Vec<Value> },
}

impl Filter {
    fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Eq { column, value } => row.get(column).unwrap_or(&Value::Null) == value,
            Self::In { column, values } => {
                let actual = row.get(column).unwrap_or(&Value::Null);
                values.iter().any(|v| v == actual)
            }
        }
    }
}

/// Ordering applied by a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// A select over one table: conjunctive filters plus optional ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub table: Table,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order: Option<Order>,
}

impl Query {
    /// Selects every row of `table`.
    #[must_use]
    pub const fn new(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order: None,
        }
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn is_in<V: Into<Value>>(
        mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filters.push(Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            descending,
        });
        self
    }

    /// Returns `true` if `row` satisfies every filter.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Filters and orders `rows`. The sort is stable, so rows with equal
    /// keys keep their input order.
    pub fn apply<'a>(&self, rows: impl IntoIterator<Item = &'a Row>) -> Vec<Row> {
        let mut selected: Vec<Row> = rows
            .into_iter()
            .filter(|row| self.matches(row))
            .cloned()
            .collect();
        if let Some(order) = &self.order {
            selected.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                if order.descending { ord.reverse() } else { ord }
            });
        }
        selected
    }
}

/// Total order over JSON scalars used for sorting: null first, then
/// booleans, numbers, strings; anything else compares equal.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    const fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) | Value::Object(_) => 4,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Formats a timestamp the way rows carry it.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 timestamp into UTC.
///
/// # Errors
///
/// Returns [`WireError::InvalidField`] naming `field` if `raw` is malformed.
pub fn parse_timestamp(field: &'static str, raw: &str) -> Result<DateTime<Utc>, WireError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| WireError::InvalidField {
            field,
            reason: e.to_string(),
        })
}

/// Converts a JSON value into a row.
///
/// # Errors
///
/// Returns [`WireError::NotAnObject`] for anything but a JSON object.
pub fn into_row(value: Value) -> Result<Row, WireError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(WireError::NotAnObject),
    }
}

/// Returns the `id` column of a row, if it is a string.
#[must_use]
pub fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn opt_str<'a>(row: &'a Row, field: &'static str) -> Result<Option<&'a str>, WireError> {
    match row.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(WireError::InvalidField {
            field,
            reason: format!("expected string, got {other}"),
        }),
    }
}

fn req_str<'a>(row: &'a Row, field: &'static str) -> Result<&'a str, WireError> {
    opt_str(row, field)?.ok_or(WireError::MissingField(field))
}

/// Optional reference column; an empty string counts as absent.
fn opt_ref(row: &Row, field: &'static str) -> Result<Option<String>, WireError> {
    Ok(opt_str(row, field)?
        .filter(|s| !s.is_empty())
        .map(ToString::to_string))
}

fn req_time(row: &Row, field: &'static str) -> Result<DateTime<Utc>, WireError> {
    parse_timestamp(field, req_str(row, field)?)
}

fn opt_time(row: &Row, field: &'static str) -> Result<Option<DateTime<Utc>>, WireError> {
    opt_str(row, field)?
        .map(|raw| parse_timestamp(field, raw))
        .transpose()
}

fn parse_enum<T: std::str::FromStr<Err = crate::task::UnknownValue>>(
    row: &Row,
    field: &'static str,
) -> Result<Option<T>, WireError> {
    opt_str(row, field)?
        .map(|raw| {
            raw.parse().map_err(|e: crate::task::UnknownValue| WireError::InvalidField {
                field,
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn opt_value(value: Option<&String>) -> Value {
    value.map_or(Value::Null, |v| Value::String(v.clone()))
}

fn put_patch<T: ToString>(row: &mut Row, field: &str, patch: &Patch<T>) {
    match patch {
        Patch::Keep => {}
        Patch::Clear => {
            row.insert(field.to_string(), Value::Null);
        }
        Patch::Set(v) => {
            row.insert(field.to_string(), Value::String(v.to_string()));
        }
    }
}

fn require_creator<T: Clone>(creator: Option<&T>) -> Result<T, WireError> {
    creator.cloned().ok_or(WireError::MissingField("created_by"))
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Translates a `tasks` row.
///
/// # Errors
///
/// Returns [`WireError`] if a required column is missing or malformed.
pub fn task_from_row(row: &Row) -> Result<Task, WireError> {
    let created_at = req_time(row, "created_at")?;
    let updated_at = opt_time(row, "updated_at")?.unwrap_or(created_at);
    Ok(Task {
        id: TaskId::new(req_str(row, "id")?),
        title: req_str(row, "title")?.to_string(),
        description: opt_str(row, "description")?.unwrap_or_default().to_string(),
        priority: parse_enum::<TaskPriority>(row, "priority")?.unwrap_or_default(),
        status: parse_enum::<TaskStatus>(row, "status")?.unwrap_or_default(),
        due_date: req_time(row, "due_date")?,
        created_at,
        updated_at: updated_at.max(created_at),
        created_by: UserId::new(req_str(row, "created_by")?),
        assigned_to: opt_ref(row, "assigned_to")?.map(UserId::new),
        team_id: opt_ref(row, "team_id")?.map(TeamId::new),
    })
}

/// Full row for a task, as the remote stores it.
#[must_use]
pub fn task_to_row(task: &Task) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), task.id.as_str().into());
    row.insert("title".into(), task.title.clone().into());
    row.insert("description".into(), task.description.clone().into());
    row.insert("priority".into(), task.priority.as_str().into());
    row.insert("status".into(), task.status.as_str().into());
    row.insert("due_date".into(), format_timestamp(task.due_date).into());
    row.insert("created_at".into(), format_timestamp(task.created_at).into());
    row.insert("updated_at".into(), format_timestamp(task.updated_at).into());
    row.insert("created_by".into(), task.created_by.as_str().into());
    row.insert(
        "assigned_to".into(),
        task.assigned_to
            .as_ref()
            .map_or(Value::Null, |u| u.as_str().into()),
    );
    row.insert(
        "team_id".into(),
        task.team_id.as_ref().map_or(Value::Null, |t| t.as_str().into()),
    );
    row
}

/// Insert payload for a task draft.
///
/// # Errors
///
/// Returns [`WireError::MissingField`] if the draft has no `created_by`.
pub fn task_draft_row(draft: &TaskDraft) -> Result<Row, WireError> {
    let created_by = require_creator(draft.created_by.as_ref())?;
    let mut row = Row::new();
    row.insert("title".into(), draft.title.clone().into());
    row.insert("description".into(), draft.description.clone().into());
    row.insert("priority".into(), draft.priority.as_str().into());
    row.insert("status".into(), draft.status.as_str().into());
    row.insert("due_date".into(), format_timestamp(draft.due_date).into());
    row.insert("created_by".into(), created_by.as_str().into());
    if let Some(user) = &draft.assigned_to {
        row.insert("assigned_to".into(), user.as_str().into());
    }
    if let Some(team) = &draft.team_id {
        row.insert("team_id".into(), team.as_str().into());
    }
    Ok(row)
}

/// Update payload carrying only the supplied fields. Cleared fields are
/// sent as `null`.
#[must_use]
pub fn task_changes_row(changes: &TaskChanges) -> Row {
    let mut row = Row::new();
    if let Some(title) = &changes.title {
        row.insert("title".into(), title.clone().into());
    }
    if let Some(description) = &changes.description {
        row.insert("description".into(), description.clone().into());
    }
    if let Some(priority) = changes.priority {
        row.insert("priority".into(), priority.as_str().into());
    }
    if let Some(status) = changes.status {
        row.insert("status".into(), status.as_str().into());
    }
    if let Some(due_date) = changes.due_date {
        row.insert("due_date".into(), format_timestamp(due_date).into());
    }
    put_patch(&mut row, "assigned_to", &changes.assigned_to);
    put_patch(&mut row, "team_id", &changes.team_id);
    row
}

// ---------------------------------------------------------------------------
// Teams
// ---------------------------------------------------------------------------

/// Translates a `teams` row.
///
/// # Errors
///
/// Returns [`WireError`] if a required column is missing or malformed.
pub fn team_from_row(row: &Row) -> Result<Team, WireError> {
    Ok(Team {
        id: TeamId::new(req_str(row, "id")?),
        name: req_str(row, "name")?.to_string(),
        description: opt_ref(row, "description")?,
        created_at: req_time(row, "created_at")?,
        created_by: UserId::new(req_str(row, "created_by")?),
        join_code: req_str(row, "join_code")?.to_string(),
        avatar: opt_ref(row, "avatar")?,
    })
}

#[must_use]
pub fn team_to_row(team: &Team) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), team.id.as_str().into());
    row.insert("name".into(), team.name.clone().into());
    row.insert("description".into(), opt_value(team.description.as_ref()));
    row.insert("created_at".into(), format_timestamp(team.created_at).into());
    row.insert("created_by".into(), team.created_by.as_str().into());
    row.insert("join_code".into(), team.join_code.clone().into());
    row.insert("avatar".into(), opt_value(team.avatar.as_ref()));
    row
}

/// Insert payload for a team draft.
///
/// # Errors
///
/// Returns [`WireError::MissingField`] if the draft has no `created_by`.
pub fn team_draft_row(draft: &TeamDraft) -> Result<Row, WireError> {
    let created_by = require_creator(draft.created_by.as_ref())?;
    let mut row = Row::new();
    row.insert("name".into(), draft.name.clone().into());
    row.insert("description".into(), opt_value(draft.description.as_ref()));
    row.insert("avatar".into(), opt_value(draft.avatar.as_ref()));
    row.insert("created_by".into(), created_by.as_str().into());
    Ok(row)
}

#[must_use]
pub fn team_changes_row(changes: &TeamChanges) -> Row {
    let mut row = Row::new();
    if let Some(name) = &changes.name {
        row.insert("name".into(), name.clone().into());
    }
    put_patch(&mut row, "description", &changes.description);
    put_patch(&mut row, "avatar", &changes.avatar);
    row
}

// ---------------------------------------------------------------------------
// Team members
// ---------------------------------------------------------------------------

/// Translates a `team_members` row.
///
/// # Errors
///
/// Returns [`WireError`] if a required column is missing or malformed.
pub fn member_from_row(row: &Row) -> Result<TeamMember, WireError> {
    Ok(TeamMember {
        id: MemberId::new(req_str(row, "id")?),
        team_id: TeamId::new(req_str(row, "team_id")?),
        user_id: UserId::new(req_str(row, "user_id")?),
        role: parse_enum::<TeamRole>(row, "role")?.unwrap_or_default(),
        joined_at: req_time(row, "joined_at")?,
    })
}

#[must_use]
pub fn member_to_row(member: &TeamMember) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), member.id.as_str().into());
    row.insert("team_id".into(), member.team_id.as_str().into());
    row.insert("user_id".into(), member.user_id.as_str().into());
    row.insert("role".into(), member.role.as_str().into());
    row.insert("joined_at".into(), format_timestamp(member.joined_at).into());
    row
}

#[must_use]
pub fn member_draft_row(draft: &MemberDraft) -> Row {
    let mut row = Row::new();
    row.insert("team_id".into(), draft.team_id.as_str().into());
    row.insert("user_id".into(), draft.user_id.as_str().into());
    row.insert("role".into(), draft.role.as_str().into());
    row
}

#[must_use]
pub fn member_changes_row(changes: &MemberChanges) -> Row {
    let mut row = Row::new();
    if let Some(role) = changes.role {
        row.insert("role".into(), role.as_str().into());
    }
    row
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Translates a `profiles` row. Missing display fields default to empty.
///
/// # Errors
///
/// Returns [`WireError`] if `id` is missing or a column is malformed.
pub fn profile_from_row(row: &Row) -> Result<Profile, WireError> {
    Ok(Profile {
        id: UserId::new(req_str(row, "id")?),
        name: opt_str(row, "name")?.unwrap_or_default().to_string(),
        email: opt_str(row, "email")?.unwrap_or_default().to_string(),
        avatar: opt_ref(row, "avatar")?,
    })
}

#[must_use]
pub fn profile_to_row(profile: &Profile) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), profile.id.as_str().into());
    row.insert("name".into(), profile.name.clone().into());
    row.insert("email".into(), profile.email.clone().into());
    row.insert("avatar".into(), opt_value(profile.avatar.as_ref()));
    row
}
