//! Task records, drafts, and partial updates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, TeamId, UserId};
use crate::patch::Patch;

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// A string did not name a known enum value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownValue {
    /// The kind of value being parsed (`"status"`, `"priority"`, ...).
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl UnknownValue {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Client-side validation failures for drafts and changes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    /// Task title cannot be empty.
    #[error("task title cannot be empty")]
    TitleEmpty,
    /// Task title exceeds [`MAX_TASK_TITLE_LENGTH`].
    #[error("task title too long (max 256 characters)")]
    TitleTooLong,
    /// Team name cannot be empty.
    #[error("team name cannot be empty")]
    NameEmpty,
}

/// Priority of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    /// All priorities, lowest first.
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownValue::new("priority", s))
    }
}

/// Workflow status of a task.
///
/// The suggested workflow is `todo -> in-progress -> review -> completed`,
/// with `completed -> todo` to reopen. Stores accept any status write; the
/// workflow is a suggestion offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Review,
    Completed,
}

impl TaskStatus {
    /// All statuses in workflow order.
    pub const ALL: [Self; 4] = [Self::Todo, Self::InProgress, Self::Review, Self::Completed];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Review => "review",
            Self::Completed => "completed",
        }
    }

    /// The next status along the workflow, or `None` once completed.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Todo => Some(Self::InProgress),
            Self::InProgress => Some(Self::Review),
            Self::Review => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// The single action offered for a task in this status, as
    /// `(label, target status)`.
    #[must_use]
    pub const fn action(self) -> (&'static str, Self) {
        match self {
            Self::Todo => ("Start", Self::InProgress),
            Self::InProgress => ("Review", Self::Review),
            Self::Review => ("Complete", Self::Completed),
            Self::Completed => ("Reopen", Self::Todo),
        }
    }

    /// Returns `true` if `self -> to` is an edge of the suggested workflow.
    ///
    /// Writing the current status again counts as an edge.
    #[must_use]
    pub fn is_workflow_edge(self, to: Self) -> bool {
        self == to || self.action().1 == to
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownValue::new("status", s))
    }
}

/// A task as held by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub due_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Set on every mutation and only on mutation. Never earlier than
    /// `created_at`.
    pub updated_at: DateTime<Utc>,
    /// Immutable after creation.
    pub created_by: UserId,
    pub assigned_to: Option<UserId>,
    pub team_id: Option<TeamId>,
}

impl Task {
    /// Overlays `changes` and stamps `updated_at`.
    ///
    /// The new `updated_at` is `max(now, previous + 1ms)`, so it strictly
    /// increases even when the local clock lags the remote one.
    pub fn apply(&mut self, changes: &TaskChanges, now: DateTime<Utc>) {
        if let Some(title) = &changes.title {
            self.title.clone_from(title);
        }
        if let Some(description) = &changes.description {
            self.description.clone_from(description);
        }
        if let Some(priority) = changes.priority {
            self.priority = priority;
        }
        if let Some(status) = changes.status {
            self.status = status;
        }
        if let Some(due_date) = changes.due_date {
            self.due_date = due_date;
        }
        changes.assigned_to.apply_to(&mut self.assigned_to);
        changes.team_id.apply_to(&mut self.team_id);
        self.updated_at = now.max(self.updated_at + Duration::milliseconds(1));
    }

    /// Returns `true` if the task is completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Overdue means due strictly before `now` and not completed.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_completed() && self.due_date < now
    }
}

/// Fields for a new task. The remote assigns `id`, `created_at` and
/// `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub due_date: DateTime<Utc>,
    pub assigned_to: Option<UserId>,
    pub team_id: Option<TeamId>,
    /// Filled from the signed-in identity; a draft without it never
    /// reaches the remote.
    pub created_by: Option<UserId>,
}

impl TaskDraft {
    /// Starts a draft with default priority (medium) and status (todo).
    pub fn new(title: impl Into<String>, due_date: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            priority: TaskPriority::default(),
            status: TaskStatus::default(),
            due_date,
            assigned_to: None,
            team_id: None,
            created_by: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn assigned_to(mut self, user: UserId) -> Self {
        self.assigned_to = Some(user);
        self
    }

    #[must_use]
    pub fn in_team(mut self, team: TeamId) -> Self {
        self.team_id = Some(team);
        self
    }

    /// Checks the title constraints.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::TitleEmpty`] or [`DraftError::TitleTooLong`].
    pub fn validate(&self) -> Result<(), DraftError> {
        validate_title(&self.title)
    }
}

/// A partial task update.
///
/// Required fields use `Option` (absent = unchanged); clearable fields use
/// [`Patch`] so "unassign" and "not provided" stay distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub status: Option<TaskStatus>,
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_to: Patch<UserId>,
    pub team_id: Patch<TeamId>,
}

impl TaskChanges {
    /// A change of status only.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// A change of assignee only; `None` unassigns.
    #[must_use]
    pub fn assignee(user: Option<UserId>) -> Self {
        Self {
            assigned_to: Patch::from_option(user),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub const fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Returns `true` if nothing would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.status.is_none()
            && self.due_date.is_none()
            && self.assigned_to.is_keep()
            && self.team_id.is_keep()
    }

    /// Checks the title constraints if a new title is supplied.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::TitleEmpty`] or [`DraftError::TitleTooLong`].
    pub fn validate(&self) -> Result<(), DraftError> {
        self.title.as_deref().map_or(Ok(()), validate_title)
    }
}

fn validate_title(title: &str) -> Result<(), DraftError> {
    if title.trim().is_empty() {
        return Err(DraftError::TitleEmpty);
    }
    if title.chars().count() > MAX_TASK_TITLE_LENGTH {
        return Err(DraftError::TitleTooLong);
    }
    Ok(())
}
