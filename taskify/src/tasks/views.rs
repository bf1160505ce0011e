//! Derived task views.
//!
//! Pure functions of a task slice and an injected `now`. Nothing here
//! reads the clock or touches a store, so every view is trivially testable
//! and can be recomputed on every store change.

use chrono::{DateTime, Duration, Utc};
use taskify_proto::ids::UserId;
use taskify_proto::task::{Task, TaskPriority, TaskStatus};

/// Tasks past their due date that are not completed. `due_date == now` is
/// not overdue.
#[must_use]
pub fn overdue(now: DateTime<Utc>, tasks: &[Task]) -> Vec<Task> {
    tasks.iter().filter(|t| t.is_overdue(now)).cloned().collect()
}

/// Open tasks due in `[now, window_end]`, bounds inclusive.
#[must_use]
pub fn due_within(now: DateTime<Utc>, window_end: DateTime<Utc>, tasks: &[Task]) -> Vec<Task> {
    tasks
        .iter()
        .filter(|t| !t.is_completed() && t.due_date >= now && t.due_date <= window_end)
        .cloned()
        .collect()
}

/// Open tasks due on the same UTC calendar day as `now`, whether or not
/// the due time has passed.
#[must_use]
pub fn due_today(now: DateTime<Utc>, tasks: &[Task]) -> Vec<Task> {
    let today = now.date_naive();
    tasks
        .iter()
        .filter(|t| !t.is_completed() && t.due_date.date_naive() == today)
        .cloned()
        .collect()
}

/// Open tasks due within the next `days` days, soonest first.
#[must_use]
pub fn due_soon(now: DateTime<Utc>, days: u32, tasks: &[Task]) -> Vec<Task> {
    by_due_date(&due_within(now, now + Duration::days(i64::from(days)), tasks))
}

/// Percentage of completed tasks, rounded half up. `0` for no tasks.
#[must_use]
pub fn completion_rate(tasks: &[Task]) -> u8 {
    let total = tasks.len();
    if total == 0 {
        return 0;
    }
    let completed = tasks.iter().filter(|t| t.is_completed()).count();
    // round(100 * c / t) without floats
    let rate = (200 * completed + total) / (2 * total);
    u8::try_from(rate).unwrap_or(100)
}

/// Most recently updated first. Ties keep their input order.
#[must_use]
pub fn by_recency(tasks: &[Task]) -> Vec<Task> {
    let mut sorted = tasks.to_vec();
    sorted.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    sorted
}

/// The `limit` most recently updated tasks.
#[must_use]
pub fn recent(limit: usize, tasks: &[Task]) -> Vec<Task> {
    let mut sorted = by_recency(tasks);
    sorted.truncate(limit);
    sorted
}

/// Soonest due first. Ties keep their input order.
#[must_use]
pub fn by_due_date(tasks: &[Task]) -> Vec<Task> {
    let mut sorted = tasks.to_vec();
    sorted.sort_by_key(|t| t.due_date);
    sorted
}

#[must_use]
pub fn assigned_to(user: &UserId, tasks: &[Task]) -> Vec<Task> {
    tasks
        .iter()
        .filter(|t| t.assigned_to.as_ref() == Some(user))
        .cloned()
        .collect()
}

#[must_use]
pub fn created_by(user: &UserId, tasks: &[Task]) -> Vec<Task> {
    tasks
        .iter()
        .filter(|t| &t.created_by == user)
        .cloned()
        .collect()
}

#[must_use]
pub fn with_status(status: TaskStatus, tasks: &[Task]) -> Vec<Task> {
    tasks
        .iter()
        .filter(|t| t.status == status)
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Task list filter. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Case-insensitive substring of title or description.
    pub search: String,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
}

impl TaskFilter {
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        if self.status.is_some_and(|s| s != task.status) {
            return false;
        }
        if self.priority.is_some_and(|p| p != task.priority) {
            return false;
        }
        let needle = self.search.trim().to_lowercase();
        needle.is_empty()
            || task.title.to_lowercase().contains(&needle)
            || task.description.to_lowercase().contains(&needle)
    }

    #[must_use]
    pub fn apply(&self, tasks: &[Task]) -> Vec<Task> {
        tasks.iter().filter(|t| self.matches(t)).cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Dashboard counters for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSummary {
    pub assigned: usize,
    pub due_today: usize,
    pub overdue: usize,
    pub completed: usize,
    /// Completion rate of the assigned tasks, in percent.
    pub completion_rate: u8,
}

impl TaskSummary {
    /// Counters over the tasks assigned to `user`.
    #[must_use]
    pub fn for_user(user: &UserId, now: DateTime<Utc>, tasks: &[Task]) -> Self {
        let mine = assigned_to(user, tasks);
        Self {
            assigned: mine.len(),
            due_today: due_today(now, &mine).len(),
            overdue: overdue(now, &mine).len(),
            completed: mine.iter().filter(|t| t.is_completed()).count(),
            completion_rate: completion_rate(&mine),
        }
    }
}
