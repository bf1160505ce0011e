//! Task manager: the task collection plus the operations the UI offers.
//!
//! Every write goes through the optimistic [`Collection`] protocol. Status
//! changes can be held to the workflow with [`TransitionPolicy::Workflow`].

use chrono::{DateTime, Utc};
use taskify_proto::feed::{ChangeEvent, ChangeKind};
use taskify_proto::ids::{TaskId, UserId};
use taskify_proto::task::{Task, TaskChanges, TaskDraft, TaskStatus};
use taskify_proto::wire::{Query, Table};
use tokio::sync::watch;

use super::views::{self, TaskSummary};
use crate::feed::FeedSignal;
use crate::remote::{SyncAdapter, TableClient};
use crate::session::SharedIdentity;
use crate::sync::{Collection, FlushReport, Notice, Notifier, SyncError};

/// Which status changes [`TaskManager`] accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransitionPolicy {
    /// Any status may follow any other.
    #[default]
    Permissive,
    /// Only `todo → in-progress → review → completed` and reopening.
    Workflow,
}

impl TransitionPolicy {
    #[must_use]
    pub fn allows(self, from: TaskStatus, to: TaskStatus) -> bool {
        match self {
            Self::Permissive => true,
            Self::Workflow => from.is_workflow_edge(to),
        }
    }
}

/// Scope used to fetch tasks: everything, oldest first.
#[must_use]
pub fn task_query() -> Query {
    Query::new(Table::Tasks).order_by("created_at", false)
}

/// Task operations for the signed-in user.
pub struct TaskManager<C> {
    tasks: Collection<Task, C>,
    identity: SharedIdentity,
    policy: TransitionPolicy,
}

impl<C: TableClient> TaskManager<C> {
    #[must_use]
    pub fn new(
        adapter: SyncAdapter<C>,
        identity: SharedIdentity,
        notifier: Notifier,
        policy: TransitionPolicy,
    ) -> Self {
        Self {
            tasks: Collection::new(adapter, task_query(), notifier),
            identity,
            policy,
        }
    }

    #[must_use]
    pub const fn collection(&self) -> &Collection<Task, C> {
        &self.tasks
    }

    #[must_use]
    pub const fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Creates a task owned by the signed-in user.
    ///
    /// # Errors
    ///
    /// [`SyncError::Invalid`] for a bad title, [`SyncError::PreconditionFailed`]
    /// when nobody is signed in, otherwise as [`Collection::create`].
    pub async fn create_task(&self, mut draft: TaskDraft) -> Result<Task, SyncError> {
        draft.validate()?;
        let me = self.signed_in()?;
        draft.created_by = Some(me);
        let task = self.tasks.create(&draft).await?;
        tracing::info!(task_id = %task.id, title = %task.title, "task created");
        Ok(task)
    }

    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// [`SyncError::Invalid`] for a bad title, [`SyncError::PreconditionFailed`]
    /// for a status change the policy forbids, otherwise as
    /// [`Collection::update`].
    pub async fn update_task(&self, id: &TaskId, changes: &TaskChanges) -> Result<Task, SyncError> {
        changes.validate()?;
        if let Some(to) = changes.status {
            self.check_transition(id, to)?;
        }
        self.tasks.update(id, changes).await
    }

    /// # Errors
    ///
    /// As [`update_task`](Self::update_task).
    pub async fn set_status(&self, id: &TaskId, status: TaskStatus) -> Result<Task, SyncError> {
        self.update_task(id, &TaskChanges::status(status)).await
    }

    /// Moves a task one step along the workflow.
    ///
    /// # Errors
    ///
    /// [`SyncError::PreconditionFailed`] if the task is already completed.
    pub async fn advance(&self, id: &TaskId) -> Result<Task, SyncError> {
        let current = self.require(id)?;
        let Some(next) = current.status.next() else {
            return Err(SyncError::PreconditionFailed(format!(
                "task {id} is already completed"
            )));
        };
        self.set_status(id, next).await
    }

    /// Moves a completed task back to `todo`.
    ///
    /// # Errors
    ///
    /// [`SyncError::PreconditionFailed`] if the task is not completed.
    pub async fn reopen(&self, id: &TaskId) -> Result<Task, SyncError> {
        let current = self.require(id)?;
        if !current.is_completed() {
            return Err(SyncError::PreconditionFailed(format!(
                "task {id} is not completed"
            )));
        }
        self.set_status(id, TaskStatus::Todo).await
    }

    /// Assigns the task to `user`, or unassigns it with `None`.
    ///
    /// # Errors
    ///
    /// As [`Collection::update`].
    pub async fn assign(&self, id: &TaskId, user: Option<UserId>) -> Result<Task, SyncError> {
        self.tasks.update(id, &TaskChanges::assignee(user)).await
    }

    /// # Errors
    ///
    /// As [`Collection::delete`].
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), SyncError> {
        self.tasks.delete(id).await?;
        tracing::info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns the remote failure; local state is untouched.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.tasks.refresh().await.map(|_| ())
    }

    pub async fn flush_pending(&self) -> FlushReport {
        self.tasks.flush_pending().await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.tasks.get(id)
    }

    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.list()
    }

    #[must_use]
    pub fn tasks_assigned_to(&self, user: &UserId) -> Vec<Task> {
        views::assigned_to(user, &self.tasks.list())
    }

    #[must_use]
    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<Task> {
        views::with_status(status, &self.tasks.list())
    }

    #[must_use]
    pub fn overdue_tasks(&self, now: DateTime<Utc>) -> Vec<Task> {
        views::overdue(now, &self.tasks.list())
    }

    #[must_use]
    pub fn summary(&self, user: &UserId, now: DateTime<Utc>) -> TaskSummary {
        TaskSummary::for_user(user, now, &self.tasks.list())
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Vec<Task>> {
        self.tasks.watch()
    }

    // -----------------------------------------------------------------------
    // Change feed
    // -----------------------------------------------------------------------

    /// Re-fetches after a feed signal and tells the user what happened.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure; the notice is sent regardless, after
    /// the refresh has settled.
    pub async fn handle_signal(&self, signal: &FeedSignal) -> Result<(), SyncError> {
        let result = self.refresh().await;
        if let FeedSignal::Changed(event) = signal {
            if let Some(notice) = change_notice(event) {
                self.tasks.notifier().notify(notice);
            }
        }
        result
    }

    fn signed_in(&self) -> Result<UserId, SyncError> {
        self.identity
            .user_id()
            .ok_or_else(|| SyncError::PreconditionFailed("not signed in".to_string()))
    }

    fn require(&self, id: &TaskId) -> Result<Task, SyncError> {
        self.tasks
            .get(id)
            .ok_or_else(|| SyncError::NotFound(format!("task {id}")))
    }

    fn check_transition(&self, id: &TaskId, to: TaskStatus) -> Result<(), SyncError> {
        // Unknown ids fall through to the collection's NotFound.
        let Some(current) = self.tasks.get(id) else {
            return Ok(());
        };
        if self.policy.allows(current.status, to) {
            Ok(())
        } else {
            Err(SyncError::PreconditionFailed(format!(
                "cannot move task {id} from {} to {to}",
                current.status
            )))
        }
    }
}

fn change_notice(event: &ChangeEvent) -> Option<Notice> {
    let title = event.record_title().unwrap_or("A task");
    match event.kind {
        ChangeKind::Created => Some(Notice::info("New task created", format!("\"{title}\" was added"))),
        ChangeKind::Updated => Some(Notice::info("Task updated", format!("\"{title}\" was updated"))),
        ChangeKind::Deleted => Some(Notice::info("Task deleted", "A task was removed")),
    }
}
