//! Remote sync adapter and the table collaborator it talks to.
//!
//! [`TableClient`] is the row-level seam to the remote store. Concrete
//! implementations:
//! - [`loopback::LoopbackTables`]: in-process tables for tests and demos
//! - [`hub::HubClient`]: WebSocket connection to a `taskify-hub` server
//!
//! [`SyncAdapter`] sits on top and owns the translation between rows and
//! entities: it never hands a raw row to the rest of the crate.

pub mod hub;
pub mod loopback;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use taskify_proto::hub::FailureCode;
use taskify_proto::ids::{MemberId, RecordId, TaskId, TeamId, UserId};
use taskify_proto::task::{Task, TaskChanges, TaskDraft};
use taskify_proto::team::{
    MemberChanges, MemberDraft, Team, TeamChanges, TeamDraft, TeamMember, normalize_join_code,
};
use taskify_proto::user::Profile;
use taskify_proto::wire::{self, Query, Row, Table, WireError};

use crate::store::Entity;

/// Failures reported by the remote collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The remote could not be reached (transport failure, timeout,
    /// connection closed).
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The remote refused the request.
    #[error("remote rejected the request ({code}): {message}")]
    Rejected {
        /// Failure category.
        code: FailureCode,
        /// Human-readable reason.
        message: String,
    },
}

impl RemoteError {
    pub fn rejected(code: FailureCode, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Returns `true` for a `Rejected` reply with [`FailureCode::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                code: FailureCode::NotFound,
                ..
            }
        )
    }
}

impl From<WireError> for RemoteError {
    fn from(e: WireError) -> Self {
        Self::rejected(FailureCode::Malformed, e.to_string())
    }
}

/// Row-level access to the remote tabular store.
///
/// Implementations carry rows verbatim; translation to entities happens in
/// [`SyncAdapter`].
pub trait TableClient: Send + Sync {
    /// Select rows matching `query`, in the remote's own order.
    fn select(
        &self,
        query: &Query,
    ) -> impl std::future::Future<Output = Result<Vec<Row>, RemoteError>> + Send;

    /// Insert a row and return it as stored (with server-assigned columns).
    fn insert(
        &self,
        table: Table,
        row: Row,
    ) -> impl std::future::Future<Output = Result<Row, RemoteError>> + Send;

    /// Update the supplied columns of the row with `id`.
    fn update(
        &self,
        table: Table,
        id: &str,
        row: Row,
    ) -> impl std::future::Future<Output = Result<Row, RemoteError>> + Send;

    /// Delete the row with `id`.
    fn delete(
        &self,
        table: Table,
        id: &str,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;
}

/// An entity type with a remote table and a translation to and from rows.
pub trait Resource: Entity {
    /// Fields supplied on create.
    type Draft: Clone + std::fmt::Debug + Send + Sync + 'static;
    /// Partial update payload.
    type Changes: Clone + std::fmt::Debug + Send + Sync + 'static;

    /// Remote table holding this resource.
    const TABLE: Table;
    /// Lower-case noun used in notices and logs.
    const NOUN: &'static str;

    fn from_row(row: &Row) -> Result<Self, WireError>;
    fn draft_row(draft: &Self::Draft) -> Result<Row, WireError>;
    fn changes_row(changes: &Self::Changes) -> Row;
    fn changes_is_empty(changes: &Self::Changes) -> bool;

    /// Overlays `changes` for an optimistic write.
    fn apply_changes(&mut self, changes: &Self::Changes, now: DateTime<Utc>);

    /// Builds the local stand-in shown while a create is in flight.
    fn provisional(draft: &Self::Draft, now: DateTime<Utc>) -> Result<Self, WireError>;
}

impl Resource for Task {
    type Draft = TaskDraft;
    type Changes = TaskChanges;

    const TABLE: Table = Table::Tasks;
    const NOUN: &'static str = "task";

    fn from_row(row: &Row) -> Result<Self, WireError> {
        wire::task_from_row(row)
    }

    fn draft_row(draft: &TaskDraft) -> Result<Row, WireError> {
        wire::task_draft_row(draft)
    }

    fn changes_row(changes: &TaskChanges) -> Row {
        wire::task_changes_row(changes)
    }

    fn changes_is_empty(changes: &TaskChanges) -> bool {
        changes.is_empty()
    }

    fn apply_changes(&mut self, changes: &TaskChanges, now: DateTime<Utc>) {
        self.apply(changes, now);
    }

    fn provisional(draft: &TaskDraft, now: DateTime<Utc>) -> Result<Self, WireError> {
        let created_by = draft
            .created_by
            .clone()
            .ok_or(WireError::MissingField("created_by"))?;
        Ok(Self {
            id: TaskId::provisional(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            priority: draft.priority,
            status: draft.status,
            due_date: draft.due_date,
            created_at: now,
            updated_at: now,
            created_by,
            assigned_to: draft.assigned_to.clone(),
            team_id: draft.team_id.clone(),
        })
    }
}

impl Resource for Team {
    type Draft = TeamDraft;
    type Changes = TeamChanges;

    const TABLE: Table = Table::Teams;
    const NOUN: &'static str = "team";

    fn from_row(row: &Row) -> Result<Self, WireError> {
        wire::team_from_row(row)
    }

    fn draft_row(draft: &TeamDraft) -> Result<Row, WireError> {
        wire::team_draft_row(draft)
    }

    fn changes_row(changes: &TeamChanges) -> Row {
        wire::team_changes_row(changes)
    }

    fn changes_is_empty(changes: &TeamChanges) -> bool {
        changes.is_empty()
    }

    fn apply_changes(&mut self, changes: &TeamChanges, _now: DateTime<Utc>) {
        self.apply(changes);
    }

    fn provisional(draft: &TeamDraft, now: DateTime<Utc>) -> Result<Self, WireError> {
        let created_by = draft
            .created_by
            .clone()
            .ok_or(WireError::MissingField("created_by"))?;
        Ok(Self {
            id: TeamId::provisional(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            created_at: now,
            created_by,
            join_code: String::new(),
            avatar: draft.avatar.clone(),
        })
    }
}

impl Resource for TeamMember {
    type Draft = MemberDraft;
    type Changes = MemberChanges;

    const TABLE: Table = Table::TeamMembers;
    const NOUN: &'static str = "team member";

    fn from_row(row: &Row) -> Result<Self, WireError> {
        wire::member_from_row(row)
    }

    fn draft_row(draft: &MemberDraft) -> Result<Row, WireError> {
        Ok(wire::member_draft_row(draft))
    }

    fn changes_row(changes: &MemberChanges) -> Row {
        wire::member_changes_row(changes)
    }

    fn changes_is_empty(changes: &MemberChanges) -> bool {
        changes.is_empty()
    }

    fn apply_changes(&mut self, changes: &MemberChanges, _now: DateTime<Utc>) {
        self.apply(changes);
    }

    fn provisional(draft: &MemberDraft, now: DateTime<Utc>) -> Result<Self, WireError> {
        Ok(Self {
            id: MemberId::provisional(),
            team_id: draft.team_id.clone(),
            user_id: draft.user_id.clone(),
            role: draft.role,
            joined_at: now,
        })
    }
}

/// Translating CRUD front-end over a [`TableClient`].
pub struct SyncAdapter<C> {
    client: Arc<C>,
}

impl<C> Clone for SyncAdapter<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl<C: TableClient> SyncAdapter<C> {
    pub const fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    #[must_use]
    pub const fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Fetches every `R` matching `query`, in the remote's order.
    ///
    /// Rows that fail translation are logged and skipped so one bad row
    /// never hides the rest of the collection.
    ///
    /// # Errors
    ///
    /// Propagates [`RemoteError`] from the collaborator.
    pub async fn fetch_all<R: Resource>(&self, query: &Query) -> Result<Vec<R>, RemoteError> {
        debug_assert_eq!(query.table, R::TABLE, "query targets the wrong table");
        let rows = self.client.select(query).await?;
        let total = rows.len();
        let entities: Vec<R> = rows
            .iter()
            .filter_map(|row| match R::from_row(row) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    tracing::warn!(
                        table = %R::TABLE,
                        id = wire::row_id(row).unwrap_or("?"),
                        error = %e,
                        "skipping malformed row"
                    );
                    None
                }
            })
            .collect();
        tracing::debug!(table = %R::TABLE, rows = total, kept = entities.len(), "fetched");
        Ok(entities)
    }

    /// Creates an `R` remotely and returns the stored entity.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Rejected`] without contacting the remote if the
    /// draft cannot be translated (e.g. no `created_by`), or if the remote's
    /// reply cannot be translated. Otherwise propagates collaborator errors.
    pub async fn create<R: Resource>(&self, draft: &R::Draft) -> Result<R, RemoteError> {
        let row = R::draft_row(draft)
            .map_err(|e| RemoteError::rejected(FailureCode::Validation, e.to_string()))?;
        let stored = self.client.insert(R::TABLE, row).await?;
        Ok(R::from_row(&stored)?)
    }

    /// Sends only the supplied fields of `changes`. Empty changes are not
    /// sent.
    ///
    /// # Errors
    ///
    /// Propagates [`RemoteError`] from the collaborator.
    pub async fn update<R: Resource>(
        &self,
        id: &R::Id,
        changes: &R::Changes,
    ) -> Result<(), RemoteError> {
        if R::changes_is_empty(changes) {
            return Ok(());
        }
        self.client
            .update(R::TABLE, id.as_str(), R::changes_row(changes))
            .await?;
        Ok(())
    }

    /// Deletes an `R`. Deleting a row that is already gone succeeds.
    ///
    /// # Errors
    ///
    /// Propagates [`RemoteError`] other than "not found".
    pub async fn delete<R: Resource>(&self, id: &R::Id) -> Result<(), RemoteError> {
        match self.client.delete(R::TABLE, id.as_str()).await {
            Err(e) if e.is_not_found() => {
                tracing::debug!(table = %R::TABLE, id = %id, "delete of missing row");
                Ok(())
            }
            other => other,
        }
    }

    /// Profiles for the given users. Unknown users are simply absent.
    ///
    /// # Errors
    ///
    /// Propagates [`RemoteError`] from the collaborator.
    pub async fn profiles(&self, users: &[UserId]) -> Result<Vec<Profile>, RemoteError> {
        if users.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::new(Table::Profiles).is_in("id", users.iter().map(UserId::as_str));
        let rows = self.client.select(&query).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                wire::profile_from_row(row)
                    .inspect_err(|e| tracing::warn!(error = %e, "skipping malformed profile"))
                    .ok()
            })
            .collect())
    }

    /// Creates the profile row for `profile.id` if none exists yet.
    ///
    /// # Errors
    ///
    /// Propagates [`RemoteError`] from the collaborator.
    pub async fn ensure_profile(&self, profile: &Profile) -> Result<(), RemoteError> {
        if !self.profiles(std::slice::from_ref(&profile.id)).await?.is_empty() {
            return Ok(());
        }
        match self
            .client
            .insert(Table::Profiles, wire::profile_to_row(profile))
            .await
        {
            Err(RemoteError::Rejected {
                code: FailureCode::Conflict,
                ..
            })
            | Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Looks up a team by join code (case-insensitive).
    ///
    /// # Errors
    ///
    /// Propagates [`RemoteError`] from the collaborator.
    pub async fn team_by_join_code(&self, code: &str) -> Result<Option<Team>, RemoteError> {
        let query = Query::new(Table::Teams).eq("join_code", normalize_join_code(code));
        Ok(self.fetch_all::<Team>(&query).await?.into_iter().next())
    }

    /// Memberships of one user, optionally restricted to a team.
    ///
    /// # Errors
    ///
    /// Propagates [`RemoteError`] from the collaborator.
    pub async fn memberships(
        &self,
        user: &UserId,
        team: Option<&TeamId>,
    ) -> Result<Vec<TeamMember>, RemoteError> {
        let mut query = Query::new(Table::TeamMembers).eq("user_id", user.as_str());
        if let Some(team) = team {
            query = query.eq("team_id", team.as_str());
        }
        self.fetch_all(&query).await
    }
}
