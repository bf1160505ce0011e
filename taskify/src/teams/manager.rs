//! Team manager: the user's teams, the current team and its members.

use std::collections::HashMap;

use parking_lot::Mutex;
use taskify_proto::hub::FailureCode;
use taskify_proto::ids::{MemberId, TeamId, UserId};
use taskify_proto::team::{
    MemberChanges, MemberDraft, Team, TeamChanges, TeamDraft, TeamMember, TeamRole,
};
use taskify_proto::user::Profile;
use taskify_proto::wire::{Query, Table};
use tokio::sync::watch;

use crate::feed::FeedSignal;
use crate::remote::{RemoteError, SyncAdapter, TableClient};
use crate::session::SharedIdentity;
use crate::sync::{Collection, FlushReport, Notice, Notifier, SyncError};

/// Teams with the given ids, by name.
#[must_use]
pub fn team_query<'a>(ids: impl IntoIterator<Item = &'a TeamId>) -> Query {
    Query::new(Table::Teams)
        .is_in("id", ids.into_iter().map(TeamId::as_str))
        .order_by("name", false)
}

/// Members of one team, earliest joiner first.
#[must_use]
pub fn member_query(team: &TeamId) -> Query {
    Query::new(Table::TeamMembers)
        .eq("team_id", team.as_str())
        .order_by("joined_at", false)
}

/// A membership with the member's public profile, when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberView {
    pub member: TeamMember,
    pub profile: Option<Profile>,
}

impl MemberView {
    /// Display name, falling back to the user id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.profile
            .as_ref()
            .map_or_else(|| self.member.user_id.as_str(), |p| p.name.as_str())
    }
}

/// Team operations for the signed-in user.
///
/// Holds two collections: the teams the user belongs to and the members of
/// the current team.
pub struct TeamManager<C> {
    teams: Collection<Team, C>,
    members: Collection<TeamMember, C>,
    profiles: Mutex<HashMap<UserId, Profile>>,
    current: Mutex<Option<TeamId>>,
    identity: SharedIdentity,
}

impl<C: TableClient> TeamManager<C> {
    #[must_use]
    pub fn new(adapter: SyncAdapter<C>, identity: SharedIdentity, notifier: Notifier) -> Self {
        let no_team = TeamId::new("");
        Self {
            teams: Collection::new(adapter.clone(), team_query([]), notifier.clone()),
            members: Collection::new(adapter, member_query(&no_team), notifier),
            profiles: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            identity,
        }
    }

    #[must_use]
    pub const fn teams_collection(&self) -> &Collection<Team, C> {
        &self.teams
    }

    #[must_use]
    pub const fn members_collection(&self) -> &Collection<TeamMember, C> {
        &self.members
    }

    #[must_use]
    pub fn teams(&self) -> Vec<Team> {
        self.teams.list()
    }

    #[must_use]
    pub fn members(&self) -> Vec<TeamMember> {
        self.members.list()
    }

    #[must_use]
    pub fn current_team_id(&self) -> Option<TeamId> {
        self.current.lock().clone()
    }

    #[must_use]
    pub fn current_team(&self) -> Option<Team> {
        self.current_team_id().and_then(|id| self.teams.get(&id))
    }

    #[must_use]
    pub fn watch_teams(&self) -> watch::Receiver<Vec<Team>> {
        self.teams.watch()
    }

    #[must_use]
    pub fn watch_members(&self) -> watch::Receiver<Vec<TeamMember>> {
        self.members.watch()
    }

    /// Members of the current team joined with their profiles.
    #[must_use]
    pub fn members_view(&self) -> Vec<MemberView> {
        let profiles = self.profiles.lock();
        self.members
            .list()
            .into_iter()
            .map(|member| MemberView {
                profile: profiles.get(&member.user_id).cloned(),
                member,
            })
            .collect()
    }

    /// Makes `team` current without fetching. Used after restoring cached
    /// state; a following refresh corrects it.
    pub fn adopt_current(&self, team: Option<TeamId>) {
        if let Some(team) = &team {
            self.members.set_query(member_query(team));
        }
        *self.current.lock() = team;
    }

    // -----------------------------------------------------------------------
    // Teams
    // -----------------------------------------------------------------------

    /// Re-fetches the teams the signed-in user belongs to.
    ///
    /// If the current team is gone (or none is set) the first team becomes
    /// current and its members are loaded.
    ///
    /// # Errors
    ///
    /// [`SyncError::PreconditionFailed`] when nobody is signed in, otherwise
    /// the remote failure.
    pub async fn refresh_teams(&self) -> Result<(), SyncError> {
        let me = self.signed_in()?;
        let memberships = self.teams.adapter().memberships(&me, None).await?;
        self.teams
            .set_query(team_query(memberships.iter().map(|m| &m.team_id)));
        self.teams.refresh().await?;

        let teams = self.teams.list();
        let previous = self.current_team_id();
        let still_there = previous
            .as_ref()
            .is_some_and(|id| teams.iter().any(|t| &t.id == id));
        if !still_there {
            let next = teams.first().map(|t| t.id.clone());
            tracing::debug!(?previous, ?next, "current team changed");
            self.switch_to(next).await?;
        }
        Ok(())
    }

    /// Creates a team with the signed-in user as its admin.
    ///
    /// Team and membership are created one after the other; if the
    /// membership fails the team is removed again.
    ///
    /// # Errors
    ///
    /// [`SyncError::Invalid`] for an empty name, otherwise the remote failure.
    pub async fn create_team(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Team, SyncError> {
        let mut draft = TeamDraft::new(name.trim());
        if let Some(description) = description {
            draft = draft.with_description(description);
        }
        draft.validate()?;
        let me = self.signed_in()?;
        draft.created_by = Some(me.clone());

        let adapter = self.teams.adapter();
        let team = adapter.create::<Team>(&draft).await?;
        let admin = MemberDraft {
            team_id: team.id.clone(),
            user_id: me,
            role: TeamRole::Admin,
        };
        if let Err(e) = adapter.create::<TeamMember>(&admin).await {
            tracing::warn!(team_id = %team.id, error = %e, "admin membership failed, removing team");
            if let Err(cleanup) = adapter.delete::<Team>(&team.id).await {
                tracing::warn!(team_id = %team.id, error = %cleanup, "team cleanup failed");
            }
            return Err(e.into());
        }

        tracing::info!(team_id = %team.id, join_code = %team.join_code, "team created");
        self.refresh_teams_quietly().await;
        self.switch_to(Some(team.id.clone())).await?;
        self.teams.notifier().notify(Notice::info(
            "Team created",
            format!("Share join code {} to invite others.", team.join_code),
        ));
        Ok(team)
    }

    /// # Errors
    ///
    /// [`SyncError::Invalid`] for an empty name, otherwise as
    /// [`Collection::update`].
    pub async fn update_team(&self, id: &TeamId, changes: &TeamChanges) -> Result<Team, SyncError> {
        changes.validate()?;
        self.teams.update(id, changes).await
    }

    /// Deletes a team; the hub removes its memberships.
    ///
    /// # Errors
    ///
    /// As [`Collection::delete`].
    pub async fn delete_team(&self, id: &TeamId) -> Result<(), SyncError> {
        self.teams.delete(id).await?;
        tracing::info!(team_id = %id, "team deleted");
        if self.current_team_id().as_ref() == Some(id) {
            let next = self.teams.list().first().map(|t| t.id.clone());
            self.switch_to(next).await?;
        }
        Ok(())
    }

    /// Joins the team with the given join code.
    ///
    /// Joining a team the user already belongs to succeeds with a notice.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotFound`] for an unknown code, otherwise the remote
    /// failure.
    pub async fn join_team_by_code(&self, code: &str) -> Result<Team, SyncError> {
        let me = self.signed_in()?;
        let adapter = self.teams.adapter();
        let Some(team) = adapter.team_by_join_code(code).await? else {
            return Err(SyncError::NotFound(format!("team with join code {}", code.trim())));
        };

        let existing = adapter.memberships(&me, Some(&team.id)).await?;
        if existing.is_empty() {
            let draft = MemberDraft {
                team_id: team.id.clone(),
                user_id: me,
                role: TeamRole::Member,
            };
            match adapter.create::<TeamMember>(&draft).await {
                Ok(member) => {
                    tracing::info!(team_id = %team.id, member_id = %member.id, "joined team");
                    self.teams.notifier().notify(Notice::info(
                        "Joined team",
                        format!("You are now a member of {}.", team.name),
                    ));
                }
                Err(RemoteError::Rejected {
                    code: FailureCode::Conflict,
                    ..
                }) => self.already_member(&team),
                Err(e) => return Err(e.into()),
            }
        } else {
            self.already_member(&team);
        }

        self.refresh_teams_quietly().await;
        self.switch_to(Some(team.id.clone())).await?;
        Ok(team)
    }

    /// Leaves a team. The team's creator cannot leave it.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotFound`] if the team is not known locally,
    /// [`SyncError::PreconditionFailed`] for the creator.
    pub async fn leave_team(&self, id: &TeamId) -> Result<(), SyncError> {
        let me = self.signed_in()?;
        let team = self
            .teams
            .get(id)
            .ok_or_else(|| SyncError::NotFound(format!("team {id}")))?;
        if team.created_by == me {
            return Err(SyncError::PreconditionFailed(
                "the creator of a team cannot leave it".to_string(),
            ));
        }
        let adapter = self.teams.adapter();
        for membership in adapter.memberships(&me, Some(id)).await? {
            adapter.delete::<TeamMember>(&membership.id).await?;
        }
        tracing::info!(team_id = %id, "left team");
        self.refresh_teams().await
    }

    /// Selects the current team and loads its members. `None` clears it.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotFound`] for a team the user does not belong to.
    pub async fn set_current_team(&self, id: Option<TeamId>) -> Result<(), SyncError> {
        if let Some(id) = &id {
            if self.teams.get(id).is_none() {
                return Err(SyncError::NotFound(format!("team {id}")));
            }
        }
        self.switch_to(id).await
    }

    // -----------------------------------------------------------------------
    // Members
    // -----------------------------------------------------------------------

    /// Re-fetches the current team's members and their profiles.
    ///
    /// # Errors
    ///
    /// Returns the remote failure.
    pub async fn load_members(&self) -> Result<(), SyncError> {
        if self.current_team_id().is_none() {
            self.members.clear();
            return Ok(());
        }
        self.members.refresh().await?;
        let users: Vec<UserId> = self.members.list().into_iter().map(|m| m.user_id).collect();
        match self.teams.adapter().profiles(&users).await {
            Ok(found) => {
                let mut profiles = self.profiles.lock();
                for profile in found {
                    profiles.insert(profile.id.clone(), profile);
                }
            }
            Err(e) => tracing::warn!(error = %e, "profile lookup failed"),
        }
        Ok(())
    }

    /// # Errors
    ///
    /// As [`Collection::update`].
    pub async fn change_member_role(
        &self,
        id: &MemberId,
        role: TeamRole,
    ) -> Result<TeamMember, SyncError> {
        self.members.update(id, &MemberChanges::role(role)).await
    }

    /// # Errors
    ///
    /// As [`Collection::delete`].
    pub async fn remove_member(&self, id: &MemberId) -> Result<(), SyncError> {
        self.members.delete(id).await
    }

    pub async fn flush_pending(&self) -> FlushReport {
        let teams = self.teams.flush_pending().await;
        let members = self.members.flush_pending().await;
        FlushReport {
            applied: teams.applied + members.applied,
            rejected: teams.rejected + members.rejected,
            remaining: teams.remaining + members.remaining,
        }
    }

    /// Re-fetches whatever a feed signal concerns.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure.
    pub async fn handle_signal(&self, signal: &FeedSignal) -> Result<(), SyncError> {
        match signal.table() {
            Table::Teams => self.refresh_teams().await,
            Table::TeamMembers => {
                // A membership change may add or remove whole teams.
                self.refresh_teams().await?;
                self.load_members().await
            }
            Table::Tasks | Table::Profiles => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn signed_in(&self) -> Result<UserId, SyncError> {
        self.identity
            .user_id()
            .ok_or_else(|| SyncError::PreconditionFailed("not signed in".to_string()))
    }

    fn already_member(&self, team: &Team) {
        tracing::debug!(team_id = %team.id, "already a member");
        self.teams.notifier().notify(Notice::info(
            "Already a member",
            format!("You are already a member of {}.", team.name),
        ));
    }

    /// Used after a write that already succeeded: a failed refresh must not
    /// turn it into an error.
    async fn refresh_teams_quietly(&self) {
        if let Err(e) = self.refresh_teams().await {
            tracing::warn!(error = %e, "team refresh failed");
        }
    }

    async fn switch_to(&self, team: Option<TeamId>) -> Result<(), SyncError> {
        self.adopt_current(team);
        self.load_members().await
    }
}
