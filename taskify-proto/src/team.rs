//! Teams and team memberships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MemberId, TeamId, UserId};
use crate::patch::Patch;
use crate::task::{DraftError, UnknownValue};

/// Length of a generated join code.
pub const JOIN_CODE_LENGTH: usize = 8;

/// Team-scoped role, distinct from the user's global [`crate::user::UserRole`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Admin,
    #[default]
    Member,
}

impl TeamRole {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl std::fmt::Display for TeamRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TeamRole {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            other => Err(UnknownValue::new("team role", other)),
        }
    }
}

/// A team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Immutable after creation.
    pub created_by: UserId,
    /// Unique across teams; used for self-service joining.
    pub join_code: String,
    pub avatar: Option<String>,
}

impl Team {
    /// Overlays `changes`.
    pub fn apply(&mut self, changes: &TeamChanges) {
        if let Some(name) = &changes.name {
            self.name.clone_from(name);
        }
        changes.description.apply_to(&mut self.description);
        changes.avatar.apply_to(&mut self.avatar);
    }
}

/// Fields for a new team. The remote assigns `id`, `created_at` and the
/// join code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamDraft {
    pub name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub created_by: Option<UserId>,
}

impl TeamDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            avatar: None,
            created_by: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// # Errors
    ///
    /// Returns [`DraftError::NameEmpty`] for a blank name.
    pub fn validate(&self) -> Result<(), DraftError> {
        if self.name.trim().is_empty() {
            return Err(DraftError::NameEmpty);
        }
        Ok(())
    }
}

/// A partial team update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamChanges {
    pub name: Option<String>,
    pub description: Patch<String>,
    pub avatar: Patch<String>,
}

impl TeamChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_keep() && self.avatar.is_keep()
    }

    /// # Errors
    ///
    /// Returns [`DraftError::NameEmpty`] if a blank name is supplied.
    pub fn validate(&self) -> Result<(), DraftError> {
        match &self.name {
            Some(name) if name.trim().is_empty() => Err(DraftError::NameEmpty),
            _ => Ok(()),
        }
    }
}

/// Membership of a user in a team. Unique per `(team_id, user_id)`.
///
/// Display fields (name, email, avatar) are not owned here; they come from
/// the user's [`crate::user::Profile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: MemberId,
    pub team_id: TeamId,
    pub user_id: UserId,
    pub role: TeamRole,
    /// Immutable.
    pub joined_at: DateTime<Utc>,
}

impl TeamMember {
    pub fn apply(&mut self, changes: &MemberChanges) {
        if let Some(role) = changes.role {
            self.role = role;
        }
    }
}

/// Fields for a new membership. The remote assigns `id` and `joined_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDraft {
    pub team_id: TeamId,
    pub user_id: UserId,
    pub role: TeamRole,
}

/// A partial membership update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberChanges {
    pub role: Option<TeamRole>,
}

impl MemberChanges {
    #[must_use]
    pub const fn role(role: TeamRole) -> Self {
        Self { role: Some(role) }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.role.is_none()
    }
}

/// Normalises user input for a join code lookup.
#[must_use]
pub fn normalize_join_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
