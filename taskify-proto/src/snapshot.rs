//! Local warm-start snapshot of one user's cached collections.
//!
//! The snapshot is never authoritative: it only seeds empty stores before
//! the first successful fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::ids::UserId;
use crate::task::Task;
use crate::team::{Team, TeamMember};

/// Current snapshot format version. Snapshots with another version are
/// ignored.
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u16,
    pub user_id: UserId,
    pub saved_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
    pub teams: Vec<Team>,
    pub members: Vec<TeamMember>,
}

impl Snapshot {
    #[must_use]
    pub const fn new(user_id: UserId, saved_at: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            user_id,
            saved_at,
            tasks: Vec::new(),
            teams: Vec::new(),
            members: Vec::new(),
        }
    }

    /// Returns `true` if this snapshot can seed a session for `user`.
    #[must_use]
    pub fn usable_for(&self, user: &UserId) -> bool {
        self.version == SNAPSHOT_VERSION && &self.user_id == user
    }
}

/// # Errors
///
/// Returns [`CodecError::Serialization`] if encoding fails.
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, CodecError> {
    codec::to_bytes(snapshot)
}

/// # Errors
///
/// Returns [`CodecError::Serialization`] if the bytes are not a snapshot.
pub fn decode(bytes: &[u8]) -> Result<Snapshot, CodecError> {
    codec::from_bytes(bytes)
}
