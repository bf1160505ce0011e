//! Opaque record identifiers.
//!
//! Remote rows carry string ids assigned by the remote store. Records that
//! exist only locally (an optimistic create still in flight) carry a
//! provisional id with the [`PROVISIONAL_PREFIX`], which the remote never
//! assigns.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix marking a client-side provisional id.
pub const PROVISIONAL_PREFIX: &str = "tmp-";

/// Common behaviour of every record identifier.
pub trait RecordId:
    Clone + Eq + std::hash::Hash + std::fmt::Debug + std::fmt::Display + Send + Sync + 'static
{
    /// Returns the string form sent over the wire.
    fn as_str(&self) -> &str;

    /// Returns `true` if this id was minted locally and never confirmed.
    fn is_provisional(&self) -> bool {
        self.as_str().starts_with(PROVISIONAL_PREFIX)
    }
}

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an id received from the remote store or the user.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mints a provisional id (`tmp-<uuid v7>`).
            #[must_use]
            pub fn provisional() -> Self {
                Self(format!("{PROVISIONAL_PREFIX}{}", Uuid::now_v7()))
            }

            /// Returns the string form of this id.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl RecordId for $name {
            fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

record_id!(
    /// Identifier of a task row.
    TaskId
);
record_id!(
    /// Identifier of a team row.
    TeamId
);
record_id!(
    /// Identifier of a team membership row.
    MemberId
);
record_id!(
    /// Identifier of a user, as supplied by the identity collaborator.
    UserId
);
