//! Teams, memberships and the member directory.

mod manager;

pub use manager::{MemberView, TeamManager, member_query, team_query};
