//! Shared domain types and wire protocol for Taskify.

pub mod codec;
pub mod feed;
pub mod hub;
pub mod ids;
pub mod patch;
pub mod snapshot;
pub mod tables;
pub mod task;
pub mod team;
pub mod user;
pub mod wire;
