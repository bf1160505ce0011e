//! Taskify hub: in-memory tables served over WebSocket.
//!
//! Clients send [`taskify_proto::hub::ClientFrame`]s and receive replies
//! plus change events for the tables they subscribe to.

pub mod config;
pub mod hub;
pub mod tables;
