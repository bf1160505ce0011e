//! Client-side sync core for Taskify tasks and teams.
//!
//! Layers, bottom up:
//! - [`store`]: in-memory, id-addressable entity collections
//! - [`remote`]: the row-level remote seam and the translating adapter
//! - [`feed`]: change feed listeners
//! - [`sync`]: the optimistic mutation coordinator
//! - [`tasks`], [`teams`]: manager operations and derived views
//! - [`session`]: sign-in lifetime, wiring the above together
//!
//! [`config`] and [`cache`] carry the client's configuration and warm-start
//! snapshot.

pub mod cache;
pub mod config;
pub mod feed;
pub mod remote;
pub mod session;
pub mod store;
pub mod sync;
pub mod tasks;
pub mod teams;
