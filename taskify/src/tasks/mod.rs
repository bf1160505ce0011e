//! Task collection: manager operations and derived views.

mod manager;
pub mod views;

pub use manager::{TaskManager, TransitionPolicy, task_query};
pub use views::{TaskFilter, TaskSummary};
