//! Task board engine library.
//!
//! Tasks move through a closed set of statuses, block each other through a
//! dependency graph, roll up into parent workflows and can be scheduled to
//! queue themselves on a recurrence.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod recurrence;
pub mod types;
