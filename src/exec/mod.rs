// src/exec/mod.rs

//! Execution helpers.
//!
//! - [`group`] is the task group the engine spawns node executions into; it
//!   joins them all and surfaces the first failure or panic.
//! - [`command`] provides a ready-made handler that runs a shell command,
//!   used by the `flowdag` binary for workflow files.

pub mod command;
pub mod group;

pub use command::{CommandOutput, command_node, run_command};
pub use group::{GroupFault, GroupJoin, TaskGroup};
