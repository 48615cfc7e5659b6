// src/engine/mod.rs

//! Execution engine.
//!
//! This module ties together:
//! - the per-run deadline scope and the per-node scopes derived from it
//! - the pure completion core that decides readiness and failure cascades
//! - the async runtime that executes handlers and feeds completions back
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::dag::{FailureKind, Graph, NodeStatus};
use crate::exec::GroupFault;
use crate::types::UnknownPredecessorPolicy;

pub mod core;
pub mod runtime;
pub mod scope;

pub use core::{CompletionCore, CompletionStep};
pub use runtime::Engine;
pub use scope::{DeadlineScope, ScopeEnd};

/// Default capacity of the completion queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deadline for the whole run.
    pub timeout: Duration,
    /// Deadline for each node's handler; `None` means "same as `timeout`".
    pub node_timeout: Option<Duration>,
    /// Bound of the queue that carries completions to the completion loop.
    pub completion_queue_capacity: usize,
    /// What `add_node` does with unregistered predecessor ids.
    pub unknown_predecessors: UnknownPredecessorPolicy,
}

impl EngineConfig {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            node_timeout: None,
            completion_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            unknown_predecessors: UnknownPredecessorPolicy::default(),
        }
    }

    pub fn with_node_timeout(mut self, node_timeout: Duration) -> Self {
        self.node_timeout = Some(node_timeout);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.completion_queue_capacity = capacity;
        self
    }

    pub fn with_unknown_predecessors(mut self, policy: UnknownPredecessorPolicy) -> Self {
        self.unknown_predecessors = policy;
        self
    }

    pub fn effective_node_timeout(&self) -> Duration {
        self.node_timeout.unwrap_or(self.timeout)
    }
}

/// Lifecycle of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    Running,
    Finished,
}

/// Summary of a finished run.
#[derive(Debug)]
pub struct RunReport {
    /// Ids of nodes that ended in `Success`.
    pub succeeded: Vec<String>,
    /// Nodes that ended in `Failure`, with the reason.
    pub failed: BTreeMap<String, FailureKind>,
    pub elapsed: Duration,
    /// Whether the run-wide deadline expired before the graph finished.
    pub deadline_exceeded: bool,
    /// First failure or panic among the run's tasks, if any.
    pub fault: Option<GroupFault>,
}

impl RunReport {
    pub(crate) fn collect(
        graph: &Graph,
        elapsed: Duration,
        deadline_exceeded: bool,
        fault: Option<GroupFault>,
    ) -> Self {
        let mut succeeded = Vec::new();
        let mut failed = BTreeMap::new();

        for (id, status) in graph.statuses() {
            match status {
                NodeStatus::Success => succeeded.push(id),
                NodeStatus::Failure(kind) => {
                    failed.insert(id, kind);
                }
                // Settled before the report is built.
                NodeStatus::Pending | NodeStatus::Running => {}
            }
        }

        Self {
            succeeded,
            failed,
            elapsed,
            deadline_exceeded,
            fault,
        }
    }

    /// Every node succeeded and no task faulted.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.fault.is_none()
    }

    /// Number of failed nodes with the given kind.
    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.failed.values().filter(|&&k| k == kind).count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed in {}ms",
            self.succeeded.len(),
            self.failed.len(),
            self.elapsed.as_millis()
        )?;
        if self.deadline_exceeded {
            f.write_str(" (deadline exceeded)")?;
        }
        Ok(())
    }
}
