// src/dag/node.rs

//! Nodes, handlers and the per-node state machine.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;

use crate::dag::exchange::{self, NodeInputs};
use crate::dag::graph::Graph;
use crate::dag::output::NodeOutput;
use crate::engine::scope::DeadlineScope;
use crate::errors::Result;

/// Boxed future returned by a handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<NodeOutput>> + Send>>;

/// Shared, type-erased node handler.
pub type Handler = Arc<dyn Fn(NodeContext) -> HandlerFuture + Send + Sync>;

/// Why a node ended in `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The handler returned an error (or panicked).
    ExecutionError,
    /// The node's deadline scope expired before the handler finished.
    Timeout,
    /// A predecessor failed, so this node never ran.
    UpstreamFailure,
    /// The run was cancelled from outside before this node finished.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ExecutionError => "execution error",
            FailureKind::Timeout => "timeout",
            FailureKind::UpstreamFailure => "upstream failure",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Public, read-only view of a node's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Not dispatched yet.
    Pending,
    /// Claimed for execution; the handler is (about to be) running.
    Running,
    Success,
    Failure(FailureKind),
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Failure(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            NodeStatus::Failure(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Pending => f.write_str("pending"),
            NodeStatus::Running => f.write_str("running"),
            NodeStatus::Success => f.write_str("success"),
            NodeStatus::Failure(kind) => write!(f, "failure ({kind})"),
        }
    }
}

/// Terminal outcome recorded for a node that was executed.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Success(NodeOutput),
    Failure(FailureKind),
}

/// Internal state. State, failure kind and output change together, so they
/// live in one tagged value behind one lock.
#[derive(Debug, Clone)]
pub(crate) enum NodeState {
    Pending,
    Running,
    Success(NodeOutput),
    Failure(FailureKind),
}

impl NodeState {
    fn status(&self) -> NodeStatus {
        match self {
            NodeState::Pending => NodeStatus::Pending,
            NodeState::Running => NodeStatus::Running,
            NodeState::Success(_) => NodeStatus::Success,
            NodeState::Failure(kind) => NodeStatus::Failure(*kind),
        }
    }
}

/// Lock-protected state of a single node.
#[derive(Debug)]
pub(crate) struct NodeCell {
    state: Mutex<NodeState>,
}

impl NodeCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(NodeState::Pending),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        // A panic while holding the lock cannot leave the enum half-written.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> NodeStatus {
        self.lock().status()
    }

    /// Output of a successful node; `None` while pending, after failure, or
    /// when the handler produced an empty output.
    pub(crate) fn output(&self) -> Option<NodeOutput> {
        match &*self.lock() {
            NodeState::Success(output) if !output.is_empty() => Some(output.clone()),
            _ => None,
        }
    }

    /// `Pending -> Running` in one step. Returns `false` if the node was
    /// already claimed or is terminal.
    pub(crate) fn try_claim(&self) -> bool {
        let mut state = self.lock();
        if matches!(*state, NodeState::Pending) {
            *state = NodeState::Running;
            true
        } else {
            false
        }
    }

    /// `Running -> Success | Failure`. Returns `false` if the node was not
    /// running (the outcome is dropped).
    pub(crate) fn finish(&self, outcome: NodeOutcome) -> bool {
        let mut state = self.lock();
        if !matches!(*state, NodeState::Running) {
            return false;
        }
        *state = match outcome {
            NodeOutcome::Success(output) => NodeState::Success(output),
            NodeOutcome::Failure(kind) => NodeState::Failure(kind),
        };
        true
    }

    /// `Pending -> Failure(kind)`. Returns `false` for any other state.
    pub(crate) fn fail_if_pending(&self, kind: FailureKind) -> bool {
        let mut state = self.lock();
        if matches!(*state, NodeState::Pending) {
            *state = NodeState::Failure(kind);
            true
        } else {
            false
        }
    }

    /// `Pending | Running -> Failure(kind)`. Used when a run ends early.
    pub(crate) fn fail_if_unfinished(&self, kind: FailureKind) -> bool {
        let mut state = self.lock();
        if matches!(*state, NodeState::Pending | NodeState::Running) {
            *state = NodeState::Failure(kind);
            true
        } else {
            false
        }
    }
}

/// A unit of work, not yet registered in a graph.
pub struct Node {
    pub(crate) id: String,
    pub(crate) handler: Handler,
}

impl Node {
    /// Create a node from an async handler.
    ///
    /// The id is validated when the node is registered, not here.
    pub fn new<F, Fut>(id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<NodeOutput>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |ctx: NodeContext| -> HandlerFuture {
            Box::pin(handler(ctx))
        });
        Self {
            id: id.into(),
            handler,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Everything a handler gets when it is invoked.
pub struct NodeContext {
    id: String,
    scope: DeadlineScope,
    inputs: NodeInputs,
    graph: Arc<Graph>,
}

impl NodeContext {
    pub(crate) fn new(id: String, scope: DeadlineScope, inputs: NodeInputs, graph: Arc<Graph>) -> Self {
        Self {
            id,
            scope,
            inputs,
            graph,
        }
    }

    /// Id of the node being executed.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The node's deadline scope. Long-running handlers should watch it.
    pub fn scope(&self) -> &DeadlineScope {
        &self.scope
    }

    /// Outputs of the direct predecessors, captured when the node started.
    pub fn inputs(&self) -> &NodeInputs {
        &self.inputs
    }

    /// Decode the current output of any node in the graph into `out`.
    pub fn receive<T: DeserializeOwned>(&self, id: &str, out: &mut T) -> Result<()> {
        exchange::receive(&self.graph, id, out)
    }

    /// Owned-value flavour of [`NodeContext::receive`].
    pub fn receive_as<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        exchange::receive_as(&self.graph, id)
    }
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}
