// src/engine/core.rs

//! Pure completion-processing core.
//!
//! All cross-node decisions live here: which successors become ready when a
//! node succeeds, which nodes fail when a node fails, and whether the run is
//! over. The core holds no channels and spawns nothing; the async shell in
//! [`runtime`](super::runtime) calls it from exactly one task, which is what
//! keeps two completing predecessors from both dispatching a shared successor.
//!
//! The core can be driven by hand in tests: claim roots, record outcomes,
//! step completions, and assert on the returned [`CompletionStep`]s.

use tracing::{debug, warn};

use crate::dag::{FailureKind, Graph, NodeIndex, NodeOutcome, NodeStatus};

/// Structured result of processing a single completion.
#[derive(Debug, Clone, Default)]
pub struct CompletionStep {
    /// Successors claimed for execution by this step.
    pub newly_ready: Vec<NodeIndex>,
    /// Nodes marked `Failure(UpstreamFailure)` by this step.
    pub newly_failed: Vec<NodeIndex>,
    /// Whether every node is terminal after this step.
    pub run_finished: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionCore<'a> {
    graph: &'a Graph,
}

impl<'a> CompletionCore<'a> {
    pub fn new(graph: &'a Graph) -> Self {
        Self { graph }
    }

    /// Claim every root node for execution.
    pub fn claim_roots(&self) -> Vec<NodeIndex> {
        self.graph
            .root_nodes()
            .into_iter()
            .filter(|&idx| self.graph.cell(idx).try_claim())
            .collect()
    }

    /// Record the outcome of a claimed node. Returns `false` (and drops the
    /// outcome) if the node was not running.
    pub fn record_outcome(&self, idx: NodeIndex, outcome: NodeOutcome) -> bool {
        let recorded = self.graph.cell(idx).finish(outcome);
        if !recorded {
            warn!(
                node = %self.graph.id_of(idx),
                "outcome for node that is not running; ignoring"
            );
        }
        recorded
    }

    /// Process the completion of `completed`.
    pub fn step(&self, completed: NodeIndex) -> CompletionStep {
        let mut step = CompletionStep::default();

        match self.graph.status(completed) {
            NodeStatus::Success => {
                step.newly_ready = self.claim_ready_successors(completed);
            }
            NodeStatus::Failure(kind) => {
                debug!(
                    node = %self.graph.id_of(completed),
                    %kind,
                    "node failed; failing dependents"
                );
                step.newly_failed = self.cascade_failure(completed);
            }
            status @ (NodeStatus::Pending | NodeStatus::Running) => {
                warn!(
                    node = %self.graph.id_of(completed),
                    %status,
                    "completion for non-terminal node; ignoring"
                );
            }
        }

        step.run_finished = self.all_terminal();
        step
    }

    /// Whether every predecessor of `idx` has succeeded.
    pub fn predecessors_succeeded(&self, idx: NodeIndex) -> bool {
        self.graph
            .predecessors_of(idx)
            .iter()
            .all(|&pred| self.graph.status(pred) == NodeStatus::Success)
    }

    /// Claim each successor of `completed` whose predecessors have all
    /// succeeded. A successor is checked once per completing predecessor but
    /// the claim only succeeds once.
    fn claim_ready_successors(&self, completed: NodeIndex) -> Vec<NodeIndex> {
        let mut ready = Vec::new();

        for &succ in self.graph.successors_of(completed) {
            if self.predecessors_succeeded(succ) && self.graph.cell(succ).try_claim() {
                debug!(
                    node = %self.graph.id_of(succ),
                    "dependencies satisfied; claiming for execution"
                );
                ready.push(succ);
            }
        }

        ready
    }

    /// Mark every `Pending` node reachable from `failed` as
    /// `Failure(UpstreamFailure)`. Iterative; never re-enqueues anything.
    pub fn cascade_failure(&self, failed: NodeIndex) -> Vec<NodeIndex> {
        let mut stack: Vec<NodeIndex> = self.graph.successors_of(failed).to_vec();
        let mut newly_failed = Vec::new();

        while let Some(idx) = stack.pop() {
            if self.graph.cell(idx).fail_if_pending(FailureKind::UpstreamFailure) {
                debug!(
                    node = %self.graph.id_of(idx),
                    "marking dependent as failed due to upstream failure"
                );
                newly_failed.push(idx);
                stack.extend_from_slice(self.graph.successors_of(idx));
            }
        }

        newly_failed
    }

    /// Check if all nodes are in a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.graph
            .indices()
            .all(|idx| self.graph.status(idx).is_terminal())
    }

    /// Force every unfinished node into a terminal state after a run ended
    /// early (deadline or cancellation).
    ///
    /// Descendants of failed nodes become `UpstreamFailure`; nodes that were
    /// running or could have been dispatched get `kind`, and their own
    /// descendants then become `UpstreamFailure`. Anything left (only
    /// possible with a cycle) also gets `kind`. Returns the nodes changed.
    pub fn settle_unfinished(&self, kind: FailureKind) -> Vec<NodeIndex> {
        let mut settled = Vec::new();

        let failed: Vec<NodeIndex> = self
            .graph
            .indices()
            .filter(|&idx| matches!(self.graph.status(idx), NodeStatus::Failure(_)))
            .collect();
        for idx in failed {
            settled.extend(self.cascade_failure(idx));
        }

        let frontier: Vec<NodeIndex> = self
            .graph
            .indices()
            .filter(|&idx| {
                !self.graph.status(idx).is_terminal() && self.predecessors_succeeded(idx)
            })
            .collect();
        for idx in frontier {
            if self.graph.cell(idx).fail_if_unfinished(kind) {
                settled.push(idx);
                settled.extend(self.cascade_failure(idx));
            }
        }

        for idx in self.graph.indices() {
            if self.graph.cell(idx).fail_if_unfinished(kind) {
                settled.push(idx);
            }
        }

        settled
    }
}
