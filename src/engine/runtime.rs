// src/engine/runtime.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dag::{
    AddOutcome, FailureKind, Graph, Node, NodeContext, NodeIndex, NodeInputs, NodeOutcome,
    NodeStatus, exchange,
};
use crate::errors::{FlowError, Result};
use crate::exec::TaskGroup;
use crate::exec::group::panic_message;

use super::core::CompletionCore;
use super::scope::{DeadlineScope, ScopeEnd};
use super::{EngineConfig, RunPhase, RunReport};

/// Owns the graph and runs it.
///
/// Build the graph with [`Engine::add_node`], call [`Engine::run`] once, then
/// read results with [`Engine::receive`] / [`Engine::status`]. Handlers can
/// read other nodes' results during the run through their [`NodeContext`].
pub struct Engine {
    graph: Arc<Graph>,
    config: EngineConfig,
    phase: RunPhase,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("phase", &self.phase)
            .field("graph", &self.graph)
            .finish()
    }
}

/// State shared by every task of one run.
struct RunContext {
    graph: Arc<Graph>,
    scope: DeadlineScope,
    node_timeout: Duration,
    completions: mpsc::Sender<NodeIndex>,
}

impl RunContext {
    fn core(&self) -> CompletionCore<'_> {
        CompletionCore::new(&self.graph)
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            graph: Arc::new(Graph::new()),
            config,
            phase: RunPhase::NotStarted,
        }
    }

    /// Engine with default settings and the given run deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(EngineConfig::new(timeout))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Register `node` after the nodes named in `predecessors`.
    ///
    /// Only allowed before the run starts.
    pub fn add_node<I, S>(&mut self, node: Node, predecessors: I) -> Result<AddOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.phase != RunPhase::NotStarted {
            return Err(FlowError::GraphFrozen);
        }
        let graph = Arc::get_mut(&mut self.graph).ok_or(FlowError::GraphFrozen)?;
        graph.add_node(node, predecessors, self.config.unknown_predecessors)
    }

    /// Decode the output of node `id` into `out`. See [`exchange::receive`].
    pub fn receive<T: DeserializeOwned>(&self, id: &str, out: &mut T) -> Result<()> {
        exchange::receive(&self.graph, id, out)
    }

    /// Owned-value flavour of [`Engine::receive`].
    pub fn receive_as<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        exchange::receive_as(&self.graph, id)
    }

    pub fn status(&self, id: &str) -> Option<NodeStatus> {
        self.graph.status_of(id)
    }

    pub fn statuses(&self) -> BTreeMap<String, NodeStatus> {
        self.graph.statuses()
    }

    /// Execute the whole graph.
    ///
    /// Returns once every node is terminal, the run deadline expires, or
    /// `parent` is cancelled. Either way every node is terminal afterwards.
    /// A failing or panicking task is logged and reported in
    /// [`RunReport::fault`]; it does not stop the other tasks.
    pub async fn run(&mut self, parent: &CancellationToken) -> Result<RunReport> {
        if self.phase != RunPhase::NotStarted {
            return Err(FlowError::AlreadyStarted);
        }
        self.phase = RunPhase::Running;

        let started = Instant::now();
        let scope = DeadlineScope::new(parent, self.config.timeout);
        let node_timeout = self.config.effective_node_timeout();

        info!(
            nodes = self.graph.len(),
            timeout_ms = self.config.timeout.as_millis() as u64,
            node_timeout_ms = node_timeout.as_millis() as u64,
            "starting run"
        );

        let mut fault = None;

        if !self.graph.is_empty() {
            let (tx, rx) = mpsc::channel::<NodeIndex>(self.config.completion_queue_capacity.max(1));
            let run = Arc::new(RunContext {
                graph: Arc::clone(&self.graph),
                scope: scope.clone(),
                node_timeout,
                completions: tx,
            });

            let (group, join) = TaskGroup::new();

            group.spawn(
                "completion-loop",
                process_completions(Arc::clone(&run), rx, group.clone()),
            );

            let roots = run.core().claim_roots();
            debug!(roots = roots.len(), "dispatching root nodes");
            for root in roots {
                spawn_node(&group, &run, root);
            }

            // The completion loop holds the remaining handle; the group is
            // joined once it exits and every node task has returned.
            drop(group);
            drop(run);

            fault = join.join_and_recover().await;
            if let Some(fault) = &fault {
                error!(%fault, "run finished with a task fault");
            }
        }

        let end = scope.end_reason();
        let deadline_exceeded = end == Some(ScopeEnd::DeadlineExceeded);
        if let Some(end) = end {
            let kind = match end {
                ScopeEnd::DeadlineExceeded => FailureKind::Timeout,
                ScopeEnd::Cancelled => FailureKind::Cancelled,
            };
            let settled = CompletionCore::new(&self.graph).settle_unfinished(kind);
            if !settled.is_empty() {
                warn!(
                    settled = settled.len(),
                    ?end,
                    "run ended before every node finished; marked unfinished nodes failed"
                );
            }
        }
        scope.cancel();

        self.phase = RunPhase::Finished;

        let report = RunReport::collect(&self.graph, started.elapsed(), deadline_exceeded, fault);
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            deadline_exceeded,
            "run finished"
        );
        Ok(report)
    }
}

fn spawn_node(group: &TaskGroup, run: &Arc<RunContext>, idx: NodeIndex) {
    let name = format!("node:{}", run.graph.id_of(idx));
    group.spawn(name, execute_node(Arc::clone(run), idx));
}

/// Run one claimed node and report its completion.
async fn execute_node(run: Arc<RunContext>, idx: NodeIndex) -> anyhow::Result<()> {
    let graph = &run.graph;
    let id = graph.id_of(idx).to_string();

    if graph.status(idx) != NodeStatus::Running {
        debug!(node = %id, "node not claimed for execution; skipping");
        return Ok(());
    }

    let inputs = NodeInputs::snapshot(graph, idx);
    let scope = run.scope.child(run.node_timeout);
    let ctx = NodeContext::new(id.clone(), scope.clone(), inputs, Arc::clone(graph));
    let handler = Arc::clone(graph.handler(idx));

    info!(node = %id, "executing node");
    let started = Instant::now();

    // The handler gets its own task so a panic stays contained and so it can
    // be aborted once its scope ends.
    let mut task = tokio::spawn(handler(ctx));
    let mut panic_payload = None;

    let outcome = tokio::select! {
        biased;
        joined = &mut task => match joined {
            // A result that arrives after the deadline still counts as a timeout.
            Ok(Ok(_)) | Ok(Err(_)) if scope.is_expired() => {
                warn!(node = %id, "handler returned after its deadline");
                NodeOutcome::Failure(FailureKind::Timeout)
            }
            Ok(Ok(output)) => NodeOutcome::Success(output),
            Ok(Err(err)) => {
                warn!(node = %id, error = %format!("{err:#}"), "handler failed");
                NodeOutcome::Failure(FailureKind::ExecutionError)
            }
            Err(err) if err.is_panic() => {
                let payload = err.into_panic();
                error!(
                    node = %id,
                    panic = %panic_message(payload.as_ref()),
                    "handler panicked"
                );
                panic_payload = Some(payload);
                NodeOutcome::Failure(FailureKind::ExecutionError)
            }
            Err(_) => NodeOutcome::Failure(FailureKind::Cancelled),
        },
        end = scope.done() => {
            task.abort();
            let kind = match end {
                ScopeEnd::DeadlineExceeded => FailureKind::Timeout,
                ScopeEnd::Cancelled => FailureKind::Cancelled,
            };
            warn!(node = %id, %kind, "node scope ended before handler finished");
            NodeOutcome::Failure(kind)
        }
    };
    scope.cancel();

    run.core().record_outcome(idx, outcome);
    info!(
        node = %id,
        status = %graph.status(idx),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "node finished"
    );

    if run.completions.send(idx).await.is_err() {
        debug!(node = %id, "completion queue closed; run already over");
    }

    if let Some(payload) = panic_payload {
        // Re-raise so the task group reports it as this unit's fault.
        std::panic::resume_unwind(payload);
    }

    Ok(())
}

/// Single consumer of the completion queue.
///
/// Every readiness decision and failure cascade happens here, one completion
/// at a time. Exits when the graph is finished or the run scope ends; the
/// queue receiver is dropped with it.
async fn process_completions(
    run: Arc<RunContext>,
    mut completions: mpsc::Receiver<NodeIndex>,
    group: TaskGroup,
) -> anyhow::Result<()> {
    debug!("completion loop started");

    loop {
        let idx = tokio::select! {
            biased;
            end = run.scope.done() => {
                debug!(?end, "run scope ended; completion loop exiting");
                return Ok(());
            }
            next = completions.recv() => match next {
                Some(idx) => idx,
                None => {
                    debug!("completion queue closed; completion loop exiting");
                    return Ok(());
                }
            },
        };

        let step = run.core().step(idx);

        for &failed in &step.newly_failed {
            warn!(
                node = %run.graph.id_of(failed),
                upstream = %run.graph.id_of(idx),
                "node skipped due to upstream failure"
            );
        }

        for ready in step.newly_ready {
            spawn_node(&group, &run, ready);
        }

        if step.run_finished {
            info!("all nodes terminal; finishing run");
            run.scope.cancel();
            return Ok(());
        }
    }
}
