// tests/completion_core.rs

use flowdag::dag::{Graph, NodeIndex, NodeOutcome};
use flowdag::engine::CompletionCore;
use flowdag::types::UnknownPredecessorPolicy;
use flowdag::{FailureKind, Node, NodeOutput, NodeStatus};

fn noop(id: &str) -> Node {
    Node::new(id, |_ctx| async { anyhow::Ok(NodeOutput::empty()) })
}

/// Build a graph from `(id, predecessors)` pairs in registration order.
fn graph(layout: &[(&str, &[&str])]) -> Graph {
    let mut graph = Graph::new();
    for (id, preds) in layout {
        graph
            .add_node(noop(id), preds.iter(), UnknownPredecessorPolicy::Reject)
            .unwrap();
    }
    graph
}

fn idx(graph: &Graph, id: &str) -> NodeIndex {
    graph.index_of(id).unwrap()
}

fn ids(graph: &Graph, indices: &[NodeIndex]) -> Vec<String> {
    let mut out: Vec<String> = indices.iter().map(|&i| graph.id_of(i).to_string()).collect();
    out.sort();
    out
}

fn succeed(core: &CompletionCore<'_>, graph: &Graph, id: &str) -> Vec<String> {
    let i = idx(graph, id);
    assert!(core.record_outcome(i, NodeOutcome::Success(NodeOutput::empty())));
    ids(graph, &core.step(i).newly_ready)
}

#[test]
fn roots_are_claimed_once() {
    let g = graph(&[("a", &[]), ("b", &[]), ("c", &["a"])]);
    let core = CompletionCore::new(&g);

    assert_eq!(ids(&g, &core.claim_roots()), vec!["a", "b"]);
    assert!(core.claim_roots().is_empty());
    assert_eq!(g.status_of("a"), Some(NodeStatus::Running));
    assert_eq!(g.status_of("c"), Some(NodeStatus::Pending));
}

#[test]
fn fan_in_successor_is_ready_only_after_last_predecessor() {
    let g = graph(&[("a", &[]), ("b", &[]), ("c", &["a", "b"])]);
    let core = CompletionCore::new(&g);
    core.claim_roots();

    assert!(succeed(&core, &g, "a").is_empty());
    assert_eq!(succeed(&core, &g, "b"), vec!["c"]);
    assert_eq!(g.status_of("c"), Some(NodeStatus::Running));
}

#[test]
fn fan_in_successor_is_dispatched_once_when_predecessors_finish_together() {
    let g = graph(&[("a", &[]), ("b", &[]), ("c", &["a", "b"])]);
    let core = CompletionCore::new(&g);
    core.claim_roots();

    // Both outcomes land before either completion is processed.
    let (a, b) = (idx(&g, "a"), idx(&g, "b"));
    assert!(core.record_outcome(a, NodeOutcome::Success(NodeOutput::empty())));
    assert!(core.record_outcome(b, NodeOutcome::Success(NodeOutput::empty())));

    let first = core.step(a);
    let second = core.step(b);
    assert_eq!(ids(&g, &first.newly_ready), vec!["c"]);
    assert!(second.newly_ready.is_empty());
}

#[test]
fn failure_cascades_to_all_descendants() {
    let g = graph(&[
        ("a", &[]),
        ("b", &["a"]),
        ("c", &["b"]),
        ("d", &["a", "c"]),
        ("e", &[]),
    ]);
    let core = CompletionCore::new(&g);
    core.claim_roots();

    let a = idx(&g, "a");
    assert!(core.record_outcome(a, NodeOutcome::Failure(FailureKind::ExecutionError)));
    let step = core.step(a);

    assert_eq!(ids(&g, &step.newly_failed), vec!["b", "c", "d"]);
    assert!(step.newly_ready.is_empty());
    assert!(!step.run_finished, "e is still running");
    for id in ["b", "c", "d"] {
        assert_eq!(
            g.status_of(id),
            Some(NodeStatus::Failure(FailureKind::UpstreamFailure))
        );
    }

    succeed(&core, &g, "e");
    assert!(core.all_terminal());
}

#[test]
fn cascade_does_not_touch_running_or_finished_nodes() {
    let g = graph(&[("a", &[]), ("b", &[]), ("c", &["a"]), ("d", &["b", "c"])]);
    let core = CompletionCore::new(&g);
    core.claim_roots();

    assert_eq!(succeed(&core, &g, "a"), vec!["c"]);

    let b = idx(&g, "b");
    core.record_outcome(b, NodeOutcome::Failure(FailureKind::Timeout));
    let step = core.step(b);

    assert_eq!(ids(&g, &step.newly_failed), vec!["d"]);
    assert_eq!(g.status_of("c"), Some(NodeStatus::Running));
    assert_eq!(g.status_of("a"), Some(NodeStatus::Success));
}

#[test]
fn outcome_for_unclaimed_node_is_ignored() {
    let g = graph(&[("a", &[]), ("b", &["a"])]);
    let core = CompletionCore::new(&g);

    let b = idx(&g, "b");
    assert!(!core.record_outcome(b, NodeOutcome::Success(NodeOutput::empty())));
    assert_eq!(g.status_of("b"), Some(NodeStatus::Pending));

    let step = core.step(b);
    assert!(step.newly_ready.is_empty() && step.newly_failed.is_empty());
}

#[test]
fn last_completion_finishes_run() {
    let g = graph(&[("a", &[]), ("b", &["a"])]);
    let core = CompletionCore::new(&g);
    core.claim_roots();

    let a = idx(&g, "a");
    core.record_outcome(a, NodeOutcome::Success(NodeOutput::empty()));
    assert!(!core.step(a).run_finished);

    let b = idx(&g, "b");
    core.record_outcome(b, NodeOutcome::Success(NodeOutput::empty()));
    assert!(core.step(b).run_finished);
}

#[test]
fn settle_marks_frontier_with_reason_and_cascades_below_it() {
    let g = graph(&[
        ("a", &[]),
        ("b", &["a"]),
        ("c", &["b"]),
        ("x", &[]),
        ("y", &["x"]),
        ("done", &[]),
    ]);
    let core = CompletionCore::new(&g);
    core.claim_roots();

    succeed(&core, &g, "done");
    // "a" is still running; "x" failed but its completion never got processed.
    let x = idx(&g, "x");
    core.record_outcome(x, NodeOutcome::Failure(FailureKind::ExecutionError));

    let settled = core.settle_unfinished(FailureKind::Cancelled);
    assert_eq!(ids(&g, &settled), vec!["a", "b", "c", "y"]);

    assert_eq!(
        g.status_of("a"),
        Some(NodeStatus::Failure(FailureKind::Cancelled))
    );
    for id in ["b", "c", "y"] {
        assert_eq!(
            g.status_of(id),
            Some(NodeStatus::Failure(FailureKind::UpstreamFailure)),
            "node {id}"
        );
    }
    assert_eq!(g.status_of("done"), Some(NodeStatus::Success));
    assert!(core.all_terminal());
}

#[test]
fn settle_marks_ready_but_undispatched_nodes_with_reason() {
    let g = graph(&[("a", &[]), ("b", &["a"])]);
    let core = CompletionCore::new(&g);
    core.claim_roots();

    // Success recorded, completion not yet processed: "b" is ready but pending.
    let a = idx(&g, "a");
    core.record_outcome(a, NodeOutcome::Success(NodeOutput::empty()));

    core.settle_unfinished(FailureKind::Timeout);
    assert_eq!(
        g.status_of("b"),
        Some(NodeStatus::Failure(FailureKind::Timeout))
    );
}
