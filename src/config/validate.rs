// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::warn;

use crate::config::model::{EngineSection, RawWorkflowFile, WorkflowFile};
use crate::engine::EngineConfig;
use crate::errors::{FlowError, Result};
use crate::types::parse_duration;

impl TryFrom<RawWorkflowFile> for WorkflowFile {
    type Error = FlowError;

    fn try_from(raw: RawWorkflowFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_nodes(&raw)?;
        let engine = engine_config(&raw.engine)?;
        validate_nodes(&raw)?;
        let order = topological_order(&raw)?;
        Ok(WorkflowFile::new_unchecked(engine, raw.node, order))
    }
}

fn ensure_has_nodes(cfg: &RawWorkflowFile) -> Result<()> {
    if cfg.node.is_empty() {
        return Err(FlowError::ConfigError(
            "workflow must contain at least one [node.<id>] section".to_string(),
        ));
    }
    Ok(())
}

/// Convert `[engine]` into an [`EngineConfig`].
pub fn engine_config(section: &EngineSection) -> Result<EngineConfig> {
    let timeout = parse_duration(&section.timeout)
        .map_err(|e| FlowError::ConfigError(format!("[engine].timeout: {e}")))?;

    if timeout.is_zero() {
        return Err(FlowError::ConfigError(
            "[engine].timeout must be greater than zero".to_string(),
        ));
    }

    if section.queue_capacity == 0 {
        return Err(FlowError::ConfigError(
            "[engine].queue_capacity must be >= 1 (got 0)".to_string(),
        ));
    }

    let mut config = EngineConfig::new(timeout)
        .with_queue_capacity(section.queue_capacity)
        .with_unknown_predecessors(section.unknown_predecessors);

    if let Some(raw) = &section.node_timeout {
        let node_timeout = parse_duration(raw)
            .map_err(|e| FlowError::ConfigError(format!("[engine].node_timeout: {e}")))?;
        if node_timeout > timeout {
            warn!(
                node_timeout = %raw,
                timeout = %section.timeout,
                "node_timeout exceeds timeout; the run deadline still applies"
            );
        }
        config = config.with_node_timeout(node_timeout);
    }

    Ok(config)
}

fn validate_nodes(cfg: &RawWorkflowFile) -> Result<()> {
    for (id, node) in cfg.node.iter() {
        if id.trim().is_empty() {
            return Err(FlowError::ConfigError(
                "node ids must not be empty".to_string(),
            ));
        }
        if node.cmd.trim().is_empty() {
            return Err(FlowError::ConfigError(format!(
                "node '{}' has an empty `cmd`",
                id
            )));
        }
        for dep in node.after.iter() {
            if !cfg.node.contains_key(dep) {
                return Err(FlowError::ConfigError(format!(
                    "node '{}' has unknown dependency '{}' in `after`",
                    id, dep
                )));
            }
            if dep == id {
                return Err(FlowError::ConfigError(format!(
                    "node '{}' cannot depend on itself in `after`",
                    id
                )));
            }
        }
    }
    Ok(())
}

/// Order the nodes so dependencies come first. Fails on a cycle, since a
/// cyclic workflow file would otherwise just sit until its deadline.
fn topological_order(cfg: &RawWorkflowFile) -> Result<Vec<String>> {
    // Edge direction: dep -> node. For
    //   [node.B]
    //   after = ["A"]
    // we add edge A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for id in cfg.node.keys() {
        graph.add_node(id.as_str());
    }

    for (id, node) in cfg.node.iter() {
        for dep in node.after.iter() {
            graph.add_edge(dep.as_str(), id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(FlowError::DagCycle(format!(
            "cycle detected in workflow involving node '{}'",
            cycle.node_id()
        ))),
    }
}
