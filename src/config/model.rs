// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::engine::{DEFAULT_QUEUE_CAPACITY, EngineConfig};
use crate::types::UnknownPredecessorPolicy;

/// Top-level workflow file as read from TOML, before validation.
///
/// ```toml
/// [engine]
/// timeout = "30s"
/// node_timeout = "10s"
///
/// [node.fetch]
/// cmd = "curl -s https://example.com"
///
/// [node.count]
/// cmd = "echo \"$FLOWDAG_INPUTS\" | wc -c"
/// after = ["fetch"]
/// ```
///
/// All sections are optional and have reasonable defaults, but validation
/// requires at least one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWorkflowFile {
    /// Engine settings from `[engine]`.
    #[serde(default)]
    pub engine: EngineSection,

    /// All nodes from `[node.<id>]`, keyed by node id.
    #[serde(default)]
    pub node: BTreeMap<String, NodeConfig>,
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Deadline for the whole run, e.g. `"30s"`.
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Deadline per node; defaults to `timeout`.
    #[serde(default)]
    pub node_timeout: Option<String>,

    /// Capacity of the completion queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// `"skip"` (default) or `"reject"`.
    #[serde(default)]
    pub unknown_predecessors: UnknownPredecessorPolicy,
}

fn default_timeout() -> String {
    "30s".to_string()
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            node_timeout: None,
            queue_capacity: default_queue_capacity(),
            unknown_predecessors: UnknownPredecessorPolicy::default(),
        }
    }
}

/// `[node.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Shell command to run.
    pub cmd: String,

    /// Ids of nodes that must succeed first.
    #[serde(default)]
    pub after: Vec<String>,
}

/// A validated workflow file.
///
/// Only constructed through `TryFrom<RawWorkflowFile>`, which checks
/// references, durations and acyclicity and computes a topological order.
#[derive(Debug, Clone)]
pub struct WorkflowFile {
    engine: EngineConfig,
    nodes: BTreeMap<String, NodeConfig>,
    order: Vec<String>,
}

impl WorkflowFile {
    pub(crate) fn new_unchecked(
        engine: EngineConfig,
        nodes: BTreeMap<String, NodeConfig>,
        order: Vec<String>,
    ) -> Self {
        Self {
            engine,
            nodes,
            order,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        self.engine
    }

    pub fn nodes(&self) -> &BTreeMap<String, NodeConfig> {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.get(id)
    }

    /// Node ids ordered so that every node comes after its dependencies.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }
}
