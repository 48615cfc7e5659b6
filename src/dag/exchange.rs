// src/dag/exchange.rs

//! Typed access to node outputs.
//!
//! Producers return whatever concrete type they like; consumers name the type
//! they want and get it through a JSON round trip (see [`NodeOutput`]).

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::dag::graph::{Graph, NodeIndex};
use crate::dag::output::NodeOutput;
use crate::errors::{FlowError, Result};

/// Decode the output of node `id` into `out`.
///
/// - `NodeNotFound` if `id` is not registered.
/// - A node without output (pending, running, failed, or empty) leaves `out`
///   untouched and succeeds, so consumers can probe optimistically.
/// - Encoding or decoding problems surface as `FlowError::Encoding`.
pub fn receive<T: DeserializeOwned>(graph: &Graph, id: &str, out: &mut T) -> Result<()> {
    match output_of(graph, id)? {
        Some(output) => output.decode_into(out),
        None => Ok(()),
    }
}

/// Like [`receive`], returning the decoded value instead of writing it.
pub fn receive_as<T: DeserializeOwned>(graph: &Graph, id: &str) -> Result<Option<T>> {
    match output_of(graph, id)? {
        Some(output) => output.decode(),
        None => Ok(None),
    }
}

/// Clone the output handle out of the node's lock. The clone shares the
/// encoding cache, so encoding outside the lock still fills the node's cache.
fn output_of(graph: &Graph, id: &str) -> Result<Option<NodeOutput>> {
    let idx = graph
        .index_of(id)
        .ok_or_else(|| FlowError::NodeNotFound(id.to_string()))?;
    Ok(graph.cell(idx).output())
}

/// Outputs of a node's direct predecessors, keyed by predecessor id.
///
/// Captured once, right before the handler runs.
#[derive(Debug, Clone, Default)]
pub struct NodeInputs {
    outputs: HashMap<String, Option<NodeOutput>>,
}

impl NodeInputs {
    pub(crate) fn snapshot(graph: &Graph, idx: NodeIndex) -> Self {
        let outputs = graph
            .predecessors_of(idx)
            .iter()
            .map(|&pred| (graph.id_of(pred).to_string(), graph.cell(pred).output()))
            .collect();
        Self { outputs }
    }

    /// Raw output of predecessor `id`; `None` if `id` is not a predecessor or
    /// produced no output.
    pub fn get(&self, id: &str) -> Option<&NodeOutput> {
        self.outputs.get(id)?.as_ref()
    }

    /// Decode predecessor `id`'s output into a fresh value.
    pub fn decode<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        match self.get(id) {
            Some(output) => output.decode(),
            None => Ok(None),
        }
    }

    /// Whether `id` is a direct predecessor.
    pub fn contains(&self, id: &str) -> bool {
        self.outputs.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// All predecessor outputs as a JSON object; predecessors without output
    /// map to `null`.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut map = serde_json::Map::new();
        for (id, output) in &self.outputs {
            let value = match output {
                Some(output) => output.decode::<serde_json::Value>()?.unwrap_or_default(),
                None => serde_json::Value::Null,
            };
            map.insert(id.clone(), value);
        }
        Ok(serde_json::Value::Object(map))
    }
}
