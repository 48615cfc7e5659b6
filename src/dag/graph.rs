// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::{debug, warn};

use crate::dag::node::{Handler, Node, NodeCell, NodeStatus};
use crate::errors::{FlowError, Result};
use crate::types::UnknownPredecessorPolicy;

/// Position of a node in the graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What `add_node` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The node was registered at this index.
    Added(NodeIndex),
    /// A node with the same id already existed; nothing changed.
    AlreadyRegistered(NodeIndex),
}

impl AddOutcome {
    pub fn index(self) -> NodeIndex {
        match self {
            AddOutcome::Added(idx) | AddOutcome::AlreadyRegistered(idx) => idx,
        }
    }
}

/// Arena slot: immutable structure plus the node's lock-protected state.
struct NodeSlot {
    id: String,
    handler: Handler,
    /// Direct dependencies: nodes that must succeed before this one runs.
    predecessors: Vec<NodeIndex>,
    /// Direct dependents: nodes that list this one as a predecessor.
    successors: Vec<NodeIndex>,
    cell: NodeCell,
}

/// Registry of nodes keyed by id.
///
/// Nodes own nothing of each other; edges are index lists into `slots`.
/// Edges are only created while registering, so once a run starts the
/// structure is read-only and only per-node state changes.
#[derive(Default)]
pub struct Graph {
    slots: Vec<NodeSlot>,
    index: HashMap<String, NodeIndex>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node` and link it to its already-registered predecessors.
    ///
    /// Registering an id that is already present is a no-op. Predecessor ids
    /// that are not registered are handled according to `policy`.
    pub fn add_node<I, S>(
        &mut self,
        node: Node,
        predecessors: I,
        policy: UnknownPredecessorPolicy,
    ) -> Result<AddOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if node.id.is_empty() {
            return Err(FlowError::EmptyNodeId);
        }

        if let Some(&existing) = self.index.get(&node.id) {
            debug!(node = %node.id, "node already registered; ignoring");
            return Ok(AddOutcome::AlreadyRegistered(existing));
        }

        let mut preds: Vec<NodeIndex> = Vec::new();
        for pred in predecessors {
            let pred = pred.as_ref();
            match self.index.get(pred) {
                Some(&idx) => {
                    if !preds.contains(&idx) {
                        preds.push(idx);
                    }
                }
                None => match policy {
                    UnknownPredecessorPolicy::Skip => {
                        warn!(
                            node = %node.id,
                            predecessor = %pred,
                            "predecessor not registered; dropping edge"
                        );
                    }
                    UnknownPredecessorPolicy::Reject => {
                        return Err(FlowError::UnknownPredecessor {
                            node: node.id,
                            predecessor: pred.to_string(),
                        });
                    }
                },
            }
        }

        let idx = NodeIndex(self.slots.len());
        for &pred in &preds {
            self.slots[pred.0].successors.push(idx);
        }

        debug!(node = %node.id, predecessors = preds.len(), "registered node");

        self.index.insert(node.id.clone(), idx);
        self.slots.push(NodeSlot {
            id: node.id,
            handler: node.handler,
            predecessors: preds,
            successors: Vec::new(),
            cell: NodeCell::new(),
        });

        Ok(AddOutcome::Added(idx))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All node indices in registration order.
    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        (0..self.slots.len()).map(NodeIndex)
    }

    /// All node ids in registration order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.id.as_str())
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Id of the node at `idx`.
    ///
    /// Panics if `idx` did not come from this graph.
    pub fn id_of(&self, idx: NodeIndex) -> &str {
        &self.slots[idx.0].id
    }

    pub fn predecessors_of(&self, idx: NodeIndex) -> &[NodeIndex] {
        &self.slots[idx.0].predecessors
    }

    pub fn successors_of(&self, idx: NodeIndex) -> &[NodeIndex] {
        &self.slots[idx.0].successors
    }

    /// Nodes without predecessors.
    pub fn root_nodes(&self) -> Vec<NodeIndex> {
        self.indices()
            .filter(|&idx| self.slots[idx.0].predecessors.is_empty())
            .collect()
    }

    pub fn status(&self, idx: NodeIndex) -> NodeStatus {
        self.slots[idx.0].cell.status()
    }

    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.index_of(id).map(|idx| self.status(idx))
    }

    /// Snapshot of every node's status keyed by id.
    pub fn statuses(&self) -> BTreeMap<String, NodeStatus> {
        self.slots
            .iter()
            .map(|s| (s.id.clone(), s.cell.status()))
            .collect()
    }

    pub(crate) fn handler(&self, idx: NodeIndex) -> &Handler {
        &self.slots[idx.0].handler
    }

    pub(crate) fn cell(&self, idx: NodeIndex) -> &NodeCell {
        &self.slots[idx.0].cell
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for slot in &self.slots {
            let preds: Vec<&str> = slot
                .predecessors
                .iter()
                .map(|p| self.slots[p.0].id.as_str())
                .collect();
            map.entry(&slot.id, &preds);
        }
        map.finish()
    }
}
