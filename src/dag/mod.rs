// src/dag/mod.rs

//! DAG representation and node data exchange.
//!
//! - [`graph`] holds the arena of nodes and their predecessor/successor edges.
//! - [`node`] defines nodes, handlers and the per-node state machine.
//! - [`output`] is the opaque, lazily-encoded handler result.
//! - [`exchange`] decodes node outputs into caller-chosen types.

pub mod exchange;
pub mod graph;
pub mod node;
pub mod output;

pub use exchange::{NodeInputs, receive, receive_as};
pub use graph::{AddOutcome, Graph, NodeIndex};
pub use node::{FailureKind, Handler, HandlerFuture, Node, NodeContext, NodeOutcome, NodeStatus};
pub use output::NodeOutput;
