// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Node id must not be empty")]
    EmptyNodeId,

    #[error("Node '{node}' depends on unregistered node '{predecessor}'")]
    UnknownPredecessor { node: String, predecessor: String },

    #[error("Graph is frozen; nodes cannot be added once a run has started")]
    GraphFrozen,

    #[error("Engine has already been started")]
    AlreadyStarted,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FlowError>;
