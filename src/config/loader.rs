// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::model::{RawWorkflowFile, WorkflowFile};
use crate::errors::Result;

/// Read and deserialize a workflow file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_str(&contents)
}

/// Deserialize workflow TOML from a string.
pub fn parse_str(contents: &str) -> Result<RawWorkflowFile> {
    Ok(toml::from_str(contents)?)
}

/// Load a workflow file from path and validate it.
///
/// This is the recommended entry point:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - unknown `after` references,
///   - cycles,
///   - unparsable durations and a zero queue capacity.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowFile> {
    let path = path.as_ref();
    let raw = load_from_path(path)?;
    let workflow = WorkflowFile::try_from(raw)?;
    debug!(path = ?path, nodes = workflow.nodes().len(), "loaded workflow file");
    Ok(workflow)
}

/// Default workflow file, resolved against the current working directory.
pub const DEFAULT_CONFIG_FILE: &str = "Flowdag.toml";
