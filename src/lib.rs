// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{WorkflowFile, load_and_validate};
use crate::engine::{Engine, RunReport};
use crate::exec::command_node;
use crate::types::parse_duration;

pub use crate::dag::{FailureKind, Node, NodeContext, NodeOutput, NodeStatus};
pub use crate::engine::EngineConfig;
pub use crate::errors::{FlowError, Result as FlowResult};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - workflow file loading
/// - engine construction with one command node per `[node.<id>]`
/// - Ctrl-C handling
/// - the run itself and the printed summary
///
/// Returns whether every node succeeded.
pub async fn run(args: CliArgs) -> Result<bool> {
    let config_path = PathBuf::from(&args.config);
    let workflow = load_and_validate(&config_path)
        .with_context(|| format!("loading workflow file {:?}", config_path))?;

    if args.dry_run {
        print_dry_run(&workflow);
        return Ok(true);
    }

    let mut config = workflow.engine_config();
    if let Some(raw) = &args.timeout {
        config.timeout = parse_duration(raw)
            .map_err(|e| anyhow::anyhow!("invalid --timeout '{raw}': {e}"))?;
    }

    let mut engine = build_engine(&workflow, config)?;

    // Ctrl-C → cancel the run.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl+C received; cancelling run");
            cancel.cancel();
        });
    }

    let report = engine.run(&cancel).await?;
    print_summary(&engine, &workflow, &report);
    Ok(report.is_success())
}

/// Build an engine holding one command node per workflow node.
///
/// Nodes are registered in topological order so every predecessor is known
/// by the time its dependents are added.
pub fn build_engine(workflow: &WorkflowFile, config: EngineConfig) -> Result<Engine> {
    let mut engine = Engine::new(config);

    for id in workflow.topological_order() {
        let node = workflow
            .node(id)
            .with_context(|| format!("node '{id}' missing from workflow"))?;
        engine
            .add_node(command_node(id.clone(), node.cmd.clone()), &node.after)
            .with_context(|| format!("registering node '{id}'"))?;
    }

    Ok(engine)
}

/// Dry-run output: print nodes in execution order with deps and commands.
fn print_dry_run(workflow: &WorkflowFile) {
    let config = workflow.engine_config();

    println!("flowdag dry-run");
    println!("  engine.timeout = {:?}", config.timeout);
    println!("  engine.node_timeout = {:?}", config.effective_node_timeout());
    println!("  engine.queue_capacity = {}", config.completion_queue_capacity);
    println!();

    println!("nodes ({}):", workflow.nodes().len());
    for id in workflow.topological_order() {
        let Some(node) = workflow.node(id) else {
            continue;
        };
        println!("  - {id}");
        println!("      cmd: {}", node.cmd);
        if !node.after.is_empty() {
            println!("      after: {:?}", node.after);
        }
    }

    debug!("dry-run complete (no execution)");
}

fn print_summary(engine: &Engine, workflow: &WorkflowFile, report: &RunReport) {
    for id in workflow.topological_order() {
        if let Some(status) = engine.status(id) {
            println!("{id}: {status}");
        }
    }
    println!("{report}");
    if let Some(fault) = &report.fault {
        println!("fault: {fault}");
    }
}
