// src/exec/command.rs

//! Shell-command node handler.
//!
//! Runs a command through the platform shell, exposes the node id and the
//! predecessor outputs to the process, and turns its exit status and captured
//! output into the node's result.

use std::process::Stdio;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::dag::{Node, NodeContext, NodeOutput};

/// Environment variable carrying the running node's id.
pub const NODE_ENV: &str = "FLOWDAG_NODE";
/// Environment variable carrying predecessor outputs as a JSON object.
pub const INPUTS_ENV: &str = "FLOWDAG_INPUTS";

/// Output of a command node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Build a node whose handler runs `cmd`.
pub fn command_node(id: impl Into<String>, cmd: impl Into<String>) -> Node {
    let cmd = cmd.into();
    Node::new(id, move |ctx| run_command(ctx, cmd.clone()))
}

/// Run `cmd` for the node described by `ctx`.
///
/// - A non-zero exit is an error, so the node fails with `ExecutionError`.
/// - When the node's scope ends first the process is killed and an error is
///   returned; the engine records the timeout or cancellation itself.
pub async fn run_command(ctx: NodeContext, cmd: String) -> Result<NodeOutput> {
    let inputs = ctx
        .inputs()
        .to_json()
        .with_context(|| format!("encoding inputs for node '{}'", ctx.id()))?;

    info!(node = %ctx.id(), cmd = %cmd, "starting command");

    // Build a shell command appropriate for the platform.
    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&cmd);
        c
    };

    command
        .env(NODE_ENV, ctx.id())
        .env(INPUTS_ENV, inputs.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning process for node '{}'", ctx.id()))?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain both pipes while waiting so a chatty process can't block on a
    // full buffer.
    let read_stdout = async {
        let mut buf = String::new();
        if let Some(pipe) = stdout.as_mut() {
            pipe.read_to_string(&mut buf).await?;
        }
        std::io::Result::Ok(buf)
    };
    let read_stderr = async {
        let mut buf = String::new();
        if let Some(pipe) = stderr.as_mut() {
            pipe.read_to_string(&mut buf).await?;
        }
        std::io::Result::Ok(buf)
    };
    let wait = async { tokio::try_join!(read_stdout, read_stderr, child.wait()) };

    let (stdout, stderr, status) = tokio::select! {
        res = wait => res.with_context(|| format!("waiting for process of node '{}'", ctx.id()))?,
        end = ctx.scope().done() => {
            warn!(node = %ctx.id(), ?end, "node scope ended; killing process");
            // Dropping the child kills it (kill_on_drop).
            bail!("command for node '{}' interrupted: {:?}", ctx.id(), end);
        }
    };

    let exit_code = status.code().unwrap_or(-1);
    info!(
        node = %ctx.id(),
        exit_code,
        success = status.success(),
        "command exited"
    );

    for line in stderr.lines() {
        debug!(node = %ctx.id(), "stderr: {}", line);
    }

    if !status.success() {
        bail!(
            "command for node '{}' exited with code {}: {}",
            ctx.id(),
            exit_code,
            stderr.trim()
        );
    }

    Ok(NodeOutput::new(CommandOutput {
        exit_code,
        stdout,
        stderr,
    }))
}
