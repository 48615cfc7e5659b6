// src/exec/group.rs

//! Task group: spawn units of work, join them all, surface the first fault.
//!
//! `TaskGroup` handles can be cloned and handed to other units, so a running
//! unit may spawn more work into the same group. `GroupJoin` owns the
//! `JoinSet` and keeps accepting units until every `TaskGroup` handle has been
//! dropped and every unit has finished.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio::task::{Id, JoinSet};
use tracing::{debug, warn};

type UnitFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

struct Unit {
    name: String,
    future: UnitFuture,
}

/// First fault seen while joining a group.
#[derive(Debug)]
pub enum GroupFault {
    /// A unit returned an error.
    Failed { task: String, error: anyhow::Error },
    /// A unit panicked.
    Panicked { task: String, message: String },
}

impl GroupFault {
    pub fn task(&self) -> &str {
        match self {
            GroupFault::Failed { task, .. } | GroupFault::Panicked { task, .. } => task,
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, GroupFault::Panicked { .. })
    }
}

impl fmt::Display for GroupFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupFault::Failed { task, error } => write!(f, "task '{task}' failed: {error:#}"),
            GroupFault::Panicked { task, message } => {
                write!(f, "task '{task}' panicked: {message}")
            }
        }
    }
}

/// Spawning side of a group.
#[derive(Clone)]
pub struct TaskGroup {
    tx: mpsc::UnboundedSender<Unit>,
}

/// Joining side of a group.
pub struct GroupJoin {
    rx: mpsc::UnboundedReceiver<Unit>,
}

impl TaskGroup {
    pub fn new() -> (TaskGroup, GroupJoin) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TaskGroup { tx }, GroupJoin { rx })
    }

    /// Schedule `future` to run concurrently under `name`.
    ///
    /// Returns `false` if the group has already been joined to completion.
    pub fn spawn<F>(&self, name: impl Into<String>, future: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let unit = Unit {
            name: name.into(),
            future: Box::pin(future),
        };
        match self.tx.send(unit) {
            Ok(()) => true,
            Err(mpsc::error::SendError(unit)) => {
                warn!(task = %unit.name, "task group already joined; unit dropped");
                false
            }
        }
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup").finish_non_exhaustive()
    }
}

impl GroupJoin {
    /// Wait for every unit, including units spawned while waiting.
    ///
    /// Returns the first fault; later ones are only logged. A fault in one
    /// unit never cancels the others.
    pub async fn join_and_recover(mut self) -> Option<GroupFault> {
        let mut join_set: JoinSet<anyhow::Result<()>> = JoinSet::new();
        let mut names: HashMap<Id, String> = HashMap::new();
        let mut first_fault: Option<GroupFault> = None;
        let mut accepting = true;

        loop {
            tokio::select! {
                unit = self.rx.recv(), if accepting => match unit {
                    Some(Unit { name, future }) => {
                        let handle = join_set.spawn(future);
                        debug!(task = %name, "spawned unit");
                        names.insert(handle.id(), name);
                    }
                    None => accepting = false,
                },
                Some(joined) = join_set.join_next_with_id(), if !join_set.is_empty() => {
                    let fault = match joined {
                        Ok((id, Ok(()))) => {
                            names.remove(&id);
                            None
                        }
                        Ok((id, Err(error))) => Some(GroupFault::Failed {
                            task: take_name(&mut names, id),
                            error,
                        }),
                        Err(err) => {
                            let task = take_name(&mut names, err.id());
                            if err.is_panic() {
                                let message = panic_message(err.into_panic().as_ref());
                                Some(GroupFault::Panicked { task, message })
                            } else {
                                Some(GroupFault::Failed {
                                    task,
                                    error: anyhow::anyhow!("unit was cancelled"),
                                })
                            }
                        }
                    };

                    if let Some(fault) = fault {
                        if first_fault.is_none() {
                            first_fault = Some(fault);
                        } else {
                            warn!(%fault, "additional fault in task group");
                        }
                    }
                },
                else => break,
            }
        }

        first_fault
    }
}

fn take_name(names: &mut HashMap<Id, String>, id: Id) -> String {
    names.remove(&id).unwrap_or_else(|| format!("task-{id}"))
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
