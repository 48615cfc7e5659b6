use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use flowdag::{Node, NodeContext, NodeOutput};

/// Something a recorded handler did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Finished(String),
}

/// Builds nodes whose handlers record when they start and finish.
///
/// Cloning shares the log, so the same recorder can be captured by every
/// handler in a graph and inspected after the run.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Ids in the order their handlers started.
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Started(id) => Some(id),
                Event::Finished(_) => None,
            })
            .collect()
    }

    /// How many times each handler started.
    pub fn start_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for id in self.started() {
            *counts.entry(id).or_insert(0) += 1;
        }
        counts
    }

    pub fn start_count(&self, id: &str) -> usize {
        self.start_counts().get(id).copied().unwrap_or(0)
    }

    /// Whether `before` finished before `after` started.
    pub fn finished_before_started(&self, before: &str, after: &str) -> bool {
        let events = self.events();
        let finished = events
            .iter()
            .position(|e| *e == Event::Finished(before.to_string()));
        let started = events
            .iter()
            .position(|e| *e == Event::Started(after.to_string()));
        matches!((finished, started), (Some(f), Some(s)) if f < s)
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    /// Node that succeeds with `value`.
    pub fn succeed<T>(&self, id: &str, value: T) -> Node
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        self.sleep_then_succeed(id, Duration::ZERO, value)
    }

    /// Node that sleeps for `delay`, then succeeds with `value`.
    pub fn sleep_then_succeed<T>(&self, id: &str, delay: Duration, value: T) -> Node
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        let recorder = self.clone();
        Node::new(id, move |ctx| {
            let recorder = recorder.clone();
            let value = value.clone();
            async move {
                recorder.push(Event::Started(ctx.id().to_string()));
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                recorder.push(Event::Finished(ctx.id().to_string()));
                anyhow::Ok(NodeOutput::new(value))
            }
        })
    }

    /// Node whose handler returns an error.
    pub fn fail(&self, id: &str, message: &str) -> Node {
        let recorder = self.clone();
        let message = message.to_string();
        Node::new(id, move |ctx| {
            let recorder = recorder.clone();
            let message = message.clone();
            async move {
                recorder.push(Event::Started(ctx.id().to_string()));
                recorder.push(Event::Finished(ctx.id().to_string()));
                Err::<NodeOutput, _>(anyhow::anyhow!(message))
            }
        })
    }

    /// Node whose handler panics.
    pub fn panic(&self, id: &str) -> Node {
        let recorder = self.clone();
        Node::new(id, move |ctx| panicking(recorder.clone(), ctx))
    }
}

async fn panicking(recorder: Recorder, ctx: NodeContext) -> anyhow::Result<NodeOutput> {
    recorder.push(Event::Started(ctx.id().to_string()));
    panic!("handler for {} blew up", ctx.id());
}
