//! A scriptable filter engine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::FilterEngine;
use crate::av::Frame;
use crate::error::{AvError, Result};

/// Engine that forwards frames from source pads to sink pads unchanged.
///
/// Routes are declared by pad name (`route("in", "out")`). Several sources
/// may feed one sink and one source may feed several sinks.
#[derive(Default)]
pub struct PassthroughGraph {
    routes: Vec<(String, String)>,
    queues: HashMap<String, VecDeque<Frame>>,
    held: HashMap<String, VecDeque<Frame>>,
    ended: HashSet<String>,
    hold_until_end: bool,
    push_gate: Option<Arc<Semaphore>>,
    fail_push_at: Option<usize>,
    pushes: usize,
    descriptor: Arc<Mutex<Option<String>>>,
}

/// Pad name from an instance id such as `abuffersink@out`.
fn pad_name(id: &str) -> &str {
    id.split_once('@').map(|(_, name)| name).unwrap_or(id)
}

impl PassthroughGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, source: &str, sink: &str) -> Self {
        self.routes.push((source.to_string(), sink.to_string()));
        self
    }

    /// Frames only come out once their source has ended, like a filter
    /// that needs to see its whole input first.
    pub fn hold_until_end(mut self) -> Self {
        self.hold_until_end = true;
        self
    }

    /// Every push waits for one permit of `gate`.
    pub fn with_push_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.push_gate = Some(gate);
        self
    }

    /// The push with this zero based number fails.
    pub fn failing_push(mut self, at: usize) -> Self {
        self.fail_push_at = Some(at);
        self
    }

    /// Descriptor the engine was configured with.
    pub fn descriptor(&self) -> Arc<Mutex<Option<String>>> {
        self.descriptor.clone()
    }

    fn deliver(&mut self, source: &str, frame: &Frame) {
        for (_, sink) in self.routes.iter().filter(|(s, _)| s == source) {
            self.queues.entry(sink.clone()).or_default().push_back(frame.clone());
        }
    }
}

#[async_trait]
impl FilterEngine for PassthroughGraph {
    async fn configure(&mut self, descriptor: &str) -> Result<()> {
        for (source, sink) in &self.routes {
            for name in [source, sink] {
                if !descriptor.contains(&format!("@{}", name)) {
                    return Err(AvError::Engine(format!("no pad named {} in graph", name)));
                }
            }
        }
        *self.descriptor.lock() = Some(descriptor.to_string());
        Ok(())
    }

    async fn push(&mut self, pad: &str, frame: Option<Frame>) -> Result<()> {
        let n = self.pushes;
        self.pushes += 1;
        if let Some(gate) = &self.push_gate {
            gate.acquire()
                .await
                .map_err(|_| AvError::Closed("push gate closed".into()))?
                .forget();
        }
        if self.fail_push_at == Some(n) {
            return Err(AvError::Engine(format!("push {} failed", n)));
        }
        tokio::task::yield_now().await;

        let source = pad_name(pad).to_string();
        match frame {
            Some(frame) if self.hold_until_end => {
                self.held.entry(source).or_default().push_back(frame);
            }
            Some(frame) => self.deliver(&source, &frame),
            None => {
                let held = self.held.remove(&source).unwrap_or_default();
                for frame in &held {
                    self.deliver(&source, frame);
                }
                self.ended.insert(source);
            }
        }
        Ok(())
    }

    async fn pull(&mut self, pad: &str) -> Result<Option<Frame>> {
        tokio::task::yield_now().await;
        Ok(self
            .queues
            .get_mut(pad_name(pad))
            .and_then(VecDeque::pop_front))
    }
}
