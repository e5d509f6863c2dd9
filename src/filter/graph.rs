use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::Stream;
use log::{debug, error, info};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use super::{FilterEngine, FilterOptions, PadKind};
use crate::av::{Frame, Rational};
use crate::error::{AvError, Result};
use crate::utils::{Completion, Waiter};

struct SourcePad {
    id: String,
    kind: PadKind,
    busy: bool,
    ended: bool,
}

struct SinkPad {
    id: String,
    kind: PadKind,
    busy: bool,
    pending: usize,
    ended: bool,
    queue: VecDeque<Frame>,
    error: Option<AvError>,
    waker: Arc<Notify>,
}

struct FilterState {
    sources: HashMap<String, SourcePad>,
    sinks: HashMap<String, SinkPad>,
    live_sources: usize,
    /// Bumped by every completed push
    epoch: u64,
    destroyed: Option<AvError>,
}

struct Shared<E> {
    engine: tokio::sync::Mutex<E>,
    state: Mutex<FilterState>,
    time_base: Rational,
    high_water_mark: usize,
    completion: Completion<()>,
}

/// A configured filter graph with named source and sink pads.
///
/// Only one engine operation runs at a time. A source pad accepts one write
/// at a time; a second write while the first is still in the engine is a
/// protocol violation that destroys the graph.
pub struct Filter<E: FilterEngine> {
    shared: Arc<Shared<E>>,
    sources: HashMap<String, FilterSource<E>>,
    sinks: HashMap<String, FilterSink<E>>,
}

/// Write side of one graph input.
pub struct FilterSource<E: FilterEngine> {
    name: String,
    kind: PadKind,
    shared: Arc<Shared<E>>,
}

/// Read side of one graph output.
pub struct FilterSink<E: FilterEngine> {
    name: String,
    kind: PadKind,
    shared: Arc<Shared<E>>,
    waker: Arc<Notify>,
}

impl<E: FilterEngine> Filter<E> {
    /// Configures the engine. The graph is ready once this resolves.
    pub async fn new(mut engine: E, options: FilterOptions) -> Result<Self> {
        let descriptor = options.graph_descriptor()?;
        debug!("filter graph: {}", descriptor);
        engine.configure(&descriptor).await?;

        let mut source_pads = HashMap::new();
        for (name, definition) in &options.inputs {
            let kind = PadKind::of(definition)?;
            let pad = SourcePad {
                id: kind.source_id(name),
                kind,
                busy: false,
                ended: false,
            };
            if source_pads.insert(name.clone(), pad).is_some() {
                return Err(AvError::InvalidData(format!("duplicate input [{}]", name)));
            }
        }
        let mut sink_pads = HashMap::new();
        for (name, definition) in &options.outputs {
            let kind = PadKind::of(definition)?;
            let pad = SinkPad {
                id: kind.sink_id(name),
                kind,
                busy: false,
                pending: 0,
                ended: false,
                queue: VecDeque::new(),
                error: None,
                waker: Arc::new(Notify::new()),
            };
            if sink_pads.insert(name.clone(), pad).is_some() {
                return Err(AvError::InvalidData(format!("duplicate output [{}]", name)));
            }
        }

        let completion = Completion::new();
        if source_pads.is_empty() {
            completion.resolve(Ok(()));
        }
        let shared = Arc::new(Shared {
            engine: tokio::sync::Mutex::new(engine),
            state: Mutex::new(FilterState {
                live_sources: source_pads.len(),
                sources: HashMap::new(),
                sinks: HashMap::new(),
                epoch: 0,
                destroyed: None,
            }),
            time_base: options.time_base,
            high_water_mark: options.high_water_mark.max(1),
            completion,
        });

        let sources = source_pads
            .iter()
            .map(|(name, pad)| {
                let source = FilterSource {
                    name: name.clone(),
                    kind: pad.kind,
                    shared: shared.clone(),
                };
                (name.clone(), source)
            })
            .collect();
        let sinks = sink_pads
            .iter()
            .map(|(name, pad)| {
                let sink = FilterSink {
                    name: name.clone(),
                    kind: pad.kind,
                    shared: shared.clone(),
                    waker: pad.waker.clone(),
                };
                (name.clone(), sink)
            })
            .collect();
        {
            let mut state = shared.state.lock();
            state.sources = source_pads;
            state.sinks = sink_pads;
        }
        info!(
            "filter graph configured: {} inputs, {} outputs",
            options.inputs.len(),
            options.outputs.len()
        );
        Ok(Self {
            shared,
            sources,
            sinks,
        })
    }

    pub fn take_source(&mut self, name: &str) -> Option<FilterSource<E>> {
        self.sources.remove(name)
    }

    pub fn take_sink(&mut self, name: &str) -> Option<FilterSink<E>> {
        self.sinks.remove(name)
    }

    /// Destroys the graph with `AvError::Cancelled`.
    pub fn abort(&self) {
        self.shared.destroy(AvError::Cancelled);
    }

    /// Outcome of the graph: `Ok` once every source has ended.
    pub fn completion(&self) -> Waiter<()> {
        self.shared.completion.waiter()
    }

    pub async fn closed(&self) -> Result<()> {
        self.completion().wait().await
    }
}

impl<E: FilterEngine> FilterSource<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PadKind {
        self.kind
    }

    /// Pushes one frame into the graph.
    ///
    /// The push keeps running if this future is dropped; writing again
    /// before it has finished destroys the graph.
    pub async fn write(&mut self, frame: Frame) -> Result<()> {
        self.push(Some(frame)).await
    }

    /// Signals the end of this input.
    pub async fn end(mut self) -> Result<()> {
        self.push(None).await
    }

    async fn push(&mut self, frame: Option<Frame>) -> Result<()> {
        let done = {
            let mut state = self.shared.state.lock();
            if let Some(e) = &state.destroyed {
                return Err(e.clone());
            }
            let Some(pad) = state.sources.get_mut(&self.name) else {
                return Err(AvError::InvalidData(format!("invalid source [{}]", self.name)));
            };
            let (busy, ended) = (pad.busy, pad.ended);
            let id = pad.id.clone();
            if ended {
                return Err(AvError::Closed(format!("[{}] already ended", self.name)));
            }
            if busy {
                let e = AvError::Reentrancy(format!("writing is not reentrant on [{}]", self.name));
                self.shared.destroy_locked(&mut state, e.clone());
                return Err(e);
            }

            let frame = match frame {
                Some(frame) if !self.kind.accepts(&frame) => {
                    let e = AvError::TypeMismatch {
                        pad: self.name.clone(),
                        expected: self.kind.media_kind(),
                        found: frame.kind(),
                    };
                    self.shared.destroy_locked(&mut state, e.clone());
                    return Err(e);
                }
                Some(mut frame) => {
                    frame.set_time_base(self.shared.time_base);
                    frame.set_stream_index(0);
                    debug!("[{}] push frame pts={:?}", self.name, frame.pts());
                    Some(frame)
                }
                None => {
                    debug!("[{}] push end of stream", self.name);
                    None
                }
            };
            if let Some(pad) = state.sources.get_mut(&self.name) {
                pad.busy = true;
            }
            let (tx, rx) = oneshot::channel();
            tokio::spawn(push_task(self.shared.clone(), self.name.clone(), id, frame, tx));
            rx
        };
        done.await
            .unwrap_or_else(|_| Err(AvError::Closed("push dropped by the filter".into())))
    }
}

impl<E: FilterEngine> FilterSink<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PadKind {
        self.kind
    }

    /// Next filtered frame, `None` once every source has ended and the graph is drained.
    pub async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            {
                let mut state = self.shared.state.lock();
                let state = &mut *state;
                let sink = state.sinks.get_mut(&self.name)?;
                if let Some(frame) = sink.queue.pop_front() {
                    return Some(Ok(frame));
                }
                if let Some(e) = sink.error.take() {
                    return Some(Err(e));
                }
                if sink.ended || state.destroyed.is_some() {
                    return None;
                }
                if sink.pending == 0 {
                    sink.pending = self.shared.high_water_mark;
                }
                if !sink.busy {
                    sink.busy = true;
                    tokio::spawn(pull_loop(self.shared.clone(), self.name.clone()));
                }
            }
            self.waker.notified().await;
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Frame>> + Send {
        futures::stream::unfold(self, |mut sink| async move {
            sink.recv().await.map(|item| (item, sink))
        })
    }
}

impl<E> Shared<E> {
    fn destroy(&self, error: AvError) {
        let mut state = self.state.lock();
        self.destroy_locked(&mut state, error);
    }

    fn destroy_locked(&self, state: &mut FilterState, error: AvError) {
        if state.destroyed.is_some() {
            return;
        }
        error!("filter graph destroyed: {}", error);
        state.destroyed = Some(error.clone());
        for sink in state.sinks.values_mut() {
            sink.queue.clear();
            sink.pending = 0;
            sink.error = Some(error.clone());
            sink.waker.notify_one();
        }
        self.completion.resolve(Err(error));
    }
}

/// Marks every idle sink that still wants frames as busy and returns it.
fn sinks_to_wake(state: &mut FilterState) -> Vec<String> {
    state
        .sinks
        .iter_mut()
        .filter(|(_, sink)| sink.pending > 0 && !sink.busy && !sink.ended)
        .map(|(name, sink)| {
            sink.busy = true;
            name.clone()
        })
        .collect()
}

async fn push_task<E: FilterEngine>(
    shared: Arc<Shared<E>>,
    name: String,
    id: String,
    frame: Option<Frame>,
    done: oneshot::Sender<Result<()>>,
) {
    let last = frame.is_none();
    let result = {
        let mut engine = shared.engine.lock().await;
        engine.push(&id, frame).await
    };

    let (result, wake) = {
        let mut state = shared.state.lock();
        let destroyed = state.destroyed.clone();
        match result {
            Err(e) => {
                shared.destroy_locked(&mut state, e.clone());
                (Err(e), Vec::new())
            }
            Ok(()) => match destroyed {
                Some(e) => (Err(e), Vec::new()),
                None => {
                    if let Some(pad) = state.sources.get_mut(&name) {
                        pad.busy = false;
                        pad.ended |= last;
                    }
                    state.epoch += 1;
                    if last {
                        state.live_sources = state.live_sources.saturating_sub(1);
                        if state.live_sources == 0 {
                            info!("filter graph: all sources ended");
                            shared.completion.resolve(Ok(()));
                        }
                    }
                    (Ok(()), sinks_to_wake(&mut state))
                }
            },
        }
    };
    let _ = done.send(result);
    for sink in wake {
        debug!("[{}] woken by a write on [{}]", sink, name);
        tokio::spawn(pull_loop(shared.clone(), sink));
    }
}

async fn pull_loop<E: FilterEngine>(shared: Arc<Shared<E>>, name: String) {
    let Some(id) = shared.state.lock().sinks.get(&name).map(|s| s.id.clone()) else {
        return;
    };
    loop {
        let (result, epoch) = {
            let mut engine = shared.engine.lock().await;
            let epoch = shared.state.lock().epoch;
            (engine.pull(&id).await, epoch)
        };

        let mut state = shared.state.lock();
        if state.destroyed.is_some() {
            return;
        }
        let frame = match result {
            Err(e) => {
                shared.destroy_locked(&mut state, e);
                return;
            }
            Ok(frame) => frame,
        };
        let epoch_moved = state.epoch != epoch;
        let all_ended = state.live_sources == 0;
        let Some(sink) = state.sinks.get_mut(&name) else {
            return;
        };
        match frame {
            Some(mut frame) => {
                frame.set_time_base(shared.time_base);
                frame.set_stream_index(0);
                debug!("[{}] pulled frame pts={:?}", name, frame.pts());
                sink.queue.push_back(frame);
                sink.pending = sink.pending.saturating_sub(1);
                sink.waker.notify_one();
                if sink.pending > 0 {
                    continue;
                }
                sink.busy = false;
                return;
            }
            // A write landed while this pull was in flight; its wakeup skipped us
            None if epoch_moved => continue,
            None if all_ended => {
                debug!("[{}] end of stream", name);
                sink.ended = true;
                sink.busy = false;
                sink.waker.notify_one();
                return;
            }
            None => {
                sink.busy = false;
                return;
            }
        }
    }
}
