use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::try_join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::OutputContext;
use crate::av::{CodecFlags, MediaKind, Packet, StreamDefinition};
use crate::codec::EncodedStream;
use crate::error::{AvError, Result};
use crate::utils::{Completion, Waiter};

struct WriteJob {
    index: usize,
    packet: Packet,
    done: oneshot::Sender<Result<()>>,
}

/// Owner of the output handle. Whoever holds it is the only writer.
enum SinkSlot<O> {
    Idle(O),
    InFlight,
    Closed,
}

struct MuxState<O> {
    slot: SinkSlot<O>,
    primed: bool,
    queue: VecDeque<WriteJob>,
    ended: usize,
    finalize: bool,
    delayed_destroy: Option<AvError>,
    destroyed: Option<AvError>,
}

struct Shared<O> {
    locator: String,
    streams: Vec<EncodedStream>,
    state: Mutex<MuxState<O>>,
    priming: CancellationToken,
    completion: Completion<()>,
}

/// Interleaves several encoded streams into one container.
///
/// Nothing is written before every input is ready: the output streams are
/// created from the final encoder definitions, then the header goes out.
/// Packets from all inputs then share a single queue, so the output is
/// only ever touched by one operation at a time. The trailer is written
/// when the last input ends.
pub struct Muxer<O: OutputContext> {
    shared: Arc<Shared<O>>,
    inputs: Vec<Option<MuxerInput<O>>>,
}

/// Write side of one muxer stream.
pub struct MuxerInput<O: OutputContext> {
    index: usize,
    kind: MediaKind,
    shared: Arc<Shared<O>>,
    ended: bool,
}

impl<O: OutputContext> Muxer<O> {
    pub fn new(output: O, streams: Vec<EncodedStream>) -> Result<Self> {
        if streams.is_empty() {
            return Err(AvError::InvalidData("muxer needs at least one stream".into()));
        }
        let locator = output.locator();
        let global_header = output.requires_global_header();
        let mut kinds = Vec::with_capacity(streams.len());
        for stream in &streams {
            kinds.push(stream.definition().require_av("muxer")?);
            if global_header && !stream.is_passthrough() {
                stream.add_flags(CodecFlags::GLOBAL_HEADER);
            }
        }
        debug!("{}: created muxer with {} streams", locator, streams.len());

        let shared = Arc::new(Shared {
            locator,
            streams,
            state: Mutex::new(MuxState {
                slot: SinkSlot::Idle(output),
                primed: false,
                queue: VecDeque::new(),
                ended: 0,
                finalize: false,
                delayed_destroy: None,
                destroyed: None,
            }),
            priming: CancellationToken::new(),
            completion: Completion::new(),
        });
        let inputs = kinds
            .into_iter()
            .enumerate()
            .map(|(index, kind)| {
                Some(MuxerInput {
                    index,
                    kind,
                    shared: shared.clone(),
                    ended: false,
                })
            })
            .collect();
        Ok(Self { shared, inputs })
    }

    pub fn locator(&self) -> &str {
        &self.shared.locator
    }

    pub fn video_indices(&self) -> Vec<usize> {
        self.indices_of(MediaKind::Video)
    }

    pub fn audio_indices(&self) -> Vec<usize> {
        self.indices_of(MediaKind::Audio)
    }

    fn indices_of(&self, kind: MediaKind) -> Vec<usize> {
        self.shared
            .streams
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind() == kind)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn take_input(&mut self, index: usize) -> Option<MuxerInput<O>> {
        self.inputs.get_mut(index).and_then(Option::take)
    }

    pub fn into_inputs(self) -> Vec<MuxerInput<O>> {
        self.inputs.into_iter().flatten().collect()
    }

    /// Tears the muxer down with `AvError::Cancelled`.
    pub fn abort(&self) {
        self.shared.destroy(AvError::Cancelled);
    }

    /// Outcome of the muxer: `Ok` once the trailer is written and the output closed.
    pub fn completion(&self) -> Waiter<()> {
        self.shared.completion.waiter()
    }

    pub async fn closed(&self) -> Result<()> {
        self.completion().wait().await
    }
}

impl<O: OutputContext> MuxerInput<O> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Outcome of the muxer this input belongs to.
    pub fn completion(&self) -> Waiter<()> {
        self.shared.completion.waiter()
    }

    /// Queues a packet and waits until it has been written.
    ///
    /// Incomplete packets are dropped. Dropping the returned future does not
    /// cancel a write that was already queued.
    pub async fn write(&mut self, packet: Packet) -> Result<()> {
        let done = {
            let mut state = self.shared.state.lock();
            if let Some(e) = state.delayed_destroy.as_ref().or(state.destroyed.as_ref()) {
                return Err(e.clone());
            }
            if matches!(state.slot, SinkSlot::Closed) {
                return Err(AvError::Closed(format!("{} is closed", self.shared.locator)));
            }
            if !packet.is_complete() {
                debug!("{}: skipping empty packet on stream {}", self.shared.locator, self.index);
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(WriteJob {
                index: self.index,
                packet,
                done: tx,
            });
            kick(&self.shared, &mut state);
            rx
        };
        done.await
            .unwrap_or_else(|_| Err(AvError::Closed("write dropped by the muxer".into())))
    }

    /// Marks this stream finished.
    ///
    /// The call that ends the last stream also writes the trailer and
    /// resolves with the muxer's final outcome.
    pub async fn end(mut self) -> Result<()> {
        self.ended = true;
        let completion = {
            let mut state = self.shared.state.lock();
            if let Some(e) = state.delayed_destroy.as_ref().or(state.destroyed.as_ref()) {
                return Err(e.clone());
            }
            state.ended += 1;
            debug!("{}: end of stream {}", self.shared.locator, self.index);
            if state.ended < self.shared.streams.len() {
                return Ok(());
            }
            info!("{}: all streams ended, writing trailer", self.shared.locator);
            state.finalize = true;
            kick(&self.shared, &mut state);
            self.shared.completion.waiter()
        };
        completion.wait().await
    }

    /// Destroys the whole muxer with `error`.
    pub fn abort(mut self, error: AvError) {
        self.ended = true;
        self.shared.destroy(error);
    }
}

impl<O: OutputContext> Drop for MuxerInput<O> {
    fn drop(&mut self) {
        if !self.ended && !std::thread::panicking() {
            warn!(
                "{}: stream {} dropped without end, the trailer will never be written",
                self.shared.locator, self.index
            );
        }
    }
}

impl<O: OutputContext> Shared<O> {
    fn destroy(self: &Arc<Self>, error: AvError) {
        let output = {
            let mut state = self.state.lock();
            if state.destroyed.is_some() {
                return;
            }
            match std::mem::replace(&mut state.slot, SinkSlot::Closed) {
                SinkSlot::Idle(output) => {
                    state.destroyed = Some(error.clone());
                    output
                }
                SinkSlot::InFlight => {
                    warn!("{}: destroy while writing, delaying", self.locator);
                    state.slot = SinkSlot::InFlight;
                    state.delayed_destroy.get_or_insert(error);
                    self.priming.cancel();
                    return;
                }
                SinkSlot::Closed => return,
            }
        };
        tokio::spawn(shutdown(self.clone(), output, error));
    }

    fn fail_upstream(&self) {
        for stream in &self.streams {
            stream.cancellation().cancel();
        }
    }
}

/// Starts a write cycle unless one is running.
fn kick<O: OutputContext>(shared: &Arc<Shared<O>>, state: &mut MuxState<O>) {
    if !matches!(state.slot, SinkSlot::Idle(_)) {
        debug!("{}: write cycle busy, enqueued", shared.locator);
        return;
    }
    if let SinkSlot::Idle(output) = std::mem::replace(&mut state.slot, SinkSlot::InFlight) {
        tokio::spawn(drain(shared.clone(), output));
    }
}

enum Next {
    Write(WriteJob),
    Destroy(AvError),
    Finalize,
}

async fn drain<O: OutputContext>(shared: Arc<Shared<O>>, mut output: O) {
    let primed = shared.state.lock().primed;
    if !primed {
        let result = prime(&shared, &mut output).await;
        let deferred = {
            let mut state = shared.state.lock();
            state.primed = result.is_ok();
            state.delayed_destroy.take()
        };
        let failure = match (deferred, result) {
            (Some(e), _) => Some(e),
            (None, Err(e)) => Some(e),
            (None, Ok(())) => None,
        };
        if let Some(e) = failure {
            shutdown(shared, output, e).await;
            return;
        }
    }

    loop {
        let next = {
            let mut state = shared.state.lock();
            if let Some(e) = state.delayed_destroy.take() {
                Next::Destroy(e)
            } else if let Some(job) = state.queue.pop_front() {
                Next::Write(job)
            } else if state.finalize {
                Next::Finalize
            } else {
                state.slot = SinkSlot::Idle(output);
                debug!("{}: end of write cycle", shared.locator);
                return;
            }
        };

        match next {
            Next::Destroy(e) => {
                shutdown(shared, output, e).await;
                return;
            }
            Next::Write(WriteJob {
                index,
                mut packet,
                done,
            }) => {
                packet.stream_index = index;
                debug!(
                    "{}: write packet pts={:?} dts={:?} / {} / stream {}",
                    shared.locator, packet.pts, packet.dts, packet.time_base, index
                );
                let result = output.write_packet(packet).await;
                let deferred = shared.state.lock().delayed_destroy.take();
                match (result, deferred) {
                    (Ok(()), None) => {
                        let _ = done.send(Ok(()));
                    }
                    (Err(e), _) | (Ok(()), Some(e)) => {
                        shared.state.lock().destroyed.get_or_insert(e.clone());
                        let _ = done.send(Err(e.clone()));
                        shutdown(shared, output, e).await;
                        return;
                    }
                }
            }
            Next::Finalize => {
                let result = match output.write_trailer().await {
                    Ok(()) => output.close().await,
                    Err(e) => Err(e),
                };
                let deferred = shared.state.lock().delayed_destroy.take();
                match (result, deferred) {
                    (Ok(()), None) => {
                        shared.state.lock().slot = SinkSlot::Closed;
                        info!("{}: finished", shared.locator);
                        shared.completion.resolve(Ok(()));
                    }
                    (Ok(()), Some(e)) => {
                        // Output is already closed, only the outcome changes
                        warn!("{}: destroyed while finishing: {}", shared.locator, e);
                        drop(output);
                        {
                            let mut state = shared.state.lock();
                            state.slot = SinkSlot::Closed;
                            state.destroyed.get_or_insert(e.clone());
                        }
                        shared.fail_upstream();
                        shared.completion.resolve(Err(e));
                    }
                    (Err(e), _) => shutdown(shared, output, e).await,
                }
                return;
            }
        }
    }
}

/// Waits for every input, then creates the output streams and the header.
async fn prime<O: OutputContext>(shared: &Shared<O>, output: &mut O) -> Result<()> {
    info!("{}: waiting for all inputs to be ready", shared.locator);
    let ready = try_join_all(shared.streams.iter().map(|s| s.ready().wait()));
    let definitions: Vec<StreamDefinition> = tokio::select! {
        definitions = ready => definitions?,
        _ = shared.priming.cancelled() => return Err(AvError::Cancelled),
    };

    for (index, definition) in definitions.iter().enumerate() {
        let created = output.add_stream(definition).await?;
        debug!(
            "{}: created stream {} -> {}: {} {}",
            shared.locator,
            index,
            created,
            definition.kind(),
            definition.codec
        );
    }
    output
        .open()
        .await
        .map_err(|e| AvError::Open(format!("{}: {}", shared.locator, e)))?;
    output.write_header().await?;
    output.flush().await?;
    info!("{}: ready, header written", shared.locator);
    Ok(())
}

/// Closes the output and fails everything still waiting on it. Runs at most once.
async fn shutdown<O: OutputContext>(shared: Arc<Shared<O>>, mut output: O, error: AvError) {
    shared.state.lock().destroyed.get_or_insert(error.clone());
    if let Err(e) = output.close().await {
        warn!("{}: close failed during destroy: {}", shared.locator, e);
    }
    drop(output);

    let jobs = {
        let mut state = shared.state.lock();
        state.slot = SinkSlot::Closed;
        state.delayed_destroy = None;
        std::mem::take(&mut state.queue)
    };
    for job in jobs {
        let _ = job.done.send(Err(error.clone()));
    }
    shared.fail_upstream();
    if shared.completion.resolve(Err(error.clone())) {
        error!("{}: destroyed: {}", shared.locator, error);
    }
}
