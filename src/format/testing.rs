//! In-memory containers for exercising the coordinators without a media engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::{InputContext, OutputContext};
use crate::av::{Packet, StreamDefinition};
use crate::error::{AvError, Result};

/// Source that replays a scripted list of packets and errors.
pub struct MemoryInput {
    locator: String,
    streams: Vec<StreamDefinition>,
    script: VecDeque<Result<Packet>>,
    open_error: Option<AvError>,
    probe_error: Option<AvError>,
    read_gate: Option<Arc<Semaphore>>,
    reads: Arc<AtomicUsize>,
}

impl MemoryInput {
    pub fn new(streams: Vec<StreamDefinition>) -> Self {
        Self {
            locator: String::from("memory://input"),
            streams,
            script: VecDeque::new(),
            open_error: None,
            probe_error: None,
            read_gate: None,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_locator(mut self, locator: &str) -> Self {
        self.locator = locator.to_string();
        self
    }

    pub fn with_packets(mut self, packets: impl IntoIterator<Item = Packet>) -> Self {
        self.script.extend(packets.into_iter().map(Ok));
        self
    }

    /// Makes the read following the scripted packets fail.
    pub fn with_error(mut self, error: AvError) -> Self {
        self.script.push_back(Err(error));
        self
    }

    pub fn failing_open(mut self, error: AvError) -> Self {
        self.open_error = Some(error);
        self
    }

    pub fn failing_probe(mut self, error: AvError) -> Self {
        self.probe_error = Some(error);
        self
    }

    /// Each read waits for one permit of `gate` after it is counted.
    pub fn with_read_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.read_gate = Some(gate);
        self
    }

    /// Counts `read_packet` calls.
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

#[async_trait]
impl InputContext for MemoryInput {
    fn locator(&self) -> String {
        self.locator.clone()
    }

    async fn open(&mut self) -> Result<()> {
        match self.open_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn probe(&mut self) -> Result<Vec<StreamDefinition>> {
        match self.probe_error.take() {
            Some(e) => Err(e),
            None => Ok(self.streams.clone()),
        }
    }

    async fn read_packet(&mut self) -> Result<Option<Packet>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.read_gate {
            gate.acquire()
                .await
                .map_err(|_| AvError::Closed("read gate closed".into()))?
                .forget();
        }
        tokio::task::yield_now().await;
        self.script.pop_front().transpose()
    }
}

/// Everything a [`MemoryOutput`] was asked to do, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    AddStream(StreamDefinition),
    Open,
    Header,
    Packet(Packet),
    Flush,
    Trailer,
    Close,
}

/// Shared view of a [`MemoryOutput`]'s activity.
#[derive(Debug, Clone, Default)]
pub struct OutputLog {
    events: Arc<Mutex<Vec<OutputEvent>>>,
    writes_started: Arc<AtomicUsize>,
}

impl OutputLog {
    pub fn events(&self) -> Vec<OutputEvent> {
        self.events.lock().clone()
    }

    pub fn packets(&self) -> Vec<Packet> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Packet(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, event: &OutputEvent) -> bool {
        self.events.lock().contains(event)
    }

    /// Number of `write_packet` calls that have begun, finished or not.
    pub fn writes_started(&self) -> usize {
        self.writes_started.load(Ordering::SeqCst)
    }

    fn push(&self, event: OutputEvent) {
        self.events.lock().push(event);
    }
}

/// Sink that records every call into an [`OutputLog`].
pub struct MemoryOutput {
    log: OutputLog,
    global_header: bool,
    write_gate: Option<Arc<Semaphore>>,
    trailer_gate: Option<Arc<Semaphore>>,
    fail_write_at: Option<usize>,
    open_error: Option<AvError>,
    streams: usize,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self {
            log: OutputLog::default(),
            global_header: false,
            write_gate: None,
            trailer_gate: None,
            fail_write_at: None,
            open_error: None,
            streams: 0,
        }
    }

    pub fn log(&self) -> OutputLog {
        self.log.clone()
    }

    /// Behave like a format that needs out-of-band codec headers.
    pub fn with_global_header(mut self) -> Self {
        self.global_header = true;
        self
    }

    /// Each packet write waits for one permit of `gate`.
    pub fn with_write_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.write_gate = Some(gate);
        self
    }

    /// `write_trailer` records its event, then waits for one permit of `gate`.
    pub fn with_trailer_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.trailer_gate = Some(gate);
        self
    }

    /// The write with this zero based number fails.
    pub fn failing_write(mut self, at: usize) -> Self {
        self.fail_write_at = Some(at);
        self
    }

    pub fn failing_open(mut self, error: AvError) -> Self {
        self.open_error = Some(error);
        self
    }
}

impl Default for MemoryOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutputContext for MemoryOutput {
    fn locator(&self) -> String {
        String::from("memory://output")
    }

    fn requires_global_header(&self) -> bool {
        self.global_header
    }

    async fn add_stream(&mut self, definition: &StreamDefinition) -> Result<usize> {
        self.log.push(OutputEvent::AddStream(definition.clone()));
        self.streams += 1;
        Ok(self.streams - 1)
    }

    async fn open(&mut self) -> Result<()> {
        if let Some(e) = self.open_error.take() {
            return Err(e);
        }
        self.log.push(OutputEvent::Open);
        Ok(())
    }

    async fn write_header(&mut self) -> Result<()> {
        self.log.push(OutputEvent::Header);
        Ok(())
    }

    async fn write_packet(&mut self, packet: Packet) -> Result<()> {
        let n = self.log.writes_started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.write_gate {
            gate.acquire()
                .await
                .map_err(|_| AvError::Closed("write gate closed".into()))?
                .forget();
        }
        if packet.stream_index >= self.streams {
            return Err(AvError::UnknownTrack {
                index: packet.stream_index,
            });
        }
        if self.fail_write_at == Some(n) {
            return Err(AvError::Engine(format!("write {} failed", n)));
        }
        tokio::task::yield_now().await;
        self.log.push(OutputEvent::Packet(packet));
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.log.push(OutputEvent::Flush);
        Ok(())
    }

    async fn write_trailer(&mut self) -> Result<()> {
        self.log.push(OutputEvent::Trailer);
        if let Some(gate) = &self.trailer_gate {
            gate.acquire()
                .await
                .map_err(|_| AvError::Closed("trailer gate closed".into()))?
                .forget();
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push(OutputEvent::Close);
        Ok(())
    }
}
