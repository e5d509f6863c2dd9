use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use log::{debug, error, info};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::InputContext;
use crate::av::{MediaKind, Packet, StreamDefinition};
use crate::config;
use crate::error::{AvError, Result};
use crate::utils::{Completion, Waiter};

/// Tuning for a [`Demuxer`].
#[derive(Debug, Clone, PartialEq)]
pub struct DemuxerOptions {
    /// Packets requested each time a stream runs dry
    pub high_water_mark: usize,
    /// Packets a stream may hold without asking for them before the demuxer fails
    pub max_buffered_packets: Option<usize>,
}

impl Default for DemuxerOptions {
    fn default() -> Self {
        let config = config::get();
        Self {
            high_water_mark: config.high_water_mark,
            max_buffered_packets: config.max_buffered_packets,
        }
    }
}

/// Owner of the input handle. Only one read cycle may hold it.
enum ReadSlot<I> {
    Idle(I),
    Reading,
    Closed,
}

#[derive(Default)]
struct Channel {
    queue: VecDeque<Packet>,
    demand: usize,
    ended: bool,
    error: Option<AvError>,
}

struct DemuxState<I> {
    slot: ReadSlot<I>,
    channels: Vec<Channel>,
    destroyed: bool,
}

struct Shared<I> {
    locator: String,
    options: DemuxerOptions,
    state: Mutex<DemuxState<I>>,
    wakers: Vec<Notify>,
    completion: Completion<()>,
}

/// Splits one input into independently consumed per-track streams.
///
/// Every stream shares a single reader: whichever stream asks for data
/// drives the source, and packets for the other tracks are buffered on
/// their own streams until those are read.
///
/// ```rust
/// use avpipe::av::{Packet, StreamDefinition};
/// use avpipe::format::{testing::MemoryInput, Demuxer};
///
/// # #[tokio::main]
/// # async fn main() -> avpipe::Result<()> {
/// let input = MemoryInput::new(vec![StreamDefinition::video("h264", 640, 480, "yuv420p")])
///     .with_packets(vec![Packet::new(vec![1, 2, 3]).with_stream_index(0)]);
///
/// let mut demuxer = Demuxer::open(input).await?;
/// let mut video = demuxer.take_stream(demuxer.video_indices()[0]).unwrap();
/// while let Some(packet) = video.recv().await {
///     println!("{} bytes", packet?.size());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Demuxer<I: InputContext> {
    shared: Arc<Shared<I>>,
    definitions: Vec<StreamDefinition>,
    streams: Vec<Option<DemuxedStream<I>>>,
}

/// The read side of one demuxed track.
pub struct DemuxedStream<I: InputContext> {
    index: usize,
    definition: StreamDefinition,
    shared: Arc<Shared<I>>,
}

impl<I: InputContext> Demuxer<I> {
    /// Opens the input with options taken from the process configuration.
    pub async fn open(input: I) -> Result<Self> {
        Self::with_options(input, DemuxerOptions::default()).await
    }

    /// Opens the input, probes its tracks and creates one stream per track.
    pub async fn with_options(mut input: I, options: DemuxerOptions) -> Result<Self> {
        let locator = input.locator();
        info!("opening {}", locator);
        input
            .open()
            .await
            .map_err(|e| AvError::Open(format!("{}: {}", locator, e)))?;
        let definitions = input
            .probe()
            .await
            .map_err(|e| AvError::Probe(format!("{}: {}", locator, e)))?;
        if definitions.is_empty() {
            return Err(AvError::Probe(format!("{}: no streams found", locator)));
        }

        for (index, definition) in definitions.iter().enumerate() {
            debug!(
                "{}: identified stream {}: {} {}, time base {:?}",
                locator,
                index,
                definition.kind(),
                definition.codec,
                definition.time_base
            );
        }

        let options = DemuxerOptions {
            high_water_mark: options.high_water_mark.max(1),
            ..options
        };
        let shared = Arc::new(Shared {
            locator,
            options,
            state: Mutex::new(DemuxState {
                slot: ReadSlot::Idle(input),
                channels: definitions.iter().map(|_| Channel::default()).collect(),
                destroyed: false,
            }),
            wakers: definitions.iter().map(|_| Notify::new()).collect(),
            completion: Completion::new(),
        });

        let streams = definitions
            .iter()
            .enumerate()
            .map(|(index, definition)| {
                Some(DemuxedStream {
                    index,
                    definition: definition.clone(),
                    shared: shared.clone(),
                })
            })
            .collect();

        Ok(Self {
            shared,
            definitions,
            streams,
        })
    }

    pub fn locator(&self) -> &str {
        &self.shared.locator
    }

    /// Definitions of every track, in stream index order.
    pub fn definitions(&self) -> &[StreamDefinition] {
        &self.definitions
    }

    pub fn video_indices(&self) -> Vec<usize> {
        self.indices_of(MediaKind::Video)
    }

    pub fn audio_indices(&self) -> Vec<usize> {
        self.indices_of(MediaKind::Audio)
    }

    fn indices_of(&self, kind: MediaKind) -> Vec<usize> {
        self.definitions
            .iter()
            .enumerate()
            .filter(|(_, d)| d.kind() == kind)
            .map(|(i, _)| i)
            .collect()
    }

    /// Hands out the stream for a track. Each stream can be taken once.
    pub fn take_stream(&mut self, index: usize) -> Option<DemuxedStream<I>> {
        self.streams.get_mut(index).and_then(Option::take)
    }

    /// All streams not taken yet, in stream index order.
    pub fn into_streams(self) -> Vec<DemuxedStream<I>> {
        self.streams.into_iter().flatten().collect()
    }

    /// Destroys every stream with `AvError::Cancelled`.
    pub fn abort(&self) {
        self.shared.destroy(AvError::Cancelled);
    }

    /// Outcome of the whole demuxer: `Ok` at end of input, the error otherwise.
    pub fn completion(&self) -> Waiter<()> {
        self.shared.completion.waiter()
    }

    pub async fn closed(&self) -> Result<()> {
        self.completion().wait().await
    }
}

impl<I: InputContext> DemuxedStream<I> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn definition(&self) -> &StreamDefinition {
        &self.definition
    }

    pub fn kind(&self) -> MediaKind {
        self.definition.kind()
    }

    /// Next packet of this track.
    ///
    /// Returns `None` once the input is exhausted, and a destroy error once
    /// before `None` if the demuxer failed.
    pub async fn recv(&mut self) -> Option<Result<Packet>> {
        loop {
            {
                let mut state = self.shared.state.lock();
                let state = &mut *state;
                let channel = &mut state.channels[self.index];
                if let Some(packet) = channel.queue.pop_front() {
                    return Some(Ok(packet));
                }
                if let Some(error) = channel.error.take() {
                    return Some(Err(error));
                }
                if channel.ended || state.destroyed {
                    return None;
                }
                if channel.demand == 0 {
                    channel.demand = self.shared.options.high_water_mark;
                }
                // A running cycle keeps reading until every demand is met
                if matches!(state.slot, ReadSlot::Idle(_)) {
                    if let ReadSlot::Idle(input) =
                        std::mem::replace(&mut state.slot, ReadSlot::Reading)
                    {
                        debug!(
                            "{}: start of read cycle (requested by stream {})",
                            self.shared.locator, self.index
                        );
                        tokio::spawn(read_cycle(self.shared.clone(), input));
                    }
                }
            }
            self.shared.wakers[self.index].notified().await;
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Packet>> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.recv().await.map(|item| (item, stream))
        })
    }
}

impl<I> Shared<I> {
    /// Delivers one read result. Returns false when reading must stop.
    fn route(&self, state: &mut DemuxState<I>, result: Result<Option<Packet>>) -> bool {
        if state.destroyed {
            return false;
        }
        match result {
            Err(e) => {
                self.destroy_locked(state, e);
                false
            }
            Ok(None) => {
                info!("{}: end of stream", self.locator);
                for (index, channel) in state.channels.iter_mut().enumerate() {
                    channel.ended = true;
                    channel.demand = 0;
                    self.wakers[index].notify_one();
                }
                state.slot = ReadSlot::Closed;
                self.completion.resolve(Ok(()));
                false
            }
            Ok(Some(packet)) => {
                let index = packet.stream_index;
                debug!(
                    "{}: read packet pts={:?} dts={:?} / {} / stream {}",
                    self.locator, packet.pts, packet.dts, packet.time_base, index
                );
                let Some(channel) = state.channels.get_mut(index) else {
                    self.destroy_locked(state, AvError::UnknownTrack { index });
                    return false;
                };
                if let Some(limit) = self.options.max_buffered_packets {
                    if channel.demand == 0 && channel.queue.len() >= limit {
                        self.destroy_locked(state, AvError::BufferOverflow { index, limit });
                        return false;
                    }
                }
                channel.demand = channel.demand.saturating_sub(1);
                channel.queue.push_back(packet);
                self.wakers[index].notify_one();
                true
            }
        }
    }

    fn destroy(&self, error: AvError) {
        let mut state = self.state.lock();
        self.destroy_locked(&mut state, error);
    }

    fn destroy_locked(&self, state: &mut DemuxState<I>, error: AvError) {
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        error!("{}: destroy: {}", self.locator, error);
        for (index, channel) in state.channels.iter_mut().enumerate() {
            channel.queue.clear();
            channel.demand = 0;
            channel.error = Some(error.clone());
            self.wakers[index].notify_one();
        }
        // An in-flight cycle drops the input itself once its read settles
        if !matches!(state.slot, ReadSlot::Reading) {
            state.slot = ReadSlot::Closed;
        }
        self.completion.resolve(Err(error));
    }
}

async fn read_cycle<I: InputContext>(shared: Arc<Shared<I>>, mut input: I) {
    loop {
        let result = input.read_packet().await;
        let mut state = shared.state.lock();
        if !shared.route(&mut state, result) {
            state.slot = ReadSlot::Closed;
            debug!("{}: read cycle stopped", shared.locator);
            return;
        }
        if state.channels.iter().any(|c| c.demand > 0) {
            continue;
        }
        state.slot = ReadSlot::Idle(input);
        debug!("{}: end of read cycle", shared.locator);
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::testing::MemoryInput;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;
    use std::sync::atomic::Ordering;
    use tokio::sync::Semaphore;

    fn two_tracks() -> Vec<StreamDefinition> {
        vec![
            StreamDefinition::video("h264", 320, 240, "yuv420p"),
            StreamDefinition::audio("aac", 44100, "fltp", "stereo"),
        ]
    }

    fn packet(index: usize, pts: i64) -> Packet {
        Packet::new(vec![index as u8, pts as u8])
            .with_stream_index(index)
            .with_pts(pts)
    }

    fn options(high_water_mark: usize) -> DemuxerOptions {
        DemuxerOptions {
            high_water_mark,
            max_buffered_packets: None,
        }
    }

    async fn collect<I: InputContext>(stream: &mut DemuxedStream<I>) -> Result<Vec<i64>> {
        let mut out = Vec::new();
        while let Some(packet) = stream.recv().await {
            out.push(packet?.pts.unwrap());
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_open_classifies_streams() {
        let demuxer = Demuxer::with_options(MemoryInput::new(two_tracks()), options(4))
            .await
            .unwrap();
        assert_eq!(demuxer.video_indices(), vec![0]);
        assert_eq!(demuxer.audio_indices(), vec![1]);
        assert_eq!(demuxer.definitions().len(), 2);
        assert_eq!(demuxer.into_streams().len(), 2);
    }

    #[tokio::test]
    async fn test_open_errors() {
        let input = MemoryInput::new(two_tracks()).failing_open(AvError::Engine("no such file".into()));
        assert!(matches!(Demuxer::open(input).await, Err(AvError::Open(_))));

        let input = MemoryInput::new(two_tracks()).failing_probe(AvError::Engine("garbage".into()));
        assert!(matches!(Demuxer::open(input).await, Err(AvError::Probe(_))));

        let input = MemoryInput::new(Vec::new());
        assert!(matches!(Demuxer::open(input).await, Err(AvError::Probe(_))));
    }

    #[tokio::test]
    async fn test_fan_out_buffers_unrequested_tracks() {
        let packets = vec![packet(0, 0), packet(1, 0), packet(1, 1), packet(0, 1), packet(1, 2)];
        let input = MemoryInput::new(two_tracks()).with_packets(packets);
        let mut demuxer = Demuxer::with_options(input, options(1)).await.unwrap();
        let mut video = demuxer.take_stream(0).unwrap();
        let mut audio = demuxer.take_stream(1).unwrap();

        // Reading video alone pulls the audio packets along
        assert_eq!(collect(&mut video).await.unwrap(), vec![0, 1]);
        assert_eq!(collect(&mut audio).await.unwrap(), vec![0, 1, 2]);
        assert_eq!(demuxer.closed().await, Ok(()));
    }

    #[tokio::test]
    async fn test_end_of_stream_reaches_idle_streams() {
        let input = MemoryInput::new(two_tracks()).with_packets(vec![packet(0, 0)]);
        let mut demuxer = Demuxer::with_options(input, options(16)).await.unwrap();
        let mut video = demuxer.take_stream(0).unwrap();
        let mut audio = demuxer.take_stream(1).unwrap();

        assert_eq!(collect(&mut video).await.unwrap(), vec![0]);
        // Audio never asked for anything but still observes the end
        assert!(audio.recv().await.is_none());
        assert!(audio.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_track_is_fatal() {
        let packets = vec![packet(5, 0), packet(0, 1)];
        let input = MemoryInput::new(two_tracks()).with_packets(packets);
        let reads = input.read_counter();
        let mut demuxer = Demuxer::with_options(input, options(16)).await.unwrap();
        let mut video = demuxer.take_stream(0).unwrap();
        let mut audio = demuxer.take_stream(1).unwrap();

        assert_eq!(
            video.recv().await.unwrap(),
            Err(AvError::UnknownTrack { index: 5 })
        );
        assert!(video.recv().await.is_none());
        assert_eq!(
            audio.recv().await.unwrap(),
            Err(AvError::UnknownTrack { index: 5 })
        );
        assert!(audio.recv().await.is_none());
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(demuxer.closed().await, Err(AvError::UnknownTrack { index: 5 }));
    }

    #[tokio::test]
    async fn test_read_error_destroys_all_streams() {
        let input = MemoryInput::new(two_tracks())
            .with_packets(vec![packet(1, 0)])
            .with_error(AvError::Engine("corrupt input".into()));
        let mut demuxer = Demuxer::with_options(input, options(16)).await.unwrap();
        let mut video = demuxer.take_stream(0).unwrap();
        let mut audio = demuxer.take_stream(1).unwrap();

        let expected = AvError::Engine("corrupt input".into());
        assert_eq!(video.recv().await.unwrap(), Err(expected.clone()));
        // The buffered audio packet is dropped with the rest of the demuxer
        assert_eq!(audio.recv().await.unwrap(), Err(expected));
        assert!(audio.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_buffer_bound() {
        let packets: Vec<Packet> = (0..8).map(|i| packet(1, i)).collect();
        let input = MemoryInput::new(two_tracks()).with_packets(packets);
        let options = DemuxerOptions {
            high_water_mark: 1,
            max_buffered_packets: Some(3),
        };
        let mut demuxer = Demuxer::with_options(input, options).await.unwrap();
        let mut video = demuxer.take_stream(0).unwrap();

        assert_eq!(
            video.recv().await.unwrap(),
            Err(AvError::BufferOverflow { index: 1, limit: 3 })
        );
    }

    #[tokio::test]
    async fn test_abort() {
        let input = MemoryInput::new(two_tracks()).with_packets(vec![packet(0, 0), packet(0, 1)]);
        let mut demuxer = Demuxer::with_options(input, options(1)).await.unwrap();
        let mut video = demuxer.take_stream(0).unwrap();

        assert_eq!(video.recv().await.unwrap().unwrap().pts, Some(0));
        demuxer.abort();
        assert_eq!(video.recv().await.unwrap(), Err(AvError::Cancelled));
        assert!(video.recv().await.is_none());
        assert_eq!(demuxer.closed().await, Err(AvError::Cancelled));
    }

    #[tokio::test]
    async fn test_abort_during_read() {
        let gate = Arc::new(Semaphore::new(0));
        let input = MemoryInput::new(two_tracks())
            .with_packets(vec![packet(0, 0), packet(0, 1)])
            .with_read_gate(gate.clone());
        let reads = input.read_counter();
        let mut demuxer = Demuxer::with_options(input, options(2)).await.unwrap();
        let mut video = demuxer.take_stream(0).unwrap();

        let pending = tokio::spawn(async move { (video.recv().await, video) });
        while reads.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        demuxer.abort();
        let (received, mut video) = pending.await.unwrap();
        assert_eq!(received.unwrap(), Err(AvError::Cancelled));
        assert_eq!(demuxer.closed().await, Err(AvError::Cancelled));

        // The settled read is discarded and the cycle does not read again
        gate.add_permits(2);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(video.recv().await.is_none());
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_consumers() {
        let packets: Vec<_> = (0..200).map(|i| packet((i % 3) as usize % 2, i)).collect();
        let expected_video: Vec<i64> = packets
            .iter()
            .filter(|p| p.stream_index == 0)
            .map(|p| p.pts.unwrap())
            .collect();
        let expected_audio: Vec<i64> = packets
            .iter()
            .filter(|p| p.stream_index == 1)
            .map(|p| p.pts.unwrap())
            .collect();

        let input = MemoryInput::new(two_tracks()).with_packets(packets);
        let demuxer = Demuxer::with_options(input, options(4)).await.unwrap();
        let mut streams = demuxer.into_streams().into_iter();
        let mut video = streams.next().unwrap();
        let mut audio = streams.next().unwrap();

        let video = tokio::spawn(async move { collect(&mut video).await });
        let audio = tokio::spawn(async move { collect(&mut audio).await });
        assert_eq!(video.await.unwrap().unwrap(), expected_video);
        assert_eq!(audio.await.unwrap().unwrap(), expected_audio);
    }

    #[quickcheck]
    fn prop_fan_out_preserves_per_track_order(tracks: Vec<u8>, high_water_mark: u8) -> bool {
        let streams = 3;
        let packets: Vec<Packet> = tracks
            .iter()
            .enumerate()
            .map(|(i, t)| packet(*t as usize % streams, i as i64))
            .collect();
        let definitions = (0..streams)
            .map(|_| StreamDefinition::data("bin_data"))
            .collect();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let input = MemoryInput::new(definitions).with_packets(packets.clone());
            let options = options(high_water_mark as usize % 8 + 1);
            let demuxer = Demuxer::with_options(input, options).await.unwrap();
            let mut handles = Vec::new();
            for mut stream in demuxer.into_streams() {
                handles.push(tokio::spawn(async move { collect(&mut stream).await }));
            }
            for (index, handle) in handles.into_iter().enumerate() {
                let expected: Vec<i64> = packets
                    .iter()
                    .filter(|p| p.stream_index == index)
                    .map(|p| p.pts.unwrap())
                    .collect();
                match handle.await {
                    Ok(Ok(received)) if received == expected => {}
                    _ => return false,
                }
            }
            true
        })
    }
}
