//! Filter graphs.
//!
//! A [`Filter`] sits between decoders and encoders. Frames written to a
//! [`FilterSource`] are pushed into the engine, frames read from a
//! [`FilterSink`] are pulled out of it, and all engine access is serialized.
//!
//! ```rust
//! use avpipe::av::{Frame, Rational, StreamDefinition, VideoFrame};
//! use avpipe::filter::{testing::PassthroughGraph, Filter, FilterOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> avpipe::Result<()> {
//! let input = StreamDefinition::video("rawvideo", 320, 240, "yuv420p")
//!     .with_time_base(Rational::new(1, 25));
//! let options = FilterOptions::new("[in] null [out]", Rational::new(1, 25))
//!     .input("in", input.clone())
//!     .output("out", input);
//!
//! let mut filter = Filter::new(PassthroughGraph::new().route("in", "out"), options).await?;
//! let mut source = filter.take_source("in").unwrap();
//! let mut sink = filter.take_sink("out").unwrap();
//!
//! source.write(Frame::from(VideoFrame::new(320, 240, vec![0u8; 8]).with_pts(0))).await?;
//! source.end().await?;
//! while let Some(frame) = sink.recv().await {
//!     println!("filtered frame pts={:?}", frame?.pts());
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;

use async_trait::async_trait;

use crate::av::{Frame, MediaKind, Rational, StreamDefinition, StreamParams};
use crate::config;
use crate::error::{AvError, Result};

pub mod graph;
pub mod testing;

pub use graph::{Filter, FilterSink, FilterSource};

/// Filter graph engine.
///
/// Pads are addressed by the instance names used in the descriptor, such as
/// `buffer@in` or `abuffersink@out`.
#[async_trait]
pub trait FilterEngine: Send + 'static {
    /// Parse and configure the complete graph description
    async fn configure(&mut self, descriptor: &str) -> Result<()>;

    /// Feed a frame into a source pad, `None` marks the end of that input
    async fn push(&mut self, pad: &str, frame: Option<Frame>) -> Result<()>;

    /// Take the next available frame from a sink pad
    async fn pull(&mut self, pad: &str) -> Result<Option<Frame>>;
}

/// Media kind a pad carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadKind {
    Video,
    Audio,
}

impl PadKind {
    pub fn of(definition: &StreamDefinition) -> Result<Self> {
        match definition.require_av("filter pad")? {
            MediaKind::Video => Ok(PadKind::Video),
            _ => Ok(PadKind::Audio),
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        match self {
            PadKind::Video => MediaKind::Video,
            PadKind::Audio => MediaKind::Audio,
        }
    }

    pub fn accepts(&self, frame: &Frame) -> bool {
        matches!(
            (self, frame),
            (PadKind::Video, Frame::Video(_)) | (PadKind::Audio, Frame::Audio(_))
        )
    }

    fn source_filter(&self) -> &'static str {
        match self {
            PadKind::Video => "buffer",
            PadKind::Audio => "abuffer",
        }
    }

    fn sink_filter(&self) -> &'static str {
        match self {
            PadKind::Video => "buffersink",
            PadKind::Audio => "abuffersink",
        }
    }

    pub(crate) fn source_id(&self, name: &str) -> String {
        format!("{}@{}", self.source_filter(), name)
    }

    pub(crate) fn sink_id(&self, name: &str) -> String {
        format!("{}@{}", self.sink_filter(), name)
    }
}

impl fmt::Display for PadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.media_kind(), f)
    }
}

/// Everything needed to build a [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOptions {
    pub inputs: Vec<(String, StreamDefinition)>,
    pub outputs: Vec<(String, StreamDefinition)>,
    /// Graph text linking the `[name]` labels of inputs and outputs
    pub graph: String,
    /// Time base stamped on every frame entering or leaving the graph
    pub time_base: Rational,
    /// Frames requested each time a sink runs dry
    pub high_water_mark: usize,
}

impl FilterOptions {
    pub fn new(graph: &str, time_base: Rational) -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            graph: graph.to_string(),
            time_base,
            high_water_mark: config::get().high_water_mark,
        }
    }

    pub fn input(mut self, name: &str, definition: StreamDefinition) -> Self {
        self.inputs.push((name.to_string(), definition));
        self
    }

    pub fn output(mut self, name: &str, definition: StreamDefinition) -> Self {
        self.outputs.push((name.to_string(), definition));
        self
    }

    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    /// Full engine description: source pads, the caller's graph, sink pads.
    pub fn graph_descriptor(&self) -> Result<String> {
        let mut descriptor = String::new();
        for (name, definition) in &self.inputs {
            match &definition.params {
                StreamParams::Video(video) => {
                    if video.pixel_format.is_empty() {
                        return Err(AvError::InvalidData(format!(
                            "video input [{}] must specify a pixel format",
                            name
                        )));
                    }
                    let Some(time_base) = definition.time_base else {
                        return Err(AvError::InvalidData(format!(
                            "video input [{}] must specify a time base",
                            name
                        )));
                    };
                    descriptor.push_str(&format!(
                        "{}=video_size={}x{}:pix_fmt={}:time_base={} [{}];  ",
                        PadKind::Video.source_id(name),
                        video.width,
                        video.height,
                        video.pixel_format,
                        time_base,
                        name
                    ));
                }
                StreamParams::Audio(audio) => {
                    let time_base = definition.time_base.unwrap_or(self.time_base);
                    descriptor.push_str(&format!(
                        "{}=sample_rate={}:channel_layout={}:sample_fmt={}:time_base={} [{}];  ",
                        PadKind::Audio.source_id(name),
                        audio.sample_rate,
                        audio.channel_layout,
                        audio.sample_format,
                        time_base,
                        name
                    ));
                }
                _ => {
                    return Err(AvError::Unsupported(format!(
                        "input [{}]: only video and audio filtering is supported",
                        name
                    )))
                }
            }
        }
        descriptor.push_str(&self.graph);
        if !self.graph.trim_end().ends_with(';') {
            descriptor.push_str(";  ");
        }
        for (name, definition) in &self.outputs {
            let kind = PadKind::of(definition)?;
            descriptor.push_str(&format!("[{}] {};  ", name, kind.sink_id(name)));
        }
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_graph_descriptor() {
        let video = StreamDefinition::video("rawvideo", 640, 360, "yuv420p")
            .with_time_base(Rational::new(1, 25));
        let audio = StreamDefinition::audio("pcm_s16le", 48000, "s16", "stereo");
        let options = FilterOptions::new("[v] scale=320:180 [small]; [a] volume=0.5 [quiet]", Rational::new(1, 1000))
            .input("v", video.clone())
            .input("a", audio.clone())
            .output("small", video)
            .output("quiet", audio);

        assert_eq!(
            options.graph_descriptor().unwrap(),
            "buffer@v=video_size=640x360:pix_fmt=yuv420p:time_base=1/25 [v];  \
             abuffer@a=sample_rate=48000:channel_layout=stereo:sample_fmt=s16:time_base=1/1000 [a];  \
             [v] scale=320:180 [small]; [a] volume=0.5 [quiet];  \
             [small] buffersink@small;  [quiet] abuffersink@quiet;  "
        );
    }

    #[test]
    fn test_graph_descriptor_keeps_terminated_graph_text() {
        let video = StreamDefinition::video("rawvideo", 640, 360, "yuv420p")
            .with_time_base(Rational::new(1, 25));
        let options = FilterOptions::new("[in] hflip [out];  ", Rational::new(1, 25))
            .input("in", video.clone())
            .output("out", video);

        let descriptor = options.graph_descriptor().unwrap();
        assert_eq!(
            descriptor,
            "buffer@in=video_size=640x360:pix_fmt=yuv420p:time_base=1/25 [in];  \
             [in] hflip [out];  \
             [out] buffersink@out;  "
        );
        assert!(!descriptor.contains(";   ;"));
    }

    #[test]
    fn test_graph_descriptor_validation() {
        let no_time_base = StreamDefinition::video("rawvideo", 640, 360, "yuv420p");
        let options = FilterOptions::new("[v] null [out]", Rational::new(1, 25)).input("v", no_time_base);
        assert!(matches!(options.graph_descriptor(), Err(AvError::InvalidData(_))));

        let no_format = StreamDefinition::video("rawvideo", 640, 360, "")
            .with_time_base(Rational::new(1, 25));
        let options = FilterOptions::new("[v] null [out]", Rational::new(1, 25)).input("v", no_format);
        assert!(matches!(options.graph_descriptor(), Err(AvError::InvalidData(_))));

        let options = FilterOptions::new("[s] null [out]", Rational::new(1, 25))
            .input("s", StreamDefinition::subtitle("ass"));
        assert!(matches!(options.graph_descriptor(), Err(AvError::Unsupported(_))));
    }

    #[test]
    fn test_pad_kind() {
        let frame: Frame = crate::av::AudioFrame::new(48000, 2, 4, vec![0u8; 16]).into();
        assert!(PadKind::Audio.accepts(&frame));
        assert!(!PadKind::Video.accepts(&frame));
        assert_eq!(PadKind::Video.to_string(), "video");
    }
}
