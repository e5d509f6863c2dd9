use crate::av::{Packet, StreamDefinition};
use crate::Result;

pub mod demuxer;
pub mod discard;
pub mod muxer;
pub mod testing;

/// Container reader supplied by the media engine.
///
/// A [`Demuxer`] owns exactly one of these and is the only caller.
#[async_trait::async_trait]
pub trait InputContext: Send + 'static {
    /// Human readable locator, used in logs and errors
    fn locator(&self) -> String {
        String::from("input")
    }

    /// Open the underlying source
    async fn open(&mut self) -> Result<()>;

    /// Determine the tracks of the source, in stream index order
    async fn probe(&mut self) -> Result<Vec<StreamDefinition>>;

    /// Read the next packet, `None` once the source is exhausted
    async fn read_packet(&mut self) -> Result<Option<Packet>>;
}

/// Container writer supplied by the media engine.
///
/// A [`Muxer`] serializes every call; implementations need not be reentrant.
#[async_trait::async_trait]
pub trait OutputContext: Send + 'static {
    /// Human readable locator, used in logs and errors
    fn locator(&self) -> String {
        String::from("output")
    }

    /// Whether encoders feeding this format must emit global headers
    fn requires_global_header(&self) -> bool {
        false
    }

    /// Add an output stream for the given final definition, returning its index
    async fn add_stream(&mut self, definition: &StreamDefinition) -> Result<usize>;

    /// Open the sink for writing
    async fn open(&mut self) -> Result<()>;

    /// Write stream header information
    async fn write_header(&mut self) -> Result<()>;

    /// Write a packet to the stream
    async fn write_packet(&mut self, packet: Packet) -> Result<()>;

    /// Flush any buffered packets
    async fn flush(&mut self) -> Result<()>;

    /// Write stream trailer information
    async fn write_trailer(&mut self) -> Result<()>;

    /// Release the sink
    async fn close(&mut self) -> Result<()>;
}

pub use demuxer::{DemuxedStream, Demuxer, DemuxerOptions};
pub use discard::Discarder;
pub use muxer::{Muxer, MuxerInput};
