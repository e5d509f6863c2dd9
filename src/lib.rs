#![doc(html_root_url = "https://docs.rs/avpipe/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # avpipe - flow-controlled media pipelines
//!
//! `avpipe` coordinates the stages of a multi-track media pipeline on top of
//! an external media engine. The engine does the actual demuxing, decoding,
//! filtering, encoding and muxing; this crate decides who may call it, when,
//! and how data and backpressure move between the stages.
//!
//! ## Features
//!
//! ### Demuxing
//! - One input, one independently consumed stream per track
//! - Consumer driven reads with per-track buffering
//! - End of input broadcast to every track, errors delivered once per track
//!
//! ### Muxing
//! - Output streams created from the final encoder definitions
//! - Header written only once every input is ready
//! - A single serialized write queue shared by all inputs
//! - Trailer written when the last input ends
//!
//! ### Filter graphs
//! - Named source and sink pads over one engine
//! - Reentrancy guarded pushes, demand driven pulls
//! - Starved sinks woken by writes, no polling
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! avpipe = "0.1.0"
//! ```
//!
//! ### Remuxing Example
//!
//! ```rust
//! use avpipe::av::{Packet, StreamDefinition};
//! use avpipe::codec::EncodedStream;
//! use avpipe::format::testing::{MemoryInput, MemoryOutput};
//! use avpipe::format::{Demuxer, Muxer};
//!
//! #[tokio::main]
//! async fn main() -> avpipe::Result<()> {
//!     let input = MemoryInput::new(vec![StreamDefinition::audio("aac", 48000, "fltp", "stereo")])
//!         .with_packets((0..10).map(|pts| Packet::new(vec![0u8; 4]).with_pts(pts)));
//!     let output = MemoryOutput::new();
//!     let log = output.log();
//!
//!     let demuxer = Demuxer::open(input).await?;
//!     let streams = demuxer
//!         .definitions()
//!         .iter()
//!         .cloned()
//!         .map(EncodedStream::from_definition)
//!         .collect();
//!     let muxer = Muxer::new(output, streams)?;
//!
//!     for (mut packets, mut sink) in demuxer.into_streams().into_iter().zip(muxer.into_inputs()) {
//!         while let Some(packet) = packets.recv().await {
//!             sink.write(packet?).await?;
//!         }
//!         sink.end().await?;
//!     }
//!
//!     assert_eq!(log.packets().len(), 10);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: Core media types
//!   - Packets, frames and stream definitions
//!   - Time bases and codec flags
//!
//! - `format`: Container coordination
//!   - Demuxer and muxer over the engine's input and output contexts
//!   - Discarder for tracks nobody reads
//!   - In-memory containers for tests
//!
//! - `codec`: Decoder and encoder stages
//!   - Lazy encoder priming and readiness signalling
//!
//! - `filter`: Filter graph coordination
//!   - Graph descriptor construction
//!   - Source and sink pads with flow control
//!
//! - `error`: Error handling types
//!
//! - `config`: Process wide tuning
//!
//! - `utils`: Exactly-once completion signals
//!
/// Audio/Video base types
pub mod av;

/// Decoder and encoder stages
pub mod codec;

/// Error types and utilities
pub mod error;

/// Filter graph coordination
pub mod filter;

/// Demuxer, muxer and container contracts
pub mod format;

/// Common utilities
pub mod utils;

/// Configuration module
pub mod config;

pub use error::{AvError, Result};
