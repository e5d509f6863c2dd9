//! Scriptable codec engines for tests and examples.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DecoderContext, EncoderContext};
use crate::av::{
    AudioFrame, CodecFlags, Frame, Packet, Rational, StreamDefinition, StreamParams, VideoFrame,
};
use crate::error::{AvError, Result};

/// Decoder that copies packet payloads into frames of its stream's kind.
pub struct MockDecoder {
    definition: StreamDefinition,
    delay: usize,
    fail_open: bool,
}

impl MockDecoder {
    pub fn new(definition: StreamDefinition) -> Self {
        Self {
            definition,
            delay: 0,
            fail_open: false,
        }
    }

    /// The first `delay` packets produce incomplete frames.
    pub fn with_delay(mut self, delay: usize) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

#[async_trait]
impl DecoderContext for MockDecoder {
    async fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(AvError::Engine("decoder not found".into()));
        }
        Ok(())
    }

    async fn decode(&mut self, packet: Packet) -> Result<Frame> {
        let mut frame: Frame = match &self.definition.params {
            StreamParams::Video(v) => {
                let mut f = VideoFrame::new(v.width, v.height, packet.data.clone());
                f.pts = packet.pts;
                f.into()
            }
            StreamParams::Audio(a) => {
                let mut f = AudioFrame::new(a.sample_rate, 2, packet.size(), packet.data.clone());
                f.pts = packet.pts;
                f.into()
            }
            _ => return Err(AvError::Unsupported("mock decoder".into())),
        };
        frame.set_time_base(packet.time_base);
        if self.delay > 0 {
            self.delay -= 1;
            match &mut frame {
                Frame::Video(f) => f.complete = false,
                Frame::Audio(f) => f.complete = false,
            }
        }
        Ok(frame)
    }

    fn definition(&self) -> StreamDefinition {
        self.definition.clone()
    }
}

/// Encoder that holds back `delay` packets like a lookahead encoder would.
pub struct MockEncoder {
    delay: usize,
    held: VecDeque<Packet>,
    fail_open: bool,
    opened_flags: Arc<Mutex<Option<CodecFlags>>>,
}

impl MockEncoder {
    pub fn new() -> Self {
        Self {
            delay: 0,
            held: VecDeque::new(),
            fail_open: false,
            opened_flags: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_delay(mut self, delay: usize) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Flags the encoder was opened with, once it has been.
    pub fn opened_flags(&self) -> Arc<Mutex<Option<CodecFlags>>> {
        self.opened_flags.clone()
    }
}

impl Default for MockEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EncoderContext for MockEncoder {
    fn name(&self) -> String {
        String::from("mock encoder")
    }

    async fn open(
        &mut self,
        definition: &StreamDefinition,
        flags: CodecFlags,
    ) -> Result<StreamDefinition> {
        if self.fail_open {
            return Err(AvError::Engine("invalid encoder settings".into()));
        }
        *self.opened_flags.lock() = Some(flags);
        let mut definition = definition.clone();
        match &mut definition.params {
            StreamParams::Video(v) => {
                v.flags = flags;
                if definition.time_base.is_none() {
                    definition.time_base = Some(Rational::new(v.frame_rate.den, v.frame_rate.num));
                }
            }
            StreamParams::Audio(a) => {
                a.frame_size = Some(1024);
                if definition.time_base.is_none() {
                    definition.time_base = Some(Rational::new(1, a.sample_rate as i32));
                }
            }
            _ => {}
        }
        Ok(definition)
    }

    async fn encode(&mut self, frame: Frame) -> Result<Packet> {
        let data = match &frame {
            Frame::Video(f) => f.data.clone(),
            Frame::Audio(f) => f.data.clone(),
        };
        let mut packet = Packet::new(data).with_time_base(frame.time_base());
        packet.pts = frame.pts();
        packet.dts = frame.pts();
        self.held.push_back(packet);
        if self.held.len() > self.delay {
            if let Some(packet) = self.held.pop_front() {
                return Ok(packet);
            }
        }
        Ok(Packet::incomplete())
    }

    async fn finalize(&mut self) -> Result<Packet> {
        Ok(self.held.pop_front().unwrap_or_else(Packet::incomplete))
    }
}
