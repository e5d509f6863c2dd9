use log::{debug, info};

use super::DecoderContext;
use crate::av::{Frame, MediaKind, Packet, StreamDefinition};
use crate::error::{AvError, Result};

/// Turns the packets of one track into frames.
pub struct Decoder<C: DecoderContext> {
    ctx: C,
    definition: StreamDefinition,
    kind: MediaKind,
    decoded: usize,
}

impl<C: DecoderContext> Decoder<C> {
    /// Opens the engine. Only audio and video decoders are supported.
    pub async fn open(mut ctx: C) -> Result<Self> {
        let definition = ctx.definition();
        let kind = definition.require_av("decoder")?;
        ctx.open()
            .await
            .map_err(|e| AvError::Open(format!("{} decoder: {}", definition.codec, e)))?;
        info!("{} decoder opened: {}", kind, definition.codec);
        Ok(Self {
            ctx,
            definition,
            kind,
            decoded: 0,
        })
    }

    pub fn definition(&self) -> &StreamDefinition {
        &self.definition
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Decodes one packet. `Ok(None)` while the engine is still assembling a frame.
    pub async fn decode(&mut self, packet: Packet) -> Result<Option<Frame>> {
        debug!(
            "{} decoder: packet pts={:?} size={}",
            self.kind,
            packet.pts,
            packet.size()
        );
        let frame = self.ctx.decode(packet).await?;
        if !frame.is_complete() {
            return Ok(None);
        }
        if frame.kind() != self.kind {
            return Err(AvError::TypeMismatch {
                pad: format!("{} decoder", self.definition.codec),
                expected: self.kind,
                found: frame.kind(),
            });
        }
        self.decoded += 1;
        Ok(Some(frame))
    }

    /// Number of complete frames produced so far.
    pub fn decoded(&self) -> usize {
        self.decoded
    }
}
