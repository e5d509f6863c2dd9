use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{EncodedStream, EncoderContext};
use crate::av::{CodecFlags, Frame, MediaKind, Packet, StreamDefinition};
use crate::error::{AvError, Result};
use crate::utils::Completion;

/// Turns frames of one track into packets for a muxer.
///
/// The engine is opened on the first frame (or an explicit [`prime`]), so
/// that a muxer can still add flags such as
/// [`CodecFlags::GLOBAL_HEADER`] after wiring. The muxer learns the final
/// definition through the stream returned by [`output`].
///
/// [`prime`]: Encoder::prime
/// [`output`]: Encoder::output
pub struct Encoder<C: EncoderContext> {
    ctx: C,
    definition: StreamDefinition,
    kind: MediaKind,
    flags: Arc<Mutex<CodecFlags>>,
    opened_with: Option<CodecFlags>,
    ready: Completion<StreamDefinition>,
    cancel: CancellationToken,
    finished: bool,
}

impl<C: EncoderContext> Encoder<C> {
    pub fn new(ctx: C, definition: StreamDefinition) -> Result<Self> {
        let kind = definition.require_av("encoder")?;
        let flags = definition
            .video_params()
            .map(|v| v.flags)
            .unwrap_or(CodecFlags::NONE);
        Ok(Self {
            ctx,
            definition,
            kind,
            flags: Arc::new(Mutex::new(flags)),
            opened_with: None,
            ready: Completion::new(),
            cancel: CancellationToken::new(),
            finished: false,
        })
    }

    /// The stream to hand to a muxer.
    pub fn output(&self) -> EncodedStream {
        EncodedStream::new(self.definition.clone(), self.ready.waiter())
            .with_flags(self.flags.clone())
            .with_cancellation(self.cancel.clone())
    }

    /// Requested definition before priming, final definition after.
    pub fn definition(&self) -> &StreamDefinition {
        &self.definition
    }

    pub fn is_primed(&self) -> bool {
        self.opened_with.is_some()
    }

    /// Opens the engine with the flags collected so far.
    pub async fn prime(&mut self) -> Result<()> {
        if self.is_primed() {
            return Ok(());
        }
        let flags = *self.flags.lock();
        let name = self.ctx.name();
        match self.ctx.open(&self.definition, flags).await {
            Ok(definition) => {
                info!(
                    "{}: opened {} encoder {}, flags {:#x}",
                    name,
                    self.kind,
                    definition.codec,
                    flags.bits()
                );
                self.definition = definition.clone();
                self.opened_with = Some(flags);
                self.ready.resolve(Ok(definition));
                Ok(())
            }
            Err(e) => {
                let e = AvError::Open(format!("{}: {}", name, e));
                self.ready.resolve(Err(e.clone()));
                Err(e)
            }
        }
    }

    pub async fn encode(&mut self, mut frame: Frame) -> Result<Packet> {
        self.check_usable()?;
        self.prime().await?;
        if frame.kind() != self.kind {
            return Err(AvError::TypeMismatch {
                pad: self.ctx.name(),
                expected: self.kind,
                found: frame.kind(),
            });
        }
        if !frame.is_complete() {
            return Err(AvError::InvalidData(format!(
                "{}: received incomplete frame",
                self.ctx.name()
            )));
        }
        self.warn_on_late_flags();
        frame.set_time_base(self.definition.effective_time_base());
        let packet = self.ctx.encode(frame).await?;
        debug!(
            "{}: encoded packet pts={:?} complete={}",
            self.ctx.name(),
            packet.pts,
            packet.is_complete()
        );
        Ok(packet)
    }

    /// Drains the engine. No frames are accepted afterwards.
    pub async fn finish(&mut self) -> Result<Vec<Packet>> {
        self.check_usable()?;
        self.prime().await?;
        self.finished = true;
        let mut packets = Vec::new();
        loop {
            let packet = self.ctx.finalize().await?;
            if !packet.is_complete() {
                break;
            }
            packets.push(packet);
        }
        debug!("{}: flushed {} packets", self.ctx.name(), packets.len());
        Ok(packets)
    }

    fn check_usable(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AvError::Cancelled);
        }
        if self.finished {
            return Err(AvError::Closed(format!("{} already finished", self.ctx.name())));
        }
        Ok(())
    }

    fn warn_on_late_flags(&mut self) {
        let current = *self.flags.lock();
        if let Some(opened) = self.opened_with {
            if opened != current {
                warn!(
                    "{}: flags changed to {:#x} after the encoder was opened",
                    self.ctx.name(),
                    current.bits()
                );
                self.opened_with = Some(current);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{AudioFrame, VideoFrame};
    use crate::codec::testing::MockEncoder;
    use pretty_assertions::assert_eq;

    fn video() -> StreamDefinition {
        StreamDefinition::video("libx264", 64, 48, "yuv420p")
    }

    fn frame(pts: i64) -> Frame {
        VideoFrame::new(64, 48, vec![0u8; 16]).with_pts(pts).into()
    }

    #[tokio::test]
    async fn test_lazy_priming_carries_late_flags() {
        let ctx = MockEncoder::new();
        let seen = ctx.opened_flags();
        let mut encoder = Encoder::new(ctx, video()).unwrap();
        let output = encoder.output();
        assert!(!output.is_ready());

        output.add_flags(CodecFlags::GLOBAL_HEADER);
        encoder.encode(frame(0)).await.unwrap();

        assert!(output.is_ready());
        assert!(seen.lock().unwrap().contains(CodecFlags::GLOBAL_HEADER));
        assert_eq!(output.ready().wait().await.unwrap(), *encoder.definition());
    }

    #[tokio::test]
    async fn test_delay_line_and_finish() {
        let mut encoder = Encoder::new(MockEncoder::new().with_delay(2), video()).unwrap();

        let mut complete = Vec::new();
        for pts in 0..4 {
            let packet = encoder.encode(frame(pts)).await.unwrap();
            if packet.is_complete() {
                complete.push(packet.pts.unwrap());
            }
        }
        assert_eq!(complete, vec![0, 1]);

        let flushed: Vec<_> = encoder
            .finish()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.pts.unwrap())
            .collect();
        assert_eq!(flushed, vec![2, 3]);
        assert!(matches!(encoder.encode(frame(4)).await, Err(AvError::Closed(_))));
    }

    #[tokio::test]
    async fn test_rejects_wrong_frames() {
        let mut encoder = Encoder::new(MockEncoder::new(), video()).unwrap();
        let audio: Frame = AudioFrame::new(48000, 2, 1024, vec![0u8; 8]).into();
        assert!(matches!(
            encoder.encode(audio).await,
            Err(AvError::TypeMismatch {
                expected: MediaKind::Video,
                found: MediaKind::Audio,
                ..
            })
        ));

        let mut incomplete = VideoFrame::new(64, 48, Vec::new());
        incomplete.complete = false;
        assert!(matches!(
            encoder.encode(incomplete.into()).await,
            Err(AvError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_open_failure_reaches_ready() {
        let mut encoder = Encoder::new(MockEncoder::new().failing_open(), video()).unwrap();
        let output = encoder.output();
        assert!(matches!(encoder.encode(frame(0)).await, Err(AvError::Open(_))));
        assert!(matches!(output.ready().wait().await, Err(AvError::Open(_))));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let mut encoder = Encoder::new(MockEncoder::new(), video()).unwrap();
        encoder.output().cancellation().cancel();
        assert_eq!(encoder.encode(frame(0)).await, Err(AvError::Cancelled));
    }

    #[test]
    fn test_rejects_subtitles() {
        assert!(Encoder::new(MockEncoder::new(), StreamDefinition::subtitle("mov_text")).is_err());
    }
}
