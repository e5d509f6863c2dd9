//! Decoder and encoder stages.
//!
//! The codec engines themselves are external; this module wraps them with
//! the lazy priming and readiness signalling the muxer relies on.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::av::{CodecFlags, Frame, MediaKind, Packet, StreamDefinition};
use crate::utils::{Completion, Waiter};
use crate::Result;

pub mod decoder;
pub mod encoder;
pub mod testing;

pub use decoder::Decoder;
pub use encoder::Encoder;

/// Decoding engine for one track.
#[async_trait]
pub trait DecoderContext: Send + 'static {
    /// Open the decoder
    async fn open(&mut self) -> Result<()>;

    /// Decode one packet. Frames still being assembled come back incomplete.
    async fn decode(&mut self, packet: Packet) -> Result<Frame>;

    /// Parameters of the decoded stream
    fn definition(&self) -> StreamDefinition;
}

/// Encoding engine for one track.
#[async_trait]
pub trait EncoderContext: Send + 'static {
    fn name(&self) -> String {
        String::from("encoder")
    }

    /// Open the encoder and return the definition it actually settled on
    async fn open(&mut self, definition: &StreamDefinition, flags: CodecFlags)
        -> Result<StreamDefinition>;

    /// Encode one frame. Priming artifacts come back incomplete.
    async fn encode(&mut self, frame: Frame) -> Result<Packet>;

    /// Drain one delayed packet; an incomplete packet means fully drained
    async fn finalize(&mut self) -> Result<Packet>;
}

/// What a muxer needs to know about one of its encoded inputs.
///
/// `ready` resolves once the producing encoder has been opened, with the
/// definition it settled on. Flags added before that point reach the
/// encoder when it opens.
#[derive(Debug, Clone)]
pub struct EncodedStream {
    definition: StreamDefinition,
    ready: Waiter<StreamDefinition>,
    flags: Arc<Mutex<CodecFlags>>,
    cancel: CancellationToken,
    passthrough: bool,
}

impl EncodedStream {
    /// A stream whose readiness is signalled through `ready`.
    pub fn new(definition: StreamDefinition, ready: Waiter<StreamDefinition>) -> Self {
        Self {
            definition,
            ready,
            flags: Arc::new(Mutex::new(CodecFlags::NONE)),
            cancel: CancellationToken::new(),
            passthrough: false,
        }
    }

    /// Already encoded packets copied as they are, ready immediately.
    pub fn from_definition(definition: StreamDefinition) -> Self {
        let ready = Completion::resolved(Ok(definition.clone())).waiter();
        Self {
            passthrough: true,
            ..Self::new(definition, ready)
        }
    }

    pub(crate) fn with_flags(mut self, flags: Arc<Mutex<CodecFlags>>) -> Self {
        self.flags = flags;
        self
    }

    pub(crate) fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn definition(&self) -> &StreamDefinition {
        &self.definition
    }

    pub fn kind(&self) -> MediaKind {
        self.definition.kind()
    }

    pub fn ready(&self) -> Waiter<StreamDefinition> {
        self.ready.clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.ready.peek(), Some(Ok(_)))
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    pub fn flags(&self) -> CodecFlags {
        *self.flags.lock()
    }

    pub fn add_flags(&self, flags: CodecFlags) {
        if self.is_ready() {
            log::warn!(
                "{} stream already primed, flags {:#x} will have no effect",
                self.kind(),
                flags.bits()
            );
        }
        self.flags.lock().insert(flags);
    }

    /// Fired when the consumer of this stream is torn down.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
