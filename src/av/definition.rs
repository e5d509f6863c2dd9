use std::ops::{BitOr, BitOrAssign};

use super::{MediaKind, Rational};
use crate::error::{AvError, Result};

/// Codec context flags carried from a stream definition into the encoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CodecFlags(u32);

impl CodecFlags {
    pub const NONE: CodecFlags = CodecFlags(0);
    /// Place global headers in extradata instead of every keyframe.
    pub const GLOBAL_HEADER: CodecFlags = CodecFlags(1 << 22);
    pub const LOW_DELAY: CodecFlags = CodecFlags(1 << 19);

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        CodecFlags(bits)
    }

    pub fn contains(&self, other: CodecFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: CodecFlags) {
        self.0 |= other.0;
    }
}

impl BitOr for CodecFlags {
    type Output = CodecFlags;

    fn bitor(self, rhs: CodecFlags) -> CodecFlags {
        CodecFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for CodecFlags {
    fn bitor_assign(&mut self, rhs: CodecFlags) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub pixel_format: String,
    pub flags: CodecFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub sample_format: String,
    pub channel_layout: String,
    /// Known only once the encoder has been opened.
    pub frame_size: Option<u32>,
}

/// Kind-specific parameters of a stream definition.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamParams {
    Video(VideoParams),
    Audio(AudioParams),
    Subtitle,
    Data,
}

/// Essential parameters of one media track.
///
/// Built by a decoder or by the caller for an encoder, then read by the
/// muxer and the filter graph to configure the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDefinition {
    pub bit_rate: u64,
    pub codec: String,
    pub time_base: Option<Rational>,
    pub codec_options: Vec<(String, String)>,
    pub params: StreamParams,
}

impl StreamDefinition {
    pub fn video(codec: &str, width: u32, height: u32, pixel_format: &str) -> Self {
        Self {
            bit_rate: 0,
            codec: codec.to_string(),
            time_base: None,
            codec_options: Vec::new(),
            params: StreamParams::Video(VideoParams {
                width,
                height,
                frame_rate: Rational::new(25, 1),
                pixel_format: pixel_format.to_string(),
                flags: CodecFlags::NONE,
            }),
        }
    }

    pub fn audio(codec: &str, sample_rate: u32, sample_format: &str, channel_layout: &str) -> Self {
        Self {
            bit_rate: 0,
            codec: codec.to_string(),
            time_base: None,
            codec_options: Vec::new(),
            params: StreamParams::Audio(AudioParams {
                sample_rate,
                sample_format: sample_format.to_string(),
                channel_layout: channel_layout.to_string(),
                frame_size: None,
            }),
        }
    }

    pub fn subtitle(codec: &str) -> Self {
        Self {
            bit_rate: 0,
            codec: codec.to_string(),
            time_base: None,
            codec_options: Vec::new(),
            params: StreamParams::Subtitle,
        }
    }

    pub fn data(codec: &str) -> Self {
        Self {
            params: StreamParams::Data,
            ..Self::subtitle(codec)
        }
    }

    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    pub fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = Some(time_base);
        self
    }

    pub fn with_codec_option(mut self, key: &str, value: &str) -> Self {
        self.codec_options.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: Rational) -> Self {
        if let StreamParams::Video(ref mut video) = self.params {
            video.frame_rate = frame_rate;
        }
        self
    }

    pub fn kind(&self) -> MediaKind {
        match self.params {
            StreamParams::Video(_) => MediaKind::Video,
            StreamParams::Audio(_) => MediaKind::Audio,
            StreamParams::Subtitle => MediaKind::Subtitle,
            StreamParams::Data => MediaKind::Data,
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind().is_video()
    }

    pub fn is_audio(&self) -> bool {
        self.kind().is_audio()
    }

    pub fn video_params(&self) -> Option<&VideoParams> {
        match &self.params {
            StreamParams::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn audio_params(&self) -> Option<&AudioParams> {
        match &self.params {
            StreamParams::Audio(a) => Some(a),
            _ => None,
        }
    }

    /// Time base the encoder will run at.
    pub fn effective_time_base(&self) -> Rational {
        self.time_base.unwrap_or_default()
    }

    /// Fails unless the definition describes audio or video.
    pub fn require_av(&self, what: &str) -> Result<MediaKind> {
        match self.kind() {
            kind @ (MediaKind::Video | MediaKind::Audio) => Ok(kind),
            other => Err(AvError::Unsupported(format!(
                "{} only supports audio and video, got {}",
                what, other
            ))),
        }
    }
}
