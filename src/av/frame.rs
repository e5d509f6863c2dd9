use bytes::Bytes;

use super::{MediaKind, Rational};

/// Raw picture produced by a video decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub pts: Option<i64>,
    pub time_base: Rational,
    pub stream_index: usize,
    pub complete: bool,
}

/// Raw samples produced by an audio decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub data: Bytes,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: usize,
    pub pts: Option<i64>,
    pub time_base: Rational,
    pub stream_index: usize,
    pub complete: bool,
}

/// A decoded unit. The variant is fixed by the stream the frame belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            pts: None,
            time_base: Rational::default(),
            stream_index: 0,
            complete: true,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }
}

impl AudioFrame {
    pub fn new(sample_rate: u32, channels: u16, samples: usize, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            sample_rate,
            channels,
            samples,
            pts: None,
            time_base: Rational::default(),
            stream_index: 0,
            complete: true,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }
}

impl Frame {
    pub fn kind(&self) -> MediaKind {
        match self {
            Frame::Video(_) => MediaKind::Video,
            Frame::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn pts(&self) -> Option<i64> {
        match self {
            Frame::Video(f) => f.pts,
            Frame::Audio(f) => f.pts,
        }
    }

    pub fn time_base(&self) -> Rational {
        match self {
            Frame::Video(f) => f.time_base,
            Frame::Audio(f) => f.time_base,
        }
    }

    pub fn set_time_base(&mut self, time_base: Rational) {
        match self {
            Frame::Video(f) => f.time_base = time_base,
            Frame::Audio(f) => f.time_base = time_base,
        }
    }

    pub fn stream_index(&self) -> usize {
        match self {
            Frame::Video(f) => f.stream_index,
            Frame::Audio(f) => f.stream_index,
        }
    }

    pub fn set_stream_index(&mut self, index: usize) {
        match self {
            Frame::Video(f) => f.stream_index = index,
            Frame::Audio(f) => f.stream_index = index,
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            Frame::Video(f) => f.complete,
            Frame::Audio(f) => f.complete,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Frame::Video(f) => f.data.len(),
            Frame::Audio(f) => f.data.len(),
        }
    }
}

impl From<VideoFrame> for Frame {
    fn from(frame: VideoFrame) -> Self {
        Frame::Video(frame)
    }
}

impl From<AudioFrame> for Frame {
    fn from(frame: AudioFrame) -> Self {
        Frame::Audio(frame)
    }
}
