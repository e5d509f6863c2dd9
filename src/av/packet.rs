use bytes::Bytes;
use std::time::Duration;

use super::Rational;

/// One compressed unit of a single track.
///
/// `complete` is false for the priming and flush artifacts some encoders
/// emit; those are never forwarded to a muxer.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub time_base: Rational,
    pub stream_index: usize,
    pub is_key: bool,
    pub duration: Option<Duration>,
    pub complete: bool,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: None,
            dts: None,
            time_base: Rational::default(),
            stream_index: 0,
            is_key: false,
            duration: None,
            complete: true,
        }
    }

    /// A packet with no payload that downstream stages must drop.
    pub fn incomplete() -> Self {
        Self {
            complete: false,
            ..Self::new(Bytes::new())
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = time_base;
        self
    }

    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    pub fn with_key_flag(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
