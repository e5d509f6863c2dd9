use std::num::ParseIntError;
use thiserror::Error;

use crate::av::MediaKind;

/// Errors raised by the pipeline coordinators and the engines behind them.
///
/// Every variant is `Clone` so a single failure can be handed to every
/// channel or pad of the coordinator it destroyed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AvError {
    #[error("open error: {0}")]
    Open(String),

    #[error("probe error: {0}")]
    Probe(String),

    #[error("received packet for unknown stream {index}")]
    UnknownTrack { index: usize },

    #[error("type mismatch on [{pad}]: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        pad: String,
        expected: MediaKind,
        found: MediaKind,
    },

    #[error("reentrancy error: {0}")]
    Reentrancy(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("stream {index} buffered more than {limit} packets")]
    BufferOverflow { index: usize, limit: usize },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("cancelled")]
    Cancelled,

    #[error("closed: {0}")]
    Closed(String),

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),
}

pub type Result<T> = std::result::Result<T, AvError>;
