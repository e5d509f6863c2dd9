use futures::{Stream, StreamExt};
use log::debug;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Consumes and drops everything a stream produces.
///
/// Every demuxed track must be read for the demuxer to make progress, so
/// tracks that are not needed get handed to a discarder.
pub struct Discarder;

impl Discarder {
    /// Reads `stream` to the end, returning how many items were dropped.
    pub async fn run<S, T>(stream: S) -> Result<usize>
    where
        S: Stream<Item = Result<T>>,
    {
        futures::pin_mut!(stream);
        let mut dropped = 0;
        while let Some(item) = stream.next().await {
            item?;
            dropped += 1;
        }
        debug!("discarded {} items", dropped);
        Ok(dropped)
    }

    pub fn spawn<S, T>(stream: S) -> JoinHandle<Result<usize>>
    where
        S: Stream<Item = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(Self::run(stream))
    }
}
