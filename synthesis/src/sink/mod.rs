//! Audio sinks: where synthesized bytes go.
//!
//! - [`FileSink`]: appends to a file, framing PCM in a RIFF header
//! - [`PushSink`]: hands each chunk to a caller callback
//! - [`PullSink`]: bounded buffer the caller reads from
//! - [`NullSink`]: discards; audio stays in the request buffer

mod file;
mod null;
mod pull;
mod push;

pub use file::FileSink;
pub use null::NullSink;
pub use pull::{PullSink, DEFAULT_PULL_CAPACITY};
pub use push::{PushAudioOutputCallback, PushSink};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Longest pause between retries of a sink that consumes nothing.
const MAX_STALL_BACKOFF: Duration = Duration::from_millis(20);

/// Error returned by a sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink closed")]
    Closed,

    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink callback failed: {0}")]
    Callback(String),

    /// The owning request was canceled while the write was pending.
    #[error("write canceled")]
    Cancelled,
}

/// Result of offering bytes to a sink: how many were consumed.
pub type WriteOutcome = Result<usize, SinkError>;

/// Destination of synthesized audio.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Offers `data` to the sink.
    ///
    /// Returns the number of bytes consumed, which may be less than
    /// `data.len()`. The caller retries the remainder.
    async fn accept(&self, data: &[u8]) -> WriteOutcome;

    /// Flushes and closes the sink. Closing twice is a no-op.
    async fn close(&self) -> Result<(), SinkError>;

    /// True for sinks that drop audio, leaving it in the request result.
    fn is_discarding(&self) -> bool {
        false
    }
}

/// Writes all of `data`, retrying short writes.
///
/// A sink that consumes nothing is retried with a growing pause until it
/// makes progress or `cancel` fires. Waiting on a full sink never drops
/// bytes; the write either finishes or stops with [`SinkError::Cancelled`].
pub(crate) async fn write_all(
    sink: &dyn AudioSink,
    mut data: &[u8],
    cancel: &CancellationToken,
) -> Result<(), SinkError> {
    let mut stalled = 0u32;
    while !data.is_empty() {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SinkError::Cancelled),
            n = sink.accept(data) => n?.min(data.len()),
        };
        if n == 0 {
            stalled = stalled.saturating_add(1);
            let pause = async {
                if stalled < 16 {
                    tokio::task::yield_now().await;
                } else {
                    let ms = u64::from(stalled - 15);
                    tokio::time::sleep(Duration::from_millis(ms).min(MAX_STALL_BACKOFF)).await;
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SinkError::Cancelled),
                _ = pause => {}
            }
            continue;
        }
        stalled = 0;
        data = &data[n..];
    }
    Ok(())
}
