//! Pull-style reading of a request's audio while it is being produced.

use std::time::Duration;

use bytes::Bytes;

use crate::error::{CancellationDetails, Error, Result};
use crate::request::{RequestHandle, RequestState};

/// Reads the audio of one request from a cursor.
///
/// Reads block while the cursor has caught up with the producer and the
/// request is still running. Once the request is terminal and the cursor
/// is at the end, reads return an empty buffer. Several readers over the
/// same request are independent.
pub struct StreamingResultReader {
    handle: RequestHandle,
    position: usize,
}

impl StreamingResultReader {
    pub fn new(handle: RequestHandle) -> Self {
        Self {
            handle,
            position: 0,
        }
    }

    pub fn handle(&self) -> &RequestHandle {
        &self.handle
    }

    /// Current cursor, in bytes from the start of the audio.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves the cursor. Positions past the produced audio are clamped to
    /// its current end.
    pub fn set_position(&mut self, position: usize) {
        self.position = position.min(self.handle.audio_len());
    }

    pub fn status(&self) -> RequestState {
        self.handle.state()
    }

    pub fn cancellation(&self) -> Option<CancellationDetails> {
        self.handle.cancellation()
    }

    /// Reads up to `max_len` bytes from the cursor.
    pub async fn read(&mut self, max_len: usize) -> Bytes {
        if max_len == 0 {
            return Bytes::new();
        }
        let pos = self.position;
        self.handle
            .wait_until(|d| d.audio.len() > pos || d.state.is_terminal())
            .await;

        let out = self.handle.with_data(|d| {
            let end = d.audio.len().min(pos.saturating_add(max_len));
            if pos >= end {
                Bytes::new()
            } else {
                Bytes::copy_from_slice(&d.audio[pos..end])
            }
        });
        self.position += out.len();
        out
    }

    /// Like [`read`](Self::read) but gives up after `timeout`. The cursor
    /// does not move on expiry.
    pub async fn read_timeout(&mut self, max_len: usize, timeout: Duration) -> Result<Bytes> {
        tokio::time::timeout(timeout, self.read(max_len))
            .await
            .map_err(|_| Error::TimedOut)
    }

    /// Reads from the cursor until the request is terminal.
    ///
    /// Returns the cancellation as an error when the request was canceled.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let chunk = self.read(64 * 1024).await;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        match self.handle.cancellation() {
            Some(details) => Err(details.to_error()),
            None => Ok(out),
        }
    }
}
