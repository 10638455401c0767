//! Callback-driven sink.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{AudioSink, SinkError, WriteOutcome};

/// Receiver of pushed audio.
pub trait PushAudioOutputCallback: Send + Sync {
    /// Receives a chunk and returns how many bytes were consumed.
    ///
    /// Returning fewer bytes than offered applies back-pressure: the
    /// remainder is offered again.
    fn write(&self, data: &[u8]) -> io::Result<usize>;

    /// Called once when the sink is closed.
    fn close(&self) {}
}

struct FnCallback<F>(F);

impl<F> PushAudioOutputCallback for FnCallback<F>
where
    F: Fn(&[u8]) -> io::Result<usize> + Send + Sync,
{
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        (self.0)(data)
    }
}

/// Sink that forwards every chunk to a [`PushAudioOutputCallback`].
pub struct PushSink {
    callback: Box<dyn PushAudioOutputCallback>,
    closed: AtomicBool,
}

impl PushSink {
    pub fn new(callback: impl PushAudioOutputCallback + 'static) -> Self {
        Self {
            callback: Box::new(callback),
            closed: AtomicBool::new(false),
        }
    }

    /// Wraps a plain write function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&[u8]) -> io::Result<usize> + Send + Sync + 'static,
    {
        Self::new(FnCallback(f))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for PushSink {
    async fn accept(&self, data: &[u8]) -> WriteOutcome {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        let n = self
            .callback
            .write(data)
            .map_err(|e| SinkError::Callback(e.to_string()))?;
        Ok(n.min(data.len()))
    }

    async fn close(&self) -> Result<(), SinkError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.callback.close();
        }
        Ok(())
    }
}
