//! Synthesis backend interfaces.
//!
//! A [`Backend`] opens [`Connection`]s. A session owns exactly one
//! connection at a time and runs one synthesis on it at a time; the frame
//! stream returned by [`Connection::synthesize`] ends when synthesis is
//! done.

mod loopback;

pub use loopback::LoopbackBackend;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::config::{Credential, SessionConfig};
use crate::error::BackendError;
use crate::format::OutputFormat;
use crate::request::{SynthesisInput, WordBoundary};

/// One item produced by a backend stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendFrame {
    /// Encoded audio in the requested output format.
    Audio(Bytes),
    /// Word boundary metadata.
    WordBoundary(WordBoundary),
}

/// Lazy sequence of frames. The end of the stream is the terminal signal.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<BackendFrame, BackendError>> + Send>>;

/// Factory for backend connections.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Opens a connection. Called with the credential current at connect time.
    async fn connect(
        &self,
        config: &SessionConfig,
        credential: &Credential,
    ) -> Result<Box<dyn Connection>, BackendError>;
}

/// An open backend connection.
#[async_trait]
pub trait Connection: Send {
    /// Starts synthesizing `input` and returns the frame stream.
    async fn synthesize(
        &mut self,
        input: &SynthesisInput,
        format: OutputFormat,
    ) -> Result<FrameStream, BackendError>;
}
