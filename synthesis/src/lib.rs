//! Streaming text-to-speech session core.
//!
//! A [`SynthesisSession`] accepts speak requests (plain text or SSML) from
//! any task, processes them strictly in submission order over a single
//! backend connection, and streams the produced audio to observers while
//! it is being synthesized.
//!
//! # Features
//!
//! - Blocking (`speak_*`) and started-only (`start_speaking_*`) requests
//! - Per-request state machine: Queued, Started, Synthesizing, then
//!   Completed or Canceled
//! - Typed event channels for started, synthesizing, word boundary,
//!   completed and canceled events
//! - Audio sinks: file (RIFF framed), push callback, pull buffer, discard
//! - [`StreamingResultReader`] to pull audio while it is being produced
//! - Pluggable [`Backend`]; [`LoopbackBackend`] renders deterministic tones
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use giztoy_synthesis::{EventKind, LoopbackBackend, SessionConfig, SynthesisSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::builder("westus")
//!         .subscription_key("your-key")
//!         .voice_name("en-US-AriaNeural")
//!         .output_format("riff-16khz-16bit-mono-pcm")
//!         .build()?;
//!
//!     let session = SynthesisSession::builder(config, Arc::new(LoopbackBackend::new())).build()?;
//!     session.events().connect(EventKind::WordBoundary, |evt| {
//!         println!("{:?}", evt.payload);
//!         Ok(())
//!     });
//!
//!     let (handle, _) = session.start_speaking_text("Hello world").await?;
//!     let mut reader = session.reader(&handle);
//!     let audio = reader.read_to_end().await?;
//!     println!("Audio length: {} bytes", audio.len());
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Sessions can be configured from YAML:
//!
//! ```yaml
//! region: westus
//! credential:
//!   type: subscription_key
//!   value: your-key
//! voice_name: en-US-AriaNeural
//! output_format: riff-24khz-16bit-mono-pcm
//! ```
//!
//! or from the `SPEECH_KEY` and `SPEECH_REGION` environment variables via
//! [`SessionConfig::from_env`].

mod backend;
mod config;
mod error;
mod event;
mod format;
mod reader;
mod request;
mod session;
pub mod sink;

pub use backend::{Backend, BackendFrame, Connection, FrameStream, LoopbackBackend};
pub use config::{
    Credential, CredentialStore, SessionConfig, SessionConfigBuilder, DEFAULT_LANGUAGE,
    DEFAULT_MAX_INPUT_CHARS, ENV_SPEECH_KEY, ENV_SPEECH_REGION,
};
pub use error::{
    BackendError, CancellationDetails, CancellationErrorCode, CancellationReason, Error, Result,
};
pub use event::{
    EventBus, EventKind, EventPayload, HandlerError, HandlerFunc, SubscriptionId, SynthesisEvent,
};
pub use format::{
    Container, OutputFormat, DEFAULT_OUTPUT_FORMAT, TICKS_PER_MILLISECOND, TICKS_PER_SECOND,
    WAV_HEADER_LEN,
};
pub use reader::StreamingResultReader;
pub use request::{
    RequestHandle, RequestState, ResultReason, SynthesisInput, SynthesisResult, TerminalResult,
    WordBoundary,
};
pub use session::{SessionBuilder, SessionStats, SynthesisSession};
pub use sink::{AudioSink, FileSink, NullSink, PullSink, PushAudioOutputCallback, PushSink};
