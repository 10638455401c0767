//! Speak requests and their lifecycle state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{CancellationDetails, Error, Result};
use crate::format::{OutputFormat, TICKS_PER_MILLISECOND};

/// Input of a speak request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum SynthesisInput {
    /// Plain text.
    PlainText(String),
    /// SSML document.
    Ssml(String),
}

impl SynthesisInput {
    pub fn text(text: impl Into<String>) -> Self {
        SynthesisInput::PlainText(text.into())
    }

    pub fn ssml(ssml: impl Into<String>) -> Self {
        SynthesisInput::Ssml(ssml.into())
    }

    /// Returns the raw input string.
    pub fn as_str(&self) -> &str {
        match self {
            SynthesisInput::PlainText(s) | SynthesisInput::Ssml(s) => s,
        }
    }

    pub fn is_ssml(&self) -> bool {
        matches!(self, SynthesisInput::Ssml(_))
    }

    /// Rejects empty input and input longer than `max_chars` characters.
    pub fn validate(&self, max_chars: usize) -> Result<()> {
        let s = self.as_str();
        if s.trim().is_empty() {
            return Err(Error::InvalidInput("input must be non-empty".to_string()));
        }
        let len = s.chars().count();
        if len > max_chars {
            return Err(Error::InvalidInput(format!(
                "input is {len} characters, limit is {max_chars}"
            )));
        }
        Ok(())
    }
}

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Queued,
    Started,
    Synthesizing,
    Completed,
    Canceled,
}

impl RequestState {
    /// Completed or Canceled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Canceled)
    }
}

/// Correlates a position in the synthesized audio with a span of the input.
///
/// `text_offset` indexes the plain text, `source_offset` the original
/// input (the SSML document for SSML requests). Offsets and lengths are in
/// characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordBoundary {
    /// Audio offset in 100 ns ticks.
    pub audio_offset_ticks: u64,
    pub text_offset: u32,
    pub word_length: u32,
    pub source_offset: u32,
}

impl WordBoundary {
    /// Audio offset as a duration.
    pub fn audio_offset(&self) -> Duration {
        Duration::from_nanos(self.audio_offset_ticks * 100)
    }
}

/// Reason attached to a [`SynthesisResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultReason {
    /// Synthesis has started; audio is still being produced.
    SynthesizingAudioStarted,
    /// All audio has been produced.
    SynthesizingAudioCompleted,
    /// The request was canceled; see [`SynthesisResult::cancellation`].
    Canceled,
}

/// Outcome of a speak request.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub request_id: u64,
    pub result_id: String,
    pub reason: ResultReason,
    /// Final audio. Empty when the session streams into a sink, and for
    /// started-only results.
    pub audio: Bytes,
    pub cancellation: Option<CancellationDetails>,
    pub audio_duration: Duration,
    pub word_boundaries: Vec<WordBoundary>,
}

/// Result returned once a request reaches a terminal state.
pub type TerminalResult = SynthesisResult;

impl SynthesisResult {
    pub fn is_completed(&self) -> bool {
        self.reason == ResultReason::SynthesizingAudioCompleted
    }

    pub fn is_canceled(&self) -> bool {
        self.reason == ResultReason::Canceled
    }
}

pub(crate) struct RequestData {
    pub(crate) state: RequestState,
    pub(crate) audio: Vec<u8>,
    pub(crate) word_boundaries: Vec<WordBoundary>,
    pub(crate) cancellation: Option<CancellationDetails>,
    /// Set once the terminal event has been delivered.
    pub(crate) settled: bool,
}

pub(crate) struct RequestShared {
    id: u64,
    result_id: String,
    input: SynthesisInput,
    format: OutputFormat,
    streamed: bool,
    data: RwLock<RequestData>,
    changed: Notify,
    cancel: CancellationToken,
}

/// Handle to a submitted request.
///
/// Handles are cheap to clone. Every clone observes the same request.
#[derive(Clone)]
pub struct RequestHandle {
    shared: Arc<RequestShared>,
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.shared.id)
            .field("result_id", &self.shared.result_id)
            .field("state", &self.state())
            .finish()
    }
}

impl RequestHandle {
    pub(crate) fn new(id: u64, input: SynthesisInput, format: OutputFormat, streamed: bool) -> Self {
        Self {
            shared: Arc::new(RequestShared {
                id,
                result_id: uuid::Uuid::new_v4().simple().to_string(),
                input,
                format,
                streamed,
                data: RwLock::new(RequestData {
                    state: RequestState::Queued,
                    audio: Vec::new(),
                    word_boundaries: Vec::new(),
                    cancellation: None,
                    settled: false,
                }),
                changed: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Session-unique request id.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Globally unique result id.
    pub fn result_id(&self) -> &str {
        &self.shared.result_id
    }

    pub fn input(&self) -> &SynthesisInput {
        &self.shared.input
    }

    pub fn output_format(&self) -> OutputFormat {
        self.shared.format
    }

    pub fn state(&self) -> RequestState {
        self.shared.data.read().state
    }

    /// Bytes produced so far.
    pub fn audio_len(&self) -> usize {
        self.shared.data.read().audio.len()
    }

    /// Word boundaries received so far.
    pub fn word_boundaries(&self) -> Vec<WordBoundary> {
        self.shared.data.read().word_boundaries.clone()
    }

    pub fn cancellation(&self) -> Option<CancellationDetails> {
        self.shared.data.read().cancellation.clone()
    }

    /// Builds a result from the current state.
    ///
    /// Non-terminal requests report `SynthesizingAudioStarted` with no audio.
    pub fn snapshot(&self) -> SynthesisResult {
        let data = self.shared.data.read();
        let reason = match data.state {
            RequestState::Completed => ResultReason::SynthesizingAudioCompleted,
            RequestState::Canceled => ResultReason::Canceled,
            _ => ResultReason::SynthesizingAudioStarted,
        };
        let audio = if data.state.is_terminal() && !self.shared.streamed {
            Bytes::copy_from_slice(&data.audio)
        } else {
            Bytes::new()
        };
        let ticks = self.shared.format.bytes_to_ticks(data.audio.len() as u64);
        SynthesisResult {
            request_id: self.shared.id,
            result_id: self.shared.result_id.clone(),
            reason,
            audio,
            cancellation: data.cancellation.clone(),
            audio_duration: Duration::from_millis(ticks / TICKS_PER_MILLISECOND),
            word_boundaries: data.word_boundaries.clone(),
        }
    }

    /// Waits until the request is terminal and its terminal event has
    /// been delivered, then returns its result.
    pub(crate) async fn wait_terminal(&self) -> SynthesisResult {
        self.wait_until(|d| d.settled).await;
        self.snapshot()
    }

    /// Waits until the request has left the Queued state.
    pub(crate) async fn wait_started(&self) -> SynthesisResult {
        self.wait_until(|d| match d.state {
            RequestState::Queued => false,
            RequestState::Completed | RequestState::Canceled => d.settled,
            _ => true,
        })
        .await;
        self.snapshot()
    }

    /// Suspends until `pred` holds for the request data.
    pub(crate) async fn wait_until<F>(&self, pred: F)
    where
        F: Fn(&RequestData) -> bool,
    {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if pred(&self.shared.data.read()) {
                return;
            }
            notified.await;
        }
    }

    /// Runs `f` against the current data under the read lock.
    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&RequestData) -> R) -> R {
        f(&self.shared.data.read())
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.shared.cancel
    }

    pub(crate) fn cancelled(&self) -> impl Future<Output = ()> + '_ {
        self.shared.cancel.cancelled()
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    // ---- writer side, used only by the session worker ----

    fn update(&self, f: impl FnOnce(&mut RequestData) -> bool) -> bool {
        let changed = {
            let mut data = self.shared.data.write();
            if data.state.is_terminal() {
                false
            } else {
                f(&mut data)
            }
        };
        if changed {
            self.shared.changed.notify_waiters();
        }
        changed
    }

    pub(crate) fn mark_started(&self) -> bool {
        self.update(|d| {
            d.state = RequestState::Started;
            true
        })
    }

    /// Appends a chunk and returns the new total length.
    pub(crate) fn append_audio(&self, chunk: &[u8]) -> usize {
        let mut total = 0;
        self.update(|d| {
            d.audio.extend_from_slice(chunk);
            d.state = RequestState::Synthesizing;
            total = d.audio.len();
            true
        });
        total
    }

    /// Records a boundary; returns false when it would break offset order.
    pub(crate) fn push_boundary(&self, boundary: WordBoundary) -> bool {
        self.update(|d| {
            if let Some(last) = d.word_boundaries.last() {
                if boundary.audio_offset_ticks < last.audio_offset_ticks {
                    return false;
                }
            }
            d.word_boundaries.push(boundary);
            true
        })
    }

    pub(crate) fn mark_completed(&self) -> bool {
        self.update(|d| {
            d.state = RequestState::Completed;
            true
        })
    }

    pub(crate) fn mark_canceled(&self, details: CancellationDetails) -> bool {
        self.update(|d| {
            d.state = RequestState::Canceled;
            d.cancellation = Some(details);
            true
        })
    }

    /// Releases completion waiters. Call after the terminal event went out.
    pub(crate) fn settle(&self) {
        {
            let mut data = self.shared.data.write();
            if !data.state.is_terminal() || data.settled {
                return;
            }
            data.settled = true;
        }
        self.shared.changed.notify_waiters();
    }
}
