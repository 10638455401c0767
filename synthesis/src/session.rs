//! Synthesis session: FIFO request processing over one backend connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendFrame, Connection};
use crate::config::{Credential, CredentialStore, SessionConfig};
use crate::error::{BackendError, CancellationDetails, CancellationErrorCode, Error, Result};
use crate::event::{EventBus, EventPayload, SynthesisEvent};
use crate::reader::StreamingResultReader;
use crate::request::{RequestHandle, SynthesisInput, SynthesisResult, TerminalResult};
use crate::sink::{self, AudioSink, SinkError};

/// Snapshot of session-scoped counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub submitted: u64,
    pub started: u64,
    pub completed: u64,
    pub canceled: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    canceled: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            submitted: self.submitted.load(Ordering::SeqCst),
            started: self.started.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            canceled: self.canceled.load(Ordering::SeqCst),
        }
    }
}

type RequestMap = Arc<Mutex<HashMap<u64, RequestHandle>>>;

/// A text-to-speech session.
///
/// Requests are accepted from any task or thread and processed one at a
/// time, in submission order, by a worker task that exclusively owns the
/// backend connection.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use giztoy_synthesis::{LoopbackBackend, SessionConfig, SynthesisSession};
///
/// # async fn run() -> giztoy_synthesis::Result<()> {
/// let config = SessionConfig::builder("westus").subscription_key("key").build()?;
/// let session = SynthesisSession::builder(config, Arc::new(LoopbackBackend::new())).build()?;
///
/// let result = session.speak_text("Hello world").await?;
/// println!("{} bytes of audio", result.audio.len());
/// session.close().await;
/// # Ok(())
/// # }
/// ```
pub struct SynthesisSession {
    config: Arc<SessionConfig>,
    credentials: CredentialStore,
    events: Arc<EventBus>,
    counters: Arc<Counters>,
    requests: RequestMap,
    streamed: bool,
    next_id: AtomicU64,
    tx: Mutex<Option<mpsc::UnboundedSender<RequestHandle>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for [`SynthesisSession`].
pub struct SessionBuilder {
    config: SessionConfig,
    backend: Arc<dyn Backend>,
    sink: Option<Arc<dyn AudioSink>>,
    events: Option<Arc<EventBus>>,
    runtime: Option<Handle>,
}

impl SessionBuilder {
    /// Streams audio into `sink` instead of keeping it in the results.
    pub fn sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Uses an existing event bus.
    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Spawns the worker on `handle` instead of the current runtime.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Validates the configuration and starts the worker.
    pub fn build(self) -> Result<SynthesisSession> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(h) => h,
            None => Handle::try_current()
                .map_err(|_| Error::Config("no tokio runtime available".to_string()))?,
        };

        let config = Arc::new(self.config);
        let credentials = CredentialStore::new(config.credential.clone());
        let events = self.events.unwrap_or_default();
        let counters = Arc::new(Counters::default());
        let requests: RequestMap = Arc::new(Mutex::new(HashMap::new()));
        let streamed = self.sink.as_ref().is_some_and(|s| !s.is_discarding());
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker {
            config: config.clone(),
            backend: self.backend,
            credentials: credentials.clone(),
            events: events.clone(),
            counters: counters.clone(),
            requests: requests.clone(),
            sink: self.sink,
            connection: None,
            connection_version: 0,
        };
        let join = runtime.spawn(worker.run(rx));

        info!(
            region = %config.region,
            voice = %config.voice_name,
            format = %config.output_format,
            streamed,
            "synthesis session started"
        );

        Ok(SynthesisSession {
            config,
            credentials,
            events,
            counters,
            requests,
            streamed,
            next_id: AtomicU64::new(1),
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(join)),
        })
    }
}

impl SynthesisSession {
    /// Creates a session builder.
    pub fn builder(config: SessionConfig, backend: Arc<dyn Backend>) -> SessionBuilder {
        SessionBuilder {
            config,
            backend,
            sink: None,
            events: None,
            runtime: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The session's event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Number of submitted requests that have not reached a terminal state.
    pub fn in_flight(&self) -> usize {
        self.requests.lock().len()
    }

    /// Looks up an in-flight request by id.
    pub fn request(&self, id: u64) -> Option<RequestHandle> {
        self.requests.lock().get(&id).cloned()
    }

    /// Returns the current credential.
    pub fn credential(&self) -> Credential {
        self.credentials.current()
    }

    /// Replaces the credential. The next request runs on a connection opened
    /// with it.
    pub fn set_credential(&self, credential: Credential) {
        self.credentials.set(credential);
    }

    /// Returns the bearer token, if the session authenticates with one.
    pub fn authorization_token(&self) -> Option<String> {
        match self.credentials.current() {
            Credential::AuthorizationToken(t) => Some(t),
            Credential::SubscriptionKey(_) => None,
        }
    }

    /// Switches to (or refreshes) bearer-token authentication.
    pub fn set_authorization_token(&self, token: impl Into<String>) {
        self.credentials.set(Credential::AuthorizationToken(token.into()));
    }

    /// Enqueues a request and returns immediately.
    pub fn submit(&self, input: SynthesisInput) -> Result<RequestHandle> {
        input.validate(self.config.max_input_chars)?;

        let tx = self.tx.lock();
        let tx = tx.as_ref().ok_or(Error::SessionClosed)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = RequestHandle::new(id, input, self.config.output_format, self.streamed);
        self.requests.lock().insert(id, handle.clone());
        if tx.send(handle.clone()).is_err() {
            self.requests.lock().remove(&id);
            return Err(Error::SessionClosed);
        }
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        debug!(request_id = id, result_id = %handle.result_id(), "request queued");
        Ok(handle)
    }

    /// Waits until the request is Completed or Canceled.
    ///
    /// With a deadline, returns [`Error::TimedOut`] on expiry; the request
    /// keeps running.
    pub async fn await_completion(
        &self,
        handle: &RequestHandle,
        deadline: Option<Duration>,
    ) -> Result<TerminalResult> {
        match deadline {
            Some(d) => tokio::time::timeout(d, handle.wait_terminal())
                .await
                .map_err(|_| Error::TimedOut),
            None => Ok(handle.wait_terminal().await),
        }
    }

    /// Requests cancellation. No-op for terminal requests.
    ///
    /// The request is canceled at the next chunk boundary; a queued request
    /// is canceled when the worker reaches it, without touching the backend.
    pub fn cancel(&self, handle: &RequestHandle) {
        if handle.state().is_terminal() {
            return;
        }
        debug!(request_id = handle.id(), "cancel requested");
        handle.cancel_token().cancel();
    }

    /// Builds a reader over the request's audio.
    pub fn reader(&self, handle: &RequestHandle) -> StreamingResultReader {
        StreamingResultReader::new(handle.clone())
    }

    /// Synthesizes plain text and waits for the result.
    pub async fn speak_text(&self, text: impl Into<String>) -> Result<SynthesisResult> {
        let handle = self.submit(SynthesisInput::text(text))?;
        self.await_completion(&handle, None).await
    }

    /// Synthesizes SSML and waits for the result.
    pub async fn speak_ssml(&self, ssml: impl Into<String>) -> Result<SynthesisResult> {
        let handle = self.submit(SynthesisInput::ssml(ssml))?;
        self.await_completion(&handle, None).await
    }

    /// Submits plain text and returns once synthesis has started.
    ///
    /// The result has reason `SynthesizingAudioStarted` and no audio; read
    /// the audio through a reader built from the returned handle. A request
    /// that never started yields its terminal result instead.
    pub async fn start_speaking_text(
        &self,
        text: impl Into<String>,
    ) -> Result<(RequestHandle, SynthesisResult)> {
        let handle = self.submit(SynthesisInput::text(text))?;
        let result = handle.wait_started().await;
        Ok((handle, result))
    }

    /// Submits SSML and returns once synthesis has started.
    pub async fn start_speaking_ssml(
        &self,
        ssml: impl Into<String>,
    ) -> Result<(RequestHandle, SynthesisResult)> {
        let handle = self.submit(SynthesisInput::ssml(ssml))?;
        let result = handle.wait_started().await;
        Ok((handle, result))
    }

    /// Stops accepting requests, drains the queue and closes the sink.
    pub async fn close(&self) {
        let tx = self.tx.lock().take();
        drop(tx);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("synthesis worker ended abnormally: {}", e);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl Drop for SynthesisSession {
    fn drop(&mut self) {
        // Dropping the sender lets the worker drain and finalize the sink.
        self.tx.get_mut().take();
    }
}

enum AttemptError {
    Cancelled,
    Sink(SinkError),
    Backend {
        err: BackendError,
        // audio or word boundaries already delivered for this request
        progressed: bool,
    },
}

struct Worker {
    config: Arc<SessionConfig>,
    backend: Arc<dyn Backend>,
    credentials: CredentialStore,
    events: Arc<EventBus>,
    counters: Arc<Counters>,
    requests: RequestMap,
    sink: Option<Arc<dyn AudioSink>>,
    connection: Option<Box<dyn Connection>>,
    // credential version the connection was opened with
    connection_version: u64,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RequestHandle>) {
        while let Some(req) = rx.recv().await {
            self.process(&req).await;
            self.requests.lock().remove(&req.id());
        }

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.close().await {
                warn!("closing audio sink failed: {}", e);
            }
        }
        info!("synthesis session closed");
    }

    fn emit(&self, req: &RequestHandle, payload: EventPayload) {
        self.events.emit(&SynthesisEvent {
            request_id: req.id(),
            result_id: req.result_id().to_string(),
            payload,
        });
    }

    async fn process(&mut self, req: &RequestHandle) {
        if req.is_cancel_requested() {
            self.finish_canceled(req, CancellationDetails::user_cancelled());
            return;
        }

        req.mark_started();
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        debug!(request_id = req.id(), "synthesis started");
        self.emit(req, EventPayload::Started);

        match self.synthesize(req).await {
            Ok(()) => self.finish_completed(req),
            Err(details) => self.finish_canceled(req, details),
        }
    }

    /// Runs the request, reconnecting once if nothing has been delivered yet.
    async fn synthesize(&mut self, req: &RequestHandle) -> std::result::Result<(), CancellationDetails> {
        let mut retried = false;
        loop {
            match self.attempt(req).await {
                Ok(()) => return Ok(()),
                Err(AttemptError::Cancelled) => {
                    // The stream was abandoned mid-flight.
                    self.connection = None;
                    return Err(CancellationDetails::user_cancelled());
                }
                Err(AttemptError::Sink(e)) => {
                    warn!(request_id = req.id(), "audio sink write failed: {}", e);
                    return Err(CancellationDetails::audio_write(e.to_string()));
                }
                Err(AttemptError::Backend { err, progressed }) => {
                    self.connection = None;
                    let final_failure =
                        retried || progressed || err.code == CancellationErrorCode::BadRequest;
                    if final_failure {
                        warn!(request_id = req.id(), "backend failed: {}", err);
                        return Err(CancellationDetails::backend(&err));
                    }
                    warn!(request_id = req.id(), "backend failed, reconnecting: {}", err);
                    retried = true;
                }
            }
        }
    }

    async fn attempt(&mut self, req: &RequestHandle) -> std::result::Result<(), AttemptError> {
        let backend_err = |err: BackendError| AttemptError::Backend {
            err,
            progressed: false,
        };

        if self.connection.is_some() && self.connection_version != self.credentials.version() {
            debug!(request_id = req.id(), "credential changed, reconnecting");
            self.connection = None;
        }
        if self.connection.is_none() {
            let (credential, version) = self.credentials.snapshot();
            let conn = self
                .backend
                .connect(&self.config, &credential)
                .await
                .map_err(backend_err)?;
            debug!(request_id = req.id(), "backend connected");
            self.connection = Some(conn);
            self.connection_version = version;
        }
        let Some(conn) = self.connection.as_mut() else {
            return Err(backend_err(BackendError::connection("no connection")));
        };
        let mut stream = conn
            .synthesize(req.input(), self.config.output_format)
            .await
            .map_err(backend_err)?;

        let mut progressed = false;
        loop {
            let frame = tokio::select! {
                biased;
                _ = req.cancelled() => return Err(AttemptError::Cancelled),
                frame = stream.next() => frame,
            };

            match frame {
                None => return Ok(()),
                Some(Err(err)) => {
                    return Err(AttemptError::Backend { err, progressed });
                }
                Some(Ok(BackendFrame::Audio(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    progressed = true;
                    let total_bytes = req.append_audio(&chunk);
                    if let Some(sink) = &self.sink {
                        match sink::write_all(sink.as_ref(), &chunk, req.cancel_token()).await {
                            Ok(()) => {}
                            Err(SinkError::Cancelled) => return Err(AttemptError::Cancelled),
                            Err(e) => return Err(AttemptError::Sink(e)),
                        }
                    }
                    self.emit(req, EventPayload::Synthesizing { chunk, total_bytes });
                }
                Some(Ok(BackendFrame::WordBoundary(boundary))) => {
                    if req.push_boundary(boundary) {
                        progressed = true;
                        self.emit(req, EventPayload::WordBoundary(boundary));
                    } else {
                        warn!(
                            request_id = req.id(),
                            ticks = boundary.audio_offset_ticks,
                            "dropping out-of-order word boundary"
                        );
                    }
                }
            }
        }
    }

    fn finish_completed(&self, req: &RequestHandle) {
        if !req.mark_completed() {
            return;
        }
        self.counters.completed.fetch_add(1, Ordering::SeqCst);
        let result = req.snapshot();
        let audio_len = req.audio_len();
        info!(
            request_id = req.id(),
            result_id = %req.result_id(),
            bytes = audio_len,
            "synthesis completed"
        );
        self.emit(
            req,
            EventPayload::Completed {
                audio_len,
                audio_duration: result.audio_duration,
            },
        );
        req.settle();
    }

    fn finish_canceled(&self, req: &RequestHandle, details: CancellationDetails) {
        if !req.mark_canceled(details.clone()) {
            return;
        }
        self.counters.canceled.fetch_add(1, Ordering::SeqCst);
        info!(
            request_id = req.id(),
            result_id = %req.result_id(),
            reason = %details.reason,
            "synthesis canceled"
        );
        self.emit(req, EventPayload::Canceled(details));
        req.settle();
    }
}
