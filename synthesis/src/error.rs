//! Error types for synthesis sessions.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for synthesis operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for synthesis session operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The request was rejected locally before it reached the backend.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The backend could not be reached or refused the request.
    #[error("backend unavailable: {message} (code={code})")]
    BackendUnavailable {
        code: CancellationErrorCode,
        message: String,
    },

    /// The audio sink refused a write.
    #[error("audio write failed: {0}")]
    AudioWriteFailed(String),

    /// A caller-side wait expired. The request keeps running.
    #[error("timed out")]
    TimedOut,

    /// The request was canceled by the caller.
    #[error("canceled by user")]
    UserCancelled,

    /// The session no longer accepts submissions.
    #[error("session closed")]
    SessionClosed,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns true if this is a caller-side timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TimedOut)
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TimedOut => true,
            Error::BackendUnavailable { code, .. } => code.is_transient(),
            _ => false,
        }
    }
}

/// Machine-readable code attached to backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationErrorCode {
    /// No error (user cancellation, sink failures).
    NoError,
    /// Network level failure.
    ConnectionFailure,
    /// Credential was rejected.
    AuthenticationFailure,
    /// Rate limit or quota exceeded.
    TooManyRequests,
    /// The backend rejected the request shape or output format.
    BadRequest,
    /// Backend-side failure.
    ServiceError,
}

impl CancellationErrorCode {
    /// Returns the code as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationErrorCode::NoError => "no_error",
            CancellationErrorCode::ConnectionFailure => "connection_failure",
            CancellationErrorCode::AuthenticationFailure => "authentication_failure",
            CancellationErrorCode::TooManyRequests => "too_many_requests",
            CancellationErrorCode::BadRequest => "bad_request",
            CancellationErrorCode::ServiceError => "service_error",
        }
    }

    /// Returns true for failures a fresh connection may fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CancellationErrorCode::ConnectionFailure
                | CancellationErrorCode::TooManyRequests
                | CancellationErrorCode::ServiceError
        )
    }
}

impl fmt::Display for CancellationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a [`Backend`](crate::Backend) or its connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct BackendError {
    pub code: CancellationErrorCode,
    pub message: String,
}

impl BackendError {
    /// Creates a new backend error.
    pub fn new(code: CancellationErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Network level failure.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(CancellationErrorCode::ConnectionFailure, message)
    }

    /// Rejected credential.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(CancellationErrorCode::AuthenticationFailure, message)
    }

    /// Rejected request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(CancellationErrorCode::BadRequest, message)
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        Error::BackendUnavailable {
            code: err.code,
            message: err.message,
        }
    }
}

/// Why a request ended in the Canceled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    /// [`SynthesisSession::cancel`](crate::SynthesisSession::cancel) was called.
    UserCancelled,
    /// Connecting or streaming failed after the retry.
    BackendUnavailable,
    /// The configured sink refused a write.
    AudioWriteFailed,
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancellationReason::UserCancelled => "user_cancelled",
            CancellationReason::BackendUnavailable => "backend_unavailable",
            CancellationReason::AudioWriteFailed => "audio_write_failed",
        };
        f.write_str(s)
    }
}

/// Details attached to a canceled request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationDetails {
    pub reason: CancellationReason,
    pub error_code: CancellationErrorCode,
    pub message: String,
}

impl CancellationDetails {
    pub(crate) fn user_cancelled() -> Self {
        Self {
            reason: CancellationReason::UserCancelled,
            error_code: CancellationErrorCode::NoError,
            message: String::new(),
        }
    }

    pub(crate) fn backend(err: &BackendError) -> Self {
        Self {
            reason: CancellationReason::BackendUnavailable,
            error_code: err.code,
            message: err.message.clone(),
        }
    }

    pub(crate) fn audio_write(message: impl Into<String>) -> Self {
        Self {
            reason: CancellationReason::AudioWriteFailed,
            error_code: CancellationErrorCode::NoError,
            message: message.into(),
        }
    }

    /// Converts the details into the matching [`Error`].
    pub fn to_error(&self) -> Error {
        match self.reason {
            CancellationReason::UserCancelled => Error::UserCancelled,
            CancellationReason::BackendUnavailable => Error::BackendUnavailable {
                code: self.error_code,
                message: self.message.clone(),
            },
            CancellationReason::AudioWriteFailed => Error::AudioWriteFailed(self.message.clone()),
        }
    }
}
