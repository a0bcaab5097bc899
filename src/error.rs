//! Error types for fetchop
//!
//! Two layers of errors exist:
//! - [`Error`] is returned synchronously by constructors and queue operations
//!   (invalid requests, ambiguous destinations, wrong task state, shutdown).
//! - [`DownloadError`] is the classified terminal error delivered exactly once
//!   through a task's completion handler. It never escapes as a panic or a
//!   synchronous error; every failure of a running task is one of its variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Subdomain tag attached to every classified [`DownloadError`]
pub const ERROR_SUBDOMAIN: &str = "DownloadOperation";

/// Result type alias for fetchop operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fetchop
///
/// Returned by task construction, queue admission and the host surface.
/// Failures that happen while a task is running are reported as
/// [`DownloadError`] through the task's completion handler instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_downloads")
        key: Option<String>,
    },

    /// The request is absent or malformed (missing URL, unsupported scheme, bad header)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Both a file path and an in-memory buffer were given as the destination
    #[error("ambiguous destination: both path {path} and an in-memory buffer were specified")]
    AmbiguousDestination {
        /// The file path that was specified alongside the buffer
        path: PathBuf,
    },

    /// Operation not permitted in the task's current state
    #[error("cannot {operation} task in state {current_state}")]
    InvalidState {
        /// The operation that was attempted (e.g., "submit", "reset")
        operation: String,
        /// The state that prevents the operation (e.g., "executing", "queued")
        current_state: String,
    },

    /// A download is already active for this host surface
    #[error("a download is already active")]
    AlreadyActive,

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::InvalidRequest(_) => "invalid_request",
            Error::AmbiguousDestination { .. } => "ambiguous_destination",
            Error::InvalidState { .. } => "invalid_state",
            Error::AlreadyActive => "already_active",
            Error::ShuttingDown => "shutting_down",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }

    /// Whether this is a construction-time error (the task never reaches Executing)
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidRequest(_) | Error::AmbiguousDestination { .. }
        )
    }
}

/// Numeric error code from the closed classification set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum ErrorCode {
    /// No specific classification (transport, storage, cancellation)
    None = 0,
    /// The server answered with a non-success status code
    HttpError = 1,
}

impl ErrorCode {
    /// Integer value of the code
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Tagged classification of a [`DownloadError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorClassification {
    /// Always [`ERROR_SUBDOMAIN`]
    pub subdomain: &'static str,
    /// Classification code
    pub code: ErrorCode,
    /// Offending HTTP status (only for [`ErrorCode::HttpError`])
    pub status: Option<u16>,
}

/// Category of a transport-level failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// Connection could not be established (DNS, refused, TLS)
    Connect,
    /// The request or a read timed out
    Timeout,
    /// The body stream broke after headers were received
    Body,
    /// The request could not be built or sent
    Request,
    /// Anything else reported by the transport
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Body => "body",
            TransportErrorKind::Request => "request",
            TransportErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Error reported by a [`Transport`](crate::transport::Transport) implementation
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind} failure: {message}")]
pub struct TransportError {
    /// Failure category
    pub kind: TransportErrorKind,
    /// Transport-supplied description
    pub message: String,
}

impl TransportError {
    /// Create a transport error of the given kind
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportErrorKind::Timeout
        } else if e.is_connect() {
            TransportErrorKind::Connect
        } else if e.is_body() || e.is_decode() {
            TransportErrorKind::Body
        } else if e.is_request() || e.is_builder() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, e.to_string())
    }
}

/// Terminal error of a download task
///
/// Delivered once through the completion handler and also returned by
/// [`DownloadTask::wait`](crate::task::DownloadTask::wait).
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadError {
    /// Connection succeeded but the server answered with a non-success status
    #[error("HTTP error: server returned status {status}")]
    Http {
        /// The offending status code
        status: u16,
    },

    /// Connection-level failure (DNS, TLS, timeout, broken body)
    #[error("transport error ({kind}): {message}")]
    Transport {
        /// Failure category
        kind: TransportErrorKind,
        /// Transport-supplied description
        message: String,
    },

    /// Writing to the destination failed
    #[error("storage error: {message}")]
    Storage {
        /// Description of the I/O failure
        message: String,
    },

    /// The task was cancelled while executing
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Subdomain tag shared by all task errors
    pub fn subdomain(&self) -> &'static str {
        ERROR_SUBDOMAIN
    }

    /// Classification code
    pub fn code(&self) -> ErrorCode {
        match self {
            DownloadError::Http { .. } => ErrorCode::HttpError,
            _ => ErrorCode::None,
        }
    }

    /// HTTP status attached to an [`ErrorCode::HttpError`]
    pub fn status(&self) -> Option<u16> {
        match self {
            DownloadError::Http { status } => Some(*status),
            _ => None,
        }
    }

    /// Whether this is the cancellation-flavored error
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }

    /// Full tagged classification
    pub fn classification(&self) -> ErrorClassification {
        ErrorClassification {
            subdomain: self.subdomain(),
            code: self.code(),
            status: self.status(),
        }
    }
}

impl From<TransportError> for DownloadError {
    fn from(e: TransportError) -> Self {
        DownloadError::Transport {
            kind: e.kind,
            message: e.message,
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        DownloadError::Storage {
            message: e.to_string(),
        }
    }
}
