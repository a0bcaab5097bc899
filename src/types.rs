//! Core types for fetchop

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::DownloadError;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a download task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Allocate the next process-unique task ID
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a download task
///
/// ```text
/// Ready ──start──▶ Executing ──success/error──▶ Finished
///   │                  │
///   └──cancel──▶ Cancelled ◀──cancel (after teardown)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Constructed, no connection opened yet
    Ready,
    /// Transport connection open, progress may arrive
    Executing,
    /// Cancelled before start or after in-flight teardown (terminal)
    Cancelled,
    /// Completed successfully or with an error (terminal)
    Finished,
}

impl TaskState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Cancelled | TaskState::Finished)
    }

    /// Lowercase name used in errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Ready => "ready",
            TaskState::Executing => "executing",
            TaskState::Cancelled => "cancelled",
            TaskState::Finished => "finished",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte counters reported to update handlers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Bytes received and written so far
    pub downloaded: u64,
    /// Expected total (None when the transport reports no content length)
    pub expected: Option<u64>,
}

impl Progress {
    /// Completion percentage, if the expected size is known and non-zero
    pub fn percent(&self) -> Option<f32> {
        match self.expected {
            Some(0) | None => None,
            Some(total) => Some((self.downloaded as f64 / total as f64 * 100.0) as f32),
        }
    }
}

/// Response metadata delivered once the transport receives headers
#[derive(Clone, Debug)]
pub struct ResponseInfo {
    /// HTTP status code
    pub status: u16,
    /// Response header fields
    pub headers: HeaderMap,
    /// Declared body length, if any
    pub content_length: Option<u64>,
}

impl ResponseInfo {
    /// Build response metadata from a status and headers, reading Content-Length
    pub fn new(status: u16, headers: HeaderMap) -> Self {
        let content_length = headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        Self {
            status,
            headers,
            content_length,
        }
    }

    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl From<&reqwest::Response> for ResponseInfo {
    fn from(response: &reqwest::Response) -> Self {
        Self {
            status: response.status().as_u16(),
            headers: response.headers().clone(),
            content_length: response.content_length(),
        }
    }
}

/// Result of a successful task
#[derive(Clone, Debug)]
pub struct TaskOutput {
    /// Total bytes written to the destination
    pub downloaded: u64,
    /// Expected size as reported by the transport
    pub expected: Option<u64>,
    /// Response metadata
    pub response: Option<ResponseInfo>,
}

/// Terminal outcome of a task
pub type TaskOutcome = std::result::Result<TaskOutput, DownloadError>;

/// Point-in-time view of a task
#[derive(Clone, Debug)]
pub struct TaskSnapshot {
    /// Task ID
    pub id: TaskId,
    /// Current state
    pub state: TaskState,
    /// Byte counters
    pub progress: Progress,
    /// HTTP status, once headers arrived
    pub status: Option<u16>,
    /// Terminal error, if any
    pub error: Option<DownloadError>,
    /// Construction time
    pub created_at: DateTime<Utc>,
    /// When the task entered Executing
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

/// Event emitted during a task's lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task accepted by a queue
    Queued {
        /// Task ID
        id: TaskId,
        /// Requested URL
        url: String,
    },

    /// Task admitted and transport connection opening
    Started {
        /// Task ID
        id: TaskId,
    },

    /// Bytes received
    Progress {
        /// Task ID
        id: TaskId,
        /// Bytes written so far
        downloaded: u64,
        /// Expected total, if known
        #[serde(skip_serializing_if = "Option::is_none")]
        expected: Option<u64>,
    },

    /// Task finished successfully
    Completed {
        /// Task ID
        id: TaskId,
        /// Total bytes written
        downloaded: u64,
    },

    /// Task finished with an error
    Failed {
        /// Task ID
        id: TaskId,
        /// Classified error
        error: DownloadError,
    },

    /// Task cancelled (before start or mid-flight)
    Cancelled {
        /// Task ID
        id: TaskId,
    },

    /// Queue shut down
    Shutdown,
}

/// Queue statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Submitted tasks still waiting for a slot
    pub pending: usize,
    /// Tasks currently occupying a slot
    pub running: usize,
    /// Configured concurrency bound
    pub max_concurrent: usize,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn task_ids_are_unique_and_increasing() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert!(b > a);
        assert_eq!(format!("{}", TaskId(42)), "42");
    }

    #[test]
    fn only_cancelled_and_finished_are_terminal() {
        assert!(!TaskState::Ready.is_terminal());
        assert!(!TaskState::Executing.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Finished.is_terminal());
    }

    #[test]
    fn progress_percent_requires_known_nonzero_total() {
        let half = Progress {
            downloaded: 50,
            expected: Some(200),
        };
        assert_eq!(half.percent(), Some(25.0));
        assert_eq!(Progress::default().percent(), None);
        assert_eq!(
            Progress {
                downloaded: 0,
                expected: Some(0)
            }
            .percent(),
            None
        );
    }

    #[test]
    fn response_info_reads_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("1234"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let info = ResponseInfo::new(200, headers);

        assert_eq!(info.content_length, Some(1234));
        assert!(info.is_success());
        assert_eq!(info.header("content-type"), Some("text/plain"));
        assert_eq!(info.header("x-missing"), None);
    }

    #[test]
    fn response_info_status_boundaries() {
        assert!(!ResponseInfo::new(199, HeaderMap::new()).is_success());
        assert!(ResponseInfo::new(204, HeaderMap::new()).is_success());
        assert!(!ResponseInfo::new(301, HeaderMap::new()).is_success());
        assert!(!ResponseInfo::new(404, HeaderMap::new()).is_success());
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let json = serde_json::to_value(Event::Progress {
            id: TaskId(7),
            downloaded: 10,
            expected: None,
        })
        .unwrap();

        assert_eq!(json["type"], "progress");
        assert_eq!(json["id"], 7);
        assert!(json.get("expected").is_none());
    }
}
