//! Download task state machine split into focused submodules.
//!
//! - this file - construction, observation, cancellation and reset
//! - [`execution`] - the transfer loop and the terminal transition
//!
//! The lifecycle lives in one `watch` channel and every transition is a
//! compare-and-set inside `send_if_modified`. Cancellation of an executing
//! task goes through a `CancellationToken` that the transfer loop selects on.

mod execution;


use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::ThreadId;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, Error, Result};
use crate::request::DownloadRequest;
use crate::sink::{Destination, MemoryBuffer};
use crate::transport::Transport;
use crate::types::{
    Event, Progress, ResponseInfo, TaskId, TaskOutcome, TaskOutput, TaskSnapshot, TaskState,
};

/// Called with the byte counters after every written chunk
pub type UpdateHandler = Box<dyn FnMut(Progress) + Send + 'static>;

/// Called exactly once with the terminal outcome (never for a task cancelled while Ready)
pub type CompletionHandler = Box<dyn FnOnce(TaskOutcome) + Send + 'static>;

/// Finite, non-restartable sequence of progress updates
pub type ProgressStream = UnboundedReceiverStream<Progress>;

#[derive(Default)]
struct Handlers {
    update: Option<UpdateHandler>,
    completion: Option<CompletionHandler>,
    /// Thread currently inside the update handler
    updating: Option<ThreadId>,
}

struct TaskInner {
    id: TaskId,
    request: DownloadRequest,
    destination: Destination,
    state_tx: watch::Sender<TaskState>,
    cancel_token: CancellationToken,
    progress: Mutex<Progress>,
    response: Mutex<Option<ResponseInfo>>,
    error: Mutex<Option<DownloadError>>,
    handlers: Mutex<Handlers>,
    update_done: Condvar,
    progress_tx: Mutex<Option<mpsc::UnboundedSender<Progress>>>,
    progress_taken: AtomicBool,
    events: OnceLock<broadcast::Sender<Event>>,
    created_at: DateTime<Utc>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A cancellable, observable download of one resource
///
/// Cloning yields another handle to the same task.
#[derive(Clone)]
pub struct DownloadTask {
    inner: Arc<TaskInner>,
}

/// Builder for [`DownloadTask`]
///
/// The destination is either a file path or an in-memory buffer. Giving both
/// is rejected by [`build`](DownloadTaskBuilder::build); giving neither
/// accumulates the body in a fresh buffer.
#[derive(Default)]
pub struct DownloadTaskBuilder {
    request: Option<DownloadRequest>,
    path: Option<PathBuf>,
    buffer: Option<MemoryBuffer>,
    update: Option<UpdateHandler>,
    completion: Option<CompletionHandler>,
}

impl std::fmt::Debug for DownloadTaskBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTaskBuilder")
            .field("request", &self.request)
            .field("path", &self.path)
            .field("buffer", &self.buffer.as_ref().map(MemoryBuffer::len))
            .field("on_update", &self.update.is_some())
            .field("on_complete", &self.completion.is_some())
            .finish()
    }
}

impl DownloadTaskBuilder {
    /// Set the request
    pub fn request(mut self, request: DownloadRequest) -> Self {
        self.request = Some(request);
        self
    }

    /// Parse `url` into a GET request
    pub fn url(self, url: &str) -> Result<Self> {
        Ok(self.request(DownloadRequest::new(url)?))
    }

    /// Stream the body into a file
    pub fn download_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Accumulate the body in `buffer`
    pub fn memory_buffer(mut self, buffer: MemoryBuffer) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Set the destination from an existing [`Destination`]
    pub fn destination(self, destination: Destination) -> Self {
        match destination {
            Destination::File(path) => self.download_path(path),
            Destination::Memory(buffer) => self.memory_buffer(buffer),
        }
    }

    /// Handler invoked after every written chunk
    pub fn on_update<F>(mut self, handler: F) -> Self
    where
        F: FnMut(Progress) + Send + 'static,
    {
        self.update = Some(Box::new(handler));
        self
    }

    /// Handler invoked once with the terminal outcome
    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(TaskOutcome) + Send + 'static,
    {
        self.completion = Some(Box::new(handler));
        self
    }

    /// Construct the task in the Ready state
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if no request was given
    /// - [`Error::AmbiguousDestination`] if both a path and a buffer were given
    pub fn build(self) -> Result<DownloadTask> {
        let request = self
            .request
            .ok_or_else(|| Error::InvalidRequest("no request (URL) specified".to_string()))?;

        let destination = match (self.path, self.buffer) {
            (Some(path), Some(_)) => return Err(Error::AmbiguousDestination { path }),
            (Some(path), None) => {
                if path.as_os_str().is_empty() {
                    return Err(Error::InvalidRequest(
                        "destination path is empty".to_string(),
                    ));
                }
                Destination::File(path)
            }
            (None, Some(buffer)) => Destination::Memory(buffer),
            (None, None) => Destination::Memory(MemoryBuffer::new()),
        };

        let (state_tx, _) = watch::channel(TaskState::Ready);
        let id = TaskId::next();
        tracing::debug!(task_id = %id, url = %request.url(), "Task constructed");

        Ok(DownloadTask {
            inner: Arc::new(TaskInner {
                id,
                request,
                destination,
                state_tx,
                cancel_token: CancellationToken::new(),
                progress: Mutex::new(Progress::default()),
                response: Mutex::new(None),
                error: Mutex::new(None),
                handlers: Mutex::new(Handlers {
                    update: self.update,
                    completion: self.completion,
                    updating: None,
                }),
                update_done: Condvar::new(),
                progress_tx: Mutex::new(None),
                progress_taken: AtomicBool::new(false),
                events: OnceLock::new(),
                created_at: Utc::now(),
                started_at: Mutex::new(None),
                finished_at: Mutex::new(None),
            }),
        })
    }
}

impl DownloadTask {
    /// Start building a task
    pub fn builder() -> DownloadTaskBuilder {
        DownloadTaskBuilder::default()
    }

    /// Task ID
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// The immutable request
    pub fn request(&self) -> &DownloadRequest {
        &self.inner.request
    }

    /// Where output is written
    pub fn destination(&self) -> &Destination {
        &self.inner.destination
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        *self.inner.state_tx.borrow()
    }

    /// Constructed and not yet started
    pub fn is_ready(&self) -> bool {
        self.state() == TaskState::Ready
    }

    /// Transport connection open
    pub fn is_executing(&self) -> bool {
        self.state() == TaskState::Executing
    }

    /// Reached Finished (successfully or with an error)
    pub fn is_finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    /// Cancelled, or executing with an abort in flight
    pub fn is_cancelled(&self) -> bool {
        match self.state() {
            TaskState::Cancelled => true,
            TaskState::Executing => self.inner.cancel_token.is_cancelled(),
            TaskState::Ready | TaskState::Finished => false,
        }
    }

    /// Subscribe to state transitions
    pub fn watch_state(&self) -> watch::Receiver<TaskState> {
        self.inner.state_tx.subscribe()
    }

    /// Current byte counters
    pub fn current_progress(&self) -> Progress {
        *lock(&self.inner.progress)
    }

    /// Response metadata, once headers arrived
    pub fn response(&self) -> Option<ResponseInfo> {
        lock(&self.inner.response).clone()
    }

    /// Terminal error, if the task failed or was aborted mid-flight
    pub fn error(&self) -> Option<DownloadError> {
        lock(&self.inner.error).clone()
    }

    /// Copy of the in-memory output (None for file destinations)
    pub fn data(&self) -> Option<Bytes> {
        self.inner.destination.buffer().map(MemoryBuffer::snapshot)
    }

    /// Point-in-time view of the task
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id(),
            state: self.state(),
            progress: self.current_progress(),
            status: lock(&self.inner.response).as_ref().map(|r| r.status),
            error: self.error(),
            created_at: self.inner.created_at,
            started_at: *lock(&self.inner.started_at),
            finished_at: *lock(&self.inner.finished_at),
        }
    }

    /// Take the progress stream
    ///
    /// Returns `None` on every call after the first. The stream yields updates
    /// produced after it was taken and ends when the task terminates.
    pub fn progress(&self) -> Option<ProgressStream> {
        if self.inner.progress_taken.swap(true, Ordering::SeqCst) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut slot = lock(&self.inner.progress_tx);
        if !self.state().is_terminal() {
            *slot = Some(tx);
        }
        Some(UnboundedReceiverStream::new(rx))
    }

    /// Wait for the terminal outcome
    ///
    /// A task cancelled before it started resolves to
    /// `Err(DownloadError::Cancelled)` even though no handler is invoked.
    pub async fn wait(&self) -> TaskOutcome {
        let mut rx = self.inner.state_tx.subscribe();
        // the sender lives as long as `self`, so this only returns once terminal
        let _ = rx.wait_for(TaskState::is_terminal).await;
        self.outcome().unwrap_or(Err(DownloadError::Cancelled))
    }

    /// Start the task on the current tokio runtime
    ///
    /// No-op (returns false) unless the task is Ready and not submitted to a
    /// queue, or when called outside a runtime. Submitted tasks are started by
    /// their queue only.
    pub fn start(&self, transport: Arc<dyn Transport>) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(task_id = %self.id(), "start() called outside a tokio runtime");
            return false;
        };
        if !self.begin(Starter::Caller) {
            return false;
        }
        self.spawn_execution(&runtime, transport, |_| {});
        true
    }

    /// Run the task on the calling task and resolve with its outcome
    ///
    /// If the task was already started elsewhere, or is waiting in a queue,
    /// this only waits for it.
    pub async fn run(&self, transport: &dyn Transport) -> TaskOutcome {
        if self.begin(Starter::Caller) {
            self.execute(transport).await;
        }
        self.wait().await
    }

    /// Cancel the task
    ///
    /// - Ready: moves straight to Cancelled; no handler is ever invoked.
    /// - Executing: aborts the connection; the completion handler then receives
    ///   [`DownloadError::Cancelled`] once teardown finishes.
    /// - Terminal: no-op.
    ///
    /// Safe to call from any thread, including from inside the task's own handlers.
    pub fn cancel(&self) {
        let mut cancelled_ready = false;
        let mut abort_requested = false;
        let mut was_executing = false;
        self.inner.state_tx.send_if_modified(|state| match *state {
            TaskState::Ready => {
                self.inner.cancel_token.cancel();
                *state = TaskState::Cancelled;
                cancelled_ready = true;
                true
            }
            TaskState::Executing => {
                was_executing = true;
                abort_requested = !self.inner.cancel_token.is_cancelled();
                self.inner.cancel_token.cancel();
                false
            }
            TaskState::Cancelled | TaskState::Finished => false,
        });

        if was_executing {
            self.wait_for_update_handler();
        }

        if cancelled_ready {
            *lock(&self.inner.finished_at) = Some(Utc::now());
            lock(&self.inner.progress_tx).take();
            // handlers are dropped without being called
            let handlers = std::mem::take(&mut *lock(&self.inner.handlers));
            drop(handlers);
            tracing::debug!(task_id = %self.id(), "Task cancelled before start");
            self.emit(Event::Cancelled { id: self.id() });
        } else if abort_requested {
            tracing::debug!(task_id = %self.id(), "Abort requested for executing task");
        }
    }

    /// Discard the output of a terminated task and prepare a fresh one
    ///
    /// Removes the destination file (or clears the buffer) and returns a builder
    /// preloaded with the same request and destination; attach new handlers and
    /// call [`build`](DownloadTaskBuilder::build).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] unless the task is Cancelled or Finished.
    pub async fn reset(&self) -> Result<DownloadTaskBuilder> {
        let state = self.state();
        if !state.is_terminal() {
            return Err(Error::InvalidState {
                operation: "reset".to_string(),
                current_state: state.to_string(),
            });
        }
        self.inner.destination.truncate().await?;
        tracing::debug!(task_id = %self.id(), "Task output discarded");
        Ok(DownloadTask::builder()
            .request(self.inner.request.clone())
            .destination(self.inner.destination.clone()))
    }

    /// Ready→Executing for a queued task, then drive the transfer on `runtime`
    ///
    /// `on_terminal` runs after the completion handler returned.
    pub(crate) fn launch<F>(
        &self,
        runtime: &Handle,
        transport: Arc<dyn Transport>,
        on_terminal: F,
    ) -> bool
    where
        F: FnOnce(TaskId) + Send + 'static,
    {
        if !self.begin(Starter::Queue) {
            return false;
        }
        self.spawn_execution(runtime, transport, on_terminal);
        true
    }

    fn spawn_execution<F>(&self, runtime: &Handle, transport: Arc<dyn Transport>, on_terminal: F)
    where
        F: FnOnce(TaskId) + Send + 'static,
    {
        let task = self.clone();
        runtime.spawn(async move {
            task.execute(transport.as_ref()).await;
            on_terminal(task.id());
        });
    }

    /// Hand the task to a queue and route its events to the queue's channel
    ///
    /// Checked against the state under the state lock, so a concurrent
    /// [`start`](DownloadTask::start) either wins before attachment or is refused.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the task is not Ready or already belongs to a queue.
    pub(crate) fn attach_events(&self, event_tx: broadcast::Sender<Event>) -> Result<()> {
        let mut outcome = Ok(());
        self.inner.state_tx.send_if_modified(|state| {
            outcome = if *state != TaskState::Ready {
                Err(state.to_string())
            } else if self.inner.events.set(event_tx).is_err() {
                Err("queued".to_string())
            } else {
                Ok(())
            };
            false
        });
        outcome.map_err(|current_state| Error::InvalidState {
            operation: "submit".to_string(),
            current_state,
        })
    }

    fn is_queued(&self) -> bool {
        self.inner.events.get().is_some()
    }

    /// Block until an update handler running on another thread has returned
    ///
    /// Called after the cancel token is set, so no further update starts.
    fn wait_for_update_handler(&self) {
        let current = std::thread::current().id();
        let mut handlers = lock(&self.inner.handlers);
        while handlers.updating.is_some_and(|thread| thread != current) {
            handlers = self
                .inner
                .update_done
                .wait(handlers)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = self.inner.events.get() {
            // no subscribers is fine
            tx.send(event).ok();
        }
    }

    fn begin(&self, starter: Starter) -> bool {
        let started = self.inner.state_tx.send_if_modified(|state| {
            let allowed = match starter {
                Starter::Queue => self.is_queued(),
                Starter::Caller => !self.is_queued(),
            };
            if *state == TaskState::Ready && allowed {
                *state = TaskState::Executing;
                true
            } else {
                false
            }
        });
        if started {
            *lock(&self.inner.started_at) = Some(Utc::now());
            tracing::info!(task_id = %self.id(), url = %self.inner.request.url(), "Task started");
            self.emit(Event::Started { id: self.id() });
        }
        started
    }

    fn outcome(&self) -> Option<TaskOutcome> {
        match self.state() {
            TaskState::Finished => Some(match self.error() {
                Some(e) => Err(e),
                None => Ok(self.output()),
            }),
            TaskState::Cancelled => Some(Err(DownloadError::Cancelled)),
            TaskState::Ready | TaskState::Executing => None,
        }
    }

    fn output(&self) -> TaskOutput {
        let progress = self.current_progress();
        TaskOutput {
            downloaded: progress.downloaded,
            expected: progress.expected,
            response: self.response(),
        }
    }
}

/// Who moves a task out of Ready
#[derive(Debug, Clone, Copy)]
enum Starter {
    Queue,
    Caller,
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", &self.id())
            .field("url", &self.inner.request.url().as_str())
            .field("state", &self.state())
            .finish()
    }
}
