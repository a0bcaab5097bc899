//! Bounded-concurrency task queue.
//!
//! - this file - submission, admission and per-task control
//! - [`lifecycle`] - idle waiting and graceful shutdown
//!
//! Submitted tasks wait in FIFO order until one of `max_concurrent` slots is
//! free. A slot is held from the moment a task is started until its completion
//! handler has returned. Tasks cancelled while waiting never open a connection;
//! they are dropped from the queue on the next submission or admission.

mod lifecycle;


use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::runtime::Handle;
use tokio::sync::{Notify, broadcast};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::task::DownloadTask;
use crate::transport::Transport;
use crate::types::{Event, QueueStats, TaskId};

#[derive(Default)]
struct Slots {
    pending: VecDeque<DownloadTask>,
    running: HashMap<TaskId, DownloadTask>,
}

struct QueueInner {
    max_concurrent: usize,
    slots: Mutex<Slots>,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    event_tx: broadcast::Sender<Event>,
    /// Set to false during shutdown
    accepting_new: AtomicBool,
    /// Signalled whenever a running task releases its slot
    slot_released: Notify,
}

/// Queue that runs at most `max_concurrent` tasks at once (cloneable handle)
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Create a queue bound to the current tokio runtime
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero concurrency bound and
    /// [`Error::Other`] when called outside a runtime.
    pub fn new(config: &QueueConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Other(format!("TaskQueue requires a tokio runtime: {}", e)))?;
        Self::with_runtime(config, transport, runtime)
    }

    /// Create a queue that spawns tasks on `runtime`
    pub fn with_runtime(
        config: &QueueConfig,
        transport: Arc<dyn Transport>,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(config.event_buffer);

        tracing::debug!(
            max_concurrent = config.max_concurrent_downloads,
            transport = transport.name(),
            "Task queue created"
        );

        Ok(Self {
            inner: Arc::new(QueueInner {
                max_concurrent: config.max_concurrent_downloads,
                slots: Mutex::new(Slots::default()),
                transport,
                runtime,
                event_tx,
                accepting_new: AtomicBool::new(true),
                slot_released: Notify::new(),
            }),
        })
    }

    /// Submit a Ready task
    ///
    /// The task starts immediately if a slot is free, otherwise it waits its turn.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] after [`shutdown`](TaskQueue::shutdown)
    /// - [`Error::InvalidState`] if the task is not Ready or was already submitted
    pub fn submit(&self, task: DownloadTask) -> Result<TaskId> {
        let id = task.id();
        {
            // shutdown drains under this lock, so nothing slips in after it
            let mut slots = lock(&self.inner.slots);
            if !self.inner.accepting_new.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }
            task.attach_events(self.inner.event_tx.clone())?;

            // tasks cancelled while waiting are not kept around
            slots.pending.retain(|t| !t.state().is_terminal());

            let url = task.request().url().to_string();
            tracing::info!(task_id = %id, url = %url, "Task queued");
            self.emit(Event::Queued { id, url });
            slots.pending.push_back(task);
        }

        self.dispatch();
        Ok(id)
    }

    /// Cancel one task, queued or running
    ///
    /// A queued task is removed from the queue. Returns false if the queue does
    /// not know the task or it already terminated.
    pub fn cancel(&self, id: TaskId) -> bool {
        let task = {
            let mut slots = lock(&self.inner.slots);
            match slots.pending.iter().position(|t| t.id() == id) {
                Some(index) => slots.pending.remove(index),
                None => slots.running.get(&id).cloned(),
            }
        };
        let Some(task) = task else {
            return false;
        };
        if task.state().is_terminal() {
            return false;
        }
        // outside the lock: a Ready task emits its event synchronously
        task.cancel();
        true
    }

    /// Cancel every running task and discard every queued one
    ///
    /// Discarded tasks move to Cancelled without invoking any handler.
    /// Returns how many tasks were affected.
    pub fn cancel_all(&self) -> usize {
        let tasks: Vec<DownloadTask> = {
            let mut slots = lock(&self.inner.slots);
            let pending: Vec<DownloadTask> = slots.pending.drain(..).collect();
            slots.running.values().cloned().chain(pending).collect()
        };

        // cancel outside the lock: a Ready task emits its event synchronously
        let mut cancelled = 0;
        for task in tasks {
            if !task.state().is_terminal() {
                tracing::debug!(task_id = %task.id(), "Cancelling task");
                task.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Look up a queued or running task
    ///
    /// Queued tasks that were cancelled directly are no longer reported.
    pub fn task(&self, id: TaskId) -> Option<DownloadTask> {
        let slots = lock(&self.inner.slots);
        slots
            .running
            .get(&id)
            .or_else(|| {
                slots
                    .pending
                    .iter()
                    .find(|t| t.id() == id && !t.state().is_terminal())
            })
            .cloned()
    }

    /// Queue statistics
    pub fn stats(&self) -> QueueStats {
        let slots = lock(&self.inner.slots);
        QueueStats {
            pending: slots.pending.iter().filter(|t| t.is_ready()).count(),
            running: slots.running.len(),
            max_concurrent: self.inner.max_concurrent,
        }
    }

    /// Concurrency bound
    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Whether new submissions are accepted
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting_new.load(Ordering::SeqCst)
    }

    /// Subscribe to events of every task submitted to this queue
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.event_tx.subscribe()
    }

    /// The transport tasks are started with
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.inner.transport.clone()
    }

    pub(crate) fn emit(&self, event: Event) {
        // no subscribers is fine
        self.inner.event_tx.send(event).ok();
    }

    /// Start waiting tasks until every slot is taken
    ///
    /// Tasks are started under the slot lock so admission order matches
    /// submission order. Starting only spawns; the task body never runs inline.
    fn dispatch(&self) {
        let mut slots = lock(&self.inner.slots);
        while slots.running.len() < self.inner.max_concurrent {
            let Some(task) = slots.pending.pop_front() else {
                break;
            };

            let queue = Arc::downgrade(&self.inner);
            let launched = task.launch(
                &self.inner.runtime,
                self.inner.transport.clone(),
                move |id| release_slot(&queue, id),
            );

            if launched {
                tracing::debug!(
                    task_id = %task.id(),
                    running = slots.running.len() + 1,
                    max_concurrent = self.inner.max_concurrent,
                    "Task admitted"
                );
                slots.running.insert(task.id(), task);
            } else {
                tracing::debug!(task_id = %task.id(), state = %task.state(), "Skipping task that is no longer ready");
            }
        }
    }

    fn on_task_terminal(&self, id: TaskId) {
        lock(&self.inner.slots).running.remove(&id);
        self.inner.slot_released.notify_waiters();
        if self.is_accepting() {
            self.dispatch();
        }
    }
}

fn release_slot(queue: &Weak<QueueInner>, id: TaskId) {
    if let Some(inner) = queue.upgrade() {
        TaskQueue { inner }.on_task_terminal(id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("stats", &self.stats())
            .field("transport", &self.inner.transport.name())
            .finish()
    }
}
