//! Host-facing downloader split into focused submodules.
//!
//! - this file - construction, configuration and observation
//! - [`control`] - start / stop / reset of the active download

mod control;


use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::error::Result;
use crate::queue::TaskQueue;
use crate::task::DownloadTask;
use crate::transport::{HttpTransport, Transport};
use crate::types::Event;
use crate::utils;

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
///
/// Runs one download at a time on top of a [`TaskQueue`]; resource
/// identifiers are resolved against `base_url` and stored in `download_dir`.
#[derive(Clone)]
pub struct Downloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Queue the active task runs on
    pub(crate) queue: TaskQueue,
    /// The current or most recent task
    pub(crate) active: Arc<Mutex<Option<DownloadTask>>>,
}

impl Downloader {
    /// Create a downloader backed by [`HttpTransport`]
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config.http)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a downloader with a custom transport
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let queue = TaskQueue::new(&config.queue, transport)?;

        tracing::info!(
            download_dir = %config.download_dir.display(),
            base_url = ?config.base_url.as_ref().map(|u| u.as_str()),
            max_concurrent = config.queue.max_concurrent_downloads,
            "Downloader initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            queue,
            active: Arc::new(Mutex::new(None)),
        })
    }

    /// Where the download of `resource` will be written
    pub fn download_path(&self, resource: &str) -> Result<PathBuf> {
        let url = utils::resolve_resource(self.config.base_url.as_ref(), resource)?;
        Ok(self
            .config
            .download_dir
            .join(utils::suggested_filename(None, &url)))
    }

    /// The current or most recent task, if any
    pub fn active_task(&self) -> Option<DownloadTask> {
        self.active_slot().clone()
    }

    /// Whether a download is currently queued or running
    pub fn is_active(&self) -> bool {
        self.active_slot()
            .as_ref()
            .is_some_and(|task| !task.state().is_terminal())
    }

    /// Subscribe to download events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events
    /// independently; one that falls behind by more than `event_buffer` events
    /// receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.queue.subscribe()
    }

    /// The underlying queue
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cancel the active download and stop accepting new ones
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.queue.shutdown(timeout).await
    }

    pub(crate) fn active_slot(&self) -> MutexGuard<'_, Option<DownloadTask>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("download_dir", &self.config.download_dir)
            .field("queue", &self.queue)
            .field("active", &self.active_task())
            .finish()
    }
}
