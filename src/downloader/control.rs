//! Start, stop and reset of the active download.

use crate::error::{Error, Result};
use crate::request::DownloadRequest;
use crate::task::DownloadTask;
use crate::types::{Progress, TaskOutcome};
use crate::utils;

use super::Downloader;

impl Downloader {
    /// Start downloading `resource` into the download directory
    ///
    /// Returns false if a download is already active or the task could not be
    /// constructed (bad identifier, unsupported scheme). A previous task that
    /// already terminated is replaced.
    pub fn start_download<C, U>(&self, resource: &str, completion: C, update: U) -> bool
    where
        C: FnOnce(TaskOutcome) + Send + 'static,
        U: FnMut(Progress) + Send + 'static,
    {
        match self.try_start_download(resource, completion, update) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(resource, error = %e, "Download not started");
                false
            }
        }
    }

    /// Like [`start_download`](Downloader::start_download) but reports why
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyActive`] while the previous download is queued or running
    /// - construction errors for the resource identifier
    /// - [`Error::ShuttingDown`] after shutdown
    pub fn try_start_download<C, U>(
        &self,
        resource: &str,
        completion: C,
        update: U,
    ) -> Result<DownloadTask>
    where
        C: FnOnce(TaskOutcome) + Send + 'static,
        U: FnMut(Progress) + Send + 'static,
    {
        let mut active = self.active_slot();
        if let Some(task) = active.as_ref()
            && !task.state().is_terminal()
        {
            tracing::debug!(task_id = %task.id(), "Download already active");
            return Err(Error::AlreadyActive);
        }

        let url = utils::resolve_resource(self.config.base_url.as_ref(), resource)?;
        let path = self.download_path(resource)?;
        let task = DownloadTask::builder()
            .request(DownloadRequest::from_url(url)?)
            .download_path(&path)
            .on_complete(completion)
            .on_update(update)
            .build()?;

        self.queue.submit(task.clone())?;
        tracing::info!(
            task_id = %task.id(),
            resource,
            path = %path.display(),
            "Download started"
        );

        *active = Some(task.clone());
        Ok(task)
    }

    /// Cancel the active download
    ///
    /// Idempotent; does nothing when no download is active.
    pub fn stop_download(&self) {
        let task = self.active_slot().clone();
        match task {
            Some(task) if !task.state().is_terminal() => {
                tracing::info!(task_id = %task.id(), "Stopping download");
                task.cancel();
            }
            _ => tracing::debug!("No active download to stop"),
        }
    }

    /// Discard the output of the last download
    ///
    /// Removes the (possibly partial) file and forgets the task so the same
    /// resource can be downloaded again from scratch. No-op when nothing was
    /// downloaded yet.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] while the download is still queued or running.
    pub async fn reset_download(&self) -> Result<()> {
        let Some(task) = self.active_task() else {
            return Ok(());
        };

        // validates the terminal state and truncates the destination
        task.reset().await?;

        let mut active = self.active_slot();
        if active.as_ref().is_some_and(|t| t.id() == task.id()) {
            *active = None;
        }
        tracing::info!(task_id = %task.id(), "Download reset");
        Ok(())
    }
}
