//! Transfer loop and terminal transition.

use std::panic::AssertUnwindSafe;

use chrono::Utc;
use futures::StreamExt;

use super::{DownloadTask, lock};
use crate::error::DownloadError;
use crate::sink::OutputSink;
use crate::transport::{Transport, TransportEvent};
use crate::types::{Event, Progress, ResponseInfo, TaskState};

impl DownloadTask {
    /// Run the transfer to completion and deliver the outcome
    pub(super) async fn execute(&self, transport: &dyn Transport) {
        let result = self.transfer(transport).await;
        self.finish(result);
    }

    /// Stream the response into the destination
    ///
    /// Returning early drops the transport stream, which closes the connection.
    async fn transfer(&self, transport: &dyn Transport) -> Result<(), DownloadError> {
        let token = self.inner.cancel_token.clone();

        let mut sink = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            sink = OutputSink::open(&self.inner.destination) => sink?,
        };

        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            opened = transport.open(&self.inner.request) => opened?,
        };

        // non-2xx responses still consume the body; the error is reported at completion
        let mut http_error = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DownloadError::Cancelled),
                event = stream.next() => event,
            };

            match event {
                None => break,
                Some(Err(e)) => {
                    tracing::warn!(
                        task_id = %self.id(),
                        transport = transport.name(),
                        kind = %e.kind,
                        error = %e.message,
                        "Transport failed"
                    );
                    return Err(e.into());
                }
                Some(Ok(TransportEvent::Headers(info))) => {
                    if !info.is_success() {
                        tracing::warn!(
                            task_id = %self.id(),
                            status = info.status,
                            "Server returned non-success status"
                        );
                        http_error = Some(DownloadError::Http {
                            status: info.status,
                        });
                    }
                    self.record_response(info);
                }
                Some(Ok(TransportEvent::Chunk(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(DownloadError::Cancelled),
                        written = sink.append(&chunk) => written?,
                    }
                    let progress = self.record_chunk(chunk.len() as u64);
                    self.notify_progress(progress);
                }
            }
        }

        sink.finish().await?;

        match http_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn record_response(&self, info: ResponseInfo) {
        if let Some(length) = info.content_length {
            lock(&self.inner.progress).expected = Some(length);
        }
        *lock(&self.inner.response) = Some(info);
    }

    fn record_chunk(&self, len: u64) -> Progress {
        let mut progress = lock(&self.inner.progress);
        progress.downloaded += len;
        *progress
    }

    fn notify_progress(&self, progress: Progress) {
        // no updates once an abort is requested
        if self.inner.cancel_token.is_cancelled() {
            return;
        }

        tracing::trace!(
            task_id = %self.id(),
            downloaded = progress.downloaded,
            expected = ?progress.expected,
            "Progress"
        );

        if let Some(tx) = lock(&self.inner.progress_tx).as_ref() {
            // receiver dropped is fine
            tx.send(progress).ok();
        }
        self.emit(Event::Progress {
            id: self.id(),
            downloaded: progress.downloaded,
            expected: progress.expected,
        });

        // checked again under the lock `cancel` waits on
        let handler = {
            let mut handlers = lock(&self.inner.handlers);
            if self.inner.cancel_token.is_cancelled() {
                return;
            }
            let handler = handlers.update.take();
            if handler.is_some() {
                handlers.updating = Some(std::thread::current().id());
            }
            handler
        };

        if let Some(mut handler) = handler {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(progress)));
            if result.is_err() {
                tracing::error!(task_id = %self.id(), "Update handler panicked");
            }
            let mut handlers = lock(&self.inner.handlers);
            handlers.update = Some(handler);
            handlers.updating = None;
            drop(handlers);
            self.inner.update_done.notify_all();
        }
    }

    /// Executing → Finished or Cancelled, then deliver the outcome exactly once
    fn finish(&self, result: Result<(), DownloadError>) {
        let mut terminal = None;
        self.inner.state_tx.send_if_modified(|state| {
            if *state != TaskState::Executing {
                return false;
            }
            // an abort requested during teardown still wins over success
            let (next, error) = if self.inner.cancel_token.is_cancelled() {
                (TaskState::Cancelled, Some(DownloadError::Cancelled))
            } else {
                (TaskState::Finished, result.err())
            };
            *lock(&self.inner.error) = error;
            *state = next;
            terminal = Some(next);
            true
        });

        let Some(terminal) = terminal else {
            tracing::warn!(task_id = %self.id(), "finish() on a task that was not executing");
            return;
        };

        *lock(&self.inner.finished_at) = Some(Utc::now());
        lock(&self.inner.progress_tx).take();

        let progress = self.current_progress();
        match (terminal, self.error()) {
            (TaskState::Cancelled, _) => {
                tracing::info!(
                    task_id = %self.id(),
                    downloaded = progress.downloaded,
                    "Download cancelled"
                );
                self.emit(Event::Cancelled { id: self.id() });
            }
            (_, Some(error)) => {
                tracing::warn!(
                    task_id = %self.id(),
                    error = %error,
                    code = error.code().as_i32(),
                    "Download failed"
                );
                self.emit(Event::Failed {
                    id: self.id(),
                    error,
                });
            }
            (_, None) => {
                tracing::info!(
                    task_id = %self.id(),
                    downloaded = progress.downloaded,
                    expected = ?progress.expected,
                    "Download completed"
                );
                self.emit(Event::Completed {
                    id: self.id(),
                    downloaded: progress.downloaded,
                });
            }
        }

        // handlers never run after this point
        let handlers = std::mem::take(&mut *lock(&self.inner.handlers));
        drop(handlers.update);
        if let (Some(completion), Some(outcome)) = (handlers.completion, self.outcome()) {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| completion(outcome)));
            if result.is_err() {
                tracing::error!(task_id = %self.id(), "Completion handler panicked");
            }
        }
    }
}
