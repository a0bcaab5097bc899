//! # fetchop
//!
//! Cancellable, observable download tasks with a bounded-concurrency queue.
//!
//! ## Design Philosophy
//!
//! - **One state value per task** - `Ready`, `Executing`, `Cancelled` or
//!   `Finished`, observable through a `watch` channel, never as loose flags
//! - **Exactly one outcome** - every started task resolves once, either through
//!   its completion handler or [`DownloadTask::wait`]
//! - **Injected collaborators** - the queue and the transport are values you
//!   construct and pass around, not process-wide singletons
//! - **Event-driven** - consumers subscribe to queue events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use fetchop::{Config, DownloadRequest, DownloadTask, HttpTransport, TaskQueue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let transport = Arc::new(HttpTransport::new(&config.http)?);
//!     let queue = TaskQueue::new(&config.queue, transport)?;
//!
//!     let task = DownloadTask::builder()
//!         .request(DownloadRequest::new("https://example.com/file.bin")?)
//!         .download_path("downloads/file.bin")
//!         .on_update(|p| println!("{} / {:?} bytes", p.downloaded, p.expected))
//!         .build()?;
//!
//!     queue.submit(task.clone())?;
//!     let output = task.wait().await?;
//!     println!("downloaded {} bytes", output.downloaded);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Host-facing start/stop/reset surface
pub mod downloader;
/// Error types
pub mod error;
/// Bounded-concurrency task queue
pub mod queue;
/// Request description
pub mod request;
/// Destinations and output sinks
pub mod sink;
/// Download task state machine
pub mod task;
/// Transport abstraction and the HTTP implementation
pub mod transport;
/// Core types and events
pub mod types;
/// Resource and file-name helpers
pub mod utils;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{Config, HttpConfig, QueueConfig};
pub use downloader::Downloader;
pub use error::{
    DownloadError, ERROR_SUBDOMAIN, Error, ErrorClassification, ErrorCode, Result,
    TransportError, TransportErrorKind,
};
pub use queue::TaskQueue;
pub use request::DownloadRequest;
pub use sink::{Destination, MemoryBuffer};
pub use task::{DownloadTask, DownloadTaskBuilder, ProgressStream};
pub use transport::{EventStream, HttpTransport, Transport, TransportEvent};
pub use types::{
    Event, Progress, QueueStats, ResponseInfo, TaskId, TaskOutcome, TaskOutput, TaskSnapshot,
    TaskState,
};

/// Run the downloader until a termination signal arrives, then shut it down.
///
/// Listens for Ctrl+C everywhere and additionally SIGTERM on Unix. Running
/// tasks get `timeout` to deliver their cancellation outcome.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use fetchop::{Config, Downloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = Downloader::new(Config::default())?;
///     downloader.start_download("https://example.com/big.iso", |_| {}, |_| {});
///
///     run_with_shutdown(downloader, Duration::from_secs(10)).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(
    downloader: Downloader,
    timeout: std::time::Duration,
) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown(timeout).await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // registration may fail in restricted environments (containers, tests)
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for Ctrl+C only");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
