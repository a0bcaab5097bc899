//! Basic download example
//!
//! Demonstrates the core functionality of fetchop:
//! - Building a configuration
//! - Creating a queue backed by the HTTP transport
//! - Subscribing to events
//! - Submitting tasks and waiting for their outcomes
//!
//! Usage: `cargo run --example basic_download -- <url> [<url>...]`
//! Set `RUST_LOG=fetchop=debug` for library logs.

use std::sync::Arc;

use fetchop::{Config, DownloadRequest, DownloadTask, Event, HttpTransport, TaskQueue, utils};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        eprintln!("usage: basic_download <url> [<url>...]");
        std::process::exit(2);
    }

    let config = Config {
        download_dir: "downloads".into(),
        ..Default::default()
    };
    let transport = Arc::new(HttpTransport::new(&config.http)?);
    let queue = TaskQueue::new(&config.queue, transport)?;

    // Subscribe to events
    let mut events = queue.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::Queued { id, url } => println!("✓ Queued #{}: {}", id, url),
                Event::Started { id } => println!("⬇ Started #{}", id),
                Event::Completed { id, downloaded } => {
                    println!("✓ Complete #{}: {} bytes", id, downloaded)
                }
                Event::Failed { id, error } => println!("✗ Failed #{}: {}", id, error),
                Event::Cancelled { id } => println!("✗ Cancelled #{}", id),
                _ => {}
            }
        }
    });

    let mut tasks = Vec::new();
    for url in &urls {
        let request = DownloadRequest::new(url)?;
        let path = config
            .download_dir
            .join(utils::suggested_filename(None, request.url()));

        let task = DownloadTask::builder()
            .request(request)
            .download_path(&path)
            .on_update(|p| {
                if let Some(percent) = p.percent() {
                    tracing::debug!(downloaded = p.downloaded, "{:.1}%", percent);
                }
            })
            .build()?;
        queue.submit(task.clone())?;
        tasks.push((task, path));
    }

    // Ctrl+C cancels everything still queued or running
    let cancel_queue = queue.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_queue.cancel_all();
        }
    });

    for (task, path) in tasks {
        match task.wait().await {
            Ok(output) => println!("{} -> {:?} ({} bytes)", task.request().url(), path, output.downloaded),
            Err(e) => println!("{} failed: {} (code {})", task.request().url(), e, e.code().as_i32()),
        }
    }

    queue.shutdown(std::time::Duration::from_secs(5)).await?;
    Ok(())
}
