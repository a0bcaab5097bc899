//! End-to-end tests: tasks on a queue fetching from a mock HTTP server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{serve_bytes, serve_slow, serve_status, wait_for_event};
use fetchop::{
    Config, DownloadError, DownloadRequest, DownloadTask, Downloader, ErrorCode, Event,
    HttpConfig, HttpTransport, MemoryBuffer, QueueConfig, TaskQueue, TaskState,
};
use futures::StreamExt;
use wiremock::MockServer;

fn http_queue(max_concurrent: usize) -> TaskQueue {
    let transport = Arc::new(HttpTransport::new(&HttpConfig::default()).unwrap());
    TaskQueue::new(
        &QueueConfig {
            max_concurrent_downloads: max_concurrent,
            ..QueueConfig::default()
        },
        transport,
    )
    .unwrap()
}

#[tokio::test]
async fn queue_downloads_files_concurrently() {
    let server = MockServer::start().await;
    let temp_dir = tempfile::tempdir().unwrap();
    let queue = http_queue(2);

    let mut tasks = Vec::new();
    for i in 0..4 {
        let route = format!("/files/{i}.bin");
        serve_bytes(&server, &route, &vec![i as u8; 1000 * (i + 1)]).await;

        let task = DownloadTask::builder()
            .request(DownloadRequest::new(&format!("{}{}", server.uri(), route)).unwrap())
            .download_path(temp_dir.path().join(format!("{i}.bin")))
            .build()
            .unwrap();
        queue.submit(task.clone()).unwrap();
        tasks.push(task);
    }

    for (i, task) in tasks.iter().enumerate() {
        let output = task.wait().await.unwrap();
        assert_eq!(output.downloaded, 1000 * (i as u64 + 1));
        assert_eq!(output.expected, Some(output.downloaded));

        let bytes = std::fs::read(temp_dir.path().join(format!("{i}.bin"))).unwrap();
        assert_eq!(bytes.len() as u64, output.downloaded);
        assert!(bytes.iter().all(|b| *b == i as u8));
    }

    queue.wait_idle().await;
    assert_eq!(queue.stats().running, 0);
}

#[tokio::test]
async fn not_found_is_classified_as_http_error() {
    let server = MockServer::start().await;
    serve_status(&server, "/missing", 404).await;
    let queue = http_queue(1);
    let mut events = queue.subscribe();

    let task = DownloadTask::builder()
        .request(DownloadRequest::new(&format!("{}/missing", server.uri())).unwrap())
        .build()
        .unwrap();
    let id = queue.submit(task.clone()).unwrap();

    let failed = wait_for_event(&mut events, Duration::from_secs(5), |e| {
        matches!(e, Event::Failed { id: eid, .. } if *eid == id)
    })
    .await
    .expect("no Failed event");

    let Event::Failed { error, .. } = failed else {
        unreachable!()
    };
    let class = error.classification();
    assert_eq!(class.subdomain, "DownloadOperation");
    assert_eq!(class.code, ErrorCode::HttpError);
    assert_eq!(class.status, Some(404));
    assert_eq!(task.state(), TaskState::Finished);
}

#[tokio::test]
async fn cancelling_slow_request_settles_promptly() {
    let server = MockServer::start().await;
    serve_slow(&server, "/slow", Duration::from_secs(30)).await;
    let queue = http_queue(1);

    let task = DownloadTask::builder()
        .request(DownloadRequest::new(&format!("{}/slow", server.uri())).unwrap())
        .build()
        .unwrap();
    queue.submit(task.clone()).unwrap();
    assert!(task.is_executing());

    tokio::time::sleep(Duration::from_millis(50)).await;
    task.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), task.wait())
        .await
        .expect("cancellation did not settle");
    assert_eq!(outcome.unwrap_err(), DownloadError::Cancelled);
    assert_eq!(task.state(), TaskState::Cancelled);
}

#[tokio::test]
async fn run_inline_into_memory_with_progress_stream() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    serve_bytes(&server, "/blob", &body).await;

    let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
    let buffer = MemoryBuffer::new();
    let task = DownloadTask::builder()
        .request(DownloadRequest::new(&format!("{}/blob", server.uri())).unwrap())
        .memory_buffer(buffer.clone())
        .build()
        .unwrap();
    let progress = task.progress().unwrap();

    let (outcome, seen) = tokio::join!(task.run(&transport), progress.collect::<Vec<_>>());

    let output = outcome.unwrap();
    assert_eq!(output.downloaded, body.len() as u64);
    assert_eq!(buffer.snapshot().as_ref(), body.as_slice());
    assert_eq!(seen.last().map(|p| p.downloaded), Some(body.len() as u64));
    assert!(seen.windows(2).all(|w| w[0].downloaded <= w[1].downloaded));
}

#[tokio::test]
async fn downloader_resolves_against_base_url() {
    let server = MockServer::start().await;
    serve_bytes(&server, "/pub/report.csv", b"a,b,c\n1,2,3\n").await;
    let temp_dir = tempfile::tempdir().unwrap();

    let config = Config::from_json_str(&format!(
        r#"{{"base_url": "{}/pub/", "download_dir": "{}", "max_concurrent_downloads": 1}}"#,
        server.uri(),
        temp_dir.path().join("dl").display()
    ))
    .unwrap();
    let downloader = Downloader::new(config).unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    assert!(downloader.start_download(
        "report.csv",
        move |outcome| {
            let _ = tx.send(outcome);
        },
        |_| {}
    ));

    let output = rx.await.unwrap().unwrap();
    assert_eq!(output.response.unwrap().status, 200);

    let path = downloader.download_path("report.csv").unwrap();
    assert_eq!(path, temp_dir.path().join("dl/report.csv"));
    assert_eq!(std::fs::read(&path).unwrap(), b"a,b,c\n1,2,3\n");

    downloader.reset_download().await.unwrap();
    assert!(!path.exists());
}
