//! reqwest-backed [`Transport`].

use futures::StreamExt;

use super::{EventStream, Transport, TransportEvent};
use crate::config::HttpConfig;
use crate::error::{Error, TransportError, TransportErrorKind};
use crate::request::DownloadRequest;
use crate::types::ResponseInfo;

/// Production [`Transport`] built on a shared `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with the configured timeouts and user agent
    pub fn new(config: &HttpConfig) -> crate::error::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone());
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            tracing::error!(error = %e, "Failed to create HTTP client");
            Error::Network(e)
        })?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &DownloadRequest) -> Result<EventStream, TransportError> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if let Some(timeout) = request.timeout() {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            let err = TransportError::from(e);
            tracing::debug!(url = %request.url(), error = %err, "HTTP request failed");
            err
        })?;

        let info = ResponseInfo::from(&response);
        tracing::debug!(
            url = %request.url(),
            status = info.status,
            content_length = ?info.content_length,
            "Received response headers"
        );

        let headers = futures::stream::once(async move { Ok(TransportEvent::Headers(info)) });
        let body = response.bytes_stream().map(|chunk| {
            chunk.map(TransportEvent::Chunk).map_err(|e| {
                let mut err = TransportError::from(e);
                // errors after headers are always body failures unless they timed out
                if err.kind != TransportErrorKind::Timeout {
                    err.kind = TransportErrorKind::Body;
                }
                err
            })
        });

        Ok(headers.chain(body).boxed())
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect(stream: EventStream) -> (Option<ResponseInfo>, Vec<u8>) {
        let events: Vec<TransportEvent> = stream.try_collect().await.unwrap();
        let mut info = None;
        let mut body = Vec::new();
        for event in events {
            match event {
                TransportEvent::Headers(h) => info = Some(h),
                TransportEvent::Chunk(c) => body.extend_from_slice(&c),
            }
        }
        (info, body)
    }

    #[tokio::test]
    async fn emits_headers_then_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let request = DownloadRequest::new(&format!("{}/file.bin", mock_server.uri())).unwrap();

        let stream = transport.open(&request).await.unwrap();
        let (info, body) = collect(stream).await;

        let info = info.expect("headers event");
        assert_eq!(info.status, 200);
        assert_eq!(info.content_length, Some(4096));
        assert_eq!(body.len(), 4096);
        assert!(body.iter().all(|b| *b == 7));
    }

    #[tokio::test]
    async fn non_success_status_is_delivered_as_headers_not_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let request = DownloadRequest::new(&format!("{}/missing", mock_server.uri())).unwrap();

        let (info, body) = collect(transport.open(&request).await.unwrap()).await;

        assert_eq!(info.unwrap().status, 404);
        assert_eq!(body, b"not here");
    }

    #[tokio::test]
    async fn sends_request_headers_and_user_agent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth"))
            .and(header("x-token", "secret"))
            .and(header("user-agent", "fetchop-test"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = HttpConfig {
            user_agent: "fetchop-test".to_string(),
            ..HttpConfig::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        let request = DownloadRequest::new(&format!("{}/auth", mock_server.uri()))
            .unwrap()
            .with_header("x-token", "secret")
            .unwrap();

        let (info, body) = collect(transport.open(&request).await.unwrap()).await;

        assert_eq!(info.unwrap().status, 200);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn connection_refused_is_a_transport_error() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let request = DownloadRequest::new(&format!("http://{}/x", addr)).unwrap();

        let err = match transport.open(&request).await {
            Ok(_) => panic!("expected connection failure"),
            Err(e) => e,
        };
        assert_eq!(err.kind, TransportErrorKind::Connect);
    }

    #[tokio::test]
    async fn request_timeout_is_classified() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let request = DownloadRequest::new(&format!("{}/slow", mock_server.uri()))
            .unwrap()
            .with_timeout(std::time::Duration::from_millis(50));

        let err = match transport.open(&request).await {
            Ok(_) => panic!("expected timeout"),
            Err(e) => e,
        };
        assert_eq!(err.kind, TransportErrorKind::Timeout);
        assert_eq!(transport.name(), "http");
    }
}
