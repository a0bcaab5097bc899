//! Transport abstraction consumed by download tasks.
//!
//! A transport turns a [`DownloadRequest`] into a stream of
//! [`TransportEvent`]s: one `Headers` event followed by zero or more `Chunk`
//! events. The end of the stream means the body completed; an `Err` item means
//! the connection failed. Aborting is done by dropping the stream, which a
//! task does from its own context as soon as it observes cancellation.

mod http;

pub use http::HttpTransport;

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::TransportError;
use crate::request::DownloadRequest;
use crate::types::ResponseInfo;

/// Single event on an open connection
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// Response headers received
    Headers(ResponseInfo),
    /// A piece of the response body
    Chunk(Bytes),
}

/// Event stream of an open connection
pub type EventStream = BoxStream<'static, Result<TransportEvent, TransportError>>;

/// Abstraction over the network layer, enabling testability.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection for `request`
    ///
    /// Errors returned here are connection-level failures (DNS, TLS, refused,
    /// timeout before headers).
    async fn open(&self, request: &DownloadRequest) -> Result<EventStream, TransportError>;

    /// Short name used in logs
    fn name(&self) -> &str;
}
