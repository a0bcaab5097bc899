//! Shared test helpers: a scripted in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderValue};
use tokio::sync::Semaphore;

use crate::error::{TransportError, TransportErrorKind};
use crate::request::DownloadRequest;
use crate::transport::{EventStream, Transport, TransportEvent};
use crate::types::ResponseInfo;

/// Transport that replays a fixed response
///
/// Every connection yields the headers, then every chunk, then (if gated)
/// waits for a permit on the gate before ending or failing. Tests release
/// held connections with `gate.add_permits(n)`.
pub(crate) struct ScriptedTransport {
    status: u16,
    chunks: Vec<Bytes>,
    content_length: Option<u64>,
    open_error: Option<TransportError>,
    body_error: Option<TransportError>,
    gate: Option<Arc<Semaphore>>,
    hang_on_open: bool,
    opens: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    opened_urls: Mutex<Vec<String>>,
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    /// 200 response whose body is `chunks`, with a matching Content-Length
    pub(crate) fn with_body(chunks: &[&[u8]]) -> Self {
        let chunks: Vec<Bytes> = chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect();
        let total = chunks.iter().map(|c| c.len() as u64).sum();
        Self {
            status: 200,
            chunks,
            content_length: Some(total),
            open_error: None,
            body_error: None,
            gate: None,
            hang_on_open: false,
            opens: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            opened_urls: Mutex::new(Vec::new()),
        }
    }

    /// 200 response with an empty body
    pub(crate) fn empty() -> Self {
        Self::with_body(&[])
    }

    pub(crate) fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub(crate) fn without_content_length(mut self) -> Self {
        self.content_length = None;
        self
    }

    /// Fail in `open` before any headers
    pub(crate) fn failing_open(mut self, kind: TransportErrorKind) -> Self {
        self.open_error = Some(TransportError::new(kind, "scripted open failure"));
        self
    }

    /// Fail after the last chunk
    pub(crate) fn failing_body(mut self, kind: TransportErrorKind) -> Self {
        self.body_error = Some(TransportError::new(kind, "scripted body failure"));
        self
    }

    /// Hold every connection open until a permit is added
    pub(crate) fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Never complete `open`
    pub(crate) fn hanging_on_open(mut self) -> Self {
        self.hang_on_open = true;
        self
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn opened_urls(&self) -> Vec<String> {
        self.opened_urls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: &DownloadRequest) -> Result<EventStream, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.opened_urls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request.url().to_string());

        if self.hang_on_open {
            std::future::pending::<()>().await;
        }
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlightGuard(self.in_flight.clone());

        let mut headers = HeaderMap::new();
        if let Some(len) = self.content_length {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }

        let mut events = vec![Ok(TransportEvent::Headers(ResponseInfo::new(
            self.status,
            headers,
        )))];
        events.extend(self.chunks.iter().cloned().map(|c| Ok(TransportEvent::Chunk(c))));

        let gate = self.gate.clone();
        let body_error = self.body_error.clone();
        let tail = futures::stream::once(async move {
            let _guard = guard;
            if let Some(gate) = gate
                && let Ok(permit) = gate.acquire().await
            {
                permit.forget();
            }
            body_error.map(Err)
        })
        .filter_map(futures::future::ready);

        Ok(futures::stream::iter(events).chain(tail).boxed())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
