//! Immutable description of the resource a task fetches.

use std::time::Duration;

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::{Error, Result};

/// Request parameters: URL, method, headers and an optional per-request timeout
///
/// Only `http` and `https` URLs are accepted.
#[derive(Clone, Debug)]
pub struct DownloadRequest {
    url: Url,
    method: Method,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl DownloadRequest {
    /// Create a GET request for the given URL
    pub fn new(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidRequest("URL is empty".to_string()));
        }
        let parsed = Url::parse(trimmed)
            .map_err(|e| Error::InvalidRequest(format!("malformed URL '{}': {}", trimmed, e)))?;
        Self::from_url(parsed)
    }

    /// Alias for [`DownloadRequest::new`]
    pub fn get(url: &str) -> Result<Self> {
        Self::new(url)
    }

    /// Create a GET request from an already parsed URL
    pub fn from_url(url: Url) -> Result<Self> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidRequest(format!(
                "unsupported scheme '{}' in {}",
                url.scheme(),
                url
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(Error::InvalidRequest(format!("URL has no host: {}", url)));
        }
        Ok(Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            timeout: None,
        })
    }

    /// Use a different HTTP method
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a request header
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidRequest(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidRequest(format!("invalid value for header {}: {}", name, e)))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Limit the whole request to `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Requested URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Extra request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Per-request timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_http_and_https() {
        let req = DownloadRequest::new("https://example.com/file.bin").unwrap();
        assert_eq!(req.url().as_str(), "https://example.com/file.bin");
        assert_eq!(req.method(), &Method::GET);
        assert!(req.headers().is_empty());
        assert!(req.timeout().is_none());

        assert!(DownloadRequest::get("http://example.com").is_ok());
    }

    #[test]
    fn empty_url_is_rejected() {
        for url in ["", "   "] {
            let err = DownloadRequest::new(url).unwrap_err();
            assert!(err.is_construction_error(), "{url:?} should be rejected");
        }
    }

    #[test]
    fn malformed_url_is_rejected() {
        let err = DownloadRequest::new("not a url").unwrap_err();
        match err {
            Error::InvalidRequest(msg) => assert!(msg.contains("not a url")),
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        for url in ["ftp://example.com/file", "file:///etc/passwd", "mailto:a@b.c"] {
            assert!(
                matches!(DownloadRequest::new(url), Err(Error::InvalidRequest(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn builder_methods_set_fields() {
        let req = DownloadRequest::new("https://example.com/a")
            .unwrap()
            .with_method(Method::POST)
            .with_header("x-token", "abc")
            .unwrap()
            .with_timeout(Duration::from_secs(3));

        assert_eq!(req.method(), &Method::POST);
        assert_eq!(req.headers().get("x-token").unwrap(), "abc");
        assert_eq!(req.timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn invalid_header_is_rejected() {
        let req = DownloadRequest::new("https://example.com/a").unwrap();
        assert!(req.clone().with_header("bad header", "v").is_err());
        assert!(req.with_header("x-ok", "line\nbreak").is_err());
    }
}
