//! Transport interface consumed by the importer.
//!
//! A transport turns a [`TransferRequest`] into a [`Session`]: a stream of
//! events delivered in order (response head, body chunks, then completion or
//! failure). Dropping a session releases it; no further events are observed.
//!
//! Two implementations are provided:
//! - [`ReqwestTransport`]: production client
//! - [`MockTransport`]: scripted responses for tests and development

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tracing::debug;

use crate::locator::{CacheToken, ResourceLocator};

/// Failure reported by the transport layer.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A conditional GET for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub locator: ResourceLocator,
    /// Tokens of already committed variants; empty means unconditional.
    pub validators: Vec<CacheToken>,
}

impl TransferRequest {
    /// Value of the `If-None-Match` header, if any validators are known.
    pub fn if_none_match(&self) -> Option<String> {
        if self.validators.is_empty() {
            return None;
        }
        Some(
            self.validators
                .iter()
                .map(CacheToken::to_header_value)
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// One event of a transfer session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Response(ResponseHead),
    Data(Bytes),
    Complete,
    Failed(TransportError),
}

/// Per-request event stream.
pub type Session = BoxStream<'static, TransportEvent>;

/// Client handle shared by every in-flight import.
pub trait Transport: Send + Sync {
    /// Start a transfer. The request is issued when the session is first polled.
    fn open(&self, request: &TransferRequest) -> Session;
}

fn failed_session(error: TransportError) -> Session {
    stream::once(future::ready(TransportEvent::Failed(error))).boxed()
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("plfm-raw-import/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::new(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn open(&self, request: &TransferRequest) -> Session {
        let mut builder = self.client.get(request.locator.as_str());
        if let Some(validators) = request.if_none_match() {
            debug!(url = %request.locator, if_none_match = %validators, "Sending conditional request");
            builder = builder.header(reqwest::header::IF_NONE_MATCH, validators);
        }

        let exchange = async move {
            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => return failed_session(TransportError::new(e.to_string())),
            };

            let head = ResponseHead {
                status: response.status().as_u16(),
                headers: response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_string(), v.to_string()))
                    })
                    .collect(),
            };

            let body = response.bytes_stream().map(|chunk| match chunk {
                Ok(bytes) => TransportEvent::Data(bytes),
                Err(e) => TransportEvent::Failed(TransportError::new(e.to_string())),
            });

            stream::once(future::ready(TransportEvent::Response(head)))
                .chain(body)
                .chain(stream::once(future::ready(TransportEvent::Complete)))
                .boxed()
        };

        stream::once(exchange).flatten().boxed()
    }
}

/// How a scripted response ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEnding {
    Complete,
    Fail(String),
    /// Never completes; the session stays open until dropped.
    Stall,
}

/// A scripted response for [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<Bytes>,
    ending: MockEnding,
    etag: Option<CacheToken>,
    honor_if_none_match: bool,
}

impl MockResponse {
    /// 200 response with the whole body in one chunk and a matching
    /// `Content-Length`.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        let body: Vec<u8> = body.into();
        let len = body.len();
        Self {
            status: 200,
            headers: vec![("content-length".to_string(), len.to_string())],
            body: if body.is_empty() {
                Vec::new()
            } else {
                vec![Bytes::from(body)]
            },
            ending: MockEnding::Complete,
            etag: None,
            honor_if_none_match: false,
        }
    }

    /// Bodyless response with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            ending: MockEnding::Complete,
            etag: None,
            honor_if_none_match: false,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn without_header(mut self, name: &str) -> Self {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self
    }

    /// Set the `ETag` header (the tag is quoted for the wire).
    pub fn etag(mut self, tag: &str) -> Self {
        self.etag = CacheToken::new(tag);
        self.header("etag", &format!("\"{tag}\""))
    }

    /// Answer 304 when the request carries this response's ETag.
    pub fn conditional(mut self) -> Self {
        self.honor_if_none_match = true;
        self
    }

    /// Re-split the body into chunks of at most `size` bytes.
    pub fn chunked(mut self, size: usize) -> Self {
        let size = size.max(1);
        let whole: Vec<u8> = self.body.iter().flat_map(|b| b.iter().copied()).collect();
        self.body = whole.chunks(size).map(Bytes::copy_from_slice).collect();
        self
    }

    pub fn ending(mut self, ending: MockEnding) -> Self {
        self.ending = ending;
        self
    }

    fn into_session(self, request: &TransferRequest) -> Session {
        let not_modified = self.honor_if_none_match
            && self
                .etag
                .as_ref()
                .is_some_and(|etag| request.validators.contains(etag));

        if not_modified {
            let mut headers = Vec::new();
            if let Some(etag) = &self.etag {
                headers.push(("etag".to_string(), etag.to_header_value()));
            }
            let head = ResponseHead {
                status: 304,
                headers,
            };
            return stream::iter([
                TransportEvent::Response(head),
                TransportEvent::Complete,
            ])
            .boxed();
        }

        let head = ResponseHead {
            status: self.status,
            headers: self.headers,
        };
        let events = stream::iter(
            std::iter::once(TransportEvent::Response(head))
                .chain(self.body.into_iter().map(TransportEvent::Data)),
        );

        match self.ending {
            MockEnding::Complete => events
                .chain(stream::once(future::ready(TransportEvent::Complete)))
                .boxed(),
            MockEnding::Fail(message) => events
                .chain(stream::once(future::ready(TransportEvent::Failed(
                    TransportError::new(message),
                ))))
                .boxed(),
            MockEnding::Stall => events.chain(stream::pending()).boxed(),
        }
    }
}

/// Scripted transport: answers requests from a table keyed by URL and
/// records every request it sees.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, MockResponse>>,
    requests: Mutex<Vec<TransferRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response for a URL, replacing any previous script.
    pub fn respond(&self, url: &str, response: MockResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), response);
    }

    /// Requests issued so far, in order.
    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for MockTransport {
    fn open(&self, request: &TransferRequest) -> Session {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let response = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request.locator.as_str())
            .cloned();

        match response {
            Some(response) => {
                debug!(url = %request.locator, "[MOCK] Serving scripted response");
                response.into_session(request)
            }
            None => failed_session(TransportError::new(format!(
                "[MOCK] no response scripted for {}",
                request.locator
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(validators: &[&str]) -> TransferRequest {
        TransferRequest {
            locator: ResourceLocator::parse("https://example.com/img.raw").unwrap(),
            validators: validators
                .iter()
                .map(|t| CacheToken::new(t).unwrap())
                .collect(),
        }
    }

    #[test]
    fn test_if_none_match_joins_quoted_tokens() {
        assert_eq!(request(&[]).if_none_match(), None);
        assert_eq!(
            request(&["t1", "t2"]).if_none_match().as_deref(),
            Some("\"t1\", \"t2\"")
        );
    }

    #[tokio::test]
    async fn test_mock_serves_body_in_chunks() {
        let transport = MockTransport::new();
        transport.respond(
            "https://example.com/img.raw",
            MockResponse::ok(vec![7u8; 10]).chunked(4),
        );

        let events: Vec<_> = transport.open(&request(&[])).collect().await;
        assert_eq!(events.len(), 5);
        assert!(matches!(&events[0], TransportEvent::Response(h) if h.status == 200));
        assert!(matches!(&events[3], TransportEvent::Data(b) if b.len() == 2));
        assert!(matches!(events[4], TransportEvent::Complete));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_conditional_not_modified() {
        let transport = MockTransport::new();
        transport.respond(
            "https://example.com/img.raw",
            MockResponse::ok("data").etag("abc").conditional(),
        );

        let events: Vec<_> = transport.open(&request(&["abc"])).collect().await;
        assert!(matches!(&events[0], TransportEvent::Response(h) if h.status == 304));
        assert_eq!(events.len(), 2);

        let events: Vec<_> = transport.open(&request(&["other"])).collect().await;
        assert!(matches!(&events[0], TransportEvent::Response(h) if h.status == 200));
    }

    #[tokio::test]
    async fn test_mock_unknown_url_fails() {
        let transport = MockTransport::new();
        let events: Vec<_> = transport.open(&request(&[])).collect().await;
        assert!(matches!(events.as_slice(), [TransportEvent::Failed(_)]));
    }
}
