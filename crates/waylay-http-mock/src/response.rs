//! Response drafts and the finalized responses rules hand back.
//!
//! A [`ResponseTemplate`] is the recipe a rule carries; rendering it
//! stamps the protocol tag, the request echo, and the diagnostic message
//! onto an immutable [`MockResponse`]. Body content is either a
//! resettable in-memory snapshot or a one-shot reader; which one a rule
//! ends up with is decided at build time based on its repeat count.

use std::io::Read;
use std::str::FromStr;

use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{HeaderMap, Method, StatusCode, Version};
use parking_lot::Mutex;

use crate::request::MockRequest;

/// Common content type constants.
pub mod media {
    pub const TEXT: &str = "text/plain";
    pub const JSON: &str = "application/json";
    pub const XML: &str = "application/xml";
    pub const HTML: &str = "text/html";
    pub const OCTET_STREAM: &str = "application/octet-stream";
}

/// Where a response body's content comes from.
pub enum BodySource {
    Empty,
    /// Resettable in-memory copy; every render yields fresh,
    /// independent bytes.
    Snapshot(Bytes),
    /// One-shot reader, drained on first render. Rules with a repeat
    /// count other than 1 convert this to a snapshot at build time.
    Stream(Mutex<Option<Box<dyn Read + Send>>>),
}

impl std::fmt::Debug for BodySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BodySource::Empty => write!(f, "Empty"),
            BodySource::Snapshot(bytes) => write!(f, "Snapshot({} bytes)", bytes.len()),
            BodySource::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

impl BodySource {
    fn render(&self) -> std::io::Result<Bytes> {
        match self {
            BodySource::Empty => Ok(Bytes::new()),
            BodySource::Snapshot(bytes) => Ok(bytes.clone()),
            BodySource::Stream(reader) => match reader.lock().take() {
                Some(mut reader) => {
                    let mut buf = Vec::new();
                    reader.read_to_end(&mut buf)?;
                    Ok(Bytes::from(buf))
                }
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "stream response body already consumed",
                )),
            },
        }
    }
}

/// A response draft: status, headers, and a body source.
#[derive(Debug)]
pub struct ResponseTemplate {
    status: StatusCode,
    headers: HeaderMap,
    content_type: Option<String>,
    content_length: Option<u64>,
    body: BodySource,
}

impl Default for ResponseTemplate {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl ResponseTemplate {
    pub fn new(status: StatusCode) -> Self {
        ResponseTemplate {
            status,
            headers: HeaderMap::new(),
            content_type: None,
            content_length: None,
            body: BodySource::Empty,
        }
    }

    /// A 200 response with a plain-text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(StatusCode::OK).body_text(body)
    }

    /// A 200 response with a JSON text body.
    pub fn json(body: impl Into<String>) -> Self {
        Self::new(StatusCode::OK).body_bytes(Bytes::from(body.into()), media::JSON)
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Add a header. Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn body_text(self, body: impl Into<String>) -> Self {
        self.body_bytes(Bytes::from(body.into()), media::TEXT)
    }

    pub fn body_bytes(mut self, body: impl Into<Bytes>, content_type: &str) -> Self {
        self.body = BodySource::Snapshot(body.into());
        self.content_type = Some(content_type.to_string());
        self
    }

    /// A body streamed from a reader; `content_length` of `None` leaves
    /// the declared length to the rendered byte count.
    pub fn body_reader(
        mut self,
        reader: impl Read + Send + 'static,
        content_type: &str,
        content_length: Option<u64>,
    ) -> Self {
        self.body = BodySource::Stream(Mutex::new(Some(Box::new(reader))));
        self.content_type = Some(content_type.to_string());
        self.content_length = content_length;
        self
    }

    /// Convert a stream body into a resettable snapshot so repeated
    /// renders observe identical content.
    pub(crate) fn preload(&mut self) -> std::io::Result<()> {
        if let BodySource::Stream(_) = self.body {
            let bytes = self.body.render()?;
            self.body = BodySource::Snapshot(bytes);
        }
        Ok(())
    }

    /// Finalize into an immutable response for the given request.
    pub(crate) fn render(
        &self,
        request: &MockRequest,
        message: String,
    ) -> std::io::Result<MockResponse> {
        let body = self.body.render()?;
        let mut headers = self.headers.clone();
        if let Some(content_type) = &self.content_type {
            if let Ok(value) = HeaderValue::from_str(content_type) {
                headers.insert(CONTENT_TYPE, value);
            }
        }
        let length = self.content_length.unwrap_or(body.len() as u64);
        if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
            headers.insert(CONTENT_LENGTH, value);
        }
        Ok(MockResponse {
            status: self.status,
            headers,
            body,
            version: Version::HTTP_11,
            message,
            request_method: request.method().clone(),
            request_url: request.url().to_string(),
        })
    }
}

/// An immutable mocked response.
#[derive(Debug)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    version: Version,
    message: String,
    request_method: Method,
    request_url: String,
}

impl MockResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The protocol tag stamped by the rule.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Diagnostic message describing which rule produced this response.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Echo of the request this response answers, as `METHOD url`.
    pub fn request_echo(&self) -> String {
        format!("{} {}", self.request_method, self.request_url)
    }

    /// Build a response directly, for upstream relay implementations.
    pub fn for_relay(
        request: &MockRequest,
        status: StatusCode,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Self {
        MockResponse {
            status,
            headers,
            body: body.into(),
            version: Version::HTTP_11,
            message: "relayed upstream response".to_string(),
            request_method: request.method().clone(),
            request_url: request.url().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> MockRequest {
        MockRequest::get("https://example.test/ping").unwrap()
    }

    #[test]
    fn render_stamps_protocol_and_request_echo() {
        let template = ResponseTemplate::text("pong");
        let response = template.render(&request(), "rule response".to_string()).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.version(), Version::HTTP_11);
        assert_eq!(response.body_text(), "pong");
        assert_eq!(response.header("content-type"), Some(media::TEXT));
        assert_eq!(response.header("content-length"), Some("4"));
        assert_eq!(response.request_echo(), "GET https://example.test/ping");
        assert_eq!(response.message(), "rule response");
    }

    #[test]
    fn snapshot_renders_fresh_bytes_every_time() {
        let template = ResponseTemplate::json(r#"{"ok":true}"#);
        let first = template.render(&request(), String::new()).unwrap();
        let second = template.render(&request(), String::new()).unwrap();
        assert_eq!(first.body_bytes(), second.body_bytes());
    }

    #[test]
    fn stream_renders_once() {
        let template = ResponseTemplate::new(StatusCode::OK).body_reader(
            std::io::Cursor::new(b"streamed".to_vec()),
            media::OCTET_STREAM,
            None,
        );
        let first = template.render(&request(), String::new()).unwrap();
        assert_eq!(first.body_text(), "streamed");
        assert!(template.render(&request(), String::new()).is_err());
    }

    #[test]
    fn preload_makes_a_stream_repeatable() {
        let mut template = ResponseTemplate::new(StatusCode::OK).body_reader(
            std::io::Cursor::new(b"snapshot me".to_vec()),
            media::TEXT,
            None,
        );
        template.preload().unwrap();
        for _ in 0..3 {
            let response = template.render(&request(), String::new()).unwrap();
            assert_eq!(response.body_text(), "snapshot me");
        }
    }

    #[test]
    fn declared_content_length_wins() {
        let template = ResponseTemplate::new(StatusCode::OK).body_reader(
            std::io::Cursor::new(b"abc".to_vec()),
            media::TEXT,
            Some(10),
        );
        let response = template.render(&request(), String::new()).unwrap();
        assert_eq!(response.header("content-length"), Some("10"));
    }

    #[test]
    fn invalid_header_names_are_skipped() {
        let template = ResponseTemplate::text("x").header("bad name", "v").header("X-Ok", "v");
        let response = template.render(&request(), String::new()).unwrap();
        assert_eq!(response.header("X-Ok"), Some("v"));
        assert!(response.header("bad name").is_none());
    }
}
