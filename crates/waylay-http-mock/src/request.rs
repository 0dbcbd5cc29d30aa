//! The narrow inbound request surface the matching engine reads from.
//!
//! A [`MockRequest`] carries exactly what the matchers need: method, full
//! URL text, parsed path and query, headers, and an optional body that can
//! be drained once. The host HTTP client adapts its own request type into
//! this view before handing it to the dispatcher.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, Uri};
use once_cell::unsync::OnceCell;
use parking_lot::Mutex;

use crate::error::{ConfigError, MatchError};

/// An outgoing request as seen by the interception engine.
#[derive(Debug)]
pub struct MockRequest {
    method: Method,
    url: String,
    uri: Uri,
    headers: HeaderMap,
    body: Option<RequestBody>,
}

impl MockRequest {
    /// Start building a request for the given method and absolute URL.
    pub fn builder(method: Method, url: impl Into<String>) -> MockRequestBuilder {
        MockRequestBuilder {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            defect: None,
        }
    }

    /// Shorthand for a bodyless GET request.
    pub fn get(url: impl Into<String>) -> Result<Self, ConfigError> {
        Self::builder(Method::GET, url).build()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The full URL text, as given to the builder.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The path component of the URL.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Look up a header value by name. Non-UTF8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Look up a query parameter by name, URL-decoding both keys and
    /// values. The first occurrence wins.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .find_map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                let key = urlencoding::decode(key).ok()?;
                if key == name {
                    Some(urlencoding::decode(value).ok()?.into_owned())
                } else {
                    None
                }
            })
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }
}

impl fmt::Display for MockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Builder for [`MockRequest`]. URL and header defects surface at `build`.
pub struct MockRequestBuilder {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<RequestBody>,
    defect: Option<ConfigError>,
}

impl MockRequestBuilder {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                if self.defect.is_none() {
                    self.defect = Some(ConfigError::InvalidHeader(name.to_string()));
                }
            }
        }
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn build(self) -> Result<MockRequest, ConfigError> {
        if let Some(defect) = self.defect {
            return Err(defect);
        }
        let uri = Uri::from_str(&self.url).map_err(|source| ConfigError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        Ok(MockRequest {
            method: self.method,
            url: self.url,
            uri,
            headers: self.headers,
            body: self.body,
        })
    }
}

enum Payload {
    Buffered(Bytes),
    Pending(Box<dyn Read + Send>),
    Drained,
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            Payload::Pending(_) => write!(f, "Pending(..)"),
            Payload::Drained => write!(f, "Drained"),
        }
    }
}

/// A request body handed in by the host client.
///
/// Buffered bodies can be drained repeatedly; reader-backed bodies are
/// single-read, which is why matcher evaluation goes through a
/// per-dispatch [`BodyCache`]. The `duplex` and `one_shot` flags mark
/// bodies the body matcher must refuse outright.
#[derive(Debug)]
pub struct RequestBody {
    payload: Mutex<Payload>,
    duplex: bool,
    one_shot: bool,
}

impl RequestBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self::bytes(Bytes::from(text.into()))
    }

    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        RequestBody {
            payload: Mutex::new(Payload::Buffered(bytes.into())),
            duplex: false,
            one_shot: false,
        }
    }

    /// A body backed by a reader. Readable once, so it is marked one-shot
    /// and can not be pattern-matched.
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        RequestBody {
            payload: Mutex::new(Payload::Pending(Box::new(reader))),
            duplex: false,
            one_shot: true,
        }
    }

    /// Mark this body as duplex (written concurrently with the response).
    pub fn duplex(mut self) -> Self {
        self.duplex = true;
        self
    }

    /// Mark this body as writable only once.
    pub fn one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }

    pub fn is_duplex(&self) -> bool {
        self.duplex
    }

    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    /// Drain the body into bytes. Buffered bodies can be drained again;
    /// a reader-backed body yields its content exactly once.
    pub fn drain(&self) -> std::io::Result<Bytes> {
        let mut payload = self.payload.lock();
        match &mut *payload {
            Payload::Buffered(bytes) => Ok(bytes.clone()),
            Payload::Pending(reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                *payload = Payload::Drained;
                Ok(Bytes::from(buf))
            }
            Payload::Drained => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "request body already drained",
            )),
        }
    }
}

/// Decoded-body cache scoped to a single dispatch call.
///
/// Replaces any notion of global "last request body" state: the dispatcher
/// creates one of these per call and threads it through matcher
/// evaluation, so `matches` and `fail_reason` share one body extraction
/// even for single-read stream bodies.
#[derive(Default)]
pub struct BodyCache {
    bytes: OnceCell<Option<Bytes>>,
}

impl BodyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The request body bytes, drained at most once per dispatch.
    ///
    /// Duplex and one-shot bodies are refused before extraction: a false
    /// non-match would be indistinguishable from "the content didn't
    /// match".
    pub fn bytes(&self, request: &MockRequest) -> Result<Option<&Bytes>, MatchError> {
        let cached = self.bytes.get_or_try_init(|| match request.body() {
            None => Ok(None),
            Some(body) => {
                if body.is_duplex() {
                    return Err(MatchError::UnmatchableBody("duplex bodies can't be matched"));
                }
                if body.is_one_shot() {
                    return Err(MatchError::UnmatchableBody(
                        "one-shot bodies can't be matched",
                    ));
                }
                Ok(Some(body.drain()?))
            }
        })?;
        Ok(cached.as_ref())
    }
}
