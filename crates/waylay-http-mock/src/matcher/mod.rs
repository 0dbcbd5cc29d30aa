//! The matcher hierarchy: named boolean predicates over a request.
//!
//! The set is a closed tagged-variant enum so AND/OR/NOT composition stays
//! total and exhaustively checked. Leaf matchers extract one scalar string
//! from the request and test it against an anchored regex; absent text
//! never matches.

pub mod pattern;

use std::fmt;

use regex::Regex;

use crate::error::MatchError;
use crate::request::{BodyCache, MockRequest};

use hyper::Method;

/// How request body bytes decode before pattern matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Latin1,
}

impl Charset {
    fn decode(self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Charset::Utf8 => write!(f, "utf-8"),
            Charset::Latin1 => write!(f, "latin-1"),
        }
    }
}

/// A predicate over an outgoing request, with a diagnostic explanation
/// for failure.
#[derive(Debug)]
pub enum Matcher {
    Method(Method),
    Url(Regex),
    Path(Regex),
    Header { name: String, pattern: Regex },
    QueryParam { name: String, pattern: Regex },
    Body { pattern: Regex, charset: Charset },
    Not(Box<Matcher>),
    Or(Vec<Matcher>),
}

impl Matcher {
    /// Evaluate this matcher against a request.
    ///
    /// Total except for the body matcher, which refuses duplex/one-shot
    /// bodies and surfaces body-read failures instead of reporting a
    /// silent non-match. The `cache` keeps body extraction to a single
    /// drain per dispatch.
    pub fn matches(
        &self,
        request: &MockRequest,
        cache: &BodyCache,
    ) -> Result<bool, MatchError> {
        match self {
            Matcher::Method(method) => Ok(method == request.method()),
            Matcher::Url(pattern) => Ok(pattern.is_match(request.url())),
            Matcher::Path(pattern) => Ok(pattern.is_match(request.path())),
            Matcher::Header { name, pattern } => {
                Ok(matches_text(pattern, request.header(name)))
            }
            Matcher::QueryParam { name, pattern } => {
                Ok(matches_text(pattern, request.query_param(name).as_deref()))
            }
            Matcher::Body { pattern, charset } => {
                let text = body_text(request, cache, *charset)?;
                Ok(matches_text(pattern, text.as_deref()))
            }
            Matcher::Not(inner) => Ok(!inner.matches(request, cache)?),
            Matcher::Or(branches) => {
                for branch in branches {
                    if branch.matches(request, cache)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Render an `expected=<X>;actual=<Y>` diagnostic for a failed match.
    ///
    /// Uses the same text extraction as [`Matcher::matches`] (via the
    /// shared cache for bodies) and never re-evaluates the match itself.
    /// `Or` concatenates every branch's reason so the caller can see why
    /// each one failed; `Not` has no independent reason and describes
    /// itself.
    pub fn fail_reason(&self, request: &MockRequest, cache: &BodyCache) -> String {
        match self {
            Matcher::Method(method) => {
                pattern::reason(method.as_str(), Some(request.method().as_str()))
            }
            Matcher::Url(p) => pattern::reason(p.as_str(), Some(request.url())),
            Matcher::Path(p) => pattern::reason(p.as_str(), Some(request.path())),
            Matcher::Header { name, pattern } => {
                pattern::reason(pattern.as_str(), request.header(name))
            }
            Matcher::QueryParam { name, pattern } => {
                pattern::reason(pattern.as_str(), request.query_param(name).as_deref())
            }
            Matcher::Body { pattern, charset } => {
                match body_text(request, cache, *charset) {
                    Ok(text) => pattern::reason(pattern.as_str(), text.as_deref()),
                    Err(err) => pattern::reason(pattern.as_str(), Some(&err.to_string())),
                }
            }
            Matcher::Not(_) => format!("{self}"),
            Matcher::Or(branches) => {
                let reasons: Vec<String> = branches
                    .iter()
                    .map(|branch| branch.fail_reason(request, cache))
                    .collect();
                format!("or({})", reasons.join(", "))
            }
        }
    }
}

fn matches_text(pattern: &Regex, text: Option<&str>) -> bool {
    match text {
        Some(text) => pattern.is_match(text),
        None => false,
    }
}

fn body_text(
    request: &MockRequest,
    cache: &BodyCache,
    charset: Charset,
) -> Result<Option<String>, MatchError> {
    Ok(cache.bytes(request)?.map(|bytes| charset.decode(bytes)))
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Method(method) => write!(f, "method({method})"),
            Matcher::Url(p) => write!(f, "url(~={})", p.as_str()),
            Matcher::Path(p) => write!(f, "path(~={})", p.as_str()),
            Matcher::Header { name, pattern } => {
                write!(f, "header({name}~={})", pattern.as_str())
            }
            Matcher::QueryParam { name, pattern } => {
                write!(f, "param({name}~={})", pattern.as_str())
            }
            Matcher::Body { pattern, charset } => {
                write!(f, "body(~={}); charset={charset}", pattern.as_str())
            }
            Matcher::Not(inner) => write!(f, "not({inner})"),
            Matcher::Or(branches) => {
                write!(f, "or(")?;
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{branch}")?;
                }
                write!(f, ")")
            }
        }
    }
}
