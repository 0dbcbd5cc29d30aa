//! Error types for rule configuration and dispatch.

use std::fmt;
use std::io;

use hyper::http::uri::InvalidUri;

/// Programmer misuse of the rule builder, surfaced at build time.
///
/// A builder that hits one of these can never produce a [`crate::Rule`]:
/// violations are recorded as they happen and the first one is returned by
/// the terminal `respond`/`answer` call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("'not()' can't be called while another modifier is pending")]
    NegationPending,

    #[error("'or()' can't be called while another modifier is pending")]
    DisjunctionPending,

    #[error("'or()' can't be the first matcher")]
    LeadingOr,

    #[error("missing a predicate after 'not()'")]
    DanglingNegation,

    #[error("missing a predicate after 'or()'")]
    DanglingDisjunction,

    #[error("repeat count can't be less than 1")]
    InvalidTimes,

    #[error("delay can't be negative, got {0}ms")]
    NegativeDelay(i64),

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: InvalidUri,
    },

    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    #[error("failed to preload response body: {0}")]
    BodyPreload(#[from] io::Error),
}

/// Failure while evaluating a single matcher against a request.
///
/// Matching itself is total; the only fallible paths are the body matcher's
/// refusal of duplex/one-shot bodies and I/O failures while draining a
/// stream body. Neither is ever reported as a plain non-match.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("request body can't be matched: {0}")]
    UnmatchableBody(&'static str),

    #[error("failed to read request body: {0}")]
    BodyRead(#[from] io::Error),
}

/// Failure of a whole dispatch call.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Under [`crate::Behavior::Sequential`], the first unconsumed rule did
    /// not match the request.
    #[error("{0}")]
    OutOfOrder(FailureReport),

    /// The rule list was exhausted without a match under
    /// [`crate::Behavior::Sequential`] or [`crate::Behavior::Unordered`].
    #[error("{0}")]
    NoRuleMatched(FailureReport),

    #[error("request body can't be matched: {0}")]
    UnmatchableBody(&'static str),

    #[error("failed to read request or response body: {0}")]
    BodyRead(#[source] io::Error),

    #[error("behavior is Relayed but no upstream transport is configured")]
    NoUpstream,

    #[error("upstream relay failed: {0}")]
    Upstream(#[source] io::Error),
}

impl From<MatchError> for DispatchError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::UnmatchableBody(why) => DispatchError::UnmatchableBody(why),
            MatchError::BodyRead(err) => DispatchError::BodyRead(err),
        }
    }
}

impl From<io::Error> for DispatchError {
    fn from(err: io::Error) -> Self {
        DispatchError::BodyRead(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    OutOfOrder,
    NoMatch,
}

/// Full diagnostic for a failed dispatch: the request's identity, the
/// nearest candidate rule, and every failing matcher's individual reason.
#[derive(Debug)]
pub struct FailureReport {
    kind: FailureKind,
    request: String,
    rule: Option<String>,
    matcher_reasons: Vec<(String, String)>,
    remaining_rules: Vec<String>,
}

impl FailureReport {
    pub(crate) fn out_of_order(
        request: String,
        rule: String,
        matcher_reasons: Vec<(String, String)>,
    ) -> Self {
        FailureReport {
            kind: FailureKind::OutOfOrder,
            request,
            rule: Some(rule),
            matcher_reasons,
            remaining_rules: Vec::new(),
        }
    }

    pub(crate) fn no_match(request: String, remaining_rules: Vec<String>) -> Self {
        FailureReport {
            kind: FailureKind::NoMatch,
            request,
            rule: None,
            matcher_reasons: Vec::new(),
            remaining_rules,
        }
    }

    /// The request identity, as `METHOD url`.
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Description and failure reason for each matcher that rejected the
    /// nearest candidate rule.
    pub fn matcher_reasons(&self) -> &[(String, String)] {
        &self.matcher_reasons
    }

    /// Summaries of the unconsumed rules that were still registered when
    /// the dispatch ran out of candidates.
    pub fn remaining_rules(&self) -> &[String] {
        &self.remaining_rules
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::OutOfOrder => {
                write!(f, "request did not match the next rule in sequence")?;
                if let Some(rule) = &self.rule {
                    write!(f, ": {rule}")?;
                }
                write!(f, "\nrequest={}", self.request)?;
                if !self.matcher_reasons.is_empty() {
                    write!(f, "\nfailed to match:")?;
                    for (i, (matcher, reason)) in self.matcher_reasons.iter().enumerate() {
                        write!(f, "\n\t{}: {reason}; matcher={matcher}", i + 1)?;
                    }
                }
                Ok(())
            }
            FailureKind::NoMatch => {
                write!(f, "no rule matched: request={}", self.request)?;
                if self.remaining_rules.is_empty() {
                    write!(f, "\nno rules remain!")?;
                } else {
                    write!(f, "\nremaining rules:")?;
                    for (i, rule) in self.remaining_rules.iter().enumerate() {
                        write!(f, "\n\t{}: {rule}", i + 1)?;
                    }
                }
                Ok(())
            }
        }
    }
}
