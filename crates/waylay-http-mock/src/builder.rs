//! Fluent rule construction.
//!
//! The builder accumulates matchers through a single join point,
//! [`RuleBuilder::matches`], which applies any pending `not()`/`or()`
//! modifier. The pending state is an explicit three-state machine; illegal
//! transitions are recorded as a sticky first defect and surfaced by the
//! terminal call, so a misconfigured builder can never produce a rule.

use std::time::Duration;

use hyper::Method;
use regex::Regex;

use crate::error::ConfigError;
use crate::matcher::{pattern, Charset, Matcher};
use crate::request::MockRequest;
use crate::response::ResponseTemplate;
use crate::rule::{Answer, Rule, UNLIMITED};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Pending {
    #[default]
    None,
    Negate,
    Or,
}

/// Builder for [`Rule`]s.
#[derive(Default)]
pub struct RuleBuilder {
    matchers: Vec<Matcher>,
    pending: Pending,
    times: Option<u64>,
    delay_millis: i64,
    defect: Option<ConfigError>,
}

impl RuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- modifiers -------------------------------------------------

    /// Negate the next matcher.
    pub fn not(mut self) -> Self {
        if self.pending != Pending::None {
            return self.with_defect(ConfigError::NegationPending);
        }
        self.pending = Pending::Negate;
        self
    }

    /// Combine the previous matcher and the next one into a disjunction.
    /// Consecutive `or()`s extend the same disjunction in place.
    pub fn or(mut self) -> Self {
        if self.pending != Pending::None {
            return self.with_defect(ConfigError::DisjunctionPending);
        }
        if self.matchers.is_empty() {
            return self.with_defect(ConfigError::LeadingOr);
        }
        self.pending = Pending::Or;
        self
    }

    // ----- the join point --------------------------------------------

    /// Add a matcher, applying any pending modifier. Every predicate
    /// helper funnels through here.
    pub fn matches(mut self, matcher: Matcher) -> Self {
        let matcher = match self.pending {
            Pending::Negate => Matcher::Not(Box::new(matcher)),
            _ => matcher,
        };
        if self.pending == Pending::Or {
            // Fold into a flat trailing Or rather than nesting pairs.
            match self.matchers.pop() {
                Some(Matcher::Or(mut branches)) => {
                    branches.push(matcher);
                    self.matchers.push(Matcher::Or(branches));
                }
                Some(previous) => {
                    self.matchers.push(Matcher::Or(vec![previous, matcher]));
                }
                None => {
                    // or() refuses an empty matcher list up front.
                    self.matchers.push(matcher);
                }
            }
        } else {
            self.matchers.push(matcher);
        }
        self.pending = Pending::None;
        self
    }

    // ----- method predicates -----------------------------------------

    pub fn method(self, method: Method) -> Self {
        self.matches(Matcher::Method(method))
    }

    pub fn get(self) -> Self {
        self.method(Method::GET)
    }

    pub fn head(self) -> Self {
        self.method(Method::HEAD)
    }

    pub fn post(self) -> Self {
        self.method(Method::POST)
    }

    pub fn put(self) -> Self {
        self.method(Method::PUT)
    }

    pub fn delete(self) -> Self {
        self.method(Method::DELETE)
    }

    pub fn options(self) -> Self {
        self.method(Method::OPTIONS)
    }

    pub fn patch(self) -> Self {
        self.method(Method::PATCH)
    }

    pub fn get_url(self, url: &str) -> Self {
        self.get().url(url)
    }

    pub fn post_url(self, url: &str) -> Self {
        self.post().url(url)
    }

    pub fn put_url(self, url: &str) -> Self {
        self.put().url(url)
    }

    pub fn delete_url(self, url: &str) -> Self {
        self.delete().url(url)
    }

    // ----- url / path predicates -------------------------------------

    pub fn url(self, url: &str) -> Self {
        self.matches(Matcher::Url(pattern::exact(url)))
    }

    pub fn url_starts(self, prefix: &str) -> Self {
        self.matches(Matcher::Url(pattern::prefix(prefix)))
    }

    pub fn url_ends(self, suffix: &str) -> Self {
        self.matches(Matcher::Url(pattern::suffix(suffix)))
    }

    pub fn url_matches(self, pattern: &str) -> Self {
        self.compiled(pattern, Matcher::Url)
    }

    pub fn path(self, path: &str) -> Self {
        self.matches(Matcher::Path(pattern::exact(path)))
    }

    pub fn path_starts(self, prefix: &str) -> Self {
        self.matches(Matcher::Path(pattern::prefix(prefix)))
    }

    pub fn path_ends(self, suffix: &str) -> Self {
        self.matches(Matcher::Path(pattern::suffix(suffix)))
    }

    pub fn path_matches(self, pattern: &str) -> Self {
        self.compiled(pattern, Matcher::Path)
    }

    // ----- header / query predicates ---------------------------------

    pub fn header(self, name: &str, value: &str) -> Self {
        let pattern = pattern::exact(value);
        self.matches(Matcher::Header {
            name: name.to_string(),
            pattern,
        })
    }

    pub fn has_header(self, name: &str) -> Self {
        self.matches(Matcher::Header {
            name: name.to_string(),
            pattern: pattern::any(),
        })
    }

    pub fn header_matches(self, name: &str, pattern: &str) -> Self {
        let name = name.to_string();
        self.compiled(pattern, move |re| Matcher::Header { name, pattern: re })
    }

    pub fn param(self, name: &str, value: &str) -> Self {
        let pattern = pattern::exact(value);
        self.matches(Matcher::QueryParam {
            name: name.to_string(),
            pattern,
        })
    }

    pub fn has_param(self, name: &str) -> Self {
        self.matches(Matcher::QueryParam {
            name: name.to_string(),
            pattern: pattern::any(),
        })
    }

    pub fn param_matches(self, name: &str, pattern: &str) -> Self {
        let name = name.to_string();
        self.compiled(pattern, move |re| Matcher::QueryParam { name, pattern: re })
    }

    // ----- body predicates -------------------------------------------

    pub fn body(self, value: &str) -> Self {
        self.body_charset(value, Charset::default())
    }

    pub fn body_charset(self, value: &str, charset: Charset) -> Self {
        let pattern = pattern::exact(value);
        self.matches(Matcher::Body { pattern, charset })
    }

    pub fn body_matches(self, pattern: &str) -> Self {
        self.body_matches_charset(pattern, Charset::default())
    }

    pub fn body_matches_charset(self, pattern: &str, charset: Charset) -> Self {
        self.compiled(pattern, move |re| Matcher::Body {
            pattern: re,
            charset,
        })
    }

    // ----- rule metadata ---------------------------------------------

    /// How many requests this rule may answer. Validated (≥ 1) at the
    /// terminal call.
    pub fn times(mut self, times: u64) -> Self {
        self.times = Some(times);
        self
    }

    /// Let the rule answer any number of requests.
    pub fn any_times(self) -> Self {
        self.times(UNLIMITED)
    }

    /// Artificial latency before each response, slept synchronously on
    /// the dispatching thread. Validated (≥ 0) at the terminal call.
    pub fn delay_millis(mut self, millis: i64) -> Self {
        self.delay_millis = millis;
        self
    }

    // ----- terminals -------------------------------------------------

    /// Finalize with a fixed response draft.
    ///
    /// Repeatable rules (repeat count ≠ 1) pre-load stream bodies into a
    /// resettable snapshot here, so every invocation observes the same
    /// content.
    pub fn respond(self, template: ResponseTemplate) -> Result<Rule, ConfigError> {
        let (matchers, times, delay, mut template) = self.finalize(template)?;
        if times != 1 {
            template.preload().map_err(ConfigError::BodyPreload)?;
        }
        Ok(Rule::new(matchers, Answer::Fixed(template), times, delay))
    }

    /// Finalize with a response-producing function.
    pub fn answer<F>(self, answer: F) -> Result<Rule, ConfigError>
    where
        F: Fn(&MockRequest) -> ResponseTemplate + Send + Sync + 'static,
    {
        let (matchers, times, delay, _) = self.finalize(ResponseTemplate::default())?;
        Ok(Rule::new(
            matchers,
            Answer::Dynamic(Box::new(answer)),
            times,
            delay,
        ))
    }

    fn finalize(
        mut self,
        template: ResponseTemplate,
    ) -> Result<(Vec<Matcher>, u64, Duration, ResponseTemplate), ConfigError> {
        if let Some(defect) = self.defect.take() {
            return Err(defect);
        }
        match self.pending {
            Pending::Negate => return Err(ConfigError::DanglingNegation),
            Pending::Or => return Err(ConfigError::DanglingDisjunction),
            Pending::None => {}
        }
        let times = self.times.unwrap_or(1);
        if times < 1 {
            return Err(ConfigError::InvalidTimes);
        }
        if self.delay_millis < 0 {
            return Err(ConfigError::NegativeDelay(self.delay_millis));
        }
        let delay = Duration::from_millis(self.delay_millis as u64);
        Ok((self.matchers, times, delay, template))
    }

    fn compiled(self, pattern: &str, build: impl FnOnce(Regex) -> Matcher) -> Self {
        match pattern::anchored(pattern) {
            Ok(re) => self.matches(build(re)),
            Err(source) => {
                let pattern = pattern.to_string();
                self.with_defect(ConfigError::InvalidPattern { pattern, source })
            }
        }
    }

    fn with_defect(mut self, defect: ConfigError) -> Self {
        if self.defect.is_none() {
            self.defect = Some(defect);
        }
        self
    }
}
