//! Rules: a matcher conjunction bound to a response recipe, a use count,
//! and an optional artificial delay.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use tracing::trace;

use crate::error::DispatchError;
use crate::matcher::Matcher;
use crate::request::{BodyCache, MockRequest};
use crate::response::{MockResponse, ResponseTemplate};

/// Sentinel repeat count for a rule that never runs out of uses.
pub const UNLIMITED: u64 = u64::MAX;

pub(crate) enum Answer {
    /// A fixed draft rendered on every accept. Repeatable rules have had
    /// their body snapshotted at build time.
    Fixed(ResponseTemplate),
    /// A function producing a fresh draft per request.
    Dynamic(Box<dyn Fn(&MockRequest) -> ResponseTemplate + Send + Sync>),
}

/// An immutable matching rule. The only mutation over its lifetime is the
/// atomic decrement of its remaining-use counter on each successful match.
pub struct Rule {
    matchers: Vec<Matcher>,
    answer: Answer,
    times_remaining: AtomicU64,
    delay: Duration,
}

impl Rule {
    pub(crate) fn new(matchers: Vec<Matcher>, answer: Answer, times: u64, delay: Duration) -> Self {
        Rule {
            matchers,
            answer,
            times_remaining: AtomicU64::new(times),
            delay,
        }
    }

    /// Whether this rule's use count has reached zero. A consumed rule is
    /// permanently inert.
    pub fn is_consumed(&self) -> bool {
        self.times_remaining.load(Ordering::Acquire) == 0
    }

    /// Evaluate this rule against a request.
    ///
    /// Returns `Ok(None)` when the rule is consumed or any matcher fails
    /// (short-circuit AND, in declared order). On a full match the rule
    /// sleeps out its configured delay, claims one use, and renders its
    /// answer. Body-matching errors propagate instead of reading as a
    /// non-match.
    pub fn accept(
        &self,
        request: &MockRequest,
        cache: &BodyCache,
    ) -> Result<Option<MockResponse>, DispatchError> {
        if self.is_consumed() {
            return Ok(None);
        }
        for matcher in &self.matchers {
            if !matcher.matches(request, cache)? {
                trace!(matcher = %matcher, "matcher rejected request");
                return Ok(None);
            }
        }
        if !self.delay.is_zero() {
            // Synchronous latency on the calling thread, by contract.
            thread::sleep(self.delay);
        }
        if !self.claim_use() {
            // Lost a race for the last remaining use.
            return Ok(None);
        }
        let message = format!("rule response from {self}");
        let response = match &self.answer {
            Answer::Fixed(template) => template.render(request, message)?,
            Answer::Dynamic(answer) => answer(request).render(request, message)?,
        };
        Ok(Some(response))
    }

    /// Collect a description and reason for every matcher that fails,
    /// in declared order. Diagnostics only; never drives control flow.
    pub fn fail_reasons(
        &self,
        request: &MockRequest,
        cache: &BodyCache,
    ) -> Vec<(String, String)> {
        self.matchers
            .iter()
            .filter_map(|matcher| match matcher.matches(request, cache) {
                Ok(true) => None,
                Ok(false) => Some((matcher.to_string(), matcher.fail_reason(request, cache))),
                Err(err) => Some((matcher.to_string(), err.to_string())),
            })
            .collect()
    }

    /// Claim one use, atomically. Fails only when a concurrent match
    /// consumed the last use first; the unlimited sentinel never
    /// decrements.
    fn claim_use(&self) -> bool {
        self.times_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |times| match times {
                0 => None,
                UNLIMITED => Some(UNLIMITED),
                times => Some(times - 1),
            })
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn times_remaining(&self) -> u64 {
        self.times_remaining.load(Ordering::Acquire)
    }
}

// Manual impl: `Answer::Dynamic` holds a boxed closure.
impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rule({self})")
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, matcher) in self.matchers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{matcher}")?;
        }
        write!(f, "], consumed={}", self.is_consumed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::pattern;
    use hyper::{Method, StatusCode};
    use std::time::Instant;

    fn rule(matchers: Vec<Matcher>, times: u64) -> Rule {
        Rule::new(
            matchers,
            Answer::Fixed(ResponseTemplate::text("ok")),
            times,
            Duration::ZERO,
        )
    }

    fn get(url: &str) -> MockRequest {
        MockRequest::get(url).unwrap()
    }

    #[test]
    fn and_semantics_reject_partial_matches() {
        let rule = rule(
            vec![
                Matcher::Method(Method::GET),
                Matcher::Path(pattern::exact("/x")),
            ],
            UNLIMITED,
        );
        let cache = BodyCache::new();

        assert!(rule
            .accept(&get("https://example.test/x"), &cache)
            .unwrap()
            .is_some());
        assert!(rule
            .accept(&get("https://example.test/y"), &BodyCache::new())
            .unwrap()
            .is_none());

        let post = MockRequest::builder(Method::POST, "https://example.test/x")
            .build()
            .unwrap();
        assert!(rule.accept(&post, &BodyCache::new()).unwrap().is_none());
    }

    #[test]
    fn consumption_is_monotonic() {
        let rule = rule(vec![Matcher::Method(Method::GET)], 2);
        let request = get("https://example.test/");

        assert!(rule.accept(&request, &BodyCache::new()).unwrap().is_some());
        assert!(rule.accept(&request, &BodyCache::new()).unwrap().is_some());
        assert!(rule.is_consumed());
        assert!(rule.accept(&request, &BodyCache::new()).unwrap().is_none());
        assert!(rule.is_consumed());
    }

    #[test]
    fn consumed_rule_skips_matcher_evaluation() {
        // A consumed rule must return immediately even for a request body
        // that would error during matching.
        let rule = rule(
            vec![Matcher::Body {
                pattern: pattern::any(),
                charset: Default::default(),
            }],
            0,
        );
        let request = MockRequest::builder(Method::POST, "https://example.test/")
            .body(crate::request::RequestBody::text("x").duplex())
            .build()
            .unwrap();
        assert!(rule.accept(&request, &BodyCache::new()).unwrap().is_none());
    }

    #[test]
    fn unlimited_rule_never_decrements() {
        let rule = rule(vec![Matcher::Method(Method::GET)], UNLIMITED);
        let request = get("https://example.test/");
        for _ in 0..10 {
            assert!(rule.accept(&request, &BodyCache::new()).unwrap().is_some());
        }
        assert_eq!(rule.times_remaining(), UNLIMITED);
    }

    #[test]
    fn repeatable_rule_yields_identical_bodies() {
        let rule = Rule::new(
            vec![Matcher::Method(Method::GET)],
            Answer::Fixed(ResponseTemplate::json(r#"{"n":42}"#)),
            UNLIMITED,
            Duration::ZERO,
        );
        let request = get("https://example.test/");
        let first = rule
            .accept(&request, &BodyCache::new())
            .unwrap()
            .unwrap()
            .body_bytes()
            .clone();
        for _ in 0..49 {
            let body = rule
                .accept(&request, &BodyCache::new())
                .unwrap()
                .unwrap()
                .body_bytes()
                .clone();
            assert_eq!(first, body);
        }
    }

    #[test]
    fn failed_match_has_no_side_effects() {
        let rule = rule(vec![Matcher::Method(Method::DELETE)], 1);
        let request = get("https://example.test/");
        assert!(rule.accept(&request, &BodyCache::new()).unwrap().is_none());
        assert_eq!(rule.times_remaining(), 1);
    }

    #[test]
    fn delay_blocks_the_calling_thread() {
        let rule = Rule::new(
            vec![Matcher::Method(Method::GET)],
            Answer::Fixed(ResponseTemplate::text("slow")),
            1,
            Duration::from_millis(50),
        );
        let request = get("https://example.test/");
        let start = Instant::now();
        assert!(rule.accept(&request, &BodyCache::new()).unwrap().is_some());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn fail_reasons_collect_every_failing_matcher() {
        let rule = rule(
            vec![
                Matcher::Method(Method::GET),
                Matcher::Path(pattern::exact("/a")),
            ],
            1,
        );
        let request = MockRequest::builder(Method::DELETE, "https://example.test/b")
            .build()
            .unwrap();
        let reasons = rule.fail_reasons(&request, &BodyCache::new());
        assert_eq!(reasons.len(), 2);
        assert_eq!(reasons[0].0, "method(GET)");
        assert_eq!(reasons[0].1, "expected=GET;actual=DELETE");
        assert!(reasons[1].0.starts_with("path("));
    }

    #[test]
    fn dynamic_answer_sees_the_request() {
        let rule = Rule::new(
            vec![Matcher::Method(Method::GET)],
            Answer::Dynamic(Box::new(|request: &MockRequest| {
                ResponseTemplate::new(StatusCode::OK).body_text(request.path().to_string())
            })),
            UNLIMITED,
            Duration::ZERO,
        );
        let response = rule
            .accept(&get("https://example.test/echo/me"), &BodyCache::new())
            .unwrap()
            .unwrap();
        assert_eq!(response.body_text(), "/echo/me");
    }

    #[test]
    fn debug_rendering_includes_the_matcher_list() {
        let rule = rule(vec![Matcher::Method(Method::GET)], 1);
        assert_eq!(format!("{rule:?}"), "Rule([method(GET)], consumed=false)");
    }

    #[test]
    fn concurrent_matching_consumes_exactly_k_uses() {
        use std::sync::Arc;

        let k = 8;
        let rule = Arc::new(Rule::new(
            vec![Matcher::Method(Method::GET)],
            Answer::Fixed(ResponseTemplate::text("ok")),
            k,
            Duration::ZERO,
        ));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let rule = Arc::clone(&rule);
                thread::spawn(move || {
                    let request = get("https://example.test/");
                    u64::from(rule.accept(&request, &BodyCache::new()).unwrap().is_some())
                })
            })
            .collect();

        let wins: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(wins, k);
        assert!(rule.is_consumed());
    }
}
