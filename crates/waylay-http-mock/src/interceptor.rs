//! The interception dispatcher: an ordered rule collection plus a
//! dispatch behavior.
//!
//! Rules are tried strictly in registration order; the behavior only
//! governs what happens when a rule does not match. Rule registration and
//! behavior changes belong to a single configuring thread, while dispatch
//! itself may run concurrently from the host client's workers.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::builder::RuleBuilder;
use crate::error::{DispatchError, FailureReport};
use crate::request::{BodyCache, MockRequest};
use crate::response::MockResponse;
use crate::rule::Rule;

/// Dispatch policy for non-matching requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    /// Requests must match rules in registration order; the first
    /// unconsumed rule failing to match aborts the dispatch.
    #[default]
    Sequential,
    /// Requests may match rules in any order; exhausting the rules is a
    /// hard failure.
    Unordered,
    /// Like `Unordered`, but exhausting the rules relays the request to
    /// the real transport.
    Relayed,
}

/// The real transport behind [`Behavior::Relayed`].
pub trait Upstream: Send + Sync {
    fn proceed(&self, request: &MockRequest) -> io::Result<MockResponse>;
}

impl<F> Upstream for F
where
    F: Fn(&MockRequest) -> io::Result<MockResponse> + Send + Sync,
{
    fn proceed(&self, request: &MockRequest) -> io::Result<MockResponse> {
        self(request)
    }
}

/// Matches outgoing requests against registered rules and substitutes
/// pre-configured responses, without any network I/O.
pub struct MockInterceptor {
    rules: RwLock<Vec<Rule>>,
    behavior: RwLock<Behavior>,
    upstream: Option<Box<dyn Upstream>>,
    request_count: AtomicU64,
}

impl Default for MockInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInterceptor {
    /// An interceptor with the default [`Behavior::Sequential`].
    pub fn new() -> Self {
        Self::with_behavior(Behavior::default())
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        MockInterceptor {
            rules: RwLock::new(Vec::new()),
            behavior: RwLock::new(behavior),
            upstream: None,
            request_count: AtomicU64::new(0),
        }
    }

    /// Attach the real transport used by [`Behavior::Relayed`].
    pub fn with_upstream(mut self, upstream: impl Upstream + 'static) -> Self {
        self.upstream = Some(Box::new(upstream));
        self
    }

    pub fn behavior(&self) -> Behavior {
        *self.behavior.read()
    }

    pub fn set_behavior(&self, behavior: Behavior) -> &Self {
        *self.behavior.write() = behavior;
        self
    }

    /// Register a rule. Insertion order is testing order.
    pub fn add_rule(&self, rule: Rule) -> &Self {
        self.rules.write().push(rule);
        self
    }

    /// Start building a rule. Nothing is registered until the finished
    /// rule is passed to [`MockInterceptor::add_rule`].
    pub fn rule_builder(&self) -> RuleBuilder {
        RuleBuilder::new()
    }

    /// Drop all registered rules.
    pub fn reset(&self) -> &Self {
        self.rules.write().clear();
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    /// How many requests this interceptor has dispatched.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Evaluate the registered rules against a request.
    ///
    /// Walks rules in registration order, lazily skipping consumed ones.
    /// The first matching rule's response wins. Behavior decides the
    /// rest: `Sequential` hard-fails as soon as the first unconsumed rule
    /// rejects the request; `Unordered` and `Relayed` keep advancing. On
    /// exhaustion, `Relayed` hands the request to the upstream transport
    /// and the other behaviors fail with a report of every remaining
    /// rule.
    pub fn dispatch(&self, request: &MockRequest) -> Result<MockResponse, DispatchError> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let behavior = self.behavior();
        let cache = BodyCache::new();
        let rules = self.rules.read();

        for (index, rule) in rules.iter().enumerate() {
            if rule.is_consumed() {
                debug!(index, "skipping consumed rule");
                continue;
            }
            if let Some(response) = rule.accept(request, &cache)? {
                debug!(index, rule = %rule, "rule matched");
                return Ok(response);
            }
            if behavior == Behavior::Sequential {
                debug!(index, rule = %rule, "sequential order violated");
                let report = FailureReport::out_of_order(
                    request.to_string(),
                    rule.to_string(),
                    rule.fail_reasons(request, &cache),
                );
                return Err(DispatchError::OutOfOrder(report));
            }
        }

        if behavior == Behavior::Relayed {
            return match &self.upstream {
                Some(upstream) => {
                    debug!(request = %request, "no rule matched, relaying upstream");
                    upstream.proceed(request).map_err(DispatchError::Upstream)
                }
                None => Err(DispatchError::NoUpstream),
            };
        }

        let remaining: Vec<String> = rules
            .iter()
            .filter(|rule| !rule.is_consumed())
            .map(|rule| rule.to_string())
            .collect();
        debug!(request = %request, remaining = remaining.len(), "no rule matched");
        Err(DispatchError::NoRuleMatched(FailureReport::no_match(
            request.to_string(),
            remaining,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseTemplate;
    use hyper::{HeaderMap, Method, StatusCode};
    use std::io;

    fn request(method: Method, url: &str) -> MockRequest {
        MockRequest::builder(method, url).build().unwrap()
    }

    fn rule_for(builder: RuleBuilder, body: &str) -> Rule {
        builder.respond(ResponseTemplate::text(body)).unwrap()
    }

    #[test]
    fn sequential_matches_in_registration_order() {
        let mock = MockInterceptor::new();
        mock.add_rule(rule_for(RuleBuilder::new().get().path("/a"), "a"))
            .add_rule(rule_for(RuleBuilder::new().get().path("/b"), "b"));

        let response = mock.dispatch(&request(Method::GET, "https://example.test/a")).unwrap();
        assert_eq!(response.body_text(), "a");
        let response = mock.dispatch(&request(Method::GET, "https://example.test/b")).unwrap();
        assert_eq!(response.body_text(), "b");
    }

    #[test]
    fn sequential_hard_fails_on_first_mismatch() {
        let mock = MockInterceptor::new();
        mock.add_rule(rule_for(RuleBuilder::new().get().path("/a"), "a"))
            .add_rule(rule_for(RuleBuilder::new().get().path("/b"), "b"));

        let err = mock
            .dispatch(&request(Method::DELETE, "https://example.test/a"))
            .unwrap_err();
        let DispatchError::OutOfOrder(report) = err else {
            panic!("expected OutOfOrder, got {err:?}");
        };
        assert_eq!(report.request(), "DELETE https://example.test/a");
        assert_eq!(report.matcher_reasons().len(), 1);
        assert_eq!(report.matcher_reasons()[0].1, "expected=GET;actual=DELETE");

        // Rule 2 must not have been consumed by the failed dispatch.
        let response = mock.dispatch(&request(Method::GET, "https://example.test/a")).unwrap();
        assert_eq!(response.body_text(), "a");
    }

    #[test]
    fn sequential_lazily_skips_consumed_rules() {
        let mock = MockInterceptor::new();
        mock.add_rule(rule_for(RuleBuilder::new().get().path("/a"), "a"))
            .add_rule(rule_for(RuleBuilder::new().get().path("/b"), "b"));

        mock.dispatch(&request(Method::GET, "https://example.test/a")).unwrap();
        // Rule 1 is consumed; rule 2 is now the next-in-sequence.
        let response = mock.dispatch(&request(Method::GET, "https://example.test/b")).unwrap();
        assert_eq!(response.body_text(), "b");
    }

    #[test]
    fn unordered_advances_past_mismatches() {
        let mock = MockInterceptor::with_behavior(Behavior::Unordered);
        mock.add_rule(rule_for(RuleBuilder::new().get().path("/a"), "a"))
            .add_rule(rule_for(RuleBuilder::new().get().path("/b"), "b"));

        let response = mock.dispatch(&request(Method::GET, "https://example.test/b")).unwrap();
        assert_eq!(response.body_text(), "b");
    }

    #[test]
    fn unordered_exhaustion_lists_remaining_rules() {
        let mock = MockInterceptor::with_behavior(Behavior::Unordered);
        mock.add_rule(rule_for(RuleBuilder::new().get().path("/a"), "a"));

        let err = mock
            .dispatch(&request(Method::GET, "https://example.test/z"))
            .unwrap_err();
        let DispatchError::NoRuleMatched(report) = err else {
            panic!("expected NoRuleMatched, got {err:?}");
        };
        assert_eq!(report.remaining_rules().len(), 1);
        assert!(report.remaining_rules()[0].contains("path("));
    }

    #[test]
    fn exhaustion_with_no_unconsumed_rules() {
        let mock = MockInterceptor::with_behavior(Behavior::Unordered);
        mock.add_rule(rule_for(RuleBuilder::new().get(), "once"));
        mock.dispatch(&request(Method::GET, "https://example.test/")).unwrap();

        let err = mock
            .dispatch(&request(Method::GET, "https://example.test/"))
            .unwrap_err();
        let DispatchError::NoRuleMatched(report) = err else {
            panic!("expected NoRuleMatched, got {err:?}");
        };
        assert!(report.remaining_rules().is_empty());
        assert!(report.to_string().contains("no rules remain!"));
    }

    fn upstream(request: &MockRequest) -> io::Result<MockResponse> {
        Ok(MockResponse::for_relay(
            request,
            StatusCode::ACCEPTED,
            HeaderMap::new(),
            "from upstream",
        ))
    }

    #[test]
    fn relayed_passes_through_unmodified() {
        let mock = MockInterceptor::with_behavior(Behavior::Relayed).with_upstream(upstream);
        mock.add_rule(rule_for(RuleBuilder::new().get().path("/mocked"), "mocked"));

        let response = mock
            .dispatch(&request(Method::GET, "https://example.test/live"))
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.body_text(), "from upstream");

        // A matching rule still wins over the relay.
        let response = mock
            .dispatch(&request(Method::GET, "https://example.test/mocked"))
            .unwrap();
        assert_eq!(response.body_text(), "mocked");
    }

    #[test]
    fn relayed_without_upstream_is_an_error() {
        let mock = MockInterceptor::with_behavior(Behavior::Relayed);
        let err = mock
            .dispatch(&request(Method::GET, "https://example.test/"))
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoUpstream));
    }

    #[test]
    fn rule_builder_registers_nothing_until_added() {
        let mock = MockInterceptor::new();
        let rule = mock
            .rule_builder()
            .get()
            .respond(ResponseTemplate::text("ok"))
            .unwrap();
        assert_eq!(mock.rule_count(), 0);
        mock.add_rule(rule);
        assert_eq!(mock.rule_count(), 1);
    }

    #[test]
    fn reset_clears_rules() {
        let mock = MockInterceptor::with_behavior(Behavior::Unordered);
        mock.add_rule(rule_for(RuleBuilder::new().get(), "ok"));
        assert_eq!(mock.rule_count(), 1);
        mock.reset();
        assert_eq!(mock.rule_count(), 0);
        assert!(mock
            .dispatch(&request(Method::GET, "https://example.test/"))
            .is_err());
    }

    #[test]
    fn behavior_can_change_between_dispatches() {
        let mock = MockInterceptor::new();
        assert_eq!(mock.behavior(), Behavior::Sequential);
        mock.set_behavior(Behavior::Unordered);
        assert_eq!(mock.behavior(), Behavior::Unordered);
    }

    #[test]
    fn request_count_tracks_dispatches() {
        let mock = MockInterceptor::with_behavior(Behavior::Unordered);
        mock.add_rule(rule_for(RuleBuilder::new().get().any_times(), "ok"));
        for _ in 0..3 {
            let _ = mock.dispatch(&request(Method::GET, "https://example.test/"));
        }
        assert_eq!(mock.request_count(), 3);
    }
}
