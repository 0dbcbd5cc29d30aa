//! Waylay: deterministic HTTP request interception for test harnesses.
//!
//! Callers register an ordered collection of rules, each combining a
//! predicate over an outgoing request with a recipe for producing a
//! response. On every dispatch the interceptor evaluates the rules
//! against the request and returns the first matching rule's response, or
//! fails/falls through according to the configured [`Behavior`]. No
//! network I/O ever happens here; the real transport only appears as the
//! [`Upstream`] collaborator behind [`Behavior::Relayed`].
//!
//! ```
//! use hyper::Method;
//! use waylay_http_mock::{Behavior, MockInterceptor, MockRequest, ResponseTemplate, RuleBuilder};
//!
//! let mock = MockInterceptor::with_behavior(Behavior::Unordered);
//! mock.add_rule(
//!     RuleBuilder::new()
//!         .get()
//!         .path("/users/1")
//!         .respond(ResponseTemplate::json(r#"{"id":1}"#))
//!         .unwrap(),
//! );
//!
//! let request = MockRequest::builder(Method::GET, "https://api.example.test/users/1")
//!     .build()
//!     .unwrap();
//! let response = mock.dispatch(&request).unwrap();
//! assert_eq!(response.body_text(), r#"{"id":1}"#);
//! ```

// ===== Core matching engine =====
pub mod builder;
pub mod error;
pub mod matcher;
pub mod rule;

// ===== Dispatch =====
pub mod interceptor;

// ===== Host HTTP surface =====
pub mod request;
pub mod response;

pub use builder::RuleBuilder;
pub use error::{ConfigError, DispatchError, FailureReport, MatchError};
pub use interceptor::{Behavior, MockInterceptor, Upstream};
pub use matcher::{Charset, Matcher};
pub use request::{BodyCache, MockRequest, MockRequestBuilder, RequestBody};
pub use response::{media, BodySource, MockResponse, ResponseTemplate};
pub use rule::{Rule, UNLIMITED};
