//! Classification of task errors into rate-limit signals and everything else.
//!
//! Task errors expose their shape through [`RateLimitSignal`]. The executor
//! only ever looks at an error through [`classify_error`], so the rules for
//! what counts as "rate limited" live in one place.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// HTTP status used by servers to signal rate limiting.
pub const TOO_MANY_REQUESTS: u16 = 429;

const RETRY_AFTER_HEADER: &str = "retry-after";

/// The view of a task error needed to decide whether to retry it.
pub trait RateLimitSignal {
    /// HTTP status (or numeric error code) carried by the error, if any.
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// Human-readable message, matched against rate-limit phrases.
    fn message(&self) -> Cow<'_, str>;

    /// Raw `Retry-After` header value, if the error carries a response.
    fn retry_after(&self) -> Option<&str> {
        None
    }
}

/// Outcome of classifying a task error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limited; `retry_after` is set when the server sent a usable hint.
    RateLimited { retry_after: Option<Duration> },
    /// Any other failure. Never retried.
    Other,
}

impl ErrorClass {
    /// Whether the error should be retried.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ErrorClass::RateLimited { .. })
    }
}

/// Classify an error against the current wall-clock time.
pub fn classify_error<E: RateLimitSignal + ?Sized>(error: &E) -> ErrorClass {
    classify_error_at(error, Utc::now())
}

/// Classify an error, resolving HTTP-date `Retry-After` hints against `now`.
pub fn classify_error_at<E: RateLimitSignal + ?Sized>(error: &E, now: DateTime<Utc>) -> ErrorClass {
    if !is_rate_limited(error) {
        return ErrorClass::Other;
    }

    let retry_after = error
        .retry_after()
        .and_then(|value| parse_retry_after(value, now));

    ErrorClass::RateLimited { retry_after }
}

fn is_rate_limited<E: RateLimitSignal + ?Sized>(error: &E) -> bool {
    if error.status_code() == Some(TOO_MANY_REQUESTS) {
        return true;
    }

    let message = error.message();
    message.contains("429") || message.to_ascii_lowercase().contains("too many requests")
}

/// Parse a `Retry-After` value into a wait duration.
///
/// Numeric values are seconds (fractions allowed). Anything else is tried as
/// an HTTP date (RFC 2822 form, then RFC 3339). Only strictly positive waits
/// are returned; zero, negative, past or unparseable values yield `None`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(seconds)
            .ok()
            .filter(|wait| !wait.is_zero());
    }

    let date = DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()?;

    (date.with_timezone(&Utc) - now)
        .to_std()
        .ok()
        .filter(|wait| !wait.is_zero())
}

/// Response details attached to an [`ApiError`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status of the response
    pub status: Option<u16>,
    /// Response headers, looked up case-insensitively
    pub headers: HashMap<String, String>,
}

impl ApiResponse {
    /// Look up a header ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A generic API failure for callers without an error type of their own.
///
/// The status is resolved from the response first, then `status`, then a
/// numeric `code`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    /// Error message
    pub message: String,
    /// Status set directly on the error
    pub status: Option<u16>,
    /// Transport or SDK error code, e.g. "429" or "ECONNRESET"
    pub code: Option<String>,
    /// Response that produced the error, if any
    pub response: Option<ApiResponse>,
}

impl ApiError {
    /// An error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Set the status carried directly on the error.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the transport or SDK error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach a response status.
    pub fn with_response_status(mut self, status: u16) -> Self {
        self.response.get_or_insert_with(ApiResponse::default).status = Some(status);
        self
    }

    /// Attach a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response
            .get_or_insert_with(ApiResponse::default)
            .headers
            .insert(name.into(), value.into());
        self
    }

    /// Shorthand for a `Retry-After` response header.
    pub fn with_retry_after(self, value: impl Into<String>) -> Self {
        self.with_header("Retry-After", value)
    }

    /// A plain HTTP 429 error.
    pub fn too_many_requests() -> Self {
        Self::new("Too Many Requests").with_response_status(TOO_MANY_REQUESTS)
    }
}

impl RateLimitSignal for ApiError {
    fn status_code(&self) -> Option<u16> {
        self.response
            .as_ref()
            .and_then(|response| response.status)
            .or(self.status)
            .or_else(|| self.code.as_deref().and_then(|code| code.trim().parse().ok()))
    }

    fn message(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.message)
    }

    fn retry_after(&self) -> Option<&str> {
        self.response
            .as_ref()
            .and_then(|response| response.header(RETRY_AFTER_HEADER))
    }
}

impl RateLimitSignal for anyhow::Error {
    fn status_code(&self) -> Option<u16> {
        self.downcast_ref::<ApiError>()
            .and_then(RateLimitSignal::status_code)
    }

    fn message(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{:#}", self))
    }

    fn retry_after(&self) -> Option<&str> {
        self.downcast_ref::<ApiError>()
            .and_then(RateLimitSignal::retry_after)
    }
}

impl RateLimitSignal for std::io::Error {
    fn message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }
}

impl RateLimitSignal for String {
    fn message(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap()
    }

    #[test]
    fn test_status_429_is_rate_limited() {
        let error = ApiError::new("quota").with_status(429);
        assert_eq!(
            classify_error(&error),
            ErrorClass::RateLimited { retry_after: None }
        );
    }

    #[test]
    fn test_response_status_takes_precedence() {
        let error = ApiError::new("failed")
            .with_response_status(429)
            .with_status(500);
        assert_eq!(error.status_code(), Some(429));
        assert!(classify_error(&error).is_rate_limited());
    }

    #[test]
    fn test_numeric_code_is_honored() {
        let error = ApiError::new("failed").with_code("429");
        assert!(classify_error(&error).is_rate_limited());

        let error = ApiError::new("socket closed").with_code("ECONNRESET");
        assert_eq!(error.status_code(), None);
        assert_eq!(classify_error(&error), ErrorClass::Other);
    }

    #[test]
    fn test_message_signatures() {
        assert!(classify_error(&ApiError::new("Request failed with status code 429")).is_rate_limited());
        assert!(classify_error(&ApiError::new("TOO MANY REQUESTS, slow down")).is_rate_limited());
        assert!(classify_error(&ApiError::new("Too many requests")).is_rate_limited());
        assert_eq!(classify_error(&ApiError::new("Not Found")), ErrorClass::Other);
    }

    #[test]
    fn test_other_status_is_not_rate_limited() {
        let error = ApiError::new("not found").with_status(404);
        assert_eq!(classify_error(&error), ErrorClass::Other);
    }

    #[test]
    fn test_retry_after_seconds() {
        let error = ApiError::too_many_requests().with_retry_after("2");
        assert_eq!(
            classify_error(&error),
            ErrorClass::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
    }

    #[test]
    fn test_retry_after_header_case_insensitive() {
        let error = ApiError::too_many_requests().with_header("retry-after", "1");
        assert_eq!(error.retry_after(), Some("1"));

        let error = ApiError::too_many_requests().with_header("RETRY-AFTER", "1");
        assert_eq!(error.retry_after(), Some("1"));
    }

    #[test]
    fn test_retry_after_is_ignored_for_other_errors() {
        let error = ApiError::new("server error")
            .with_status(503)
            .with_retry_after("5");
        assert_eq!(classify_error(&error), ErrorClass::Other);
    }

    #[test]
    fn test_parse_retry_after_numeric() {
        let now = fixed_now();
        assert_eq!(parse_retry_after("3", now), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(" 1.5 ", now), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("0", now), None);
        assert_eq!(parse_retry_after("-4", now), None);
        assert_eq!(parse_retry_after("", now), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = fixed_now();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("2015-10-21T07:29:00Z", now),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_parse_retry_after_past_date() {
        let now = fixed_now();
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now), None);
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        assert_eq!(parse_retry_after("soon", fixed_now()), None);
    }

    #[test]
    fn test_classify_at_resolves_dates() {
        let error = ApiError::too_many_requests().with_retry_after("Wed, 21 Oct 2015 07:28:05 GMT");
        assert_eq!(
            classify_error_at(&error, fixed_now()),
            ErrorClass::RateLimited {
                retry_after: Some(Duration::from_secs(5))
            }
        );
    }

    #[test]
    fn test_anyhow_downcasts_api_error() {
        let error = anyhow::Error::new(ApiError::too_many_requests().with_retry_after("4"));
        assert_eq!(error.status_code(), Some(429));
        assert_eq!(
            classify_error(&error),
            ErrorClass::RateLimited {
                retry_after: Some(Duration::from_secs(4))
            }
        );
    }

    #[test]
    fn test_anyhow_matches_context_chain() {
        let error = anyhow::Error::new(ApiError::new("HTTP 429 from upstream"))
            .context("listing tenants");
        assert!(classify_error(&error).is_rate_limited());

        let error = anyhow::anyhow!("connection refused");
        assert_eq!(classify_error(&error), ErrorClass::Other);
    }
}
