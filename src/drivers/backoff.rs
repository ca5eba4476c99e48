//! Transport-level retry with exponential backoff and jitter.
//!
//! Shared by every HTTP-backed driver (prompt and image generation).
//! Vendor SDK clients behind the AWS driver traits bring their own retry
//! policy and are not wrapped here.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Callback invoked before each transport retry.
///
/// Arguments: `(attempt_number, delay_before_retry, reason_for_retry)`.
pub type RetryCallback<'a> = Option<&'a mut (dyn FnMut(u32, Duration, &str) + Send)>;

/// Configuration for transport retry with exponential backoff and jitter.
///
/// # Example
///
/// ```
/// use llm_structures::drivers::BackoffConfig;
///
/// assert_eq!(BackoffConfig::none().max_retries, 0);
/// assert_eq!(BackoffConfig::standard().max_retries, 3);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum number of transport retries. Default: 0 (no retry).
    pub max_retries: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub multiplier: f64,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    pub jitter: JitterStrategy,
    /// HTTP status codes that trigger retry.
    pub retryable_statuses: Vec<u16>,
    /// Use the provider's `Retry-After` hint instead of the computed delay.
    pub respect_retry_after: bool,
}

/// Jitter strategy applied to the computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// Delay is exactly the calculated value.
    None,
    /// Random value in `[0, delay]`.
    Full,
    /// `delay/2 + random in [0, delay/2]`.
    Equal,
}

impl BackoffConfig {
    /// No transport retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::standard()
        }
    }

    /// 3 retries, 1s initial, 2x multiplier, 60s cap, full jitter.
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::Full,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            respect_retry_after: true,
        }
    }

    /// 5 retries from 500ms, for batch jobs against rate-limited APIs.
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(120),
            ..Self::standard()
        }
    }

    /// 2 short retries capped at 10s, for when a user is waiting on the stream.
    pub fn interactive() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            multiplier: 1.5,
            max_delay: Duration::from_secs(10),
            ..Self::standard()
        }
    }

    /// Delay before retry `attempt` (0-indexed), capped and jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };

        Duration::from_secs_f64(jittered)
    }

    /// Delay before retry `attempt` (1-indexed) given the error that caused it.
    pub(crate) fn delay_after(&self, attempt: u32, last_error: Option<&Error>) -> Duration {
        match last_error {
            Some(Error::HttpError {
                retry_after: Some(ra),
                ..
            }) if self.respect_retry_after => *ra,
            _ => self.delay_for_attempt(attempt.saturating_sub(1)),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::none()
    }
}

/// Whether `error` is a transient transport failure under `config`.
pub fn is_retryable(error: &Error, config: &BackoffConfig) -> bool {
    match error {
        Error::HttpError { status, .. } => config.retryable_statuses.contains(status),
        Error::Request(_) => true,
        _ => false,
    }
}

pub(crate) fn check_cancelled(cancel: Option<&AtomicBool>) -> Result<()> {
    match cancel {
        Some(flag) if flag.load(Ordering::Relaxed) => Err(Error::Cancelled),
        _ => Ok(()),
    }
}

/// Parse a `Retry-After` header value given in seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. Cancellation is checked before every attempt and
/// after every sleep.
pub async fn retry<T, F, Fut>(
    config: &BackoffConfig,
    cancel: Option<&AtomicBool>,
    mut on_retry: RetryCallback<'_>,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error: Option<Error> = None;

    for attempt in 0..=config.max_retries {
        check_cancelled(cancel)?;

        if attempt > 0 {
            let delay = config.delay_after(attempt, last_error.as_ref());
            let reason = last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, %reason, "retrying transport call");
            if let Some(ref mut cb) = on_retry {
                cb(attempt, delay, &reason);
            }
            tokio::time::sleep(delay).await;
            check_cancelled(cancel)?;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_retries && is_retryable(&e, config) => {
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Other("retry loop exited unexpectedly".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn fixed(max_retries: u32) -> BackoffConfig {
        BackoffConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(5),
            jitter: JitterStrategy::None,
            retryable_statuses: vec![429, 503],
            respect_retry_after: false,
        }
    }

    fn http(status: u16) -> Error {
        Error::HttpError {
            status,
            body: String::new(),
            retry_after: None,
        }
    }

    #[test]
    fn test_delay_exponential_and_capped() {
        let config = BackoffConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            ..fixed(10)
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_full_jitter_in_range() {
        let config = BackoffConfig::standard();
        for _ in 0..100 {
            assert!(config.delay_for_attempt(1) <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_retry_after_respected() {
        let config = BackoffConfig {
            respect_retry_after: true,
            ..fixed(3)
        };
        let err = Error::HttpError {
            status: 429,
            body: String::new(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(config.delay_after(1, Some(&err)), Duration::from_secs(7));
        assert_eq!(config.delay_after(1, None), Duration::from_millis(1));
    }

    #[test]
    fn test_is_retryable() {
        let config = BackoffConfig::standard();
        assert!(is_retryable(&http(429), &config));
        assert!(is_retryable(&http(503), &config));
        assert!(!is_retryable(&http(400), &config));
        assert!(!is_retryable(&Error::Cancelled, &config));
        assert!(!is_retryable(&Error::Other("x".into()), &config));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let mut retries = Vec::new();
        let mut on_retry = |attempt: u32, _d: Duration, _r: &str| retries.push(attempt);
        let result = retry(&fixed(3), None, Some(&mut on_retry), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(http(503))
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry(&fixed(3), None, None, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(http(400))
        })
        .await;
        assert!(matches!(result, Err(Error::HttpError { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry(&fixed(2), None, None, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(http(429))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_respects_cancellation() {
        let cancel = AtomicBool::new(true);
        let result: Result<()> = retry(&fixed(2), Some(&cancel), None, || async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
