//! Status-based retry policy for API requests.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::ApiConfig;

/// Upper bound for a single backoff sleep.
pub const BACKOFF_MAX: Duration = Duration::from_secs(120);

/// Retries requests that come back with a transient status.
///
/// Connection errors and timeouts are never retried here; only a response
/// whose status is in `statuses` is.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff base. Delay before retry `n` is `0` for `n = 1`, then
    /// `factor * 2^(n-1)`.
    pub backoff_factor: Duration,
    pub statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: Duration::from_secs(1),
            statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    pub fn from_config(api: &ApiConfig) -> Self {
        Self {
            max_retries: api.max_retries,
            backoff_factor: Duration::from_secs_f64(api.backoff_factor_secs.max(0.0)),
            statuses: api.retry_statuses.clone(),
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }

    /// Whether a response with `status` after `retries_done` retries should
    /// be attempted again.
    pub fn should_retry(&self, status: u16, retries_done: u32) -> bool {
        retries_done < self.max_retries && self.is_retryable(status)
    }

    /// Sleep before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return Duration::ZERO;
        }
        let multiplier = 1u32 << (retry - 1).min(16);
        self.backoff_factor
            .saturating_mul(multiplier)
            .min(BACKOFF_MAX)
    }

    /// Like [`delay`](Self::delay), but never shorter than a server
    /// `Retry-After`.
    pub fn delay_with_hint(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.delay(retry);
        match retry_after {
            Some(hint) => delay.max(hint).min(BACKOFF_MAX),
            None => delay,
        }
    }
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::ZERO);
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(30), BACKOFF_MAX);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(503, 0));
        assert!(policy.should_retry(429, 2));
        assert!(!policy.should_retry(503, 3));
        assert!(!policy.should_retry(400, 0));
        assert!(!policy.should_retry(404, 0));
    }

    #[test]
    fn test_none_never_retries() {
        let policy = RetryPolicy::none();
        assert!(!policy.should_retry(500, 0));
    }

    #[test]
    fn test_fractional_factor() {
        let policy = RetryPolicy {
            backoff_factor: Duration::from_millis(500),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(2), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(2));
    }

    #[test]
    fn test_retry_after_extends_short_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        // Backoff already longer than the hint.
        assert_eq!(
            policy.delay_with_hint(3, Some(Duration::from_secs(1))),
            Duration::from_secs(4)
        );
        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_secs(3600))),
            BACKOFF_MAX
        );
        assert_eq!(policy.delay_with_hint(2, None), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_retry_after() {
        let now = DateTime::parse_from_rfc2822("Tue, 15 Nov 1994 08:12:31 GMT")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_retry_after("7", now), Some(Duration::from_secs(7)));
        assert_eq!(
            parse_retry_after("Tue, 15 Nov 1994 08:12:41 GMT", now),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            parse_retry_after("Tue, 15 Nov 1994 08:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }
}
