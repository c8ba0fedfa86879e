//! Backoff policy and the loop that applies it (used both by a segment
//! worker retrying one range request and, with its own policy instance, by
//! the execution layer retrying a whole failed attempt).

use std::time::Duration;

use super::classify;
use super::error::SegmentError;

/// High-level classification of an error for retry purposes. Stays generic
/// so callers can map curl errors, HTTP status codes, or IO failures into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read).
    Timeout,
    /// Server asked us to slow down (e.g. 429, 503).
    Throttled,
    /// Network-level failure (connection reset, DNS, etc.).
    Connection,
    /// HTTP status that's retryable but not strictly throttling (5xx).
    Http5xx(u16),
    /// Anything else — not retried.
    Other,
}

/// Decision returned by [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Exponential backoff with a cap, driven by `config.retry`'s
/// `retry_count`/`retry_delay_ms` (§6 `retryCount`/`retryDelayMs`).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_millis(250), max_delay: Duration::from_secs(30) }
    }
}

impl RetryPolicy {
    /// `attempt` is 1-based (1 = first attempt). `RetryDecision::NoRetry`
    /// once `max_attempts` is reached or `kind` isn't retryable at all.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        match kind {
            ErrorKind::Other => RetryDecision::NoRetry,
            ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::Throttled | ErrorKind::Http5xx(_) => {
                let exp = 1u32 << attempt.saturating_sub(1).min(8);
                let delay = self.base_delay.saturating_mul(exp).min(self.max_delay);
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

/// Runs `f` until it succeeds or `policy` says to stop, sleeping for the
/// backoff duration between attempts.
pub fn run_with_retry<F>(policy: &RetryPolicy, mut f: F) -> Result<(), SegmentError>
where
    F: FnMut() -> Result<(), SegmentError>,
{
    let mut attempt = 1u32;
    loop {
        match f() {
            Ok(()) => return Ok(()),
            Err(e) => match policy.decide(attempt, classify::classify(&e)) {
                RetryDecision::NoRetry => return Err(e),
                RetryDecision::RetryAfter(d) => {
                    std::thread::sleep(d);
                    attempt += 1;
                }
            },
        }
    }
}
