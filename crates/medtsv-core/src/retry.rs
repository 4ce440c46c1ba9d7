//! Bounded retry with exponential backoff for fetch attempts

use std::time::Duration;

use crate::observe::{Event, Observer};
use crate::shutdown::is_shutdown_requested;
use crate::stream::StreamError;

/// How many times to try a target and how long to wait in between.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff before attempt `n` is `backoff_unit * 2^n`
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// Exponential backoff: `unit * 2^attempt` (4s before attempt 2, 8s before 3, ...)
pub fn backoff_duration(unit: Duration, attempt: u32) -> Duration {
    unit.saturating_mul(2u32.saturating_pow(attempt))
}

/// Final result of a retried operation plus the number of attempts made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, StreamError>,
    pub attempts: u32,
}

/// Retry a fallible fetch with exponential backoff.
///
/// `attempt_fn` receives the 1-based attempt number and must start from a
/// clean state every time. Retries only errors that are
/// [`retryable`](StreamError::is_retryable), at most `max_attempts` in total,
/// and stops early once shutdown was requested.
pub fn retry_with_backoff<T>(
    label: &str,
    policy: &RetryPolicy,
    observer: &dyn Observer,
    mut attempt_fn: impl FnMut(u32) -> Result<T, StreamError>,
) -> Attempted<T> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        observer.event(&Event::AttemptStarted {
            label,
            attempt,
            max_attempts,
        });
        let err = match attempt_fn(attempt) {
            Ok(v) => {
                return Attempted {
                    result: Ok(v),
                    attempts: attempt,
                };
            }
            Err(e) => e,
        };

        let message = err.to_string();
        observer.event(&Event::AttemptFailed {
            label,
            attempt,
            error: &message,
        });

        if attempt < max_attempts && err.is_retryable() && !is_shutdown_requested() {
            attempt += 1;
            let delay = backoff_duration(policy.backoff_unit, attempt);
            observer.event(&Event::RetryScheduled {
                label,
                next_attempt: attempt,
                delay,
            });
            std::thread::sleep(delay);
        } else {
            observer.event(&Event::TargetFailed {
                label,
                attempts: attempt,
                error: &message,
            });
            return Attempted {
                result: Err(err),
                attempts: attempt,
            };
        }
    }
}
