//! Bounded retry with exponential backoff for a single lookup.
//!
//! A lookup moves through a small state machine:
//!
//! ```text
//! Attempt(n) --ok--------------------------------> done
//! Attempt(n) --retryable--> Backoff(n) --sleep--> Attempt(n + 1)
//!                                      \--------> Exhausted   (n + 1 == max)
//! Attempt(n) --fatal-----> Fatal
//! ```
//!
//! The backoff delay is `base_delay * 2^n` and is applied after every
//! retryable failure, including the last one, so a permanently
//! rate-limited coordinate costs `max_attempts` requests and
//! `base_delay * (2^max_attempts - 1)` of waiting.

use std::time::Duration;

use airviz_air_quality_models::AirQualityResponse;

use crate::{AirQualityError, AirQualityLookup};

/// Default number of attempts per coordinate (initial request included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default delay before the first retry; doubles on each attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// How many times to try a lookup and how long to back off in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Delay after the first retryable failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

/// State of a lookup between attempts.
#[derive(Debug)]
pub enum Step {
    /// Issue attempt `n` (zero-indexed).
    Attempt(u32),
    /// Attempt `attempt` hit a retryable error; sleep for `delay` first.
    Backoff {
        /// Attempt that just failed.
        attempt: u32,
        /// How long to wait.
        delay: Duration,
        /// The failure, surfaced if no attempts remain afterwards.
        error: AirQualityError,
    },
    /// Every attempt hit a retryable error.
    Exhausted(AirQualityError),
    /// A non-retryable error; stop immediately.
    Fatal(AirQualityError),
}

impl RetryPolicy {
    /// Returns the backoff delay after the zero-indexed `attempt` fails.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Transition taken when `attempt` fails with `error`.
    #[must_use]
    pub fn on_failure(&self, attempt: u32, error: AirQualityError) -> Step {
        if error.is_retryable() {
            Step::Backoff {
                attempt,
                delay: self.delay_for(attempt),
                error,
            }
        } else {
            Step::Fatal(error)
        }
    }

    /// Transition taken once the backoff after `attempt` has elapsed.
    #[must_use]
    pub fn after_backoff(&self, attempt: u32, error: AirQualityError) -> Step {
        if attempt + 1 < self.max_attempts.max(1) {
            Step::Attempt(attempt + 1)
        } else {
            Step::Exhausted(error)
        }
    }
}

/// Looks up `(latitude, longitude)`, retrying rate-limit and socket errors
/// according to `policy`.
///
/// # Errors
///
/// Returns the first fatal [`AirQualityError`], or the last retryable one
/// once all attempts are used up.
pub async fn lookup_with_retry<L>(
    lookup: &L,
    latitude: f64,
    longitude: f64,
    policy: RetryPolicy,
) -> Result<AirQualityResponse, AirQualityError>
where
    L: AirQualityLookup + ?Sized,
{
    let mut step = Step::Attempt(0);

    loop {
        step = match step {
            Step::Attempt(attempt) => {
                if attempt > 0 {
                    log::info!("Retry attempt {attempt} for ({latitude}, {longitude})");
                }
                match lookup.lookup(latitude, longitude).await {
                    Ok(response) => return Ok(response),
                    Err(e) => policy.on_failure(attempt, e),
                }
            }
            Step::Backoff {
                attempt,
                delay,
                error,
            } => {
                log::warn!(
                    "Rate limit or socket error on attempt {attempt} for ({latitude}, {longitude}): \
                     {error}. Backing off for {delay:?}"
                );
                tokio::time::sleep(delay).await;
                policy.after_backoff(attempt, error)
            }
            Step::Exhausted(error) => {
                log::error!(
                    "All {} attempts failed for ({latitude}, {longitude}): {error}",
                    policy.max_attempts.max(1)
                );
                return Err(error);
            }
            Step::Fatal(error) => {
                log::error!("Fetch error for ({latitude}, {longitude}): {error}");
                return Err(error);
            }
        };
    }
}
