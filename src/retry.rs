//! Retry logic with exponential backoff
//!
//! Transport failures are retried with a doubling wait; anything the error
//! classifies as permanent ends the loop at once. Every wait and every new
//! attempt is gated on a [`CancellationToken`], so a cancelled run never
//! starts fresh network work.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Why [`with_retry`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Cancellation was observed before the next attempt could start
    Cancelled {
        /// Attempts made before stopping
        attempts: u32,
    },
    /// Every attempt failed with a retryable error
    Exhausted {
        /// Attempts made, equal to the configured maximum
        attempts: u32,
        /// Error of the final attempt
        last: E,
    },
    /// A non-retryable error ended the loop
    Permanent(E),
}

/// Run `operation` until it succeeds, fails permanently, runs out of
/// attempts, or `cancel` fires.
///
/// A wait follows every retryable failure, the last one included, so three
/// failed attempts with the default policy wait 1, 2 and 4 seconds.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut delay = config.initial_delay;

    for attempt in 1..=config.max_attempts {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled {
                attempts: attempt - 1,
            });
        }

        let err = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(RetryError::Permanent(e)),
        };

        let wait = if config.jitter { add_jitter(delay) } else { delay };
        tracing::warn!(
            error = %err,
            attempt,
            max_attempts = config.max_attempts,
            delay_ms = wait.as_millis() as u64,
            "attempt failed, backing off"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            _ = tokio::time::sleep(wait) => {}
        }

        if attempt == config.max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        delay = next_delay(delay, config);
    }

    // Only reachable with `max_attempts == 0`, which `Config::validate` rejects.
    Err(RetryError::Cancelled { attempts: 0 })
}

fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay)
}

/// Stretch `delay` by a uniform factor in `[1, 2)`.
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..2.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
