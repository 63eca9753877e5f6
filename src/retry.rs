//! Retry with exponential backoff for transient transport failures
//!
//! Only the download path retries. Archive work is local and a failure there
//! is final.
//!
//! # Example
//!
//! ```no_run
//! use archive_tasks::config::RetryConfig;
//! use archive_tasks::retry::{IsRetryable, with_retry};
//!
//! #[derive(Debug)]
//! enum FetchError {
//!     Busy,
//!     Gone,
//! }
//!
//! impl std::fmt::Display for FetchError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for FetchError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, FetchError::Busy)
//!     }
//! }
//!
//! # async fn example() -> Result<(), FetchError> {
//! let body = with_retry(&RetryConfig::default(), || async {
//!     Ok::<_, FetchError>(vec![0u8; 4])
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Classifies errors as transient (worth another attempt) or permanent
pub trait IsRetryable {
    /// True if the operation may succeed when tried again
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // server errors plus 408 and 429 are transient
            Error::Transport {
                status: Some(status),
                ..
            } => *status >= 500 || *status == 429 || *status == 408,
            Error::Transport { status: None, .. } => false,
            Error::NoAdapterFound { .. }
            | Error::UnknownFormat(_)
            | Error::SourceInaccessible { .. }
            | Error::Archive { .. }
            | Error::NotFound(_)
            | Error::TaskFailed { .. }
            | Error::InvalidTransition { .. }
            | Error::Config { .. }
            | Error::ShuttingDown
            | Error::Serialization(_)
            | Error::Other(_) => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out
///
/// Makes at most `1 + config.max_attempts` calls. The delay starts at
/// `initial_delay`, is multiplied by `backoff_multiplier` after each retry and
/// capped at `max_delay`. With `jitter` on, each sleep is stretched by a random
/// factor in `[1, 2]`.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;
                let sleep_for = if config.jitter { add_jitter(delay) } else { delay };

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = sleep_for.as_millis() as u64,
                    "transient failure, retrying"
                );

                tokio::time::sleep(sleep_for).await;
                delay = next_delay(delay, config);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(error = %e, attempts = attempt + 1, "retry attempts exhausted");
                } else {
                    tracing::debug!(error = %e, "permanent failure, not retrying");
                }
                return Err(e);
            }
        }
    }
}

/// Grow `delay` by the backoff multiplier, saturating at `max_delay`
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + factor)).unwrap_or(Duration::MAX)
}
