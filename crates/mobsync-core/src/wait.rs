//! Polling wait engine.
//!
//! A [`Waiter`] evaluates a predicate repeatedly, pausing a fixed poll
//! interval between attempts, until the predicate yields a value or the
//! deadline passes. Two flavors exist:
//!
//! - [`Waiter::until`] is *strict*: hitting the deadline is a
//!   [`WaitError::Timeout`].
//! - [`Waiter::until_soft`] is *soft*: hitting the deadline returns `false`.
//!
//! Predicates return `Result<Option<T>, DriverError>`. `Ok(Some(v))` ends the
//! wait; `Ok(None)` and `Err(_)` both mean "not yet" (errors are logged at
//! debug level and retried, since lookups routinely fail while a screen is
//! still rendering).
//!
//! Pauses between attempts race a [`CancellationToken`], so a wait can be cut
//! short from another task without changing the public contract.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use mobsync_core::wait::Waiter;
//!
//! # async fn example() {
//! let waiter = Waiter::default();
//! let mut polls = 0;
//! let value = waiter
//!     .until(Duration::from_secs(2), || {
//!         polls += 1;
//!         let ready = polls >= 3;
//!         async move { Ok(ready.then_some("ready")) }
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(value, "ready");
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::driver::DriverError;

/// Default deadline for element waits.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause between predicate evaluations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Errors produced by a strict wait.
#[derive(Error, Debug)]
pub enum WaitError {
    /// The deadline passed before the predicate was satisfied.
    #[error(
        "timed out after {}ms ({} attempts){}",
        .elapsed.as_millis(),
        .attempts,
        last_error_suffix(.last_error)
    )]
    Timeout {
        elapsed: Duration,
        attempts: u32,
        /// The error from the final failing evaluation, if it failed.
        last_error: Option<String>,
    },

    /// The wait was cancelled through its token.
    #[error("wait cancelled after {}ms", .elapsed.as_millis())]
    Cancelled { elapsed: Duration },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(", last error: {e}"),
        None => String::new(),
    }
}

/// Timeout and poll interval of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Outcome of one polling loop, before it is mapped to the strict or soft
/// flavor.
enum Outcome<T> {
    Satisfied(T),
    TimedOut {
        elapsed: Duration,
        attempts: u32,
        last_error: Option<String>,
    },
    Cancelled(Duration),
}

/// Polls predicates until they succeed or a deadline elapses.
#[derive(Debug, Clone)]
pub struct Waiter {
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Waiter {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Token that cancels every wait running on this waiter (and its clones).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Strict wait: returns the predicate's value, or [`WaitError::Timeout`]
    /// once `timeout` has elapsed.
    pub async fn until<T, F, Fut>(&self, timeout: Duration, predicate: F) -> Result<T, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, DriverError>>,
    {
        match self.poll(timeout, predicate).await {
            Outcome::Satisfied(v) => Ok(v),
            Outcome::TimedOut {
                elapsed,
                attempts,
                last_error,
            } => Err(WaitError::Timeout {
                elapsed,
                attempts,
                last_error,
            }),
            Outcome::Cancelled(elapsed) => Err(WaitError::Cancelled { elapsed }),
        }
    }

    /// Strict wait over a boolean predicate.
    pub async fn until_true<F, Fut>(&self, timeout: Duration, mut predicate: F) -> Result<(), WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, DriverError>>,
    {
        self.until(timeout, || {
            let fut = predicate();
            async move { fut.await.map(|ok| ok.then_some(())) }
        })
        .await
    }

    /// Soft wait: `true` once the predicate holds, `false` when `timeout`
    /// elapses or the wait is cancelled. Never errors.
    pub async fn until_soft<F, Fut>(&self, timeout: Duration, mut predicate: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, DriverError>>,
    {
        let outcome = self
            .poll(timeout, || {
                let fut = predicate();
                async move { fut.await.map(|ok| ok.then_some(())) }
            })
            .await;
        match outcome {
            Outcome::Satisfied(()) => true,
            Outcome::TimedOut {
                elapsed, attempts, ..
            } => {
                debug!(elapsed_ms = elapsed.as_millis() as u64, attempts, "soft wait timed out");
                false
            }
            Outcome::Cancelled(_) => false,
        }
    }

    async fn poll<T, F, Fut>(&self, timeout: Duration, mut predicate: F) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, DriverError>>,
    {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let last_error = match predicate().await {
                Ok(Some(value)) => {
                    trace!(attempts, elapsed_ms = start.elapsed().as_millis() as u64, "wait satisfied");
                    return Outcome::Satisfied(value);
                }
                Ok(None) => None,
                Err(e) => {
                    debug!(attempts, error = %e, "predicate failed, retrying");
                    Some(e.to_string())
                }
            };

            let now = Instant::now();
            if now >= deadline {
                return Outcome::TimedOut {
                    elapsed: now - start,
                    attempts,
                    last_error,
                };
            }

            let pause = self.poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Outcome::Cancelled(start.elapsed());
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
