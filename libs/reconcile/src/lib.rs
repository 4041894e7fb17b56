//! Reconciliation loop primitives.
//!
//! This library provides helpers for operations that converge on state
//! observed from an external control plane. Key concepts:
//!
//! - **Probe**: a read of current state that either yields the awaited value
//!   or reports "not yet".
//! - **Retry policy**: how often to probe and when, if ever, to give up.
//! - **Bounded batch**: a set of independent requests issued with a cap on
//!   how many are in flight at once.
//!
//! # Invariants
//!
//! - A probe error aborts polling immediately; only "not yet" is retried
//! - The default policy never gives up
//! - A bounded batch never has more than `limit` requests in flight

use std::future::Future;
use std::time::Duration;

use futures_util::stream::{self, TryStreamExt};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Reconciliation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Gave up waiting for convergence.
    #[error("timeout after {elapsed:?} ({attempts} attempts) waiting for {resource}")]
    Timeout {
        resource: String,
        elapsed: Duration,
        attempts: u32,
    },
}

/// Poll policy for convergence loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleep between probes.
    pub interval: Duration,

    /// Give up after this many probes.
    pub max_attempts: Option<u32>,

    /// Give up once this much time has passed since the first probe.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(DEFAULT_POLL_INTERVAL)
    }
}

impl RetryPolicy {
    /// Probe forever at a fixed interval.
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            deadline: None,
        }
    }

    /// Limit the number of probes.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Limit the total time spent polling.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns true if the policy never gives up.
    pub fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none() && self.deadline.is_none()
    }

    /// Probe until it yields a value.
    ///
    /// `probe` returns `Ok(Some(value))` once converged, `Ok(None)` to keep
    /// waiting, or an error which is returned as-is. Exhausting the policy
    /// returns [`ReconcileError::Timeout`] converted into the caller's error.
    pub async fn poll_until<T, E, F, Fut>(&self, resource: &str, mut probe: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: From<ReconcileError>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if let Some(value) = probe().await? {
                return Ok(value);
            }

            let elapsed = started.elapsed();
            let out_of_attempts = self.max_attempts.is_some_and(|max| attempts >= max);
            let out_of_time = self
                .deadline
                .is_some_and(|deadline| elapsed + self.interval > deadline);
            if out_of_attempts || out_of_time {
                return Err(ReconcileError::Timeout {
                    resource: resource.to_string(),
                    elapsed,
                    attempts,
                }
                .into());
            }

            debug!(
                resource,
                attempts,
                interval_ms = self.interval.as_millis() as u64,
                "Not converged yet, sleeping"
            );
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Run `op` for every item with at most `limit` invocations in flight.
///
/// Stops at the first error; requests already in flight are dropped.
pub async fn for_each_bounded<I, T, E, F, Fut>(items: I, limit: usize, op: F) -> Result<(), E>
where
    I: IntoIterator<Item = T>,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    stream::iter(items.into_iter().map(Ok))
        .try_for_each_concurrent(limit.max(1), op)
        .await
}

/// Default interval between convergence probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default cap on concurrent control-plane requests in a batch.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 3;
