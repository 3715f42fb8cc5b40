// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Polling a condition until it holds, times out, or a fail-fast check trips.

use crate::error::{ProvisionError, Result};
use crate::waiter::FailFast;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, trace, warn, Level};

/// Why a wait stopped before its condition held
#[derive(Debug)]
pub enum AbortReason {
    /// The fail-fast check reported a cluster-side failure
    FailFast(String),
    /// The predicate returned a non-transient error
    Fatal(ProvisionError),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::FailFast(event) => write!(f, "{}", event),
            AbortReason::Fatal(e) => write!(f, "{}", e),
        }
    }
}

/// Result of [`Waiter::wait`]
#[must_use]
#[derive(Debug)]
pub enum WaitOutcome {
    Success,
    Timeout {
        /// Last transient error the predicate returned, if any
        last_observed: Option<String>,
    },
    Aborted(AbortReason),
}

impl WaitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WaitOutcome::Success)
    }

    /// Convert into a classified error for `namespace/resource`.
    ///
    /// Fatal predicate errors are surfaced unchanged.
    pub fn into_result(self, resource: &str, namespace: &str, waited_for: &str) -> Result<()> {
        match self {
            WaitOutcome::Success => Ok(()),
            WaitOutcome::Timeout { last_observed } => Err(ProvisionError::WaitTimeout {
                resource: resource.to_string(),
                namespace: namespace.to_string(),
                waited_for: waited_for.to_string(),
                last_observed,
            }),
            WaitOutcome::Aborted(AbortReason::FailFast(event)) => Err(ProvisionError::WaitAborted {
                resource: resource.to_string(),
                namespace: namespace.to_string(),
                waited_for: waited_for.to_string(),
                event,
            }),
            WaitOutcome::Aborted(AbortReason::Fatal(e)) => Err(e),
        }
    }
}

type Hook<'a> = Box<dyn FnOnce() + Send + 'a>;

/// Polls a predicate at a fixed (or backing-off) interval.
///
/// ```ignore
/// let outcome = Waiter::new("csv to succeed")
///     .timeout(Duration::from_secs(300))
///     .interval(Duration::from_secs(2))
///     .fail_fast(&check)
///     .wait(|| async { Ok(csv_succeeded().await?) })
///     .await;
/// ```
pub struct Waiter<'a> {
    reason: String,
    timeout: Duration,
    interval: Duration,
    max_interval: Option<Duration>,
    level: Level,
    fail_fast: Option<&'a dyn FailFast>,
    on_success: Option<Hook<'a>>,
    on_failure: Option<Hook<'a>>,
    on_timeout: Option<Hook<'a>>,
}

impl<'a> Waiter<'a> {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(1),
            max_interval: None,
            level: Level::INFO,
            fail_fast: None,
            on_success: None,
            on_failure: None,
            on_timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Double the poll interval after every unsatisfied tick, up to `max`
    pub fn backoff(mut self, max: Duration) -> Self {
        self.max_interval = Some(max);
        self
    }

    /// Severity used when logging the outcome
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn fail_fast(mut self, check: &'a dyn FailFast) -> Self {
        self.fail_fast = Some(check);
        self
    }

    pub fn maybe_fail_fast(mut self, check: Option<&'a dyn FailFast>) -> Self {
        self.fail_fast = check;
        self
    }

    pub fn on_success(mut self, hook: impl FnOnce() + Send + 'a) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    /// Runs when the wait is aborted
    pub fn on_failure(mut self, hook: impl FnOnce() + Send + 'a) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    pub fn on_timeout(mut self, hook: impl FnOnce() + Send + 'a) -> Self {
        self.on_timeout = Some(Box::new(hook));
        self
    }

    /// Poll `predicate` until it yields `true`, the timeout elapses, or the wait aborts.
    ///
    /// The fail-fast check runs before the predicate on every tick. Predicate errors for
    /// which [`ProvisionError::is_transient`] holds count as "not yet"; others abort.
    pub async fn wait<F, Fut>(mut self, mut predicate: F) -> WaitOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let start = Instant::now();
        let mut interval = self.interval;
        let mut last_observed = None;
        let mut polls: u32 = 0;

        let outcome = loop {
            if let Some(check) = self.fail_fast {
                if let Some(event) = check.failure().await {
                    break WaitOutcome::Aborted(AbortReason::FailFast(event));
                }
            }

            polls += 1;
            match predicate().await {
                Ok(true) => break WaitOutcome::Success,
                Ok(false) => trace!("Condition '{}' not met after {} polls", self.reason, polls),
                Err(e) if e.is_transient() => {
                    debug!("Transient error while waiting for {}: {}", self.reason, e);
                    last_observed = Some(e.to_string());
                }
                Err(e) => break WaitOutcome::Aborted(AbortReason::Fatal(e)),
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                break WaitOutcome::Timeout { last_observed };
            }

            sleep(interval.min(self.timeout - elapsed)).await;
            if let Some(max) = self.max_interval {
                interval = (interval * 2).min(max);
            }
        };

        self.report(&outcome, start.elapsed());
        outcome
    }

    fn report(&mut self, outcome: &WaitOutcome, elapsed: Duration) {
        let (message, hook) = match outcome {
            WaitOutcome::Success => (
                format!("Condition '{}' met after {:?}", self.reason, elapsed),
                self.on_success.take(),
            ),
            WaitOutcome::Timeout { .. } => (
                format!("Timed out after {:?} waiting for {}", elapsed, self.reason),
                self.on_timeout.take(),
            ),
            WaitOutcome::Aborted(reason) => (
                format!("Aborted waiting for {}: {}", self.reason, reason),
                self.on_failure.take(),
            ),
        };

        if self.level == Level::ERROR {
            error!("{}", message);
        } else if self.level == Level::WARN {
            warn!("{}", message);
        } else if self.level == Level::INFO {
            info!("{}", message);
        } else if self.level == Level::DEBUG {
            debug!("{}", message);
        } else {
            trace!("{}", message);
        }

        if let Some(hook) = hook {
            hook();
        }
    }
}
