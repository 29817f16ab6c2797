//! Timeout/retry harness
//!
//! Wraps fetches in a hard deadline and classifies their outcomes. Only
//! genuine failures (timeout, error) qualify for retry scheduling; transient
//! store inaccessibility is downgraded to "nothing to report yet".

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::PipelineError;

/// Classified outcome of one deadline-wrapped fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    Empty,
    Timeout,
    Error,
    Cancelled,
}

impl FetchOutcome {
    /// Outcomes that count against a retry budget.
    pub fn is_failure(&self) -> bool {
        matches!(self, FetchOutcome::Timeout | FetchOutcome::Error)
    }
}

/// Run `fut` with a hard deadline.
///
/// On expiry the in-flight operation is dropped and `Ok(None)` is returned;
/// any error from the operation itself propagates unchanged.
pub async fn run_with_deadline<T, F>(limit: Duration, fut: F) -> Result<Option<T>, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(Some(value)),
        Ok(Err(err)) => Err(err),
        Err(_) => Ok(None),
    }
}

/// Map a deadline-wrapped batch fetch to an outcome plus whatever was
/// fetched. A transiently-inaccessible store (e.g. device locked) classifies
/// as `Empty`, not `Error`, so it never burns retry budget.
pub fn classify_fetch<T>(
    result: Result<Option<Vec<T>>, PipelineError>,
) -> (FetchOutcome, Vec<T>) {
    match result {
        Ok(Some(items)) => {
            if items.is_empty() {
                (FetchOutcome::Empty, items)
            } else {
                (FetchOutcome::Success, items)
            }
        }
        Ok(None) => (FetchOutcome::Timeout, Vec::new()),
        Err(PipelineError::Cancelled) => (FetchOutcome::Cancelled, Vec::new()),
        Err(err) if err.is_transient() => (FetchOutcome::Empty, Vec::new()),
        Err(_) => (FetchOutcome::Error, Vec::new()),
    }
}

/// One scheduled retry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Delay before this attempt (`base * 2^(attempt-1)`).
    pub delay: Duration,
    /// Fetch timeout for this attempt, growing with the attempt number.
    pub timeout: Duration,
}

/// Exponential-backoff schedule with attempt and total-elapsed caps.
#[derive(Debug)]
pub struct RetrySchedule {
    base_delay: Duration,
    base_timeout: Duration,
    timeout_cap: Duration,
    max_attempts: u32,
    max_elapsed: Duration,
    attempt: u32,
    started: Instant,
}

impl RetrySchedule {
    pub fn new(
        base_delay: Duration,
        base_timeout: Duration,
        timeout_cap: Duration,
        max_attempts: u32,
        max_elapsed: Duration,
    ) -> Self {
        Self {
            base_delay,
            base_timeout,
            timeout_cap,
            max_attempts,
            max_elapsed,
            attempt: 0,
            started: Instant::now(),
        }
    }

    /// Next attempt, or `None` once either the attempt cap or the total
    /// elapsed-time cap is hit. The caller sleeps `delay` before retrying.
    pub fn next(&mut self) -> Option<RetryAttempt> {
        if self.started.elapsed() > self.max_elapsed {
            return None;
        }
        self.attempt += 1;
        if self.attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32 << (self.attempt - 1);
        let delay = self.base_delay * factor;
        let timeout = (self.base_timeout * factor).min(self.timeout_cap);
        Some(RetryAttempt {
            attempt: self.attempt,
            delay,
            timeout,
        })
    }
}
