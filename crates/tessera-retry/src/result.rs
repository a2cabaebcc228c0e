//! Retry verdicts and per-operation retry bookkeeping

use std::time::Duration;

use tokio::time::Instant;

use tessera_core::{DocumentError, StatusCode, SubStatusCode};

/// A policy's verdict on a failed attempt
#[derive(Debug, Clone)]
pub enum ShouldRetryResult {
    /// Retry after the given backoff (zero means immediately)
    Retry(Duration),
    /// The policy owns this failure and will not retry it
    NoRetry,
    /// Stop and surface this error instead of the original one
    Error(DocumentError),
    /// The policy has no opinion; the next policy decides
    NoRetryNonRelated,
}

impl ShouldRetryResult {
    pub fn retry_now() -> Self {
        ShouldRetryResult::Retry(Duration::ZERO)
    }

    pub fn retry_after(backoff: Duration) -> Self {
        ShouldRetryResult::Retry(backoff)
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, ShouldRetryResult::Retry(_))
    }

    pub fn is_no_retry(&self) -> bool {
        matches!(self, ShouldRetryResult::NoRetry)
    }

    pub fn is_non_related(&self) -> bool {
        matches!(self, ShouldRetryResult::NoRetryNonRelated)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ShouldRetryResult::Error(_))
    }

    /// Backoff of a `Retry` verdict
    pub fn backoff(&self) -> Option<Duration> {
        match self {
            ShouldRetryResult::Retry(backoff) => Some(*backoff),
            _ => None,
        }
    }

    /// Whether this verdict ends chain evaluation
    pub(crate) fn is_final(&self) -> bool {
        self.is_retry() || self.is_error()
    }
}

/// Per-operation retry record
///
/// Owned by one operation's policy chain and never shared.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    retry_count: u32,
    total_backoff: Duration,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
    failures: Vec<(StatusCode, SubStatusCode)>,
}

impl RetryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mark_started(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    pub(crate) fn mark_ended(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    pub(crate) fn record_failure(&mut self, status: StatusCode, sub_status: SubStatusCode) {
        self.failures.push((status, sub_status));
    }

    pub(crate) fn record_retry(&mut self, backoff: Duration) {
        self.retry_count += 1;
        self.total_backoff += backoff;
    }

    /// Retries scheduled so far
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Sum of all scheduled backoffs
    pub fn total_backoff(&self) -> Duration {
        self.total_backoff
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<Instant> {
        self.ended_at
    }

    /// Time from the first send to the end (or now, while running)
    pub fn elapsed(&self) -> Duration {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// `(status, sub_status)` of every failed attempt, in order
    pub fn failures(&self) -> &[(StatusCode, SubStatusCode)] {
        &self.failures
    }

    pub fn last_failure(&self) -> Option<(StatusCode, SubStatusCode)> {
        self.failures.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_helpers() {
        assert!(ShouldRetryResult::retry_now().is_retry());
        assert_eq!(
            ShouldRetryResult::retry_after(Duration::from_millis(5)).backoff(),
            Some(Duration::from_millis(5))
        );
        assert!(ShouldRetryResult::NoRetry.backoff().is_none());
        assert!(!ShouldRetryResult::NoRetry.is_final());
        assert!(!ShouldRetryResult::NoRetryNonRelated.is_final());
        assert!(ShouldRetryResult::Error(DocumentError::cancelled("x")).is_final());
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_bookkeeping() {
        let mut ctx = RetryContext::new();
        assert_eq!(ctx.elapsed(), Duration::ZERO);

        ctx.mark_started();
        ctx.record_failure(429, 3200);
        ctx.record_retry(Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(100)).await;
        ctx.record_failure(404, 1002);
        ctx.mark_ended();

        assert_eq!(ctx.retry_count(), 1);
        assert_eq!(ctx.total_backoff(), Duration::from_millis(100));
        assert_eq!(ctx.failures(), &[(429, 3200), (404, 1002)]);
        assert_eq!(ctx.last_failure(), Some((404, 1002)));
        assert_eq!(ctx.elapsed(), Duration::from_millis(100));
    }
}
