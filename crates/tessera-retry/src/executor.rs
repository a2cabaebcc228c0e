//! Retry execution engine
//!
//! The executor drives one logical operation: it sends attempts, asks the
//! operation's [`RetryPolicyChain`] what to do about each failure, sleeps the
//! backoff the chain chose, and enforces the end-to-end timeout and caller
//! cancellation. It can also hedge a read against an alternate attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tessera_core::diagnostics::{emit, DiagnosticEvent, DiagnosticKind, DiagnosticsSink, NoOpSink};
use tessera_core::{DocumentError, RequestContext};

use crate::chain::RetryPolicyChain;
use crate::observer::{NoOpObserver, RetryObserver};
use crate::result::ShouldRetryResult;

/// Builder for configuring a [`RetryExecutor`]
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tessera_retry::{RetryExecutorBuilder, TracingObserver};
///
/// let executor = RetryExecutorBuilder::new()
///     .with_observer(TracingObserver::new("read-item"))
///     .with_end_to_end_timeout(Some(Duration::from_secs(5)))
///     .build();
/// ```
pub struct RetryExecutorBuilder<O = NoOpObserver> {
    observer: O,
    end_to_end_timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl Default for RetryExecutorBuilder<NoOpObserver> {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutorBuilder<NoOpObserver> {
    pub fn new() -> Self {
        Self {
            observer: NoOpObserver,
            end_to_end_timeout: None,
            cancellation: None,
            diagnostics: Arc::new(NoOpSink),
        }
    }
}

impl<O> RetryExecutorBuilder<O> {
    /// Set the observer
    pub fn with_observer<O2>(self, observer: O2) -> RetryExecutorBuilder<O2> {
        RetryExecutorBuilder {
            observer,
            end_to_end_timeout: self.end_to_end_timeout,
            cancellation: self.cancellation,
            diagnostics: self.diagnostics,
        }
    }

    /// Bound the whole operation, backoffs included
    pub fn with_end_to_end_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.end_to_end_timeout = timeout;
        self
    }

    /// Stop retrying once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    pub fn build(self) -> RetryExecutor<O> {
        RetryExecutor {
            observer: self.observer,
            end_to_end_timeout: self.end_to_end_timeout,
            cancellation: self.cancellation,
            diagnostics: self.diagnostics,
        }
    }
}

/// Runs operations under a retry policy chain
///
/// Use [`RetryExecutorBuilder`] to create an instance.
pub struct RetryExecutor<O = NoOpObserver> {
    observer: O,
    end_to_end_timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

enum Interrupt {
    Timeout(Duration),
    Cancelled,
}

/// What the attempt loop has done so far, readable after it is dropped
#[derive(Default)]
struct Progress {
    attempts: u32,
    last_error: Option<DocumentError>,
}

impl<O> RetryExecutor<O>
where
    O: RetryObserver,
{
    /// Execute an operation under `chain`
    ///
    /// `op` receives a snapshot of `request` taken after the chain adjusted it
    /// for the attempt. Returns the first success, the original failure once
    /// the chain stops retrying, or the error a policy chose to surface. When
    /// the end-to-end timeout elapses or the cancellation token fires, the
    /// result is a `Cancelled` error describing the last failure seen.
    pub async fn execute<F, Fut, T>(
        &self,
        chain: &mut RetryPolicyChain,
        request: &mut RequestContext,
        op: F,
    ) -> Result<T, DocumentError>
    where
        F: FnMut(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, DocumentError>>,
    {
        let activity_id = request.activity_id;
        let mut progress = Progress::default();

        let outcome = {
            let run = self.run(chain, request, op, &mut progress);
            tokio::select! {
                result = run => Ok(result),
                interrupt = self.interrupted() => Err(interrupt),
            }
        };
        chain.mark_ended();

        match outcome {
            Ok(result) => result,
            Err(interrupt) => Err(self.interrupted_error(activity_id, interrupt, &progress)),
        }
    }

    /// Execute `primary` under `chain`, hedging with `alternate` if it has not
    /// completed within `min_delay`
    ///
    /// The first success wins and the other branch is dropped. When both
    /// fail, the primary's error is returned unless it is less specific than
    /// the alternate's. One end-to-end deadline covers both branches: when it
    /// passes, both are dropped and the result is `Cancelled`.
    pub async fn execute_with_hedging<F, Fut, A, AFut, T>(
        &self,
        chain: &mut RetryPolicyChain,
        request: &mut RequestContext,
        primary: F,
        alternate: A,
        min_delay: Duration,
    ) -> Result<T, DocumentError>
    where
        F: FnMut(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, DocumentError>>,
        A: FnOnce() -> AFut,
        AFut: Future<Output = Result<T, DocumentError>>,
    {
        let activity_id = request.activity_id;
        let mut progress = Progress::default();

        let outcome = {
            let race = self.hedge(chain, request, primary, alternate, min_delay, &mut progress);
            tokio::select! {
                result = race => Ok(result),
                interrupt = self.interrupted() => Err(interrupt),
            }
        };
        chain.mark_ended();

        match outcome {
            Ok(result) => result,
            Err(interrupt) => Err(self.interrupted_error(activity_id, interrupt, &progress)),
        }
    }

    async fn hedge<F, Fut, A, AFut, T>(
        &self,
        chain: &mut RetryPolicyChain,
        request: &mut RequestContext,
        primary: F,
        alternate: A,
        min_delay: Duration,
        progress: &mut Progress,
    ) -> Result<T, DocumentError>
    where
        F: FnMut(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, DocumentError>>,
        A: FnOnce() -> AFut,
        AFut: Future<Output = Result<T, DocumentError>>,
    {
        let activity_id = request.activity_id;
        let primary_fut = self.run(chain, request, primary, progress);
        tokio::pin!(primary_fut);

        let head_start = tokio::time::sleep(min_delay);
        tokio::pin!(head_start);

        tokio::select! {
            biased;
            result = &mut primary_fut => return result,
            _ = &mut head_start => {}
        }

        self.record(
            activity_id,
            DiagnosticKind::HedgeStarted {
                delay_ms: min_delay.as_millis() as u64,
            },
        );
        tracing::debug!(
            activity_id = %activity_id,
            delay_ms = min_delay.as_millis() as u64,
            "starting hedged attempt"
        );

        let alternate_fut = alternate();
        tokio::pin!(alternate_fut);

        let mut primary_error: Option<DocumentError> = None;
        let mut alternate_error: Option<DocumentError> = None;

        loop {
            tokio::select! {
                result = &mut primary_fut, if primary_error.is_none() => match result {
                    Ok(value) => {
                        self.record(activity_id, DiagnosticKind::HedgeCompleted { alternate_won: false });
                        return Ok(value);
                    }
                    Err(err) => primary_error = Some(err),
                },
                result = &mut alternate_fut, if alternate_error.is_none() => match result {
                    Ok(value) => {
                        self.record(activity_id, DiagnosticKind::HedgeCompleted { alternate_won: true });
                        return Ok(value);
                    }
                    Err(err) => alternate_error = Some(err),
                },
            }

            if let (Some(primary), Some(alternate)) = (&primary_error, &alternate_error) {
                return Err(prefer_error(primary.clone(), alternate.clone()));
            }
        }
    }

    async fn run<F, Fut, T>(
        &self,
        chain: &mut RetryPolicyChain,
        request: &mut RequestContext,
        mut op: F,
        progress: &mut Progress,
    ) -> Result<T, DocumentError>
    where
        F: FnMut(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, DocumentError>>,
    {
        let start = Instant::now();

        loop {
            progress.attempts += 1;
            let attempt = progress.attempts;
            chain.on_before_send(request);
            self.observer.on_attempt_start(attempt);

            let err = match op(request.clone()).await {
                Ok(value) => {
                    self.observer.on_success(attempt, start.elapsed());
                    return Ok(value);
                }
                Err(err) => err,
            };

            self.record(
                request.activity_id,
                DiagnosticKind::AttemptFailed {
                    attempt,
                    status: err.status(),
                    sub_status: err.sub_status(),
                    region: err
                        .region()
                        .map(str::to_string)
                        .or_else(|| request.target_region.clone()),
                },
            );
            progress.last_error = Some(err.clone());

            match chain.should_retry(&err).await {
                ShouldRetryResult::Retry(delay) => {
                    self.observer.on_attempt_failed(attempt, &err, delay);
                    self.record(
                        request.activity_id,
                        DiagnosticKind::RetryScheduled {
                            attempt,
                            policy: chain.last_decider().unwrap_or("unknown").to_string(),
                            delay_ms: delay.as_millis() as u64,
                        },
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                ShouldRetryResult::NoRetry => {
                    self.observer.on_exhausted(attempt, &err);
                    self.record(
                        request.activity_id,
                        DiagnosticKind::GaveUp {
                            attempts: attempt,
                            status: err.status(),
                            sub_status: err.sub_status(),
                        },
                    );
                    return Err(err);
                }
                ShouldRetryResult::NoRetryNonRelated => {
                    self.observer.on_not_retried(attempt, &err);
                    return Err(err);
                }
                ShouldRetryResult::Error(surfaced) => {
                    self.observer.on_exhausted(attempt, &surfaced);
                    self.record(
                        request.activity_id,
                        DiagnosticKind::GaveUp {
                            attempts: attempt,
                            status: surfaced.status(),
                            sub_status: surfaced.sub_status(),
                        },
                    );
                    return Err(surfaced);
                }
            }
        }
    }

    async fn interrupted(&self) -> Interrupt {
        let deadline = async {
            match self.end_to_end_timeout {
                Some(timeout) => {
                    tokio::time::sleep(timeout).await;
                    timeout
                }
                None => std::future::pending().await,
            }
        };
        let cancelled = async {
            match &self.cancellation {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            timeout = deadline => Interrupt::Timeout(timeout),
            _ = cancelled => Interrupt::Cancelled,
        }
    }

    /// Build the `Cancelled` error for an interrupted operation
    fn interrupted_error(
        &self,
        activity_id: Uuid,
        interrupt: Interrupt,
        progress: &Progress,
    ) -> DocumentError {
        let attempts = progress.attempts;
        self.record(activity_id, DiagnosticKind::OperationCancelled { attempts });

        let reason = match interrupt {
            Interrupt::Timeout(timeout) => {
                format!("end-to-end timeout of {}ms elapsed", timeout.as_millis())
            }
            Interrupt::Cancelled => "operation cancelled".to_string(),
        };
        let message = match &progress.last_error {
            Some(err) => format!(
                "{} after {} attempt(s); last failure: {}",
                reason, attempts, err
            ),
            None => format!("{} during attempt {}", reason, attempts),
        };
        let last: Option<&dyn std::error::Error> = progress
            .last_error
            .as_ref()
            .map(|e| e as &dyn std::error::Error);
        self.observer.on_cancelled(attempts, last);
        tracing::warn!(activity_id = %activity_id, "{}", message);
        DocumentError::cancelled(message)
    }

    fn record(&self, activity_id: Uuid, kind: DiagnosticKind) {
        emit(
            self.diagnostics.as_ref(),
            DiagnosticEvent::for_activity(activity_id, kind),
        );
    }
}

/// Pick the error to surface when both hedged branches failed
fn prefer_error(primary: DocumentError, alternate: DocumentError) -> DocumentError {
    if primary.kind().specificity() < alternate.kind().specificity() {
        alternate
    } else {
        primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefer_error_keeps_primary_unless_less_specific() {
        let timeout = DocumentError::cancelled("timed out");
        let gone = DocumentError::network("connection reset", true);
        let throttled = DocumentError::new(429, 3200, "throttled");
        let conflict = DocumentError::new(409, 0, "conflict");

        assert_eq!(prefer_error(timeout.clone(), throttled.clone()).status(), 429);
        assert_eq!(prefer_error(gone, throttled.clone()).status(), 429);
        assert_eq!(prefer_error(throttled.clone(), timeout).status(), 429);
        assert_eq!(prefer_error(throttled, conflict.clone()).status(), 409);
        assert_eq!(
            prefer_error(conflict, DocumentError::new(503, 0, "unavailable")).status(),
            409
        );
    }
}
