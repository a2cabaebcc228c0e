use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use tessera_core::status::codes;
use tessera_core::types::ThrottlingConfig;
use tessera_core::{DocumentError, RequestContext};

use crate::policy::RetryPolicy;
use crate::result::ShouldRetryResult;

/// Retries 429 responses after the server-suggested interval
///
/// Stops after `max_attempts` retries or once the next delay would push the
/// cumulative wait past `max_wait`. Metadata requests get a small random
/// jitter so that many clients throttled together do not come back together.
#[derive(Debug)]
pub struct ThrottlingPolicy {
    config: ThrottlingConfig,
    attempts: u32,
    cumulative_wait: Duration,
    metadata_request: bool,
}

impl ThrottlingPolicy {
    pub fn new(config: ThrottlingConfig) -> Self {
        Self {
            config,
            attempts: 0,
            cumulative_wait: Duration::ZERO,
            metadata_request: false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn cumulative_wait(&self) -> Duration {
        self.cumulative_wait
    }

    fn delay_for(&self, error: &DocumentError) -> Duration {
        let suggested = error
            .retry_after()
            .unwrap_or_else(|| self.config.default_retry_after());
        let mut delay = suggested.mul_f64(self.config.backoff_multiplier.max(0.0));

        if self.metadata_request && self.config.metadata_jitter_ms > 0 {
            let jitter = rand::rng().random_range(0..=self.config.metadata_jitter_ms);
            delay += Duration::from_millis(jitter);
        }
        delay
    }
}

#[async_trait]
impl RetryPolicy for ThrottlingPolicy {
    fn name(&self) -> &'static str {
        "throttling"
    }

    fn on_before_send_request(&mut self, request: &mut RequestContext) {
        self.metadata_request = request.is_metadata_request();
    }

    async fn should_retry(
        &mut self,
        error: &DocumentError,
        _inner: &ShouldRetryResult,
    ) -> ShouldRetryResult {
        if error.status() != codes::TOO_MANY_REQUESTS {
            return ShouldRetryResult::NoRetryNonRelated;
        }

        if self.attempts >= self.config.max_attempts {
            tracing::debug!(attempts = self.attempts, "throttling retries exhausted");
            return ShouldRetryResult::NoRetry;
        }

        let delay = self.delay_for(error);
        if self.cumulative_wait + delay > self.config.max_wait() {
            tracing::debug!(
                cumulative_wait_ms = self.cumulative_wait.as_millis() as u64,
                delay_ms = delay.as_millis() as u64,
                "throttling wait budget exhausted"
            );
            return ShouldRetryResult::NoRetry;
        }

        self.attempts += 1;
        self.cumulative_wait += delay;
        ShouldRetryResult::retry_after(delay)
    }
}
