use async_trait::async_trait;

use tessera_core::status::{codes, sub_codes};
use tessera_core::types::BackoffPolicy;
use tessera_core::DocumentError;

use crate::backoff::BudgetedBackoff;
use crate::policy::RetryPolicy;
use crate::result::ShouldRetryResult;

/// Waits for a lagging replica to catch up with the session token we sent
///
/// The first retry goes out immediately, since another replica may already
/// have the write. After that the delay grows exponentially, clipped to what
/// is left of the wait budget.
#[derive(Debug)]
pub struct SessionNotAvailablePolicy {
    backoff: BudgetedBackoff,
}

impl SessionNotAvailablePolicy {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            backoff: BudgetedBackoff::new(policy).with_immediate_first_retry(),
        }
    }

    pub fn retries(&self) -> u32 {
        self.backoff.retries()
    }
}

#[async_trait]
impl RetryPolicy for SessionNotAvailablePolicy {
    fn name(&self) -> &'static str {
        "session-not-available"
    }

    async fn should_retry(
        &mut self,
        error: &DocumentError,
        _inner: &ShouldRetryResult,
    ) -> ShouldRetryResult {
        if !error.is(codes::NOT_FOUND, sub_codes::READ_SESSION_NOT_AVAILABLE) {
            return ShouldRetryResult::NoRetryNonRelated;
        }

        match self.backoff.next_delay() {
            Some(delay) => ShouldRetryResult::retry_after(delay),
            None => {
                tracing::debug!(
                    retries = self.backoff.retries(),
                    "read session still not available after wait budget"
                );
                ShouldRetryResult::NoRetry
            }
        }
    }
}
