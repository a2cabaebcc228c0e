use async_trait::async_trait;

use tessera_core::types::BackoffPolicy;
use tessera_core::DocumentError;

use crate::backoff::BudgetedBackoff;
use crate::policy::RetryPolicy;
use crate::result::ShouldRetryResult;

/// Retries connection failures the transport marked as safe to resend
///
/// Non-retriable network failures are left to the rest of the chain.
#[derive(Debug)]
pub struct TransientNetworkPolicy {
    backoff: BudgetedBackoff,
}

impl TransientNetworkPolicy {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            backoff: BudgetedBackoff::new(policy),
        }
    }
}

#[async_trait]
impl RetryPolicy for TransientNetworkPolicy {
    fn name(&self) -> &'static str {
        "transient-network"
    }

    async fn should_retry(
        &mut self,
        error: &DocumentError,
        _inner: &ShouldRetryResult,
    ) -> ShouldRetryResult {
        if !error.is_retriable_network_error() {
            return ShouldRetryResult::NoRetryNonRelated;
        }

        match self.backoff.next_delay() {
            Some(delay) => ShouldRetryResult::retry_after(delay),
            None => {
                tracing::debug!(
                    retries = self.backoff.retries(),
                    elapsed_ms = self.backoff.elapsed().as_millis() as u64,
                    "network retry budget exhausted"
                );
                ShouldRetryResult::NoRetry
            }
        }
    }
}
