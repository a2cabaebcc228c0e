//! The retry policy seam

use async_trait::async_trait;

use tessera_core::{DocumentError, RequestContext};

use crate::result::ShouldRetryResult;

/// One link of a retry policy chain
///
/// Policies are stateful and belong to a single logical operation. The chain
/// calls `on_before_send_request` before every attempt and `should_retry`
/// after every failed one, passing the verdict of the policies evaluated
/// before this one.
#[async_trait]
pub trait RetryPolicy: Send + Sync {
    /// Short name used in logs and diagnostics
    fn name(&self) -> &'static str;

    /// Whether the chain builder must place this policy outermost
    fn pinned_outermost(&self) -> bool {
        false
    }

    /// Adjust the request before an attempt is sent
    fn on_before_send_request(&mut self, _request: &mut RequestContext) {}

    /// Decide what to do about a failed attempt
    async fn should_retry(
        &mut self,
        error: &DocumentError,
        inner: &ShouldRetryResult,
    ) -> ShouldRetryResult;
}
