//! Composition of retry policies into one chain per operation

use std::sync::Arc;

use tessera_breaker::RegionCircuitBreaker;
use tessera_core::diagnostics::{DiagnosticsSink, NoOpSink};
use tessera_core::{CollectionCache, DocumentError, RequestContext, ResilienceConfig};
use tessera_session::SessionContainer;

use crate::endpoints::RegionalEndpoints;
use crate::policies::{
    ClearingSessionOnRenamePolicy, PartitionKeyMismatchPolicy, RegionalFailoverPolicy,
    SessionNotAvailablePolicy, StalePartitionMetadataPolicy, ThrottlingPolicy,
    TransientNetworkPolicy,
};
use crate::policy::RetryPolicy;
use crate::result::{RetryContext, ShouldRetryResult};

/// An ordered list of retry policies, innermost first
///
/// Evaluation starts at the innermost policy. A `Retry` or `Error` verdict
/// ends it; `NoRetry` and `NoRetryNonRelated` are handed to the next policy
/// as the inner verdict. A `NoRetry` from any policy wins over "no opinion".
pub struct RetryPolicyChain {
    policies: Vec<Box<dyn RetryPolicy>>,
    context: RetryContext,
    sent: bool,
    last_decider: Option<&'static str>,
}

impl RetryPolicyChain {
    pub fn builder() -> RetryPolicyChainBuilder {
        RetryPolicyChainBuilder::default()
    }

    /// Let every policy adjust the request before an attempt, innermost first
    pub fn on_before_send(&mut self, request: &mut RequestContext) {
        self.sent = true;
        self.context.mark_started();
        for policy in self.policies.iter_mut() {
            policy.on_before_send_request(request);
        }
    }

    /// Run the chain over a failed attempt
    ///
    /// Calling this before any [`on_before_send`](Self::on_before_send) is an
    /// integration bug and yields an `InvalidState` error verdict.
    pub async fn should_retry(&mut self, error: &DocumentError) -> ShouldRetryResult {
        if !self.sent {
            return ShouldRetryResult::Error(DocumentError::invalid_state(
                "should_retry called before any request was sent",
            ));
        }

        self.context.record_failure(error.status(), error.sub_status());
        self.last_decider = None;

        let mut verdict = ShouldRetryResult::NoRetryNonRelated;
        for policy in self.policies.iter_mut() {
            let next = policy.should_retry(error, &verdict).await;
            if next.is_non_related() {
                continue;
            }
            self.last_decider = Some(policy.name());
            let stop = next.is_final();
            verdict = next;
            if stop {
                break;
            }
        }

        if let Some(backoff) = verdict.backoff() {
            self.context.record_retry(backoff);
        }
        verdict
    }

    /// The policy that produced the last verdict, if any had an opinion
    pub fn last_decider(&self) -> Option<&'static str> {
        self.last_decider
    }

    pub fn retry_context(&self) -> &RetryContext {
        &self.context
    }

    pub(crate) fn mark_ended(&mut self) {
        self.context.mark_ended();
    }

    /// Policy names, innermost first
    pub fn policy_names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl std::fmt::Debug for RetryPolicyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicyChain")
            .field("policies", &self.policy_names())
            .field("context", &self.context)
            .finish()
    }
}

/// Builder for a [`RetryPolicyChain`]
///
/// Policies are added innermost first. Policies that must run last, such as
/// [`ClearingSessionOnRenamePolicy`], are moved outermost on `build` whatever
/// position they were added at.
#[derive(Default)]
pub struct RetryPolicyChainBuilder {
    policies: Vec<Box<dyn RetryPolicy>>,
}

impl RetryPolicyChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    pub fn with_boxed_policy(mut self, policy: Box<dyn RetryPolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn build(self) -> RetryPolicyChain {
        let (mut ordered, pinned): (Vec<_>, Vec<_>) = self
            .policies
            .into_iter()
            .partition(|policy| !policy.pinned_outermost());
        ordered.extend(pinned);

        RetryPolicyChain {
            policies: ordered,
            context: RetryContext::new(),
            sent: false,
            last_decider: None,
        }
    }
}

/// Holds the collaborators shared by all operations and builds a fresh chain
/// for each one
#[derive(Clone)]
pub struct RetryPolicyFactory {
    config: ResilienceConfig,
    cache: Arc<dyn CollectionCache>,
    session: Arc<dyn SessionContainer>,
    breaker: Arc<RegionCircuitBreaker>,
    endpoints: Arc<RegionalEndpoints>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl RetryPolicyFactory {
    pub fn new(
        config: ResilienceConfig,
        cache: Arc<dyn CollectionCache>,
        session: Arc<dyn SessionContainer>,
        breaker: Arc<RegionCircuitBreaker>,
        endpoints: Arc<RegionalEndpoints>,
    ) -> Self {
        Self {
            config,
            cache,
            session,
            breaker,
            endpoints,
            diagnostics: Arc::new(NoOpSink),
        }
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    /// Build the default chain
    ///
    /// Innermost to outermost: throttling, transient network, session not
    /// available, regional failover, partition key mismatch, stale metadata,
    /// clearing session.
    pub fn create(&self) -> RetryPolicyChain {
        RetryPolicyChain::builder()
            .with_policy(ThrottlingPolicy::new(self.config.throttling.clone()))
            .with_policy(TransientNetworkPolicy::new(self.config.network_retry.clone()))
            .with_policy(SessionNotAvailablePolicy::new(
                self.config.session_retry.clone(),
            ))
            .with_policy(RegionalFailoverPolicy::new(
                Arc::clone(&self.endpoints),
                Arc::clone(&self.breaker),
                Arc::clone(&self.diagnostics),
                self.config.endpoint.max_failover_retries,
            ))
            .with_policy(PartitionKeyMismatchPolicy::new(Arc::clone(&self.cache)))
            .with_policy(StalePartitionMetadataPolicy::new(Arc::clone(&self.cache)))
            .with_policy(ClearingSessionOnRenamePolicy::new(
                Arc::clone(&self.session),
                Arc::clone(&self.cache),
                Arc::clone(&self.diagnostics),
            ))
            .build()
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<dyn SessionContainer> {
        &self.session
    }

    pub fn breaker(&self) -> &Arc<RegionCircuitBreaker> {
        &self.breaker
    }

    pub fn endpoints(&self) -> &Arc<RegionalEndpoints> {
        &self.endpoints
    }

    pub fn diagnostics(&self) -> &Arc<dyn DiagnosticsSink> {
        &self.diagnostics
    }
}
