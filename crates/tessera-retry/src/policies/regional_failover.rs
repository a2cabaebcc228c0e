use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use tessera_breaker::RegionCircuitBreaker;
use tessera_core::diagnostics::{emit, DiagnosticEvent, DiagnosticKind, DiagnosticsSink};
use tessera_core::status::{codes, sub_codes};
use tessera_core::{DocumentError, ErrorKind, OperationType, RequestContext};

use crate::endpoints::RegionalEndpoints;
use crate::policy::RetryPolicy;
use crate::result::ShouldRetryResult;

/// Moves an operation to the next preferred region when its current region
/// looks unavailable
///
/// 503s and the account-level 403s mark the region unavailable in the shared
/// [`RegionalEndpoints`]. Region-scoped 410s only affect routing for this
/// operation; the circuit breaker owns their cross-operation effect. Regions
/// whose circuit is open for the request's partition are skipped.
pub struct RegionalFailoverPolicy {
    endpoints: Arc<RegionalEndpoints>,
    breaker: Arc<RegionCircuitBreaker>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    max_retries: u32,
    retries: u32,
    activity_id: Option<Uuid>,
    operation: Option<OperationType>,
    partition_key_range_id: Option<String>,
    excluded: Vec<String>,
    current_region: Option<String>,
    tried: Vec<String>,
    route_to: Option<String>,
}

impl RegionalFailoverPolicy {
    pub fn new(
        endpoints: Arc<RegionalEndpoints>,
        breaker: Arc<RegionCircuitBreaker>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        max_retries: u32,
    ) -> Self {
        Self {
            endpoints,
            breaker,
            diagnostics,
            max_retries,
            retries: 0,
            activity_id: None,
            operation: None,
            partition_key_range_id: None,
            excluded: Vec::new(),
            current_region: None,
            tried: Vec::new(),
            route_to: None,
        }
    }

    /// Regions this operation has failed in so far
    pub fn tried_regions(&self) -> &[String] {
        &self.tried
    }

    fn resolve(&self, operation: OperationType, skip: &[String]) -> Option<String> {
        let breaker = &self.breaker;
        let pkr = self.partition_key_range_id.as_deref();
        self.endpoints.resolve(operation, skip, |region| match pkr {
            Some(pkr) => breaker.is_available(region, pkr),
            None => true,
        })
    }

    fn mark_region(&self, region: &str, error: &DocumentError, operation: OperationType) {
        let (reads, writes) = match (error.status(), error.sub_status()) {
            (codes::FORBIDDEN, sub_codes::WRITE_FORBIDDEN) => (false, true),
            (codes::FORBIDDEN, sub_codes::DATABASE_ACCOUNT_NOT_FOUND) => (true, true),
            (codes::SERVICE_UNAVAILABLE, _) => (operation.is_read_only(), operation.is_write()),
            _ => (false, false),
        };

        if reads {
            self.endpoints.mark_unavailable_for_reads(region);
            self.record(DiagnosticKind::RegionMarkedUnavailable {
                region: region.to_string(),
                for_writes: false,
            });
        }
        if writes {
            self.endpoints.mark_unavailable_for_writes(region);
            self.record(DiagnosticKind::RegionMarkedUnavailable {
                region: region.to_string(),
                for_writes: true,
            });
        }
    }

    fn record(&self, kind: DiagnosticKind) {
        let event = match self.activity_id {
            Some(id) => DiagnosticEvent::for_activity(id, kind),
            None => DiagnosticEvent::new(kind),
        };
        emit(self.diagnostics.as_ref(), event);
    }
}

impl std::fmt::Debug for RegionalFailoverPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionalFailoverPolicy")
            .field("retries", &self.retries)
            .field("max_retries", &self.max_retries)
            .field("current_region", &self.current_region)
            .field("tried", &self.tried)
            .finish()
    }
}

#[async_trait]
impl RetryPolicy for RegionalFailoverPolicy {
    fn name(&self) -> &'static str {
        "regional-failover"
    }

    fn on_before_send_request(&mut self, request: &mut RequestContext) {
        self.activity_id = Some(request.activity_id);
        self.operation = Some(request.operation);
        self.partition_key_range_id = request.partition_key_range_id.clone();
        self.excluded = request.excluded_regions.clone();

        if let Some(region) = self.route_to.take() {
            request.target_region = Some(region);
        } else if request.target_region.is_none() {
            request.target_region = self.resolve(request.operation, &self.excluded);
        }
        self.current_region = request.target_region.clone();
    }

    async fn should_retry(
        &mut self,
        error: &DocumentError,
        _inner: &ShouldRetryResult,
    ) -> ShouldRetryResult {
        if error.kind() != ErrorKind::RegionUnavailable {
            return ShouldRetryResult::NoRetryNonRelated;
        }
        let Some(operation) = self.operation else {
            return ShouldRetryResult::NoRetryNonRelated;
        };

        let failed_region = error
            .region()
            .map(str::to_string)
            .or_else(|| self.current_region.clone());
        if let Some(region) = failed_region {
            self.mark_region(&region, error, operation);
            if !self.tried.contains(&region) {
                self.tried.push(region);
            }
        }

        if self.retries >= self.max_retries {
            tracing::debug!(retries = self.retries, "failover retries exhausted");
            return ShouldRetryResult::NoRetry;
        }

        let skip: Vec<String> = self
            .excluded
            .iter()
            .chain(self.tried.iter())
            .cloned()
            .collect();
        match self.resolve(operation, &skip) {
            Some(next) => {
                tracing::info!(
                    from = ?self.current_region,
                    to = %next,
                    status = error.status(),
                    sub_status = error.sub_status(),
                    "failing over to next region"
                );
                self.retries += 1;
                self.route_to = Some(next);
                ShouldRetryResult::retry_now()
            }
            None => {
                tracing::debug!(tried = ?self.tried, "no region left to fail over to");
                ShouldRetryResult::NoRetry
            }
        }
    }
}
