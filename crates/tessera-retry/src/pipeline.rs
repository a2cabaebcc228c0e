//! Request pipeline: everything that happens around one transport send
//!
//! For each logical operation the pipeline registers the collection with the
//! session store, routes around regions whose circuit is open, attaches the
//! session token before every attempt, records the session token and the
//! circuit breaker outcome of every response, and runs the attempts through a
//! [`RetryExecutor`] with a fresh policy chain. Reads may be hedged against a
//! second region.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tessera_breaker::RegionCircuitBreaker;
use tessera_core::diagnostics::{DiagnosticsSink, NoOpSink};
use tessera_core::status::is_success;
use tessera_core::{
    CollectionCache, DocumentError, RequestContext, ResilienceConfig, Response, TransportClient,
};
use tessera_session::{container_from_config, SessionContainer};

use crate::chain::RetryPolicyFactory;
use crate::endpoints::RegionalEndpoints;
use crate::executor::{RetryExecutor, RetryExecutorBuilder};
use crate::observer::TracingObserver;

/// Builder for a [`RequestPipeline`]
pub struct RequestPipelineBuilder {
    config: ResilienceConfig,
    transport: Arc<dyn TransportClient>,
    cache: Arc<dyn CollectionCache>,
    session: Option<Arc<dyn SessionContainer>>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl RequestPipelineBuilder {
    /// Use an existing session store instead of one built from the config
    pub fn with_session(mut self, session: Arc<dyn SessionContainer>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    pub fn build(self) -> RequestPipeline {
        let session = self
            .session
            .unwrap_or_else(|| container_from_config(&self.config.session));
        let breaker = Arc::new(
            RegionCircuitBreaker::new(self.config.circuit_breaker.clone())
                .with_diagnostics(Arc::clone(&self.diagnostics)),
        );
        let endpoints = Arc::new(RegionalEndpoints::new(&self.config.endpoint));
        let factory = RetryPolicyFactory::new(self.config, self.cache, session, breaker, endpoints)
            .with_diagnostics(self.diagnostics);

        RequestPipeline {
            transport: self.transport,
            factory,
        }
    }
}

/// Sends operations with session consistency, retries, circuit breaking and
/// optional hedging
pub struct RequestPipeline {
    transport: Arc<dyn TransportClient>,
    factory: RetryPolicyFactory,
}

impl RequestPipeline {
    pub fn builder(
        config: ResilienceConfig,
        transport: Arc<dyn TransportClient>,
        cache: Arc<dyn CollectionCache>,
    ) -> RequestPipelineBuilder {
        RequestPipelineBuilder {
            config,
            transport,
            cache,
            session: None,
            diagnostics: Arc::new(NoOpSink),
        }
    }

    pub fn config(&self) -> &ResilienceConfig {
        self.factory.config()
    }

    pub fn session(&self) -> &Arc<dyn SessionContainer> {
        self.factory.session()
    }

    pub fn breaker(&self) -> &Arc<RegionCircuitBreaker> {
        self.factory.breaker()
    }

    pub fn endpoints(&self) -> &Arc<RegionalEndpoints> {
        self.factory.endpoints()
    }

    /// Send one logical operation
    pub async fn send(&self, request: RequestContext) -> Result<Response, DocumentError> {
        self.run(request, None).await
    }

    /// Send one logical operation, giving up when `token` is cancelled
    pub async fn send_with_cancellation(
        &self,
        request: RequestContext,
        token: CancellationToken,
    ) -> Result<Response, DocumentError> {
        self.run(request, Some(token)).await
    }

    async fn run(
        &self,
        mut request: RequestContext,
        cancellation: Option<CancellationToken>,
    ) -> Result<Response, DocumentError> {
        if let (Some(name), Some(rid)) = (&request.collection_name, &request.collection_rid) {
            if let Some(previous) = self.session().register_collection(name, rid) {
                tracing::info!(
                    collection = %name,
                    previous_rid = %previous,
                    rid = %rid,
                    "collection resource id changed"
                );
            }
        }

        if request.target_region.is_none() {
            request.target_region = self.route(&request, &request.excluded_regions);
        }

        let executor = self.executor(&request, cancellation);
        let mut chain = self.factory.create();

        let hedging = &self.config().hedging;
        let alternate_region = if hedging.enabled && request.operation.is_read_only() {
            self.alternate_region(&request)
        } else {
            None
        };

        let Some(alternate_region) = alternate_region else {
            return executor
                .execute(&mut chain, &mut request, |attempt| self.attempt(attempt))
                .await;
        };

        let mut alternate_request = request.clone();
        alternate_request.target_region = Some(alternate_region.clone());
        let executor_ref = &executor;
        // the hedged deadline in `execute_with_hedging` bounds this branch too
        let alternate = move || async move {
            let admitted = match alternate_request.partition_key_range_id.as_deref() {
                Some(pkr) => self.breaker().is_available(&alternate_region, pkr),
                None => true,
            };
            if !admitted {
                return Err(DocumentError::cancelled(format!(
                    "hedge region {} no longer admitted by its circuit breaker",
                    alternate_region
                )));
            }

            let mut alternate_chain = self.factory.create();
            let mut alternate_request = alternate_request;
            executor_ref
                .execute(&mut alternate_chain, &mut alternate_request, |attempt| {
                    self.attempt(attempt)
                })
                .await
        };

        executor
            .execute_with_hedging(
                &mut chain,
                &mut request,
                |attempt| self.attempt(attempt),
                alternate,
                hedging.min_delay(),
            )
            .await
    }

    fn executor(
        &self,
        request: &RequestContext,
        cancellation: Option<CancellationToken>,
    ) -> RetryExecutor<TracingObserver> {
        let mut builder = RetryExecutorBuilder::new()
            .with_observer(TracingObserver::new(format!(
                "{:?} {:?}",
                request.operation, request.resource_type
            )))
            .with_end_to_end_timeout(self.config().operation.end_to_end_timeout())
            .with_diagnostics(Arc::clone(self.factory.diagnostics()));
        if let Some(token) = cancellation {
            builder = builder.with_cancellation(token);
        }
        builder.build()
    }

    /// First routable region for the request, skipping `skip`
    fn route(&self, request: &RequestContext, skip: &[String]) -> Option<String> {
        let breaker = self.breaker();
        let pkr = request.partition_key_range_id.as_deref();
        self.endpoints()
            .resolve(request.operation, skip, |region| match pkr {
                Some(pkr) => breaker.is_available(region, pkr),
                None => true,
            })
    }

    /// A second available region to hedge a read against
    ///
    /// Only peeks at breaker state: the hedge may never be dispatched, and
    /// the alternate branch claims the region when it is.
    fn alternate_region(&self, request: &RequestContext) -> Option<String> {
        let primary = request.target_region.as_ref()?;
        let breaker = self.breaker();
        let endpoints = self.endpoints();
        let pkr = request.partition_key_range_id.as_deref();

        endpoints
            .preferred_regions()
            .iter()
            .filter(|region| *region != primary && !request.excluded_regions.contains(*region))
            .find(|region| {
                endpoints.is_available_for(region.as_str(), request.operation)
                    && pkr.map_or(true, |pkr| breaker.would_admit(region.as_str(), pkr))
            })
            .cloned()
    }

    /// One transport attempt with session and breaker bookkeeping
    async fn attempt(&self, mut request: RequestContext) -> Result<Response, DocumentError> {
        if !request.is_metadata_request() && request.session_token().is_none() {
            if let Some(rid) = request.collection_rid.as_deref() {
                let header = self.session().resolve_session_header(
                    rid,
                    request.partition_key_range_id.as_deref(),
                    self.endpoints().preferred_regions(),
                );
                if let Some(header) = header {
                    request.set_session_token(header);
                }
            }
        }

        let region = request.target_region.as_deref();
        let pkr = request.partition_key_range_id.as_deref();

        let err = match self.transport.send(&request).await {
            Ok(response) if is_success(response.status) => {
                if let (Some(rid), Some(header)) =
                    (request.collection_rid.as_deref(), response.session_token())
                {
                    let served_by = response.region.as_deref().or(region);
                    self.session().record_session_header(rid, served_by, header);
                }
                if let (Some(region), Some(pkr)) = (response.region.as_deref().or(region), pkr) {
                    self.breaker().try_record_success(region, pkr);
                }
                return Ok(response);
            }
            Ok(response) => {
                let err = DocumentError::from_response(response.status, response.headers);
                match response.region.as_deref().or(region) {
                    Some(region) => err.with_region(region),
                    None => err,
                }
            }
            Err(err) => match region {
                Some(region) if err.region().is_none() => err.with_region(region),
                _ => err,
            },
        };

        if let (Some(region), Some(pkr)) = (err.region(), pkr) {
            let breaker = self.breaker();
            if breaker.try_record_failure(region, pkr, err.status(), err.sub_status()) {
                tracing::debug!(
                    region = %region,
                    partition_key_range_id = %pkr,
                    status = err.status(),
                    sub_status = err.sub_status(),
                    "region-scoped failure recorded"
                );
            }
        }
        Err(err)
    }
}
