//! # tessera-retry
//!
//! Retry machinery for Tessera operations:
//! - [`RetryPolicy`] and the built-in policies in [`policies`]
//! - [`RetryPolicyChain`], one per logical operation, built by a
//!   [`RetryPolicyFactory`]
//! - [`RetryExecutor`], which drives attempts, backoff, the end-to-end timeout
//!   and hedging
//! - [`RegionalEndpoints`] for preferred-region routing
//! - [`RequestPipeline`], tying session tokens, the circuit breaker and the
//!   executor together around a transport
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tessera_core::{CollectionCache, OperationType, RequestContext, ResilienceConfig, ResourceType, TransportClient};
//! use tessera_retry::RequestPipeline;
//!
//! async fn read(transport: Arc<dyn TransportClient>, cache: Arc<dyn CollectionCache>) {
//!     let pipeline = RequestPipeline::builder(ResilienceConfig::default(), transport, cache).build();
//!     let request = RequestContext::new(OperationType::Read, ResourceType::Document)
//!         .with_collection("dbs/shop/colls/orders", "rid-1")
//!         .with_partition_key_range("0");
//!     let _ = pipeline.send(request).await;
//! }
//! ```

mod backoff;
mod chain;
mod endpoints;
mod executor;
mod observer;
mod pipeline;
mod policy;
mod result;

pub mod policies;


pub use backoff::{calculate_delay, BudgetedBackoff};
pub use chain::{RetryPolicyChain, RetryPolicyChainBuilder, RetryPolicyFactory};
pub use endpoints::RegionalEndpoints;
pub use executor::{RetryExecutor, RetryExecutorBuilder};
pub use observer::{NoOpObserver, RetryObserver, StatsObserver, TracingObserver};
pub use pipeline::{RequestPipeline, RequestPipelineBuilder};
pub use policy::RetryPolicy;
pub use result::{RetryContext, ShouldRetryResult};
