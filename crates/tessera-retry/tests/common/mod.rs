//! Shared fakes for the retry integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tessera_core::request::headers;
use tessera_core::{
    CollectionCache, CollectionMetadata, DocumentError, RequestContext, Response, TransportClient,
};

pub const COLLECTION: &str = "dbs/shop/colls/orders";
pub const RID: &str = "rid-1";

type Handler = dyn Fn(&RequestContext, usize) -> Result<Response, DocumentError> + Send + Sync;

/// Transport whose replies come from a closure
///
/// The closure sees the request and the 1-based number of the call. Every
/// request is recorded, and replies from a region can be delayed.
pub struct MockTransport {
    handler: Box<Handler>,
    latency: HashMap<String, Duration>,
    sent: Mutex<Vec<RequestContext>>,
}

impl MockTransport {
    pub fn new(
        handler: impl Fn(&RequestContext, usize) -> Result<Response, DocumentError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            latency: HashMap::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Transport that answers 200 to everything
    pub fn ok() -> Self {
        Self::new(|_, _| Ok(Response::new(200)))
    }

    pub fn with_latency(mut self, region: &str, latency: Duration) -> Self {
        self.latency.insert(region.to_string(), latency);
        self
    }

    pub fn sent(&self) -> Vec<RequestContext> {
        self.sent.lock().clone()
    }

    pub fn sent_regions(&self) -> Vec<Option<String>> {
        self.sent
            .lock()
            .iter()
            .map(|r| r.target_region.clone())
            .collect()
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl TransportClient for MockTransport {
    async fn send(&self, request: &RequestContext) -> Result<Response, DocumentError> {
        let call = {
            let mut sent = self.sent.lock();
            sent.push(request.clone());
            sent.len()
        };

        let latency = request
            .target_region
            .as_ref()
            .and_then(|region| self.latency.get(region))
            .copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        (self.handler)(request, call)
    }
}

/// A failure response as the service would send it
pub fn failure_response(status: u16, sub_status: u32) -> Response {
    Response::new(status).with_header(headers::SUB_STATUS, sub_status.to_string())
}

/// Collection cache serving a fixed resource id, or failing
pub struct MockCache {
    rid: Mutex<String>,
    fail: bool,
    refreshes: AtomicU32,
}

impl MockCache {
    pub fn new(rid: &str) -> Arc<Self> {
        Arc::new(Self {
            rid: Mutex::new(rid.to_string()),
            fail: false,
            refreshes: AtomicU32::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            rid: Mutex::new(String::new()),
            fail: true,
            refreshes: AtomicU32::new(0),
        })
    }

    pub fn set_rid(&self, rid: &str) {
        *self.rid.lock() = rid.to_string();
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn metadata(&self, name: &str) -> Result<CollectionMetadata, DocumentError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DocumentError::new(503, 0, "metadata endpoint unavailable"));
        }
        Ok(CollectionMetadata {
            name: name.to_string(),
            resource_id: self.rid.lock().clone(),
            partition_key_paths: vec!["/tenantId".to_string()],
        })
    }
}

#[async_trait]
impl CollectionCache for MockCache {
    async fn refresh_collection(&self, name: &str) -> Result<CollectionMetadata, DocumentError> {
        self.metadata(name)
    }

    async fn refresh_partition_key_definition(
        &self,
        name: &str,
    ) -> Result<CollectionMetadata, DocumentError> {
        self.metadata(name)
    }
}
