use std::sync::Arc;

use async_trait::async_trait;

use tessera_core::status::{codes, sub_codes};
use tessera_core::{CollectionCache, DocumentError, RequestContext};

use crate::policy::RetryPolicy;
use crate::result::ShouldRetryResult;

/// Refreshes the collection name cache once when the service reports it stale
///
/// The refreshed resource id is applied to the next attempt.
pub struct StalePartitionMetadataPolicy {
    cache: Arc<dyn CollectionCache>,
    collection_name: Option<String>,
    triggered: bool,
    refreshed_rid: Option<String>,
}

impl StalePartitionMetadataPolicy {
    pub fn new(cache: Arc<dyn CollectionCache>) -> Self {
        Self {
            cache,
            collection_name: None,
            triggered: false,
            refreshed_rid: None,
        }
    }
}

impl std::fmt::Debug for StalePartitionMetadataPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StalePartitionMetadataPolicy")
            .field("collection_name", &self.collection_name)
            .field("triggered", &self.triggered)
            .field("refreshed_rid", &self.refreshed_rid)
            .finish()
    }
}

#[async_trait]
impl RetryPolicy for StalePartitionMetadataPolicy {
    fn name(&self) -> &'static str {
        "stale-metadata"
    }

    fn on_before_send_request(&mut self, request: &mut RequestContext) {
        self.collection_name = request.collection_name.clone();
        if let Some(rid) = self.refreshed_rid.take() {
            request.collection_rid = Some(rid);
            request.force_name_cache_refresh = true;
        }
    }

    async fn should_retry(
        &mut self,
        error: &DocumentError,
        _inner: &ShouldRetryResult,
    ) -> ShouldRetryResult {
        if !error.is(codes::GONE, sub_codes::NAME_CACHE_IS_STALE) || self.triggered {
            return ShouldRetryResult::NoRetryNonRelated;
        }
        let Some(name) = self.collection_name.clone() else {
            return ShouldRetryResult::NoRetryNonRelated;
        };
        self.triggered = true;

        match self.cache.refresh_collection(&name).await {
            Ok(metadata) => {
                tracing::debug!(
                    collection = %name,
                    rid = %metadata.resource_id,
                    "collection cache refreshed"
                );
                self.refreshed_rid = Some(metadata.resource_id);
                ShouldRetryResult::retry_now()
            }
            Err(err) => {
                tracing::warn!(collection = %name, error = %err, "collection cache refresh failed");
                ShouldRetryResult::Error(err)
            }
        }
    }
}
