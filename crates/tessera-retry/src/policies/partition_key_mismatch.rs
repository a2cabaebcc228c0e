use std::sync::Arc;

use async_trait::async_trait;

use tessera_core::status::{codes, sub_codes};
use tessera_core::{CollectionCache, DocumentError, RequestContext};

use crate::policy::RetryPolicy;
use crate::result::ShouldRetryResult;

/// Refreshes the partition key definition once when the service reports that
/// the request's partition key does not match the collection's
pub struct PartitionKeyMismatchPolicy {
    cache: Arc<dyn CollectionCache>,
    collection_name: Option<String>,
    triggered: bool,
    force_refresh: bool,
}

impl PartitionKeyMismatchPolicy {
    pub fn new(cache: Arc<dyn CollectionCache>) -> Self {
        Self {
            cache,
            collection_name: None,
            triggered: false,
            force_refresh: false,
        }
    }
}

impl std::fmt::Debug for PartitionKeyMismatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionKeyMismatchPolicy")
            .field("collection_name", &self.collection_name)
            .field("triggered", &self.triggered)
            .finish()
    }
}

#[async_trait]
impl RetryPolicy for PartitionKeyMismatchPolicy {
    fn name(&self) -> &'static str {
        "partition-key-mismatch"
    }

    fn on_before_send_request(&mut self, request: &mut RequestContext) {
        self.collection_name = request.collection_name.clone();
        if self.force_refresh {
            request.force_partition_key_refresh = true;
            self.force_refresh = false;
        }
    }

    async fn should_retry(
        &mut self,
        error: &DocumentError,
        _inner: &ShouldRetryResult,
    ) -> ShouldRetryResult {
        if !error.is(codes::BAD_REQUEST, sub_codes::PARTITION_KEY_MISMATCH) || self.triggered {
            return ShouldRetryResult::NoRetryNonRelated;
        }
        let Some(name) = self.collection_name.clone() else {
            return ShouldRetryResult::NoRetryNonRelated;
        };
        self.triggered = true;

        match self.cache.refresh_partition_key_definition(&name).await {
            Ok(metadata) => {
                tracing::debug!(
                    collection = %name,
                    paths = ?metadata.partition_key_paths,
                    "partition key definition refreshed"
                );
                self.force_refresh = true;
                ShouldRetryResult::retry_now()
            }
            Err(err) => {
                tracing::warn!(collection = %name, error = %err, "partition key refresh failed");
                ShouldRetryResult::Error(err)
            }
        }
    }
}
