use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use tessera_core::diagnostics::{emit, DiagnosticEvent, DiagnosticKind, DiagnosticsSink};
use tessera_core::status::{codes, sub_codes};
use tessera_core::{CollectionCache, DocumentError, RequestContext};
use tessera_session::SessionContainer;

use crate::policy::RetryPolicy;
use crate::result::ShouldRetryResult;

/// Drops the session tokens of a collection that may have been deleted and
/// recreated under the same name
///
/// Runs once, after every inner policy has declined a read-session-not-
/// available failure. When the refreshed collection carries a new resource id
/// the operation gets exactly one more attempt, without a session token;
/// otherwise it fails fast.
///
/// Always placed outermost in a chain: once tokens are cleared no other
/// policy may act on the same failure.
pub struct ClearingSessionOnRenamePolicy {
    session: Arc<dyn SessionContainer>,
    cache: Arc<dyn CollectionCache>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    activity_id: Option<Uuid>,
    collection_name: Option<String>,
    collection_rid: Option<String>,
    triggered: bool,
    new_rid: Option<String>,
}

impl ClearingSessionOnRenamePolicy {
    pub fn new(
        session: Arc<dyn SessionContainer>,
        cache: Arc<dyn CollectionCache>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            session,
            cache,
            diagnostics,
            activity_id: None,
            collection_name: None,
            collection_rid: None,
            triggered: false,
            new_rid: None,
        }
    }

    pub fn triggered(&self) -> bool {
        self.triggered
    }
}

impl std::fmt::Debug for ClearingSessionOnRenamePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClearingSessionOnRenamePolicy")
            .field("collection_name", &self.collection_name)
            .field("collection_rid", &self.collection_rid)
            .field("triggered", &self.triggered)
            .finish()
    }
}

#[async_trait]
impl RetryPolicy for ClearingSessionOnRenamePolicy {
    fn name(&self) -> &'static str {
        "clearing-session"
    }

    fn pinned_outermost(&self) -> bool {
        true
    }

    fn on_before_send_request(&mut self, request: &mut RequestContext) {
        self.activity_id = Some(request.activity_id);
        if let Some(rid) = self.new_rid.take() {
            request.collection_rid = Some(rid);
            request.clear_session_token();
        }
        self.collection_name = request.collection_name.clone();
        self.collection_rid = request.collection_rid.clone();
    }

    async fn should_retry(
        &mut self,
        error: &DocumentError,
        inner: &ShouldRetryResult,
    ) -> ShouldRetryResult {
        if inner.is_retry()
            || self.triggered
            || !error.is(codes::NOT_FOUND, sub_codes::READ_SESSION_NOT_AVAILABLE)
        {
            return ShouldRetryResult::NoRetryNonRelated;
        }
        let Some(name) = self.collection_name.clone() else {
            return ShouldRetryResult::NoRetryNonRelated;
        };
        self.triggered = true;

        let cleared = self.session.clear_collection_by_name(&name);
        tracing::info!(collection = %name, cleared, "cleared session tokens of collection");
        let kind = DiagnosticKind::SessionTokenCleared {
            collection: name.clone(),
        };
        let event = match self.activity_id {
            Some(id) => DiagnosticEvent::for_activity(id, kind),
            None => DiagnosticEvent::new(kind),
        };
        emit(self.diagnostics.as_ref(), event);

        let metadata = match self.cache.refresh_collection(&name).await {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::warn!(collection = %name, error = %err, "collection refresh after clearing failed");
                return ShouldRetryResult::Error(err);
            }
        };
        self.session.register_collection(&name, &metadata.resource_id);

        if self.collection_rid.as_deref() == Some(metadata.resource_id.as_str()) {
            tracing::debug!(collection = %name, "collection unchanged, not retrying");
            return ShouldRetryResult::NoRetry;
        }

        tracing::info!(
            collection = %name,
            old_rid = ?self.collection_rid,
            new_rid = %metadata.resource_id,
            "collection was recreated, retrying once"
        );
        self.new_rid = Some(metadata.resource_id);
        ShouldRetryResult::retry_now()
    }
}
