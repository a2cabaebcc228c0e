//! # tessera-session
//!
//! Session consistency state for the Tessera client:
//! - [`SessionToken`]: simple and vector session tokens, merge and staleness
//! - composite `x-ms-session-token` header codec
//! - [`SessionTokenRegistry`]: bounded LRU registry keyed by collection and
//!   partition key range
//! - [`RegionScopedRegistry`]: per-region capture with region-aware tokens

mod error;
pub mod header;
mod region_scoped;
mod registry;
mod token;

pub use error::{Result, SessionTokenError};
pub use region_scoped::RegionScopedRegistry;
pub use registry::{PinnedToken, SessionKey, SessionTokenRegistry};
pub use token::{SessionToken, Staleness, VectorSessionToken, UNSET_LSN};

use std::sync::Arc;

/// What the request path needs from a session-token store
///
/// Implemented by both registries so the retry crate can hold either one
/// behind `Arc<dyn SessionContainer>`.
pub trait SessionContainer: Send + Sync {
    /// Header value to send for a request, if any token is known
    fn resolve_session_header(
        &self,
        collection_rid: &str,
        partition_key_range_id: Option<&str>,
        preferred_regions: &[String],
    ) -> Option<String>;

    /// Record a response's session header; returns the ranges recorded
    fn record_session_header(&self, collection_rid: &str, region: Option<&str>, header: &str)
        -> usize;

    /// Map a collection name to its resource id, returning a changed previous id
    fn register_collection(&self, name: &str, collection_rid: &str) -> Option<String>;

    /// Drop every token of the collection registered under `name`
    fn clear_collection_by_name(&self, name: &str) -> usize;
}

impl SessionContainer for SessionTokenRegistry {
    fn resolve_session_header(
        &self,
        collection_rid: &str,
        partition_key_range_id: Option<&str>,
        _preferred_regions: &[String],
    ) -> Option<String> {
        self.resolve_header(collection_rid, partition_key_range_id)
    }

    fn record_session_header(
        &self,
        collection_rid: &str,
        _region: Option<&str>,
        header: &str,
    ) -> usize {
        self.record_from_header(collection_rid, header)
    }

    fn register_collection(&self, name: &str, collection_rid: &str) -> Option<String> {
        SessionTokenRegistry::register_collection(self, name, collection_rid)
    }

    fn clear_collection_by_name(&self, name: &str) -> usize {
        SessionTokenRegistry::clear_collection_by_name(self, name)
    }
}

impl SessionContainer for RegionScopedRegistry {
    fn resolve_session_header(
        &self,
        collection_rid: &str,
        partition_key_range_id: Option<&str>,
        preferred_regions: &[String],
    ) -> Option<String> {
        self.resolve_header(collection_rid, partition_key_range_id, preferred_regions)
    }

    fn record_session_header(
        &self,
        collection_rid: &str,
        region: Option<&str>,
        header: &str,
    ) -> usize {
        self.record_from_header(collection_rid, region, header)
    }

    fn register_collection(&self, name: &str, collection_rid: &str) -> Option<String> {
        self.global().register_collection(name, collection_rid)
    }

    fn clear_collection_by_name(&self, name: &str) -> usize {
        RegionScopedRegistry::clear_collection_by_name(self, name)
    }
}

impl<T: SessionContainer + ?Sized> SessionContainer for Arc<T> {
    fn resolve_session_header(
        &self,
        collection_rid: &str,
        partition_key_range_id: Option<&str>,
        preferred_regions: &[String],
    ) -> Option<String> {
        (**self).resolve_session_header(collection_rid, partition_key_range_id, preferred_regions)
    }

    fn record_session_header(
        &self,
        collection_rid: &str,
        region: Option<&str>,
        header: &str,
    ) -> usize {
        (**self).record_session_header(collection_rid, region, header)
    }

    fn register_collection(&self, name: &str, collection_rid: &str) -> Option<String> {
        (**self).register_collection(name, collection_rid)
    }

    fn clear_collection_by_name(&self, name: &str) -> usize {
        (**self).clear_collection_by_name(name)
    }
}

/// Build the registry the configuration asks for
pub fn container_from_config(
    config: &tessera_core::types::SessionConfig,
) -> Arc<dyn SessionContainer> {
    if config.region_scoped_capturing {
        Arc::new(
            RegionScopedRegistry::new(config.capacity)
                .with_regional_capacity(config.regional_capacity),
        )
    } else {
        Arc::new(SessionTokenRegistry::new(config.capacity))
    }
}
