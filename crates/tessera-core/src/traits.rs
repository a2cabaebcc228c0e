//! Collaborator trait definitions
//!
//! The transport and the metadata caches are implemented outside this
//! workspace; the retry machinery only sees them through these traits.

use async_trait::async_trait;

use crate::failure::DocumentError;
use crate::request::{RequestContext, Response};

/// Sends one attempt of a request
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Send the request and return the response or a typed failure
    async fn send(&self, request: &RequestContext) -> Result<Response, DocumentError>;
}

/// Resolved collection metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMetadata {
    /// Name-based link, e.g. `dbs/shop/colls/orders`
    pub name: String,
    /// Resource id assigned by the service; changes when a collection is
    /// deleted and recreated under the same name
    pub resource_id: String,
    /// Partition key paths, e.g. `["/tenantId"]`
    pub partition_key_paths: Vec<String>,
}

/// Name-to-id and partition-key-definition cache
#[async_trait]
pub trait CollectionCache: Send + Sync {
    /// Force a refresh of the collection name → resource id mapping
    async fn refresh_collection(
        &self,
        collection_name: &str,
    ) -> Result<CollectionMetadata, DocumentError>;

    /// Force a refresh of the collection's partition key definition
    async fn refresh_partition_key_definition(
        &self,
        collection_name: &str,
    ) -> Result<CollectionMetadata, DocumentError>;
}

#[async_trait]
impl<T: TransportClient + ?Sized> TransportClient for std::sync::Arc<T> {
    async fn send(&self, request: &RequestContext) -> Result<Response, DocumentError> {
        (**self).send(request).await
    }
}

#[async_trait]
impl<T: CollectionCache + ?Sized> CollectionCache for std::sync::Arc<T> {
    async fn refresh_collection(
        &self,
        collection_name: &str,
    ) -> Result<CollectionMetadata, DocumentError> {
        (**self).refresh_collection(collection_name).await
    }

    async fn refresh_partition_key_definition(
        &self,
        collection_name: &str,
    ) -> Result<CollectionMetadata, DocumentError> {
        (**self).refresh_partition_key_definition(collection_name).await
    }
}
