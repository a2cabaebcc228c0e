//! Per-operation request state shared between the retry chain and the transport

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::StatusCode;

/// Well-known header names
pub mod headers {
    pub const SESSION_TOKEN: &str = "x-ms-session-token";
    pub const SUB_STATUS: &str = "x-ms-substatus";
    pub const RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";
    pub const ACTIVITY_ID: &str = "x-ms-activity-id";
    pub const PARTITION_KEY_RANGE_ID: &str = "x-ms-documentdb-partitionkeyrangeid";
}

/// The kind of operation being performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationType {
    Read,
    ReadFeed,
    Query,
    Create,
    Replace,
    Upsert,
    Patch,
    Delete,
    Batch,
}

impl OperationType {
    /// Whether the operation only reads data
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            OperationType::Read | OperationType::ReadFeed | OperationType::Query
        )
    }

    /// Whether the operation mutates data
    pub fn is_write(self) -> bool {
        !self.is_read_only()
    }
}

/// The kind of resource addressed by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Document,
    StoredProcedure,
    Collection,
    Database,
    PartitionKeyRange,
    DatabaseAccount,
}

impl ResourceType {
    /// Metadata resources describe the account layout rather than user data
    pub fn is_metadata(self) -> bool {
        matches!(
            self,
            ResourceType::Collection
                | ResourceType::Database
                | ResourceType::PartitionKeyRange
                | ResourceType::DatabaseAccount
        )
    }
}

/// Mutable request state for one logical operation
///
/// Retry policies adjust it in `on_before_send_request` (target region, forced
/// cache refreshes) and the pipeline attaches the session token before each
/// attempt.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub activity_id: Uuid,
    pub operation: OperationType,
    pub resource_type: ResourceType,
    /// Name-based collection link, e.g. `dbs/shop/colls/orders`
    pub collection_name: Option<String>,
    /// Resolved collection resource id
    pub collection_rid: Option<String>,
    pub partition_key_range_id: Option<String>,
    /// Region the next attempt is routed to
    pub target_region: Option<String>,
    /// Regions the caller does not want this operation to use
    pub excluded_regions: Vec<String>,
    pub headers: HashMap<String, String>,
    pub force_name_cache_refresh: bool,
    pub force_partition_key_refresh: bool,
}

impl RequestContext {
    pub fn new(operation: OperationType, resource_type: ResourceType) -> Self {
        Self {
            activity_id: Uuid::new_v4(),
            operation,
            resource_type,
            collection_name: None,
            collection_rid: None,
            partition_key_range_id: None,
            target_region: None,
            excluded_regions: Vec::new(),
            headers: HashMap::new(),
            force_name_cache_refresh: false,
            force_partition_key_refresh: false,
        }
    }

    pub fn with_collection(mut self, name: impl Into<String>, rid: impl Into<String>) -> Self {
        self.collection_name = Some(name.into());
        self.collection_rid = Some(rid.into());
        self
    }

    pub fn with_partition_key_range(mut self, id: impl Into<String>) -> Self {
        self.partition_key_range_id = Some(id.into());
        self
    }

    pub fn with_excluded_regions(mut self, regions: Vec<String>) -> Self {
        self.excluded_regions = regions;
        self
    }

    pub fn is_metadata_request(&self) -> bool {
        self.resource_type.is_metadata()
    }

    pub fn session_token(&self) -> Option<&str> {
        self.headers.get(headers::SESSION_TOKEN).map(String::as_str)
    }

    pub fn set_session_token(&mut self, token: impl Into<String>) {
        self.headers
            .insert(headers::SESSION_TOKEN.to_string(), token.into());
    }

    pub fn clear_session_token(&mut self) {
        self.headers.remove(headers::SESSION_TOKEN);
    }
}

/// A successful response from the transport
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    /// Region that served the request
    pub region: Option<String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn session_token(&self) -> Option<&str> {
        self.headers.get(headers::SESSION_TOKEN).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_classification() {
        assert!(OperationType::Read.is_read_only());
        assert!(OperationType::Query.is_read_only());
        assert!(OperationType::Upsert.is_write());
        assert!(OperationType::Batch.is_write());
    }

    #[test]
    fn test_metadata_request() {
        let doc = RequestContext::new(OperationType::Read, ResourceType::Document);
        assert!(!doc.is_metadata_request());

        let coll = RequestContext::new(OperationType::Read, ResourceType::Collection);
        assert!(coll.is_metadata_request());
    }

    #[test]
    fn test_session_token_header() {
        let mut request = RequestContext::new(OperationType::Read, ResourceType::Document)
            .with_collection("dbs/shop/colls/orders", "rid-1")
            .with_partition_key_range("0");
        assert!(request.session_token().is_none());

        request.set_session_token("0:1#100#1=20");
        assert_eq!(request.session_token(), Some("0:1#100#1=20"));

        request.clear_session_token();
        assert!(request.session_token().is_none());
    }

    #[test]
    fn test_response_session_token() {
        let response = Response::new(200).with_header(headers::SESSION_TOKEN, "0:1#5");
        assert_eq!(response.session_token(), Some("0:1#5"));
    }
}
