//! # tessera-core
//!
//! Core library shared by the Tessera resilience crates:
//! - Status and sub-status codes and the [`ErrorKind`] failure taxonomy
//! - Per-operation [`RequestContext`] and [`Response`]
//! - Collaborator traits for the transport and the collection cache
//! - Diagnostics side channel
//! - Resilience configuration (`resilience.yaml`) with hierarchical loading

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod failure;
pub mod request;
pub mod status;
pub mod traits;
pub mod types;

pub use config::HierarchicalConfigLoader;
pub use diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticsSink};
pub use error::{Error, Result};
pub use failure::{DocumentError, ErrorKind, NetworkFailure};
pub use request::{OperationType, RequestContext, ResourceType, Response};
pub use status::{StatusCode, SubStatusCode};
pub use traits::{CollectionCache, CollectionMetadata, TransportClient};
pub use types::ResilienceConfig;
