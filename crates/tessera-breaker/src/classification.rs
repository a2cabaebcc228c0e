//! Which failures count against a partition × region circuit

use serde::Serialize;
use tessera_core::status::{codes, sub_codes};
use tessera_core::{StatusCode, SubStatusCode};

/// Scope a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureScope {
    /// The region cannot currently serve this partition
    Region,
    /// Timeouts, throttling, cancellation and everything else
    Transient,
}

/// Classify a `(status, sub_status)` pair
///
/// The match is exact. Anything outside these four shapes must not open a
/// circuit.
pub fn classify(status: StatusCode, sub_status: SubStatusCode) -> FailureScope {
    match (status, sub_status) {
        (codes::GONE, sub_codes::COMPLETING_PARTITION_MIGRATION)
        | (codes::GONE, sub_codes::COMPLETING_PARTITION_MIGRATION_EXCEEDED_RETRY_LIMIT)
        | (codes::GONE, sub_codes::SERVER_GENERATED_410)
        | (codes::SERVICE_UNAVAILABLE, sub_codes::SERVER_GENERATED_503) => FailureScope::Region,
        _ => FailureScope::Transient,
    }
}

pub fn is_region_scoped(status: StatusCode, sub_status: SubStatusCode) -> bool {
    classify(status, sub_status) == FailureScope::Region
}
