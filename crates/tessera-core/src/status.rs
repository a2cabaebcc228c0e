//! Status and sub-status codes returned by the service
//!
//! Retry policies and the circuit breaker match on `(status, sub_status)` pairs
//! rather than on error type identity, so the codes they care about live here.

/// HTTP status code
pub type StatusCode = u16;

/// Service-specific sub-status code refining a [`StatusCode`]
pub type SubStatusCode = u32;

/// HTTP status codes
pub mod codes {
    use super::StatusCode;

    pub const OK: StatusCode = 200;
    pub const CREATED: StatusCode = 201;
    pub const NO_CONTENT: StatusCode = 204;
    pub const NOT_MODIFIED: StatusCode = 304;
    pub const BAD_REQUEST: StatusCode = 400;
    pub const UNAUTHORIZED: StatusCode = 401;
    pub const FORBIDDEN: StatusCode = 403;
    pub const NOT_FOUND: StatusCode = 404;
    pub const REQUEST_TIMEOUT: StatusCode = 408;
    pub const CONFLICT: StatusCode = 409;
    pub const GONE: StatusCode = 410;
    pub const PRECONDITION_FAILED: StatusCode = 412;
    pub const TOO_MANY_REQUESTS: StatusCode = 429;
    pub const INTERNAL_SERVER_ERROR: StatusCode = 500;
    pub const SERVICE_UNAVAILABLE: StatusCode = 503;
}

/// Sub-status codes
///
/// Values below 20000 are produced by the service, values from 20000 up are
/// generated on the client.
pub mod sub_codes {
    use super::SubStatusCode;

    pub const UNKNOWN: SubStatusCode = 0;

    // 403
    pub const WRITE_FORBIDDEN: SubStatusCode = 3;
    pub const DATABASE_ACCOUNT_NOT_FOUND: SubStatusCode = 1008;

    // 410
    pub const NAME_CACHE_IS_STALE: SubStatusCode = 1000;
    pub const PARTITION_KEY_RANGE_GONE: SubStatusCode = 1002;
    pub const COMPLETING_SPLIT_OR_MERGE: SubStatusCode = 1007;
    pub const COMPLETING_PARTITION_MIGRATION: SubStatusCode = 1008;

    // 400
    pub const PARTITION_KEY_MISMATCH: SubStatusCode = 1001;

    // 404
    pub const READ_SESSION_NOT_AVAILABLE: SubStatusCode = 1002;

    // client generated
    pub const TRANSPORT_GENERATED_410: SubStatusCode = 20001;
    pub const TIMEOUT_GENERATED_410: SubStatusCode = 20002;
    pub const TRANSPORT_GENERATED_503: SubStatusCode = 20003;
    pub const CLIENT_OPERATION_TIMEOUT: SubStatusCode = 20008;
    pub const COMPLETING_PARTITION_MIGRATION_EXCEEDED_RETRY_LIMIT: SubStatusCode = 20903;
    pub const SERVER_GENERATED_410: SubStatusCode = 21005;
    pub const SERVER_GENERATED_503: SubStatusCode = 21008;
}

/// Whether a status code denotes success
pub fn is_success(status: StatusCode) -> bool {
    (200..300).contains(&status) || status == codes::NOT_MODIFIED
}
