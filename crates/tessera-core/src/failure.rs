//! Typed failures crossing the transport seam
//!
//! Every failure the transport hands back is a [`DocumentError`]: a single type
//! carrying the `(kind, status, sub_status, headers)` payload that retry
//! policies pattern-match on.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::request::headers;
use crate::status::{codes, sub_codes, StatusCode, SubStatusCode};

/// Coarse classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Connection-level failure or transient timeout
    TransientNetwork,
    /// The region or partition replica set looks unavailable
    RegionUnavailable,
    /// Cached collection or partition-key metadata is out of date
    StaleMetadata,
    /// The replica has not caught up with the session token we sent
    SessionStaleness,
    /// Request rate too large
    Throttled,
    /// Anything not matching a retryable shape
    Fatal,
    /// The end-to-end operation budget elapsed or the caller cancelled
    Cancelled,
    /// The caller drove the retry machinery incorrectly
    InvalidState,
}

impl ErrorKind {
    /// Classify a `(status, sub_status)` pair
    pub fn classify(
        status: StatusCode,
        sub_status: SubStatusCode,
        network: Option<NetworkFailure>,
    ) -> Self {
        if let Some(network) = network {
            return if network.retriable {
                ErrorKind::TransientNetwork
            } else {
                ErrorKind::Fatal
            };
        }

        match (status, sub_status) {
            (codes::TOO_MANY_REQUESTS, _) => ErrorKind::Throttled,
            (codes::NOT_FOUND, sub_codes::READ_SESSION_NOT_AVAILABLE) => ErrorKind::SessionStaleness,
            (codes::BAD_REQUEST, sub_codes::PARTITION_KEY_MISMATCH) => ErrorKind::StaleMetadata,
            (codes::GONE, sub_codes::NAME_CACHE_IS_STALE)
            | (codes::GONE, sub_codes::PARTITION_KEY_RANGE_GONE)
            | (codes::GONE, sub_codes::COMPLETING_SPLIT_OR_MERGE) => ErrorKind::StaleMetadata,
            (codes::GONE, sub_codes::COMPLETING_PARTITION_MIGRATION)
            | (codes::GONE, sub_codes::COMPLETING_PARTITION_MIGRATION_EXCEEDED_RETRY_LIMIT)
            | (codes::GONE, sub_codes::SERVER_GENERATED_410)
            | (codes::SERVICE_UNAVAILABLE, _)
            | (codes::FORBIDDEN, sub_codes::WRITE_FORBIDDEN)
            | (codes::FORBIDDEN, sub_codes::DATABASE_ACCOUNT_NOT_FOUND) => {
                ErrorKind::RegionUnavailable
            }
            (codes::REQUEST_TIMEOUT, sub_codes::CLIENT_OPERATION_TIMEOUT) => ErrorKind::Cancelled,
            (codes::REQUEST_TIMEOUT, _) | (codes::GONE, _) => ErrorKind::TransientNetwork,
            _ => ErrorKind::Fatal,
        }
    }

    /// How much a failure of this kind tells the caller about what went wrong
    ///
    /// Used to pick between two failures when both hedged attempts fail.
    pub fn specificity(self) -> u8 {
        match self {
            ErrorKind::Cancelled => 0,
            ErrorKind::TransientNetwork => 1,
            ErrorKind::Throttled
            | ErrorKind::RegionUnavailable
            | ErrorKind::SessionStaleness
            | ErrorKind::StaleMetadata => 2,
            ErrorKind::Fatal | ErrorKind::InvalidState => 3,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::TransientNetwork => "transient-network",
            ErrorKind::RegionUnavailable => "region-unavailable",
            ErrorKind::StaleMetadata => "stale-metadata",
            ErrorKind::SessionStaleness => "session-staleness",
            ErrorKind::Throttled => "throttled",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidState => "invalid-state",
        };
        f.write_str(name)
    }
}

/// Connection-level detail attached to transport failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFailure {
    /// Whether the request can safely be sent again
    pub retriable: bool,
}

/// A failed request
#[derive(Debug, Clone)]
pub struct DocumentError {
    kind: ErrorKind,
    status: StatusCode,
    sub_status: SubStatusCode,
    message: String,
    headers: HashMap<String, String>,
    retry_after: Option<Duration>,
    network: Option<NetworkFailure>,
    region: Option<String>,
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (status {}, sub-status {}, {})",
            self.message, self.status, self.sub_status, self.kind
        )?;
        if let Some(region) = &self.region {
            write!(f, " in region {}", region)?;
        }
        Ok(())
    }
}

impl std::error::Error for DocumentError {}

impl DocumentError {
    /// Create a service failure from its status pair
    pub fn new(status: StatusCode, sub_status: SubStatusCode, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::classify(status, sub_status, None),
            status,
            sub_status,
            message: message.into(),
            headers: HashMap::new(),
            retry_after: None,
            network: None,
            region: None,
        }
    }

    /// Build a failure from a non-success response's status and headers
    ///
    /// Reads the sub-status and retry-after headers when present.
    pub fn from_response(status: StatusCode, response_headers: HashMap<String, String>) -> Self {
        let sub_status = response_headers
            .get(headers::SUB_STATUS)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(sub_codes::UNKNOWN);
        let retry_after = response_headers
            .get(headers::RETRY_AFTER_MS)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis);

        let mut err = Self::new(status, sub_status, format!("request failed with status {}", status));
        err.headers = response_headers;
        err.retry_after = retry_after;
        err
    }

    /// Create a connection-level failure
    pub fn network(message: impl Into<String>, retriable: bool) -> Self {
        let network = NetworkFailure { retriable };
        Self {
            kind: ErrorKind::classify(
                codes::SERVICE_UNAVAILABLE,
                sub_codes::TRANSPORT_GENERATED_503,
                Some(network),
            ),
            status: codes::SERVICE_UNAVAILABLE,
            sub_status: sub_codes::TRANSPORT_GENERATED_503,
            message: message.into(),
            headers: HashMap::new(),
            retry_after: None,
            network: Some(network),
            region: None,
        }
    }

    /// Create the failure surfaced when the end-to-end budget elapses or the
    /// caller cancels
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(
            codes::REQUEST_TIMEOUT,
            sub_codes::CLIENT_OPERATION_TIMEOUT,
            message,
        )
    }

    /// Create a failure describing misuse of the retry machinery
    pub fn invalid_state(message: impl Into<String>) -> Self {
        let mut err = Self::new(codes::INTERNAL_SERVER_ERROR, sub_codes::UNKNOWN, message);
        err.kind = ErrorKind::InvalidState;
        err
    }

    /// Attach a response header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attach the server-suggested retry interval
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Attach the region that produced the failure
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn sub_status(&self) -> SubStatusCode {
        self.sub_status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn network_failure(&self) -> Option<NetworkFailure> {
        self.network
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Whether this failure matches the given status pair exactly
    pub fn is(&self, status: StatusCode, sub_status: SubStatusCode) -> bool {
        self.status == status && self.sub_status == sub_status
    }

    /// Whether this is a connection-level failure that may be retried
    pub fn is_retriable_network_error(&self) -> bool {
        self.network.map(|n| n.retriable).unwrap_or(false)
    }
}
