//! The built-in retry policies
//!
//! Each policy absorbs one failure class and passes everything else to the
//! next policy in the chain.

mod clearing_session;
mod network;
mod partition_key_mismatch;
mod regional_failover;
mod session_not_available;
mod stale_metadata;
mod throttling;

pub use clearing_session::ClearingSessionOnRenamePolicy;
pub use network::TransientNetworkPolicy;
pub use partition_key_mismatch::PartitionKeyMismatchPolicy;
pub use regional_failover::RegionalFailoverPolicy;
pub use session_not_available::SessionNotAvailablePolicy;
pub use stale_metadata::StalePartitionMetadataPolicy;
pub use throttling::ThrottlingPolicy;
