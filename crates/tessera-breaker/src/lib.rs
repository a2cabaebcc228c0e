//! # tessera-breaker
//!
//! Client-side circuit breaker scoped to one partition key range in one
//! region. Repeated region-scoped failures open the circuit; after a cooldown a
//! single trial request is allowed through, and a success closes it again.

mod breaker;
mod classification;

pub use breaker::{CircuitState, RegionCircuitBreaker};
pub use classification::{classify, is_region_scoped, FailureScope};
