//! Preferred-region routing with expiring unavailability marks

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use tessera_core::types::EndpointConfig;
use tessera_core::OperationType;

/// Expiry of the read and write unavailability marks of one region
#[derive(Debug, Clone, Copy, Default)]
struct UnavailabilityMark {
    reads_until: Option<Instant>,
    writes_until: Option<Instant>,
}

impl UnavailabilityMark {
    fn blocks(&self, operation: OperationType, now: Instant) -> bool {
        let until = if operation.is_write() {
            self.writes_until
        } else {
            self.reads_until
        };
        until.map(|t| now < t).unwrap_or(false)
    }

    fn expired(&self, now: Instant) -> bool {
        let live = |t: Option<Instant>| t.map(|t| now < t).unwrap_or(false);
        !live(self.reads_until) && !live(self.writes_until)
    }
}

/// Account regions in preference order and which of them are currently
/// marked unavailable
///
/// Shared by every operation of a client.
#[derive(Debug)]
pub struct RegionalEndpoints {
    preferred_regions: Vec<String>,
    ttl: Duration,
    marks: DashMap<String, UnavailabilityMark>,
}

impl RegionalEndpoints {
    pub fn new(config: &EndpointConfig) -> Self {
        Self {
            preferred_regions: config.preferred_regions.clone(),
            ttl: config.unavailability_ttl(),
            marks: DashMap::new(),
        }
    }

    pub fn preferred_regions(&self) -> &[String] {
        &self.preferred_regions
    }

    pub fn mark_unavailable_for_reads(&self, region: &str) {
        let until = Instant::now() + self.ttl;
        self.marks.entry(region.to_string()).or_default().reads_until = Some(until);
        tracing::info!(region = %region, ttl_ms = self.ttl.as_millis() as u64, "region marked unavailable for reads");
    }

    pub fn mark_unavailable_for_writes(&self, region: &str) {
        let until = Instant::now() + self.ttl;
        self.marks.entry(region.to_string()).or_default().writes_until = Some(until);
        tracing::info!(region = %region, ttl_ms = self.ttl.as_millis() as u64, "region marked unavailable for writes");
    }

    /// Whether `region` may serve `operation` right now
    pub fn is_available_for(&self, region: &str, operation: OperationType) -> bool {
        let now = Instant::now();
        let blocked = match self.marks.get(region) {
            Some(mark) => mark.blocks(operation, now),
            None => return true,
        };
        if !blocked {
            self.marks.remove_if(region, |_, mark| mark.expired(now));
        }
        !blocked
    }

    /// Pick the region the next attempt of `operation` goes to
    ///
    /// Returns the first preferred region that is not excluded, not marked
    /// unavailable for the operation kind, and accepted by `is_routable`.
    /// When every candidate is filtered out, falls back to the first
    /// preferred region that is not excluded. `None` when nothing is left.
    pub fn resolve(
        &self,
        operation: OperationType,
        excluded: &[String],
        is_routable: impl Fn(&str) -> bool,
    ) -> Option<String> {
        let mut candidates = self
            .preferred_regions
            .iter()
            .filter(|region| !excluded.contains(*region));

        let fallback = candidates.clone().next();

        candidates
            .find(|region| {
                self.is_available_for(region.as_str(), operation) && is_routable(region.as_str())
            })
            .or(fallback)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(regions: &[&str]) -> RegionalEndpoints {
        RegionalEndpoints::new(&EndpointConfig {
            preferred_regions: regions.iter().map(|r| r.to_string()).collect(),
            unavailability_ttl_ms: 1_000,
            max_failover_retries: 3,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_marks_are_per_operation_kind_and_expire() {
        let endpoints = endpoints(&["East US", "West US"]);
        endpoints.mark_unavailable_for_writes("East US");

        assert!(endpoints.is_available_for("East US", OperationType::Read));
        assert!(!endpoints.is_available_for("East US", OperationType::Create));

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(endpoints.is_available_for("East US", OperationType::Create));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_skips_unavailable_and_excluded() {
        let endpoints = endpoints(&["East US", "West US", "North Europe"]);
        assert_eq!(
            endpoints.resolve(OperationType::Read, &[], |_| true).as_deref(),
            Some("East US")
        );

        endpoints.mark_unavailable_for_reads("East US");
        assert_eq!(
            endpoints.resolve(OperationType::Read, &[], |_| true).as_deref(),
            Some("West US")
        );

        let excluded = vec!["West US".to_string()];
        assert_eq!(
            endpoints
                .resolve(OperationType::Read, &excluded, |_| true)
                .as_deref(),
            Some("North Europe")
        );

        assert_eq!(
            endpoints
                .resolve(OperationType::Read, &[], |r| r != "West US")
                .as_deref(),
            Some("North Europe")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_falls_back_to_first_remaining() {
        let endpoints = endpoints(&["East US", "West US"]);
        endpoints.mark_unavailable_for_reads("East US");
        endpoints.mark_unavailable_for_reads("West US");

        assert_eq!(
            endpoints.resolve(OperationType::Read, &[], |_| true).as_deref(),
            Some("East US")
        );

        let all = vec!["East US".to_string(), "West US".to_string()];
        assert!(endpoints.resolve(OperationType::Read, &all, |_| true).is_none());
    }

    #[test]
    fn test_no_preferred_regions() {
        let endpoints = endpoints(&[]);
        assert!(endpoints.resolve(OperationType::Read, &[], |_| true).is_none());
        assert!(endpoints.is_available_for("anywhere", OperationType::Create));
    }
}
