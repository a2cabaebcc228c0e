//! Resilience configuration types
//!
//! These types control retry budgets, session-token capture, regional routing
//! and circuit-breaker thresholds. Durations are stored as millisecond
//! integers and exposed through `Duration` accessors.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete resilience configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResilienceConfig {
    /// Session-token registry settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Backoff while waiting for a replica to catch up with our session token
    #[serde(default = "BackoffPolicy::session_default")]
    pub session_retry: BackoffPolicy,

    /// Backoff for retriable connection-level failures
    #[serde(default = "BackoffPolicy::network_default")]
    pub network_retry: BackoffPolicy,

    /// Request-rate throttling
    #[serde(default)]
    pub throttling: ThrottlingConfig,

    /// Regional routing
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Per partition × region circuit breaker
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Hedged (speculative) execution
    #[serde(default)]
    pub hedging: HedgingConfig,

    /// Whole-operation limits
    #[serde(default)]
    pub operation: OperationConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            session_retry: BackoffPolicy::session_default(),
            network_retry: BackoffPolicy::network_default(),
            throttling: ThrottlingConfig::default(),
            endpoint: EndpointConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            hedging: HedgingConfig::default(),
            operation: OperationConfig::default(),
        }
    }
}

/// Session-token registry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionConfig {
    /// Maximum number of (collection, partition key range) entries kept
    #[serde(default = "default_session_capacity")]
    pub capacity: usize,

    /// Capture tokens per region and send region-aware tokens
    #[serde(default)]
    pub region_scoped_capturing: bool,

    /// Entries kept per source region when capturing per region
    ///
    /// The per-region copies are for inspection only; requests are served
    /// from the main registry.
    #[serde(default = "default_regional_capacity")]
    pub regional_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: default_session_capacity(),
            region_scoped_capturing: false,
            regional_capacity: default_regional_capacity(),
        }
    }
}

fn default_session_capacity() -> usize {
    10_000
}

fn default_regional_capacity() -> usize {
    1_000
}

/// How delays grow between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffStrategy {
    /// Retry immediately
    None,

    /// Same delay every time
    FixedDelay,

    /// Delay multiplied by `backoff-multiplier` each time (default)
    #[default]
    ExponentialBackoff,

    /// Delay grows by `initial-backoff-ms` each time
    LinearBackoff,
}

/// Backoff schedule bounded by a total wait budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackoffPolicy {
    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Delay before the first delayed retry
    pub initial_backoff_ms: u64,

    /// Growth factor for exponential backoff
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for a single delay
    pub max_backoff_ms: u64,

    /// Total time an operation may spend retrying under this policy
    pub max_wait_ms: u64,
}

impl BackoffPolicy {
    /// Waiting for a lagging replica: 5ms doubling up to 500ms, 5s budget
    pub fn session_default() -> Self {
        Self {
            strategy: BackoffStrategy::ExponentialBackoff,
            initial_backoff_ms: 5,
            backoff_multiplier: 2.0,
            max_backoff_ms: 500,
            max_wait_ms: 5_000,
        }
    }

    /// Connection failures: 1s doubling, 30s budget
    pub fn network_default() -> Self {
        Self {
            strategy: BackoffStrategy::ExponentialBackoff,
            initial_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
            max_wait_ms: 30_000,
        }
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Throttling (429) retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThrottlingConfig {
    /// Maximum number of throttling retries per operation
    #[serde(default = "default_throttle_attempts")]
    pub max_attempts: u32,

    /// Maximum cumulative wait across throttling retries
    #[serde(default = "default_throttle_wait")]
    pub max_wait_ms: u64,

    /// Applied to the server-suggested delay
    #[serde(default = "default_throttle_multiplier")]
    pub backoff_multiplier: f64,

    /// Used when the response carries no retry-after header
    #[serde(default = "default_retry_after")]
    pub default_retry_after_ms: u64,

    /// Upper bound of random jitter added for metadata requests
    #[serde(default = "default_metadata_jitter")]
    pub metadata_jitter_ms: u64,
}

impl Default for ThrottlingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_throttle_attempts(),
            max_wait_ms: default_throttle_wait(),
            backoff_multiplier: default_throttle_multiplier(),
            default_retry_after_ms: default_retry_after(),
            metadata_jitter_ms: default_metadata_jitter(),
        }
    }
}

impl ThrottlingConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_millis(self.default_retry_after_ms)
    }
}

fn default_throttle_attempts() -> u32 {
    9
}
fn default_throttle_wait() -> u64 {
    30_000
}
fn default_throttle_multiplier() -> f64 {
    1.0
}
fn default_retry_after() -> u64 {
    100
}
fn default_metadata_jitter() -> u64 {
    50
}

/// Regional routing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EndpointConfig {
    /// Regions in order of preference
    #[serde(default)]
    pub preferred_regions: Vec<String>,

    /// How long a region stays marked unavailable
    #[serde(default = "default_unavailability_ttl")]
    pub unavailability_ttl_ms: u64,

    /// Maximum cross-region retries per operation
    #[serde(default = "default_max_failover_retries")]
    pub max_failover_retries: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            preferred_regions: Vec::new(),
            unavailability_ttl_ms: default_unavailability_ttl(),
            max_failover_retries: default_max_failover_retries(),
        }
    }
}

impl EndpointConfig {
    pub fn unavailability_ttl(&self) -> Duration {
        Duration::from_millis(self.unavailability_ttl_ms)
    }
}

fn default_unavailability_ttl() -> u64 {
    300_000 // 5 minutes
}
fn default_max_failover_retries() -> u32 {
    120
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_breaker_enabled")]
    pub enabled: bool,

    /// Consecutive region-scoped failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// A failure streak older than this restarts from one
    #[serde(default = "default_failure_window")]
    pub failure_window_ms: u64,

    /// Time an open circuit waits before allowing a trial request
    #[serde(default = "default_cooldown")]
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_breaker_enabled(),
            failure_threshold: default_failure_threshold(),
            failure_window_ms: default_failure_window(),
            cooldown_ms: default_cooldown(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

fn default_breaker_enabled() -> bool {
    true
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_failure_window() -> u64 {
    60_000
}
fn default_cooldown() -> u64 {
    15_000
}

/// Hedging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HedgingConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Time the primary attempt runs alone before the alternate starts
    #[serde(default = "default_hedge_delay")]
    pub min_delay_ms: u64,
}

impl Default for HedgingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_delay_ms: default_hedge_delay(),
        }
    }
}

impl HedgingConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}

fn default_hedge_delay() -> u64 {
    500
}

/// Whole-operation configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperationConfig {
    /// End-to-end budget covering every attempt and backoff
    #[serde(default)]
    pub end_to_end_timeout_ms: Option<u64>,
}

impl OperationConfig {
    pub fn end_to_end_timeout(&self) -> Option<Duration> {
        self.end_to_end_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resilience_config_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.session.capacity, 10_000);
        assert!(!config.session.region_scoped_capturing);
        assert_eq!(config.session.regional_capacity, 1_000);
        assert_eq!(config.session_retry.initial_backoff(), Duration::from_millis(5));
        assert_eq!(config.network_retry.initial_backoff(), Duration::from_secs(1));
        assert_eq!(config.network_retry.max_wait(), Duration::from_secs(30));
        assert_eq!(config.throttling.max_attempts, 9);
        assert!(config.circuit_breaker.enabled);
        assert!(config.operation.end_to_end_timeout().is_none());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
circuit-breaker:
  failure-threshold: 3
endpoint:
  preferred-regions: ["West US", "East US"]
"#;
        let config: ResilienceConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.cooldown_ms, 15_000);
        assert_eq!(config.endpoint.preferred_regions.len(), 2);
        assert_eq!(config.session_retry, BackoffPolicy::session_default());
    }

    #[test]
    fn test_backoff_policy_serialization() {
        let policy = BackoffPolicy::network_default();
        let yaml = serde_yaml_ng::to_string(&policy).unwrap();
        assert!(yaml.contains("initial-backoff-ms: 1000"));
        assert!(yaml.contains("strategy: exponential-backoff"));

        let back: BackoffPolicy = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn test_operation_timeout() {
        let config = OperationConfig {
            end_to_end_timeout_ms: Some(1500),
        };
        assert_eq!(config.end_to_end_timeout(), Some(Duration::from_millis(1500)));
    }
}
