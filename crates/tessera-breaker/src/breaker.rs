//! Circuit breaker keyed by partition key range and region
//!
//! States:
//! - Closed: routing allowed, region-scoped failures counted
//! - Open: routing to this partition in this region suppressed
//! - HalfOpen: a single trial request granted after the cooldown
//!
//! Every transition for a key happens under that key's map entry lock, so
//! concurrent requests observing the same key never interleave a transition.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use tessera_core::diagnostics::{emit, DiagnosticEvent, DiagnosticKind, DiagnosticsSink, NoOpSink};
use tessera_core::types::CircuitBreakerConfig;
use tessera_core::{StatusCode, SubStatusCode};

use crate::classification::is_region_scoped;

/// Circuit state for one partition × region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed {
        consecutive_failures: u32,
        /// Start of the current failure streak
        first_failure_at: Option<Instant>,
    },
    Open {
        unavailable_since: Instant,
    },
    HalfOpen {
        /// When the outstanding trial request was granted
        trial_started: Instant,
    },
}

impl CircuitState {
    fn closed() -> Self {
        CircuitState::Closed {
            consecutive_failures: 0,
            first_failure_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, CircuitState::Closed { .. })
    }

    pub fn is_open(&self) -> bool {
        matches!(self, CircuitState::Open { .. })
    }

    pub fn is_half_open(&self) -> bool {
        matches!(self, CircuitState::HalfOpen { .. })
    }

    pub fn consecutive_failures(&self) -> u32 {
        match self {
            CircuitState::Closed {
                consecutive_failures,
                ..
            } => *consecutive_failures,
            _ => 0,
        }
    }
}

impl Default for CircuitState {
    fn default() -> Self {
        Self::closed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BreakerKey {
    partition_key_range_id: String,
    region: String,
}

impl BreakerKey {
    fn new(region: &str, partition_key_range_id: &str) -> Self {
        Self {
            partition_key_range_id: partition_key_range_id.to_string(),
            region: region.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct KeyState {
    state: CircuitState,
    last_failure: Option<(StatusCode, SubStatusCode)>,
}

/// Per partition × region circuit breaker
///
/// Only region-scoped failures (see [`crate::classify`]) count. The breaker
/// tracks state only; routers ask [`RegionCircuitBreaker::is_available`]
/// before dispatching.
pub struct RegionCircuitBreaker {
    config: CircuitBreakerConfig,
    states: DashMap<BreakerKey, KeyState>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl std::fmt::Debug for RegionCircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionCircuitBreaker")
            .field("config", &self.config)
            .field("keys", &self.states.len())
            .finish()
    }
}

impl RegionCircuitBreaker {
    /// Create a breaker from configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
            diagnostics: Arc::new(NoOpSink),
        }
    }

    /// Report open/close transitions to a diagnostics sink
    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn cooldown(&self) -> Duration {
        self.config.cooldown()
    }

    /// Whether a request may be routed to `region` for this partition
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open and grants
    /// exactly one trial request. A trial outstanding for longer than the cooldown is
    /// presumed lost and a new one is granted.
    pub fn is_available(&self, region: &str, partition_key_range_id: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        let key = BreakerKey::new(region, partition_key_range_id);
        let Some(mut entry) = self.states.get_mut(&key) else {
            return true;
        };

        let now = Instant::now();
        let state = entry.state;
        match state {
            CircuitState::Closed { .. } => true,
            CircuitState::Open { unavailable_since } => {
                if now.duration_since(unavailable_since) >= self.cooldown() {
                    entry.state = CircuitState::HalfOpen { trial_started: now };
                    tracing::debug!(
                        region = %region,
                        partition_key_range_id = %partition_key_range_id,
                        "circuit half-open, granting trial request"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen { trial_started } => {
                if now.duration_since(trial_started) >= self.cooldown() {
                    entry.state = CircuitState::HalfOpen { trial_started: now };
                    tracing::debug!(
                        region = %region,
                        partition_key_range_id = %partition_key_range_id,
                        "trial request outstanding past cooldown, granting another"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Whether [`is_available`](Self::is_available) would admit a request
    /// right now, without changing state
    ///
    /// Use this when a routing choice may never be acted on. The half-open
    /// trial is only claimed by `is_available`.
    pub fn would_admit(&self, region: &str, partition_key_range_id: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        let now = Instant::now();
        match self.state(region, partition_key_range_id) {
            CircuitState::Closed { .. } => true,
            CircuitState::Open {
                unavailable_since: since,
            }
            | CircuitState::HalfOpen {
                trial_started: since,
            } => now.duration_since(since) >= self.cooldown(),
        }
    }

    /// Record a failed request
    ///
    /// Returns whether the failure was region-scoped and therefore counted.
    /// The return value is meant for diagnostics, not control flow.
    pub fn try_record_failure(
        &self,
        region: &str,
        partition_key_range_id: &str,
        status: StatusCode,
        sub_status: SubStatusCode,
    ) -> bool {
        if !self.config.enabled || !is_region_scoped(status, sub_status) {
            return false;
        }

        let now = Instant::now();
        let threshold = self.config.failure_threshold.max(1);
        let window = self.config.failure_window();

        let opened = {
            let mut entry = self
                .states
                .entry(BreakerKey::new(region, partition_key_range_id))
                .or_insert(KeyState {
                    state: CircuitState::closed(),
                    last_failure: None,
                });
            entry.last_failure = Some((status, sub_status));

            let state = entry.state;
            match state {
                CircuitState::Closed {
                    consecutive_failures,
                    first_failure_at,
                } => {
                    let (failures, streak_start) = match first_failure_at {
                        Some(start) if now.duration_since(start) <= window => {
                            (consecutive_failures + 1, start)
                        }
                        _ => (1, now),
                    };

                    if failures >= threshold {
                        entry.state = CircuitState::Open {
                            unavailable_since: now,
                        };
                        true
                    } else {
                        entry.state = CircuitState::Closed {
                            consecutive_failures: failures,
                            first_failure_at: Some(streak_start),
                        };
                        false
                    }
                }
                CircuitState::HalfOpen { .. } => {
                    entry.state = CircuitState::Open {
                        unavailable_since: now,
                    };
                    true
                }
                CircuitState::Open { .. } => false,
            }
        };

        if opened {
            tracing::info!(
                region = %region,
                partition_key_range_id = %partition_key_range_id,
                status,
                sub_status,
                "circuit opened"
            );
            emit(
                self.diagnostics.as_ref(),
                DiagnosticEvent::new(DiagnosticKind::CircuitOpened {
                    region: region.to_string(),
                    partition_key_range_id: partition_key_range_id.to_string(),
                }),
            );
        }

        true
    }

    /// Record a successful request, closing the circuit from any state
    pub fn try_record_success(&self, region: &str, partition_key_range_id: &str) {
        if !self.config.enabled {
            return;
        }

        let previous = self
            .states
            .remove(&BreakerKey::new(region, partition_key_range_id));

        if let Some((_, KeyState { state, .. })) = previous {
            if !state.is_closed() {
                tracing::info!(
                    region = %region,
                    partition_key_range_id = %partition_key_range_id,
                    "circuit closed"
                );
                emit(
                    self.diagnostics.as_ref(),
                    DiagnosticEvent::new(DiagnosticKind::CircuitClosed {
                        region: region.to_string(),
                        partition_key_range_id: partition_key_range_id.to_string(),
                    }),
                );
            }
        }
    }

    /// Current state; keys never seen are closed
    pub fn state(&self, region: &str, partition_key_range_id: &str) -> CircuitState {
        self.states
            .get(&BreakerKey::new(region, partition_key_range_id))
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// Last counted failure for a key
    pub fn last_failure(
        &self,
        region: &str,
        partition_key_range_id: &str,
    ) -> Option<(StatusCode, SubStatusCode)> {
        self.states
            .get(&BreakerKey::new(region, partition_key_range_id))
            .and_then(|entry| entry.last_failure)
    }

    /// Regions whose circuit for this partition is open or half-open, sorted
    pub fn unavailable_regions(&self, partition_key_range_id: &str) -> Vec<String> {
        let mut regions: Vec<String> = self
            .states
            .iter()
            .filter(|entry| {
                entry.key().partition_key_range_id == partition_key_range_id
                    && !entry.state.is_closed()
            })
            .map(|entry| entry.key().region.clone())
            .collect();
        regions.sort();
        regions
    }

    /// Forget every key
    pub fn reset(&self) {
        self.states.clear();
    }
}

impl Default for RegionCircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
