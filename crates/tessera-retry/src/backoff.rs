//! Backoff schedules bounded by a wait budget

use std::time::Duration;

use tokio::time::Instant;

use tessera_core::types::{BackoffPolicy, BackoffStrategy};

/// Delay before retry number `attempt` (1-indexed) under `policy`
///
/// # Example
///
/// ```rust
/// use tessera_core::types::BackoffPolicy;
/// use tessera_retry::calculate_delay;
///
/// let policy = BackoffPolicy::network_default();
/// assert_eq!(calculate_delay(&policy, 1).as_millis(), 1000);
/// assert_eq!(calculate_delay(&policy, 2).as_millis(), 2000);
/// ```
pub fn calculate_delay(policy: &BackoffPolicy, attempt: u32) -> Duration {
    let attempt_index = attempt.saturating_sub(1);

    let base_delay_ms = match policy.strategy {
        BackoffStrategy::None => 0,

        BackoffStrategy::FixedDelay => policy.initial_backoff_ms,

        BackoffStrategy::ExponentialBackoff => {
            let multiplier = policy.backoff_multiplier.powf(attempt_index as f64);
            (policy.initial_backoff_ms as f64 * multiplier) as u64
        }

        BackoffStrategy::LinearBackoff => policy
            .initial_backoff_ms
            .saturating_mul(attempt_index as u64 + 1),
    };

    Duration::from_millis(base_delay_ms.min(policy.max_backoff_ms))
}

/// Stateful backoff that stops once the policy's total wait budget is spent
///
/// The budget clock starts at the first call to [`next_delay`](Self::next_delay),
/// i.e. at the first failure, and each delay is clipped to what remains.
#[derive(Debug, Clone)]
pub struct BudgetedBackoff {
    policy: BackoffPolicy,
    immediate_first: bool,
    retries: u32,
    started: Option<Instant>,
}

impl BudgetedBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            immediate_first: false,
            retries: 0,
            started: None,
        }
    }

    /// Make the first retry immediate; the schedule starts with the second
    pub fn with_immediate_first_retry(mut self) -> Self {
        self.immediate_first = true;
        self
    }

    /// Next delay, or `None` once the wait budget has elapsed
    pub fn next_delay(&mut self) -> Option<Duration> {
        let now = Instant::now();
        let started = *self.started.get_or_insert(now);
        let elapsed = now.duration_since(started);
        let budget = self.policy.max_wait();
        if elapsed >= budget {
            return None;
        }
        let remaining = budget.saturating_sub(elapsed);

        self.retries += 1;
        let step = if self.immediate_first {
            if self.retries == 1 {
                return Some(Duration::ZERO);
            }
            self.retries - 1
        } else {
            self.retries
        };

        Some(calculate_delay(&self.policy, step).min(remaining))
    }

    /// Retries handed out so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Time since the first failure
    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }
}
