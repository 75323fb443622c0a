use serde::{Deserialize, Serialize};

/// Retry behavior for a single executor instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first. 1 = no retries.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Uniform jitter applied to each delay, as a fraction (0.2 = ±20%).
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 30_000,
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay after attempt `attempt` (1-based):
    /// `min(max_delay, base * 2^(attempt-1))`.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(32);
        let raw = self.base_delay_ms.saturating_mul(1u64 << exp);
        raw.min(self.max_delay_ms)
    }
}

/// Circuit breaker behavior for a single executor instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerPolicy {
    /// Consecutive final failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open once tripped.
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
        }
    }
}

/// Combined policy, immutable per executor instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResiliencePolicy {
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerPolicy,
}
