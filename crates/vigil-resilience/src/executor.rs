use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use vigil_core::{Result, VigilError};

use crate::policy::ResiliencePolicy;

/// Per-operation health metrics. Monotonic; never reset except that the
/// circuit-open transition clears `consecutive_failures`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OpMetrics {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub circuit_open_events: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_succeeded_at: Option<DateTime<Utc>>,
    pub last_failed_at: Option<DateTime<Utc>>,
}

/// Mutable state tracked per named operation.
#[derive(Debug, Default)]
struct OpState {
    metrics: OpMetrics,
    open_until: Option<Instant>,
}

/// Runs operations under a retry + circuit breaker policy.
///
/// Mutations to metrics and circuit state are serialized behind a mutex and
/// never held across an await; readers get a consistent snapshot copy.
pub struct ResilientExecutor {
    policy: ResiliencePolicy,
    ops: Mutex<BTreeMap<String, OpState>>,
}

impl ResilientExecutor {
    pub fn new(policy: ResiliencePolicy) -> Self {
        Self {
            policy,
            ops: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    /// Run `f` under the policy. Retries up to `max_attempts - 1` times with
    /// exponential backoff and jitter. If the circuit for `op` is open, fails
    /// fast with [`VigilError::CircuitOpen`] without invoking `f`. Final
    /// failures re-raise the last underlying error.
    pub async fn execute<T, F, Fut>(&self, op: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // Circuit check + start bookkeeping, one lock.
        {
            let mut ops = self.ops.lock();
            let state = ops.entry(op.to_string()).or_default();
            if let Some(open_until) = state.open_until {
                let now = Instant::now();
                if now < open_until {
                    let retry_in_ms = (open_until - now).as_millis() as u64;
                    debug!(op, retry_in_ms, "circuit open, failing fast");
                    return Err(VigilError::CircuitOpen {
                        op: op.to_string(),
                        retry_in_ms,
                    });
                }
            }
            state.metrics.total += 1;
            state.metrics.last_started_at = Some(Utc::now());
        }

        let max_attempts = self.policy.retry.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match f().await {
                Ok(value) => {
                    self.record_success(op);
                    return Ok(value);
                }
                Err(err) if attempt < max_attempts => {
                    let delay = self.jittered_delay(attempt);
                    warn!(
                        op,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, retrying"
                    );
                    {
                        let mut ops = self.ops.lock();
                        ops.entry(op.to_string()).or_default().metrics.retries += 1;
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.record_final_failure(op, &err);
                    return Err(err);
                }
            }
        }
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.policy.retry.delay_ms(attempt);
        let ratio = self.policy.retry.jitter_ratio;
        if ratio <= 0.0 || base == 0 {
            return Duration::from_millis(base);
        }
        use rand::Rng;
        let factor: f64 = rand::thread_rng().gen_range(-ratio..=ratio);
        let jittered = (base as f64 * (1.0 + factor)).max(0.0);
        Duration::from_millis(jittered as u64)
    }

    fn record_success(&self, op: &str) {
        let mut ops = self.ops.lock();
        let state = ops.entry(op.to_string()).or_default();
        state.metrics.successes += 1;
        state.metrics.consecutive_failures = 0;
        state.metrics.last_succeeded_at = Some(Utc::now());
        if state.open_until.take().is_some() {
            debug!(op, "circuit closed after successful probe");
        }
    }

    fn record_final_failure(&self, op: &str, err: &VigilError) {
        let mut ops = self.ops.lock();
        let state = ops.entry(op.to_string()).or_default();
        state.metrics.failures += 1;
        state.metrics.consecutive_failures += 1;
        state.metrics.last_error = Some(err.to_string());
        state.metrics.last_failed_at = Some(Utc::now());

        let threshold = self.policy.circuit_breaker.failure_threshold;
        if threshold > 0 && state.metrics.consecutive_failures >= threshold {
            state.open_until =
                Some(Instant::now() + Duration::from_millis(self.policy.circuit_breaker.cooldown_ms));
            state.metrics.consecutive_failures = 0;
            state.metrics.circuit_open_events += 1;
            warn!(
                op,
                cooldown_ms = self.policy.circuit_breaker.cooldown_ms,
                "circuit opened after repeated failures"
            );
        }
    }

    /// Snapshot of one operation's metrics.
    pub fn metrics(&self, op: &str) -> Option<OpMetrics> {
        self.ops.lock().get(op).map(|s| s.metrics.clone())
    }

    /// Snapshot of all operations' metrics.
    pub fn all_metrics(&self) -> BTreeMap<String, OpMetrics> {
        self.ops
            .lock()
            .iter()
            .map(|(op, state)| (op.clone(), state.metrics.clone()))
            .collect()
    }

    /// Whether the circuit for `op` is currently open.
    pub fn is_open(&self, op: &str) -> bool {
        self.ops
            .lock()
            .get(op)
            .and_then(|s| s.open_until)
            .is_some_and(|until| Instant::now() < until)
    }
}
