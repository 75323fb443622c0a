use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vigil_core::{Lane, Result, TaskStatus, VigilError};
use vigil_queue::{LaneQueue, TaskOutput};
use vigil_resilience::{OpMetrics, ResilientExecutor};

use crate::state::{HeartbeatState, OneTimeReminder, Reminder, SchedulerState};
use crate::HEARTBEAT_ID;

/// Rolling assistant history cap (FIFO).
pub const HISTORY_CAP: usize = 50;

/// One-time reminders must be at least this far in the future at creation.
const MIN_LEAD_MS: i64 = 2_000;

/// Executes a scheduled prompt as an agent run. The scheduler submits the
/// returned future to the lane queue; it never runs work inline on the tick.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, prompt: String) -> Result<TaskOutput>;
}

/// Health probe payload.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerHealth {
    pub ops: BTreeMap<String, OpMetrics>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub running: Vec<String>,
    pub one_time_count: usize,
    pub heartbeat: HeartbeatState,
}

struct SchedulerInner {
    tick_seconds: u64,
    state_path: PathBuf,
    reminders: TokioMutex<Vec<Reminder>>,
    state: TokioMutex<SchedulerState>,
    /// Re-entrancy guard: ids with an active run.
    running: Mutex<HashSet<String>>,
    /// Rolling assistant replies from scheduled runs.
    history: Mutex<VecDeque<String>>,
    last_tick_at: Mutex<Option<DateTime<Utc>>>,
    executor: Arc<ResilientExecutor>,
    queue: LaneQueue,
    invoker: Arc<dyn AgentInvoker>,
}

/// The tick-driven scheduler.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    tick_task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Construct a scheduler. Persisted state is loaded and validated; when
    /// no state file exists yet, `default_heartbeat` seeds the heartbeat.
    pub fn new(
        state_path: impl Into<PathBuf>,
        tick_seconds: u64,
        reminders: Vec<Reminder>,
        default_heartbeat: Option<HeartbeatState>,
        executor: Arc<ResilientExecutor>,
        queue: LaneQueue,
        invoker: Arc<dyn AgentInvoker>,
    ) -> Self {
        let state_path = state_path.into();
        let had_file = state_path.exists();
        let mut state = SchedulerState::load(&state_path);
        if !had_file {
            if let Some(hb) = default_heartbeat {
                state.heartbeat = HeartbeatState {
                    interval_minutes: hb.interval_minutes.max(1),
                    ..hb
                };
            }
        }

        Self {
            inner: Arc::new(SchedulerInner {
                tick_seconds: tick_seconds.max(1),
                state_path,
                reminders: TokioMutex::new(reminders),
                state: TokioMutex::new(state),
                running: Mutex::new(HashSet::new()),
                history: Mutex::new(VecDeque::new()),
                last_tick_at: Mutex::new(None),
                executor,
                queue,
                invoker,
            }),
            tick_task: Mutex::new(None),
        }
    }

    /// Start the tick loop. Idempotent; `stop` ends it.
    pub fn start(&self) {
        let mut slot = self.tick_task.lock();
        if slot.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        info!(tick_seconds = inner.tick_seconds, "scheduler started");
        *slot = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(inner.tick_seconds));
            loop {
                interval.tick().await;
                let now_ms = Utc::now().timestamp_millis();
                SchedulerInner::tick_at(&inner, now_ms).await;
            }
        }));
    }

    /// Stop the tick loop. In-flight runs complete on their own.
    pub fn stop(&self) {
        if let Some(handle) = self.tick_task.lock().take() {
            handle.abort();
            info!("scheduler stopped");
        }
    }

    /// Drive one tick at an explicit wall-clock (epoch ms). The timer loop
    /// calls this every `tick_seconds`; tests drive it directly.
    pub async fn tick_at(&self, now_ms: i64) {
        SchedulerInner::tick_at(&self.inner, now_ms).await;
    }

    // ── Public operations ──────────────────────────────────────

    /// Enable the heartbeat. The interval is floored to ≥ 1 minute; the
    /// next-run entry is cleared so the next tick reinitializes it.
    pub async fn set_heartbeat(&self, interval_minutes: u64, prompt: Option<String>) {
        let mut state = self.inner.state.lock().await;
        let prompt = prompt.unwrap_or_else(|| state.heartbeat.prompt.clone());
        state.heartbeat = HeartbeatState {
            enabled: true,
            interval_minutes: interval_minutes.max(1),
            prompt,
        };
        state.next_run_by_id.remove(HEARTBEAT_ID);
        self.inner.persist(&mut state);
    }

    pub async fn disable_heartbeat(&self) {
        let mut state = self.inner.state.lock().await;
        state.heartbeat.enabled = false;
        state.next_run_by_id.remove(HEARTBEAT_ID);
        self.inner.persist(&mut state);
    }

    /// Schedule a one-time reminder `minutes` from now.
    pub async fn schedule_one_time_in(
        &self,
        minutes: u64,
        prompt: impl Into<String>,
        lane: Lane,
    ) -> Result<String> {
        let run_at_ms = Utc::now().timestamp_millis() + (minutes as i64) * 60_000;
        self.schedule_one_time_at(run_at_ms, prompt, lane).await
    }

    /// Schedule a one-time reminder at an absolute epoch-ms time, which
    /// must be more than 2 s in the future.
    pub async fn schedule_one_time_at(
        &self,
        run_at_ms: i64,
        prompt: impl Into<String>,
        lane: Lane,
    ) -> Result<String> {
        let now_ms = Utc::now().timestamp_millis();
        if run_at_ms <= now_ms + MIN_LEAD_MS {
            return Err(VigilError::InvalidInput(format!(
                "one-time reminder must be scheduled more than {}s in the future",
                MIN_LEAD_MS / 1000
            )));
        }
        let id = Uuid::new_v4().to_string();
        let mut state = self.inner.state.lock().await;
        state.one_time_reminders.push(OneTimeReminder {
            id: id.clone(),
            prompt: prompt.into(),
            run_at_ms,
            lane,
            enabled: true,
        });
        self.inner.persist(&mut state);
        info!(reminder_id = %id, run_at_ms, %lane, "scheduled one-time reminder");
        Ok(id)
    }

    /// Cancel a pending one-time reminder.
    pub async fn cancel_one_time(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        let before = state.one_time_reminders.len();
        state.one_time_reminders.retain(|r| r.id != id);
        let removed = state.one_time_reminders.len() < before;
        if removed {
            self.inner.persist(&mut state);
        }
        removed
    }

    /// Pending one-time reminders, ordered by run time.
    pub async fn list_one_time(&self) -> Vec<OneTimeReminder> {
        let state = self.inner.state.lock().await;
        let mut list = state.one_time_reminders.clone();
        list.sort_by_key(|r| r.run_at_ms);
        list
    }

    /// Enable or disable a configured recurring reminder. Re-enabling
    /// clears the next-run entry so the next tick reinitializes it to
    /// `now + interval`.
    pub async fn set_reminder_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut reminders = self.inner.reminders.lock().await;
        let Some(reminder) = reminders.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        reminder.enabled = enabled;
        drop(reminders);

        let mut state = self.inner.state.lock().await;
        state.next_run_by_id.remove(id);
        self.inner.persist(&mut state);
        true
    }

    /// Rolling assistant history from scheduled runs (oldest first).
    pub fn assistant_history(&self) -> Vec<String> {
        self.inner.history.lock().iter().cloned().collect()
    }

    /// Executor metrics plus tick/run bookkeeping.
    pub async fn health_metrics(&self) -> SchedulerHealth {
        let state = self.inner.state.lock().await;
        SchedulerHealth {
            ops: self.inner.executor.all_metrics(),
            last_tick_at: *self.inner.last_tick_at.lock(),
            running: self.inner.running.lock().iter().cloned().collect(),
            one_time_count: state.one_time_reminders.len(),
            heartbeat: state.heartbeat.clone(),
        }
    }
}

impl SchedulerInner {
    /// Persist under the state lock so every write observes the mutation
    /// that scheduled it. Failures are logged; the next mutation retries.
    fn persist(&self, state: &mut SchedulerState) {
        if let Err(e) = state.save(&self.state_path) {
            warn!(error = %e, path = %self.state_path.display(), "failed to persist scheduler state");
        }
    }

    async fn tick_at(inner: &Arc<Self>, now_ms: i64) {
        *inner.last_tick_at.lock() = Some(Utc::now());

        let mut to_run: Vec<(String, String, Lane)> = Vec::new();
        {
            let mut state = inner.state.lock().await;
            let mut dirty = false;

            // 1. Effective recurring set: enabled reminders ∪ heartbeat.
            let mut effective: Vec<Reminder> = inner
                .reminders
                .lock()
                .await
                .iter()
                .filter(|r| r.enabled)
                .cloned()
                .collect();
            if state.heartbeat.enabled {
                effective.push(Reminder {
                    id: HEARTBEAT_ID.to_string(),
                    prompt: state.heartbeat.prompt.clone(),
                    interval_minutes: state.heartbeat.interval_minutes,
                    lane: Lane::Background,
                    enabled: true,
                });
            }

            // 2. Due-time evaluation; next-run values only move forward.
            for r in effective {
                let interval_ms = (r.interval_minutes.max(1) as i64) * 60_000;
                match state.next_run_by_id.get(&r.id).copied() {
                    None => {
                        state.next_run_by_id.insert(r.id.clone(), now_ms + interval_ms);
                        dirty = true;
                    }
                    Some(next) if now_ms < next => {}
                    Some(_) => {
                        state.next_run_by_id.insert(r.id.clone(), now_ms + interval_ms);
                        dirty = true;
                        to_run.push((r.id, r.prompt, r.lane));
                    }
                }
            }

            // 3. Due one-time reminders: removed before dispatch
            // (at-most-once across crashes); skipped while still running.
            let running = inner.running.lock();
            let due: Vec<OneTimeReminder> = state
                .one_time_reminders
                .iter()
                .filter(|r| r.enabled && now_ms >= r.run_at_ms && !running.contains(&r.id))
                .cloned()
                .collect();
            drop(running);
            for r in due {
                state.one_time_reminders.retain(|x| x.id != r.id);
                dirty = true;
                to_run.push((r.id, r.prompt, r.lane));
            }

            if dirty {
                inner.persist(&mut state);
            }
        }

        for (id, prompt, lane) in to_run {
            Self::spawn_run(inner, id, prompt, lane);
        }
    }

    /// Launch one reminder run unless the id is already running. The run
    /// wraps in the resilient executor under `scheduler:<id>` and submits
    /// the agent invocation to the reminder's lane.
    fn spawn_run(inner: &Arc<Self>, id: String, prompt: String, lane: Lane) {
        {
            let mut running = inner.running.lock();
            if !running.insert(id.clone()) {
                debug!(reminder_id = %id, "reminder already running, skipping");
                return;
            }
        }

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let op = format!("scheduler:{id}");
            let outcome = inner
                .executor
                .execute(&op, || {
                    let invoker = Arc::clone(&inner.invoker);
                    let queue = inner.queue.clone();
                    let prompt = prompt.clone();
                    async move {
                        let submitted =
                            queue.submit(lane, async move { invoker.invoke(prompt).await });
                        let result = submitted.result().await;
                        match result.status {
                            TaskStatus::Completed => Ok(result.reply),
                            TaskStatus::Failed => Err(VigilError::Scheduler(
                                result.error.unwrap_or_else(|| "task failed".into()),
                            )),
                        }
                    }
                })
                .await;

            match outcome {
                Ok(reply) => {
                    debug!(reminder_id = %id, "scheduled run completed");
                    let mut history = inner.history.lock();
                    history.push_back(reply);
                    while history.len() > HISTORY_CAP {
                        history.pop_front();
                    }
                }
                Err(e) => {
                    error!(target: "sched", "[SCHED][ERROR] {id}: {e}");
                }
            }

            inner.running.lock().remove(&id);
        });
    }
}
