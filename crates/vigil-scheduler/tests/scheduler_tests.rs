use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use vigil_core::{Lane, Result, VigilError};
use vigil_queue::{LaneQueue, TaskOutput};
use vigil_resilience::{CircuitBreakerPolicy, ResiliencePolicy, ResilientExecutor, RetryPolicy};
use vigil_scheduler::{AgentInvoker, Reminder, Scheduler, SchedulerState, HEARTBEAT_ID};

/// Records invocations; optional per-run delay and failure injection.
struct MockInvoker {
    invocations: AtomicU32,
    prompts: Mutex<Vec<String>>,
    delay_ms: u64,
    fail: bool,
}

impl MockInvoker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicU32::new(0),
            prompts: Mutex::new(vec![]),
            delay_ms: 0,
            fail: false,
        })
    }

    fn slow(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicU32::new(0),
            prompts: Mutex::new(vec![]),
            delay_ms,
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicU32::new(0),
            prompts: Mutex::new(vec![]),
            delay_ms: 0,
            fail: true,
        })
    }

    fn count(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentInvoker for MockInvoker {
    async fn invoke(&self, prompt: String) -> Result<TaskOutput> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.clone());
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail {
            return Err(VigilError::LlmProvider("model offline".into()));
        }
        Ok(TaskOutput {
            reply: format!("ran: {prompt}"),
            history: vec![],
        })
    }
}

fn quick_executor() -> Arc<ResilientExecutor> {
    Arc::new(ResilientExecutor::new(ResiliencePolicy {
        retry: RetryPolicy {
            max_attempts: 1,
            base_delay_ms: 1,
            max_delay_ms: 10,
            jitter_ratio: 0.0,
        },
        circuit_breaker: CircuitBreakerPolicy {
            failure_threshold: 100,
            cooldown_ms: 1000,
        },
    }))
}

fn scheduler_with(
    dir: &tempfile::TempDir,
    reminders: Vec<Reminder>,
    invoker: Arc<MockInvoker>,
) -> Scheduler {
    Scheduler::new(
        dir.path().join("scheduler.json"),
        1,
        reminders,
        None,
        quick_executor(),
        LaneQueue::new(),
        invoker,
    )
}

fn ping_reminder() -> Reminder {
    Reminder {
        id: "ping".into(),
        prompt: "ping the operator".into(),
        interval_minutes: 1,
        lane: Lane::Background,
        enabled: true,
    }
}

async fn wait_for(invoker: &MockInvoker, count: u32) {
    for _ in 0..200 {
        if invoker.count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("invoker never reached {count} invocations (got {})", invoker.count());
}

#[tokio::test]
async fn first_tick_initializes_then_next_due_tick_runs() {
    let dir = tempfile::tempdir().unwrap();
    let invoker = MockInvoker::new();
    let scheduler = scheduler_with(&dir, vec![ping_reminder()], Arc::clone(&invoker));

    let t0 = 1_000i64;
    scheduler.tick_at(t0).await;
    // First sighting initializes next-run to now + interval; nothing runs.
    assert_eq!(invoker.count(), 0);

    let state = SchedulerState::load(&dir.path().join("scheduler.json"));
    assert_eq!(state.next_run_by_id.get("ping"), Some(&(t0 + 60_000)));

    // A tick before the due time does nothing.
    scheduler.tick_at(t0 + 59_000).await;
    assert_eq!(invoker.count(), 0);

    // The due tick enqueues exactly one run and advances next-run.
    scheduler.tick_at(t0 + 60_000).await;
    wait_for(&invoker, 1).await;
    assert_eq!(invoker.prompts.lock()[0], "ping the operator");

    let state = SchedulerState::load(&dir.path().join("scheduler.json"));
    assert_eq!(state.next_run_by_id.get("ping"), Some(&(t0 + 120_000)));

    // Reply landed in the rolling history.
    for _ in 0..100 {
        if !scheduler.assistant_history().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(scheduler.assistant_history(), vec!["ran: ping the operator"]);
}

#[tokio::test]
async fn next_run_is_monotonic_across_persisted_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scheduler.json");
    let invoker = MockInvoker::new();
    let scheduler = scheduler_with(&dir, vec![ping_reminder()], Arc::clone(&invoker));

    let mut previous = 0i64;
    let mut t = 1_000i64;
    for _ in 0..5 {
        scheduler.tick_at(t).await;
        let state = SchedulerState::load(&path);
        let next = *state.next_run_by_id.get("ping").unwrap();
        assert!(next >= previous, "next-run regressed: {next} < {previous}");
        previous = next;
        t += 60_000;
    }
}

#[tokio::test]
async fn one_time_reminder_fires_once_and_survives_crash_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scheduler.json");
    let invoker = MockInvoker::new();
    let scheduler = scheduler_with(&dir, vec![], Arc::clone(&invoker));

    let id = scheduler
        .schedule_one_time_in(1, "heartbeat probe", Lane::Background)
        .await
        .unwrap();
    let now = Utc::now().timestamp_millis();

    // Before the due time: still present, nothing runs.
    scheduler.tick_at(now + 59_000).await;
    assert_eq!(invoker.count(), 0);
    assert_eq!(scheduler.list_one_time().await.len(), 1);

    // Due: removed from state before dispatch, enqueued once.
    scheduler.tick_at(now + 61_000).await;
    wait_for(&invoker, 1).await;
    assert!(scheduler.list_one_time().await.is_empty());

    // Crash-recover from the persisted file: the reminder is gone, so a
    // replayed tick must not re-enqueue it.
    let recovered = SchedulerState::load(&path);
    assert!(recovered.one_time_reminders.iter().all(|r| r.id != id));

    let invoker2 = MockInvoker::new();
    let scheduler2 = Scheduler::new(
        &path,
        1,
        vec![],
        None,
        quick_executor(),
        LaneQueue::new(),
        Arc::clone(&invoker2) as Arc<dyn AgentInvoker>,
    );
    scheduler2.tick_at(now + 120_000).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(invoker2.count(), 0);
}

#[tokio::test]
async fn one_time_must_be_at_least_two_seconds_out() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler_with(&dir, vec![], MockInvoker::new());
    let now = Utc::now().timestamp_millis();
    let err = scheduler
        .schedule_one_time_at(now + 1_000, "too soon", Lane::Fast)
        .await
        .unwrap_err();
    assert!(matches!(err, VigilError::InvalidInput(_)));

    assert!(scheduler
        .schedule_one_time_at(now + 10_000, "fine", Lane::Fast)
        .await
        .is_ok());
}

#[tokio::test]
async fn cancel_one_time_removes_it() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler_with(&dir, vec![], MockInvoker::new());
    let id = scheduler
        .schedule_one_time_in(5, "cancel me", Lane::Background)
        .await
        .unwrap();
    assert!(scheduler.cancel_one_time(&id).await);
    assert!(!scheduler.cancel_one_time(&id).await);
    assert!(scheduler.list_one_time().await.is_empty());
}

#[tokio::test]
async fn same_id_never_runs_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let invoker = MockInvoker::slow(300);
    let scheduler = scheduler_with(&dir, vec![ping_reminder()], Arc::clone(&invoker));

    let t0 = 1_000i64;
    scheduler.tick_at(t0).await;
    scheduler.tick_at(t0 + 60_000).await;
    wait_for(&invoker, 1).await;

    // Due again while the first run is still sleeping: silently skipped.
    scheduler.tick_at(t0 + 120_000).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(invoker.count(), 1);

    // Once the run finishes, the next due tick fires again.
    tokio::time::sleep(Duration::from_millis(400)).await;
    scheduler.tick_at(t0 + 180_000).await;
    wait_for(&invoker, 2).await;
}

#[tokio::test]
async fn failed_runs_do_not_block_later_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let invoker = MockInvoker::failing();
    let scheduler = scheduler_with(&dir, vec![ping_reminder()], Arc::clone(&invoker));

    let t0 = 1_000i64;
    scheduler.tick_at(t0).await;
    scheduler.tick_at(t0 + 60_000).await;
    wait_for(&invoker, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // History stays empty, but the schedule keeps advancing.
    assert!(scheduler.assistant_history().is_empty());
    scheduler.tick_at(t0 + 120_000).await;
    wait_for(&invoker, 2).await;

    let health = scheduler.health_metrics().await;
    let op = health.ops.get("scheduler:ping").unwrap();
    assert!(op.failures >= 1);
}

#[tokio::test]
async fn heartbeat_joins_the_recurring_set() {
    let dir = tempfile::tempdir().unwrap();
    let invoker = MockInvoker::new();
    let scheduler = scheduler_with(&dir, vec![], Arc::clone(&invoker));

    scheduler.set_heartbeat(1, Some("pulse check".into())).await;

    let t0 = 5_000i64;
    scheduler.tick_at(t0).await;
    assert_eq!(invoker.count(), 0);

    scheduler.tick_at(t0 + 60_000).await;
    wait_for(&invoker, 1).await;
    assert_eq!(invoker.prompts.lock()[0], "pulse check");

    let state = SchedulerState::load(&dir.path().join("scheduler.json"));
    assert!(state.heartbeat.enabled);
    assert!(state.next_run_by_id.contains_key(HEARTBEAT_ID));

    // Disabling clears the next-run entry and stops future runs.
    scheduler.disable_heartbeat().await;
    let state = SchedulerState::load(&dir.path().join("scheduler.json"));
    assert!(!state.next_run_by_id.contains_key(HEARTBEAT_ID));

    scheduler.tick_at(t0 + 180_000).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(invoker.count(), 1);
}

#[tokio::test]
async fn reenabling_a_reminder_reinitializes_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let invoker = MockInvoker::new();
    let scheduler = scheduler_with(&dir, vec![ping_reminder()], Arc::clone(&invoker));

    let t0 = 1_000i64;
    scheduler.tick_at(t0).await;
    assert!(scheduler.set_reminder_enabled("ping", false).await);

    // Disabled: a due tick does nothing and leaves no next-run entry.
    scheduler.tick_at(t0 + 60_000).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(invoker.count(), 0);

    // Re-enable: the first tick reinitializes instead of firing instantly.
    assert!(scheduler.set_reminder_enabled("ping", true).await);
    scheduler.tick_at(t0 + 120_000).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(invoker.count(), 0);

    scheduler.tick_at(t0 + 180_000).await;
    wait_for(&invoker, 1).await;
}

#[tokio::test]
async fn late_tick_processes_everything_due() {
    let dir = tempfile::tempdir().unwrap();
    let invoker = MockInvoker::new();
    let mut second = ping_reminder();
    second.id = "pong".into();
    second.prompt = "pong prompt".into();
    let scheduler = scheduler_with(&dir, vec![ping_reminder(), second], Arc::clone(&invoker));

    let t0 = 1_000i64;
    scheduler.tick_at(t0).await;
    // A very late tick catches both reminders in a single pass.
    scheduler.tick_at(t0 + 600_000).await;
    wait_for(&invoker, 2).await;
}

#[tokio::test]
async fn unknown_reminder_toggle_returns_false() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler_with(&dir, vec![], MockInvoker::new());
    assert!(!scheduler.set_reminder_enabled("ghost", true).await);
}
