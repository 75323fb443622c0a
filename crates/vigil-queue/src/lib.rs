//! # vigil-queue
//!
//! Lane-based task queue: multi-class admission control and concurrency
//! bounding over the LLM/tool workload. Each lane (`fast`, `slow`,
//! `background`) is an independent unbounded FIFO dispatched in submission
//! order, with at most `lane.cap()` tasks running at once. There is no
//! cross-lane work stealing and no cancellation; a task that errors or
//! panics produces a `failed` [`TaskResult`].

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

use vigil_core::{Lane, LaneCounters, Message, Result, TaskResult, TaskStatus};

/// What a queued task produces on success.
#[derive(Debug, Clone, Default)]
pub struct TaskOutput {
    pub reply: String,
    pub history: Vec<Message>,
}

type TaskFuture = Pin<Box<dyn Future<Output = Result<TaskOutput>> + Send>>;

struct QueuedTask {
    id: Uuid,
    lane: Lane,
    fut: TaskFuture,
    reply_tx: oneshot::Sender<TaskResult>,
}

#[derive(Default)]
struct LaneState {
    running: AtomicUsize,
    queued: AtomicUsize,
}

struct LaneHandle {
    tx: mpsc::UnboundedSender<QueuedTask>,
    state: Arc<LaneState>,
}

/// Handle to a submitted task. Resolves to the task's [`TaskResult`].
pub struct SubmittedTask {
    pub id: Uuid,
    lane: Lane,
    rx: oneshot::Receiver<TaskResult>,
}

impl SubmittedTask {
    /// Wait for the task to finish. A dropped dispatcher (shutdown mid-task)
    /// surfaces as a failed result rather than an error.
    pub async fn result(self) -> TaskResult {
        let id = self.id;
        let lane = self.lane;
        match self.rx.await {
            Ok(result) => result,
            Err(_) => TaskResult::failed(id, lane, "task dropped before completion", Utc::now()),
        }
    }
}

/// The shared lane queue. Cheap to clone.
#[derive(Clone)]
pub struct LaneQueue {
    lanes: Arc<HashMap<Lane, LaneHandle>>,
}

impl LaneQueue {
    /// Create the queue and spawn one dispatcher per lane.
    pub fn new() -> Self {
        let mut lanes = HashMap::new();
        for lane in Lane::all() {
            let (tx, rx) = mpsc::unbounded_channel();
            let state = Arc::new(LaneState::default());
            tokio::spawn(run_lane(lane, rx, Arc::clone(&state)));
            lanes.insert(lane, LaneHandle { tx, state });
        }
        Self {
            lanes: Arc::new(lanes),
        }
    }

    /// Submit a task to a lane. Tasks start in submission order once the
    /// lane's running count drops below its cap.
    pub fn submit<F>(&self, lane: Lane, fut: F) -> SubmittedTask
    where
        F: Future<Output = Result<TaskOutput>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (reply_tx, rx) = oneshot::channel();
        let handle = &self.lanes[&lane];
        handle.state.queued.fetch_add(1, Ordering::SeqCst);
        let task = QueuedTask {
            id,
            lane,
            fut: Box::pin(fut),
            reply_tx,
        };
        if handle.tx.send(task).is_err() {
            // Dispatcher gone (runtime shutting down); the receiver will
            // observe the dropped reply channel.
            handle.state.queued.fetch_sub(1, Ordering::SeqCst);
            warn!(%lane, "lane dispatcher is gone, dropping task");
        }
        debug!(task_id = %id, %lane, "task submitted");
        SubmittedTask { id, lane, rx }
    }

    /// Observable counters for one lane, consistent within the lane.
    pub fn counters(&self, lane: Lane) -> LaneCounters {
        let state = &self.lanes[&lane].state;
        LaneCounters {
            pending: state.running.load(Ordering::SeqCst),
            queued: state.queued.load(Ordering::SeqCst),
        }
    }

    /// Counters for every lane.
    pub fn all_counters(&self) -> HashMap<Lane, LaneCounters> {
        Lane::all()
            .into_iter()
            .map(|lane| (lane, self.counters(lane)))
            .collect()
    }
}

impl Default for LaneQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_lane(lane: Lane, mut rx: mpsc::UnboundedReceiver<QueuedTask>, state: Arc<LaneState>) {
    let cap = lane.cap();
    let mut waiting: VecDeque<QueuedTask> = VecDeque::new();
    let mut running: JoinSet<()> = JoinSet::new();
    let mut open = true;

    loop {
        // Fill free slots in FIFO order.
        while running.len() < cap {
            match waiting.pop_front() {
                Some(task) => {
                    state.queued.fetch_sub(1, Ordering::SeqCst);
                    state.running.fetch_add(1, Ordering::SeqCst);
                    running.spawn(run_task(task, Arc::clone(&state)));
                }
                None => break,
            }
        }

        if !open && waiting.is_empty() && running.is_empty() {
            break;
        }

        tokio::select! {
            maybe = rx.recv(), if open => match maybe {
                Some(task) => waiting.push_back(task),
                None => open = false,
            },
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = joined {
                    // The task body already caught panics; a JoinError here
                    // means the runtime aborted us.
                    if !e.is_cancelled() {
                        warn!(%lane, error = %e, "lane task join error");
                    }
                }
            }
        }
    }
}

async fn run_task(task: QueuedTask, state: Arc<LaneState>) {
    let QueuedTask {
        id,
        lane,
        fut,
        reply_tx,
    } = task;
    let started_at = Utc::now();
    debug!(task_id = %id, %lane, "task started");

    let result = match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(output)) => TaskResult {
            id,
            lane,
            reply: output.reply,
            history: output.history,
            status: TaskStatus::Completed,
            error: None,
            started_at,
            completed_at: Utc::now(),
        },
        Ok(Err(err)) => {
            warn!(task_id = %id, %lane, error = %err, "task failed");
            TaskResult::failed(id, lane, err.to_string(), started_at)
        }
        Err(_) => {
            warn!(task_id = %id, %lane, "task panicked");
            TaskResult::failed(id, lane, "task panicked", started_at)
        }
    };

    // Decrement before delivering the result so callers that observe the
    // completion also observe the freed slot.
    state.running.fetch_sub(1, Ordering::SeqCst);
    let _ = reply_tx.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vigil_core::VigilError;

    fn output(reply: &str) -> Result<TaskOutput> {
        Ok(TaskOutput {
            reply: reply.to_string(),
            history: vec![],
        })
    }

    #[tokio::test]
    async fn completes_in_submission_order() {
        let queue = LaneQueue::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let order = Arc::clone(&order);
            handles.push(queue.submit(Lane::Slow, async move {
                order.lock().await.push(i);
                output(&format!("task {i}"))
            }));
        }
        for h in handles {
            let result = h.result().await;
            assert_eq!(result.status, TaskStatus::Completed);
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn running_never_exceeds_cap() {
        let queue = LaneQueue::new();
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            handles.push(queue.submit(Lane::Fast, async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                live.fetch_sub(1, Ordering::SeqCst);
                output("done")
            }));
        }
        for h in handles {
            h.result().await;
        }
        assert!(peak.load(Ordering::SeqCst) <= Lane::Fast.cap());
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn error_produces_failed_result() {
        let queue = LaneQueue::new();
        let handle = queue.submit(Lane::Background, async {
            Err::<TaskOutput, _>(VigilError::LlmProvider("model offline".into()))
        });
        let result = handle.result().await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("model offline"));
    }

    #[tokio::test]
    async fn panic_produces_failed_result() {
        let queue = LaneQueue::new();
        let handle = queue.submit(Lane::Background, async {
            panic!("tool blew up");
            #[allow(unreachable_code)]
            output("never")
        });
        let result = handle.result().await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("task panicked"));
    }

    #[tokio::test]
    async fn counters_return_to_zero() {
        let queue = LaneQueue::new();
        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(queue.submit(Lane::Background, async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                output("ok")
            }));
        }
        // With cap 1, at least some tasks must be queued at this point.
        let counters = queue.counters(Lane::Background);
        assert!(counters.pending + counters.queued >= 3);

        for h in handles {
            h.result().await;
        }
        let counters = queue.counters(Lane::Background);
        assert_eq!(counters.pending, 0);
        assert_eq!(counters.queued, 0);
    }

    #[tokio::test]
    async fn lanes_are_independent() {
        let queue = LaneQueue::new();
        // Occupy the slow lane.
        let slow = queue.submit(Lane::Slow, async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            output("slow done")
        });
        // Fast work should not wait on it.
        let fast = queue.submit(Lane::Fast, async { output("fast done") });
        let fast_result = fast.result().await;
        assert_eq!(fast_result.reply, "fast done");
        assert_eq!(queue.counters(Lane::Slow).pending, 1);
        slow.result().await;
    }
}
