use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Message;

/// A named concurrency class with a bounded cap and a FIFO waiting list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Fast,
    Slow,
    Background,
}

impl Lane {
    /// Concurrency cap for this lane. Configuration, not runtime-tunable.
    pub fn cap(&self) -> usize {
        match self {
            Lane::Fast => 2,
            Lane::Slow => 1,
            Lane::Background => 1,
        }
    }

    pub fn all() -> [Lane; 3] {
        [Lane::Fast, Lane::Slow, Lane::Background]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Fast => "fast",
            Lane::Slow => "slow",
            Lane::Background => "background",
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(Lane::Fast),
            "slow" => Ok(Lane::Slow),
            "background" => Ok(Lane::Background),
            other => Err(format!("unknown lane: {other}")),
        }
    }
}

/// Observable per-lane counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LaneCounters {
    /// Currently running tasks.
    pub pending: usize,
    /// Tasks waiting in the FIFO.
    pub queued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

/// The outcome of a lane-queued task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: Uuid,
    pub lane: Lane,
    pub reply: String,
    pub history: Vec<Message>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn failed(id: Uuid, lane: Lane, error: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            lane,
            reply: String::new(),
            history: vec![],
            status: TaskStatus::Failed,
            error: Some(error.into()),
            started_at,
            completed_at: Utc::now(),
        }
    }
}
