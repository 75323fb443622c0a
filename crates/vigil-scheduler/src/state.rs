use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use vigil_core::{Lane, Result};

/// A configured recurring reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub prompt: String,
    /// Minutes between runs, ≥ 1.
    pub interval_minutes: u64,
    pub lane: Lane,
    pub enabled: bool,
}

/// A one-time reminder. `run_at_ms` is epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimeReminder {
    pub id: String,
    pub prompt: String,
    pub run_at_ms: i64,
    pub lane: Lane,
    pub enabled: bool,
}

/// Heartbeat configuration, synthesized into the recurring set when
/// enabled (id `self-heartbeat`, background lane).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatState {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub prompt: String,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 30,
            prompt: String::new(),
        }
    }
}

/// The scheduler's persisted state. Serialized to JSON and atomically
/// replaced on every mutation; `one_time_reminders` is ordered by
/// `run_at_ms` on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerState {
    pub next_run_by_id: BTreeMap<String, i64>,
    pub one_time_reminders: Vec<OneTimeReminder>,
    pub heartbeat: HeartbeatState,
    pub updated_at: String,
}

impl SchedulerState {
    /// Load and validate persisted state. An unreadable or unparseable
    /// file is logged and treated as empty; startup always proceeds.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        let value: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "scheduler state unreadable, starting empty");
                return Self::default();
            }
        };
        Self::from_value(&value)
    }

    /// Field-tolerant validation: drop non-finite timestamps, default
    /// unknown lanes to `background`, floor the heartbeat interval to ≥ 1.
    fn from_value(value: &Value) -> Self {
        let mut state = Self::default();

        if let Some(map) = value.get("nextRunById").and_then(|v| v.as_object()) {
            for (id, ts) in map {
                match ts.as_i64() {
                    Some(ts) if ts >= 0 => {
                        state.next_run_by_id.insert(id.clone(), ts);
                    }
                    _ => warn!(id, "dropping next-run entry with invalid timestamp"),
                }
            }
        }

        if let Some(items) = value.get("oneTimeReminders").and_then(|v| v.as_array()) {
            for item in items {
                let Some(id) = item.get("id").and_then(|v| v.as_str()) else {
                    warn!("dropping one-time reminder without a string id");
                    continue;
                };
                let Some(run_at_ms) = item.get("runAtMs").and_then(|v| v.as_i64()) else {
                    warn!(id, "dropping one-time reminder with invalid runAtMs");
                    continue;
                };
                let lane = item
                    .get("lane")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<Lane>().ok())
                    .unwrap_or(Lane::Background);
                state.one_time_reminders.push(OneTimeReminder {
                    id: id.to_string(),
                    prompt: item
                        .get("prompt")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    run_at_ms,
                    lane,
                    enabled: item.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true),
                });
            }
        }

        if let Some(hb) = value.get("heartbeat") {
            state.heartbeat = HeartbeatState {
                enabled: hb.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false),
                interval_minutes: hb
                    .get("intervalMinutes")
                    .and_then(|v| v.as_f64())
                    .map(|m| (m.floor() as i64).max(1) as u64)
                    .unwrap_or(30),
                prompt: hb
                    .get("prompt")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            };
        }

        state
    }

    /// Atomically replace the state file (write temp, rename). One-time
    /// reminders are sorted by `run_at_ms` before serialization.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.one_time_reminders.sort_by_key(|r| r.run_at_ms);
        self.updated_at = Utc::now().to_rfc3339();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
