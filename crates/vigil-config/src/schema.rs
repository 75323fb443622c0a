use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use vigil_resilience::ResiliencePolicy;

/// Root configuration, maps to `vigil.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub scheduler: SchedulerConfig,
    pub skills: SkillsConfig,
    pub resilience: ResilienceConfig,
    pub logging: LoggingConfig,
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Primary model identifier.
    pub model: String,
    /// Temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Maximum tokens per response.
    pub max_tokens: u32,
    /// Context window size in tokens.
    pub context_window: usize,
    /// Trigger compaction when the estimated context reaches this many
    /// tokens. 0 = auto (90% of `context_window`).
    pub compaction_token_threshold: usize,
    /// Planning mode: `fast` (never plan), `auto` (plan on plan-signal
    /// keywords), `autonomous` (always plan).
    pub planning_mode: PlanningMode,
    /// Base persona prepended to every system prompt.
    pub persona: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            temperature: 0.7,
            max_tokens: 4096,
            context_window: 128_000,
            compaction_token_threshold: 0,
            planning_mode: PlanningMode::Auto,
            persona: "You are Vigil, an autonomous assistant with tools, durable memory, \
                      and a mission log. Be direct and factual; never claim to have used \
                      a tool you did not use."
                .into(),
        }
    }
}

impl AgentConfig {
    /// The threshold actually used by the compaction check.
    pub fn effective_compaction_threshold(&self) -> usize {
        if self.compaction_token_threshold > 0 {
            self.compaction_token_threshold
        } else {
            (self.context_window as f64 * 0.9) as usize
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanningMode {
    Fast,
    Auto,
    Autonomous,
}

// ── LLM provider ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key. Filled from `VIGIL_API_KEY` / `OPENAI_API_KEY` when absent.
    /// Required at startup; missing key is a fatal config error.
    pub api_key: Option<String>,
    /// Chat-completions base URL (OpenAI-compatible).
    pub base_url: String,
    /// Model used for summaries and plan generation.
    pub memory_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".into(),
            memory_model: "gpt-4o-mini".into(),
        }
    }
}

// ── Memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Root directory of the markdown memory stores.
    pub root_dir: PathBuf,
    /// Run the periodic episodic summary every N turns.
    pub extract_every_n_turns: u32,
    /// Most-recent episodic files included in the bootstrap context.
    pub max_recent_episodes: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            root_dir: default_state_dir().join("memory"),
            extract_every_n_turns: 5,
            max_recent_episodes: 3,
        }
    }
}

// ── Scheduler ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between ticks (floored to ≥ 1).
    pub tick_seconds: u64,
    /// Configured recurring reminders.
    pub reminders: Vec<ReminderConfig>,
    /// Singleton heartbeat reminder.
    pub heartbeat: HeartbeatConfig,
    /// Persisted scheduler state file.
    pub state_path: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 15,
            reminders: vec![],
            heartbeat: HeartbeatConfig::default(),
            state_path: default_state_dir().join("scheduler.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    pub id: String,
    pub prompt: String,
    /// Minutes between runs (floored to ≥ 1).
    pub interval_minutes: u64,
    #[serde(default = "default_lane")]
    pub lane: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Minutes between heartbeats (floored to ≥ 1).
    pub interval_minutes: u64,
    pub prompt: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 30,
            prompt: "Heartbeat: review active goals and pending reminders, and continue \
                     any unfinished work."
                .into(),
        }
    }
}

// ── Resilience ─────────────────────────────────────────────────

/// Per-use-site executor policies. Each subsystem constructs its own
/// executor instance from its own policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub agent: ResiliencePolicy,
    pub scheduler: ResiliencePolicy,
    pub memory: ResiliencePolicy,
}

// ── Skills ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillsConfig {
    /// Directory of markdown-with-frontmatter skill files.
    pub dir: PathBuf,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir().join("skills"),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Tracing filter, e.g. "info" or "vigil=debug,info".
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Helpers ────────────────────────────────────────────────────

pub(crate) fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vigil")
}

fn default_lane() -> String {
    "background".into()
}

fn default_true() -> bool {
    true
}

impl VigilConfig {
    /// Validate the configuration. Returns warnings on success; an error
    /// message means startup must fail.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if self.llm.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(
                "llm.api_key is not set (and no VIGIL_API_KEY / OPENAI_API_KEY in the environment)"
                    .into(),
            );
        }
        if self.agent.context_window == 0 {
            return Err("agent.context_window must be greater than 0".into());
        }
        if self.scheduler.tick_seconds == 0 {
            warnings.push("scheduler.tick_seconds = 0, clamping to 1".into());
        }
        for r in &self.scheduler.reminders {
            if r.id.trim().is_empty() {
                return Err("scheduler.reminders contains a reminder with an empty id".into());
            }
            if r.interval_minutes == 0 {
                warnings.push(format!(
                    "reminder '{}' has interval_minutes = 0, clamping to 1",
                    r.id
                ));
            }
            if r.lane.parse::<vigil_core::Lane>().is_err() {
                warnings.push(format!(
                    "reminder '{}' has unknown lane '{}', defaulting to background",
                    r.id, r.lane
                ));
            }
        }
        Ok(warnings)
    }
}
