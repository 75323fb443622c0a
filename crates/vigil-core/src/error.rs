use thiserror::Error;

/// Unified error type for the entire Vigil runtime.
#[derive(Error, Debug)]
pub enum VigilError {
    // ── Agent errors ───────────────────────────────────────────
    #[error("agent error: {0}")]
    Agent(String),

    #[error("llm provider error: {0}")]
    LlmProvider(String),

    // ── Resilience errors ──────────────────────────────────────
    /// Fast-fail from an open circuit breaker. `retry_in_ms` is the time
    /// remaining until the cooldown elapses.
    #[error("circuit open for operation '{op}', retry in {retry_in_ms}ms")]
    CircuitOpen { op: String, retry_in_ms: u64 },

    // ── Tool errors ────────────────────────────────────────────
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // ── Scheduler errors ───────────────────────────────────────
    #[error("scheduler error: {0}")]
    Scheduler(String),

    // ── Memory errors ──────────────────────────────────────────
    #[error("memory error: {0}")]
    Memory(String),

    // ── State errors ───────────────────────────────────────────
    /// Persisted state on disk could not be parsed. Callers log this and
    /// proceed with empty state.
    #[error("state corruption: {path}: {reason}")]
    StateCorruption { path: String, reason: String },

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VigilError>;
