//! # vigil-config
//!
//! TOML configuration schema and loader for the Vigil runtime. Unknown keys
//! are ignored; missing required secrets (the LLM API key) fail startup.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    AgentConfig, HeartbeatConfig, LlmConfig, LoggingConfig, MemoryConfig, PlanningMode,
    ReminderConfig, ResilienceConfig, SchedulerConfig, SkillsConfig, VigilConfig,
};
