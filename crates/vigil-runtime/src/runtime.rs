//! The runtime facade: explicitly constructed roots (queue, executors,
//! scheduler, registry, agent) wired together once at startup, with no ambient
//! globals. Front-ends consume `submit_task`, the status probe, and the
//! event stream.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use vigil_config::VigilConfig;
use vigil_core::{
    event::AgentActivity, message::sanitize_history, Event, EventBus, Lane, LaneCounters, Message,
    Result, TaskResult, VigilError,
};
use vigil_llm::{OpenAiCompatProvider, TokenCounter};
use vigil_memory::MemoryManager;
use vigil_queue::{LaneQueue, TaskOutput};
use vigil_resilience::ResilientExecutor;
use vigil_scheduler::{AgentInvoker, HeartbeatState, Reminder, Scheduler};
use vigil_skills::SkillCatalogue;

use crate::agent::{Agent, OnToken};
use crate::tools::{Collaborators, ToolRegistry};

/// Status probe payload.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub agent: AgentStatus,
    pub queue: HashMap<Lane, LaneCounters>,
    pub heartbeat: HeartbeatState,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub status: AgentActivity,
    pub model: String,
    pub context_window: usize,
}

/// Scheduler → agent adapter, late-bound because the registry (which the
/// agent needs) also needs the scheduler.
#[derive(Default)]
struct LateBoundInvoker {
    agent: OnceLock<Arc<Agent>>,
}

#[async_trait]
impl AgentInvoker for LateBoundInvoker {
    async fn invoke(&self, prompt: String) -> Result<TaskOutput> {
        let agent = self
            .agent
            .get()
            .ok_or_else(|| VigilError::Scheduler("agent not wired yet".into()))?;
        let reply = agent.run_agent(&prompt, vec![], None).await?;
        Ok(TaskOutput {
            reply: reply.reply,
            history: reply.history,
        })
    }
}

/// The constructed runtime root.
pub struct Runtime {
    queue: LaneQueue,
    scheduler: Arc<Scheduler>,
    agent: Arc<Agent>,
    bus: EventBus,
    activity: Arc<Mutex<AgentActivity>>,
}

impl Runtime {
    /// Wire every subsystem from the validated config and the injected
    /// collaborators. Fails only on a missing LLM key (validated config
    /// should have caught that already).
    pub fn build(config: VigilConfig, collaborators: Collaborators) -> Result<Arc<Self>> {
        let api_key = config
            .llm
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| VigilError::Config("llm.api_key is required".into()))?;

        let bus = EventBus::default();
        let queue = LaneQueue::new();

        let provider = Arc::new(
            OpenAiCompatProvider::new(api_key)
                .with_base_url(config.llm.base_url.clone(), "openai".into()),
        );

        let agent_executor = Arc::new(ResilientExecutor::new(config.resilience.agent.clone()));
        let scheduler_executor =
            Arc::new(ResilientExecutor::new(config.resilience.scheduler.clone()));
        let memory_executor = Arc::new(ResilientExecutor::new(config.resilience.memory.clone()));

        let memory = Arc::new(
            MemoryManager::new(
                &config.memory.root_dir,
                config.memory.extract_every_n_turns,
                config.memory.max_recent_episodes,
            )
            .with_summarizer(
                provider.clone(),
                config.llm.memory_model.clone(),
                memory_executor,
            ),
        );

        let reminders: Vec<Reminder> = config
            .scheduler
            .reminders
            .iter()
            .map(|r| Reminder {
                id: r.id.clone(),
                prompt: r.prompt.clone(),
                interval_minutes: r.interval_minutes.max(1),
                lane: r.lane.parse().unwrap_or(Lane::Background),
                enabled: r.enabled,
            })
            .collect();
        let default_heartbeat = HeartbeatState {
            enabled: config.scheduler.heartbeat.enabled,
            interval_minutes: config.scheduler.heartbeat.interval_minutes.max(1),
            prompt: config.scheduler.heartbeat.prompt.clone(),
        };

        let invoker = Arc::new(LateBoundInvoker::default());
        let scheduler = Arc::new(Scheduler::new(
            &config.scheduler.state_path,
            config.scheduler.tick_seconds,
            reminders,
            Some(default_heartbeat),
            scheduler_executor,
            queue.clone(),
            invoker.clone(),
        ));

        let registry = Arc::new(ToolRegistry::build(
            bus.clone(),
            collaborators,
            Arc::clone(&scheduler),
            Arc::clone(&memory),
        ));

        let skills = Arc::new(SkillCatalogue::discover(&config.skills.dir));
        info!(skills = skills.len(), "skill catalogue loaded");

        let agent = Arc::new(Agent::new(
            config.agent.clone(),
            config.llm.memory_model.clone(),
            provider,
            agent_executor,
            registry,
            skills,
            memory,
            TokenCounter::heuristic(),
            bus.clone(),
        ));
        let _ = invoker.agent.set(Arc::clone(&agent));

        // Mirror agent status events into the probe-readable cell.
        let activity = Arc::new(Mutex::new(AgentActivity::Idle));
        let mut status_rx = bus.subscribe();
        let activity_writer = Arc::clone(&activity);
        tokio::spawn(async move {
            while let Ok(event) = status_rx.recv().await {
                if let Event::AgentStatus { activity } = event {
                    *activity_writer.lock() = activity;
                }
            }
        });

        Ok(Arc::new(Self {
            queue,
            scheduler,
            agent,
            bus,
            activity,
        }))
    }

    /// Start the scheduler tick loop.
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Stop the scheduler tick loop. In-flight tasks drain on their own.
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Front-end request path: run one agent turn on a lane and wait for
    /// its result. Failures come back as `status = failed` results, never
    /// panics.
    pub async fn submit_task(
        &self,
        user_message: impl Into<String>,
        history: Vec<Message>,
        lane: Lane,
        on_token: Option<OnToken>,
    ) -> TaskResult {
        let agent = Arc::clone(&self.agent);
        let user_message = user_message.into();
        let handle = self.queue.submit(lane, async move {
            let reply = agent.run_agent(&user_message, history, on_token).await?;
            Ok(TaskOutput {
                reply: reply.reply,
                history: reply.history,
            })
        });
        handle.result().await
    }

    /// Status probe: agent activity + lane counters + heartbeat.
    pub async fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            agent: AgentStatus {
                status: *self.activity.lock(),
                model: self.agent.model().to_string(),
                context_window: self.agent.context_window(),
            },
            queue: self.queue.all_counters(),
            heartbeat: self.scheduler.health_metrics().await.heartbeat,
        }
    }

    /// Push stream of tool-start/tool-end (and status) events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }
}

/// Persist a session history as a sanitized JSON message array (images
/// replaced by text markers), atomically.
pub fn save_session_history(path: &Path, history: &[Message]) -> Result<()> {
    let sanitized = sanitize_history(history);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(&sanitized)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a session history, treating a missing or corrupt file as empty.
pub fn load_session_history(path: &Path) -> Vec<Message> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return vec![],
    };
    serde_json::from_str(&raw).unwrap_or_default()
}
