//! The agent tool-call loop: compaction check, deterministic routing,
//! skill + plan assembly, the streaming LLM loop with tool dispatch, the
//! integrity guard chain, and the turn epilogue.

use std::sync::Arc;

use tracing::{debug, info, warn};

use vigil_config::AgentConfig;
use vigil_core::{
    event::AgentActivity, Event, EventBus, Message, Result, Role, ToolCall, VigilError,
};
use vigil_llm::{LlmProvider, LlmRequest, StreamChunk, TokenCounter, Usage};
use vigil_memory::text::first_sentence;
use vigil_memory::MemoryManager;
use vigil_resilience::ResilientExecutor;
use vigil_skills::SkillCatalogue;

use crate::guards::{
    apply_claim_guards, apply_wallet_guard, has_action_promise, is_tool_capable, wants_live_facts,
    TurnTrace,
};
use crate::plan::{generate_plan, wants_plan, ExecutionPlan, PLAN_MAX_TOKENS};
use crate::prompt::build_system_prompt;
use crate::router::route;
use crate::tools::ToolRegistry;

/// Maximum model turns (tool rounds) per agent call.
const MAX_TOOL_ROUNDS: usize = 8;
/// How many trailing messages survive compaction.
const COMPACTION_KEEP_TAIL: usize = 10;
/// How often the action-promise guard may force another round.
const PROMISE_RETRIES: usize = 2;

const PROMISE_OVERRIDE: &str = "[SYSTEM OVERRIDE] You promised an action but called no tool. \
Call the appropriate tool now, or reply exactly `BLOCKED: <reason>` if you cannot.";

pub type OnToken = Arc<dyn Fn(String) + Send + Sync>;

/// Token accounting for one turn.
#[derive(Debug, Clone)]
pub struct TokenReport {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Estimated context tokens at turn start.
    pub context_estimate: usize,
    /// `exact-ish` when a real encoder backed the estimate, else `estimate`.
    pub counter_mode: &'static str,
}

/// The outcome of one agent turn.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub reply: String,
    pub history: Vec<Message>,
    pub usage: TokenReport,
}

/// The agent: one constructed value, no ambient state.
pub struct Agent {
    config: AgentConfig,
    plan_model: String,
    provider: Arc<dyn LlmProvider>,
    executor: Arc<ResilientExecutor>,
    registry: Arc<ToolRegistry>,
    skills: Arc<SkillCatalogue>,
    memory: Arc<MemoryManager>,
    counter: TokenCounter,
    bus: EventBus,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AgentConfig,
        plan_model: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        executor: Arc<ResilientExecutor>,
        registry: Arc<ToolRegistry>,
        skills: Arc<SkillCatalogue>,
        memory: Arc<MemoryManager>,
        counter: TokenCounter,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            plan_model: plan_model.into(),
            provider,
            executor,
            registry,
            skills,
            memory,
            counter,
            bus,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn context_window(&self) -> usize {
        self.config.context_window
    }

    /// Run one turn. Returns the final reply, the updated history, and a
    /// token usage report. Only executor-final LLM errors propagate.
    pub async fn run_agent(
        &self,
        user_text: &str,
        mut history: Vec<Message>,
        on_token: Option<OnToken>,
    ) -> Result<AgentReply> {
        self.set_activity(AgentActivity::Thinking);

        // 1. Compaction check before anything touches the provider.
        let context_estimate = self.estimate_context(&history, user_text);
        if context_estimate >= self.config.effective_compaction_threshold() {
            info!(
                context_estimate,
                threshold = self.config.effective_compaction_threshold(),
                "context near window, flushing memory and truncating history"
            );
            self.memory.flush_before_compaction(&history).await;
            let drop_count = history.len().saturating_sub(COMPACTION_KEEP_TAIL);
            history.drain(..drop_count);
        }

        // 2. Deterministic router: a high-confidence intent answers with a
        // direct tool invocation and no LLM call.
        if let Some(intent) = route(user_text) {
            debug!(?intent, "deterministic route hit");
            let (tool, args) = intent.invocation();
            let reply = self.registry.invoke(tool, args).await;
            let history = self.epilogue(user_text, &reply, history);
            self.set_activity(AgentActivity::Idle);
            return Ok(AgentReply {
                reply,
                history,
                usage: TokenReport {
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    context_estimate,
                    counter_mode: self.counter.mode().as_str(),
                },
            });
        }

        // 3. Skill + plan assembly.
        let active_skill = self.skills.match_skill(user_text).map(|m| m.skill.clone());
        let plan: Option<ExecutionPlan> = if wants_plan(self.config.planning_mode, user_text) {
            generate_plan(self.provider.as_ref(), &self.plan_model, user_text).await
        } else {
            None
        };

        // 4. System prompt.
        let system_prompt = build_system_prompt(
            &self.config.persona,
            &self.memory,
            &self.skills,
            active_skill.as_ref(),
            plan.as_ref(),
            user_text,
        );

        // 5. Streaming tool loop.
        let mut messages: Vec<Message> = Vec::with_capacity(history.len() + 2);
        messages.push(Message::text(Role::System, system_prompt));
        messages.extend(history.iter().cloned());
        messages.push(Message::text(Role::User, user_text));

        let mut trace = TurnTrace::default();
        let mut usage_total = Usage::default();
        let mut promise_retries = 0usize;
        let mut reply = String::new();

        loop {
            for round in 0..MAX_TOOL_ROUNDS {
                self.set_activity(AgentActivity::Streaming);
                let (text, tool_calls, usage) =
                    self.stream_once(&messages, on_token.as_ref()).await?;
                usage_total.merge(&usage);

                if tool_calls.is_empty() {
                    reply = text;
                    break;
                }

                let mut assistant = Message::text(Role::Assistant, &text);
                assistant.tool_calls = tool_calls.clone();
                messages.push(assistant);

                // Tool calls execute in model-emitted order; the next request
                // observes every output from this round.
                for call in &tool_calls {
                    let output = self.registry.execute(call).await;
                    trace.record(&call.name, &output);
                    messages.push(Message::tool_result(call.id.clone(), output));
                }
                if round == MAX_TOOL_ROUNDS - 1 {
                    warn!("max tool rounds reached, replying with last text");
                    reply = text;
                }
            }

            // 6. Integrity guards, in order. The first three are
            // deterministic coercions; each records into the trace, so a
            // fired guard also satisfies the promise check below.
            apply_wallet_guard(&self.registry, user_text, &mut trace, &mut reply).await;
            self.apply_realtime_guard(user_text, &mut trace, &mut reply).await;
            apply_claim_guards(&self.registry, user_text, &mut trace, &mut reply).await;

            // Action-promise guard: a tool-capable request, still zero
            // tools fired after the guards above, and a reply that
            // promises action. Re-enter the loop with a system override.
            if trace.tools_called.is_empty()
                && promise_retries < PROMISE_RETRIES
                && is_tool_capable(user_text)
                && has_action_promise(&reply)
            {
                promise_retries += 1;
                warn!(promise_retries, "action promise without a tool call, overriding");
                messages.push(Message::text(Role::Assistant, &reply));
                messages.push(Message::text(Role::User, PROMISE_OVERRIDE));
                reply.clear();
                continue;
            }
            break;
        }

        if let Some(plan) = &plan {
            let footer = plan.render_footer(&trace.trace_text(&reply));
            reply.push_str(&footer);
        }

        // 7. Epilogue.
        let history = self.epilogue(user_text, &reply, history);
        self.set_activity(AgentActivity::Idle);

        Ok(AgentReply {
            reply,
            history,
            usage: TokenReport {
                prompt_tokens: usage_total.prompt_tokens,
                completion_tokens: usage_total.completion_tokens,
                context_estimate,
                counter_mode: self.counter.mode().as_str(),
            },
        })
    }

    /// Estimated context tokens: the system prompt as it will be
    /// assembled (persona, memory bootstrap, skill catalogue, matching
    /// skill body, a plan allowance bounded by the generation cap) plus
    /// the stringified history and the user text. The fixed-size time and
    /// tool-hint lines are noise at this scale and are not counted.
    fn estimate_context(&self, history: &[Message], user_text: &str) -> usize {
        let history_json = serde_json::to_string(history).unwrap_or_default();
        let mut tokens = self.counter.count(&self.config.persona)
            + self.counter.count(&self.memory.bootstrap_context())
            + self.counter.count(&history_json)
            + self.counter.count(user_text);
        if let Some(block) = self.skills.catalogue_block() {
            tokens += self.counter.count(&block);
        }
        if let Some(matched) = self.skills.match_skill(user_text) {
            tokens += self.counter.count(&matched.skill.body);
        }
        if wants_plan(self.config.planning_mode, user_text) {
            tokens += PLAN_MAX_TOKENS as usize;
        }
        tokens
    }

    /// One streaming completion, wrapped in the resilient executor under
    /// `agent:chat_completion_stream`. Returns (text, tool calls, usage).
    async fn stream_once(
        &self,
        messages: &[Message],
        on_token: Option<&OnToken>,
    ) -> Result<(String, Vec<ToolCall>, Usage)> {
        let request = LlmRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            tools: self.registry.specs(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        self.executor
            .execute("agent:chat_completion_stream", || {
                let provider = Arc::clone(&self.provider);
                let request = request.clone();
                let on_token = on_token.cloned();
                async move {
                    let mut rx = provider.stream(&request).await?;
                    let mut text = String::new();
                    let mut tool_calls: Vec<ToolCall> = Vec::new();
                    let mut usage = Usage::default();
                    while let Some(chunk) = rx.recv().await {
                        match chunk {
                            StreamChunk::TextDelta(delta) => {
                                if let Some(cb) = &on_token {
                                    cb(delta.clone());
                                }
                                text.push_str(&delta);
                            }
                            StreamChunk::ToolCall(call) => tool_calls.push(call),
                            StreamChunk::Usage(u) => usage.merge(&u),
                            StreamChunk::Done(_) => break,
                            StreamChunk::Error(e) => {
                                return Err(VigilError::LlmProvider(e));
                            }
                        }
                    }
                    Ok((text, tool_calls, usage))
                }
            })
            .await
    }

    /// Second guard (realtime search). If the user asked for live facts and no
    /// realtime search ran, search now and rewrite the draft against the
    /// results (falling back to prepending them when the rewrite call
    /// fails).
    async fn apply_realtime_guard(
        &self,
        user_text: &str,
        trace: &mut TurnTrace,
        reply: &mut String,
    ) {
        if !wants_live_facts(user_text) || trace.called("perplexity_search") {
            return;
        }
        let output = self
            .registry
            .invoke(
                "perplexity_search",
                serde_json::json!({ "query": user_text, "max_results": 5 }),
            )
            .await;
        trace.record("perplexity_search", &output);

        let rewrite = LlmRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message::text(
                    Role::System,
                    "Rewrite the draft reply so every current-world claim matches the live \
                     search results. Keep it concise. Output only the final reply.",
                ),
                Message::text(
                    Role::User,
                    format!(
                        "Question: {user_text}\n\nDraft reply:\n{reply}\n\nLive results:\n{output}"
                    ),
                ),
            ],
            tools: vec![],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        match self.provider.complete(&rewrite).await {
            Ok(response) if !response.content.trim().is_empty() => {
                *reply = response.content;
            }
            _ => {
                warn!("realtime rewrite failed, prepending raw results");
                *reply = format!("{output}\n\n{reply}");
            }
        }
    }

    /// Turn epilogue: episodic log line, asynchronous deterministic
    /// extraction, and the appended user/assistant messages.
    fn epilogue(&self, user_text: &str, reply: &str, mut history: Vec<Message>) -> Vec<Message> {
        self.memory.log_episode(&format!(
            "Turn: {} -> {}",
            first_sentence(user_text, 80),
            first_sentence(reply, 80)
        ));

        let memory = Arc::clone(&self.memory);
        let user = user_text.to_string();
        let assistant = reply.to_string();
        tokio::spawn(async move {
            memory.record_turn(&user, &assistant);
        });

        history.push(Message::text(Role::User, user_text));
        history.push(Message::text(Role::Assistant, reply));
        history
    }

    fn set_activity(&self, activity: AgentActivity) {
        self.bus.publish(Event::AgentStatus { activity });
    }
}
