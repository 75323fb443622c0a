//! Tool registry and dispatch. The registry is immutable after startup;
//! every handler invocation emits exactly one `tool:start` and one
//! `tool:end` event. Handlers return strings; failures become
//! `Error executing <tool>: <msg>` rather than propagating.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use vigil_core::{EventBus, Lane, Result, ToolCall, ToolHandler, ToolSpec};
use vigil_memory::MemoryManager;
use vigil_scheduler::Scheduler;

// ── External collaborator contracts ────────────────────────────
// Each collaborator either returns a string or fails; nothing else is
// assumed about the implementation behind it.

#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn address(&self) -> Result<String>;
    async fn balance(&self) -> Result<String>;
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> Result<String>;
}

#[async_trait]
pub trait SocialProvider: Send + Sync {
    async fn post(&self, text: &str) -> Result<String>;
    async fn mentions(&self) -> Result<String>;
}

#[async_trait]
pub trait BrowserProvider: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// The injected collaborator set.
#[derive(Clone)]
pub struct Collaborators {
    pub wallet: Arc<dyn WalletProvider>,
    pub search: Arc<dyn SearchProvider>,
    pub social: Arc<dyn SocialProvider>,
    pub browser: Arc<dyn BrowserProvider>,
}

struct RegisteredTool {
    spec: ToolSpec,
    handler: ToolHandler,
}

/// The capability table: tool name → schema + handler.
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    bus: EventBus,
}

impl ToolRegistry {
    /// Build the full registry from the collaborator set plus the
    /// scheduler-tools and memory-tools bound to their runtime values.
    pub fn build(
        bus: EventBus,
        collaborators: Collaborators,
        scheduler: Arc<Scheduler>,
        memory: Arc<MemoryManager>,
    ) -> Self {
        let mut registry = Self {
            tools: BTreeMap::new(),
            bus,
        };

        registry.add(
            ToolSpec {
                name: "get_datetime".into(),
                description: "Current local and UTC date and time".into(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
            Arc::new(|_args| {
                Box::pin(async {
                    let local = chrono::Local::now();
                    let utc = chrono::Utc::now();
                    Ok(format!(
                        "Local: {} ({})\nUTC: {}",
                        local.format("%Y-%m-%d %H:%M:%S"),
                        local.format("%Z"),
                        utc.format("%Y-%m-%d %H:%M:%S"),
                    ))
                })
            }),
        );

        let wallet = Arc::clone(&collaborators.wallet);
        registry.add(
            ToolSpec {
                name: "wallet_address".into(),
                description: "The agent's wallet address".into(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
            Arc::new(move |_args| {
                let wallet = Arc::clone(&wallet);
                Box::pin(async move { wallet.address().await })
            }),
        );

        let wallet = Arc::clone(&collaborators.wallet);
        registry.add(
            ToolSpec {
                name: "wallet_balance".into(),
                description: "The agent's current wallet balance".into(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
            Arc::new(move |_args| {
                let wallet = Arc::clone(&wallet);
                Box::pin(async move { wallet.balance().await })
            }),
        );

        let search = Arc::clone(&collaborators.search);
        registry.add(
            ToolSpec {
                name: "perplexity_search".into(),
                description: "Realtime web search for current facts and news".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "max_results": { "type": "integer", "default": 5 }
                    },
                    "required": ["query"]
                }),
            },
            Arc::new(move |args| {
                let search = Arc::clone(&search);
                Box::pin(async move {
                    let query = required_str(&args, "query")?;
                    let max_results = args["max_results"].as_u64().unwrap_or(5) as u32;
                    search.search(&query, max_results).await
                })
            }),
        );

        let browser = Arc::clone(&collaborators.browser);
        registry.add(
            ToolSpec {
                name: "browser_fetch".into(),
                description: "Fetch a web page with the headless browser and return its text".into(),
                parameters: json!({
                    "type": "object",
                    "properties": { "url": { "type": "string" } },
                    "required": ["url"]
                }),
            },
            Arc::new(move |args| {
                let browser = Arc::clone(&browser);
                Box::pin(async move {
                    let url = required_str(&args, "url")?;
                    browser.fetch(&url).await
                })
            }),
        );

        let social = Arc::clone(&collaborators.social);
        registry.add(
            ToolSpec {
                name: "social_post".into(),
                description: "Publish a post on the social network".into(),
                parameters: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            },
            Arc::new(move |args| {
                let social = Arc::clone(&social);
                Box::pin(async move {
                    let text = required_str(&args, "text")?;
                    social.post(&text).await
                })
            }),
        );

        let social = Arc::clone(&collaborators.social);
        registry.add(
            ToolSpec {
                name: "social_mentions".into(),
                description: "Read recent mentions on the social network".into(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
            Arc::new(move |_args| {
                let social = Arc::clone(&social);
                Box::pin(async move { social.mentions().await })
            }),
        );

        // ── Scheduler tools ────────────────────────────────────

        let sched = Arc::clone(&scheduler);
        registry.add(
            ToolSpec {
                name: "schedule_reminder".into(),
                description: "Schedule a one-time reminder N minutes from now".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "minutes": { "type": "integer", "minimum": 1 },
                        "prompt": { "type": "string" },
                        "lane": { "type": "string", "enum": ["fast", "slow", "background"] }
                    },
                    "required": ["minutes", "prompt"]
                }),
            },
            Arc::new(move |args| {
                let sched = Arc::clone(&sched);
                Box::pin(async move {
                    let minutes = args["minutes"].as_u64().unwrap_or(0);
                    if minutes == 0 {
                        return Ok("Error: 'minutes' must be a positive integer".into());
                    }
                    let prompt = required_str(&args, "prompt")?;
                    let lane = args["lane"]
                        .as_str()
                        .and_then(|s| s.parse::<Lane>().ok())
                        .unwrap_or(Lane::Background);
                    let id = sched.schedule_one_time_in(minutes, prompt, lane).await?;
                    Ok(format!("Reminder scheduled in {minutes} min (id {id})"))
                })
            }),
        );

        let sched = Arc::clone(&scheduler);
        registry.add(
            ToolSpec {
                name: "list_reminders".into(),
                description: "List pending one-time reminders".into(),
                parameters: json!({ "type": "object", "properties": {} }),
            },
            Arc::new(move |_args| {
                let sched = Arc::clone(&sched);
                Box::pin(async move {
                    let reminders = sched.list_one_time().await;
                    if reminders.is_empty() {
                        return Ok("No pending reminders".into());
                    }
                    let lines: Vec<String> = reminders
                        .iter()
                        .map(|r| {
                            format!(
                                "- {} at {} [{}]: {}",
                                r.id,
                                chrono::DateTime::from_timestamp_millis(r.run_at_ms)
                                    .map(|t| t.to_rfc3339())
                                    .unwrap_or_else(|| r.run_at_ms.to_string()),
                                r.lane,
                                r.prompt
                            )
                        })
                        .collect();
                    Ok(lines.join("\n"))
                })
            }),
        );

        let sched = Arc::clone(&scheduler);
        registry.add(
            ToolSpec {
                name: "cancel_reminder".into(),
                description: "Cancel a pending one-time reminder by id".into(),
                parameters: json!({
                    "type": "object",
                    "properties": { "id": { "type": "string" } },
                    "required": ["id"]
                }),
            },
            Arc::new(move |args| {
                let sched = Arc::clone(&sched);
                Box::pin(async move {
                    let id = required_str(&args, "id")?;
                    if sched.cancel_one_time(&id).await {
                        Ok(format!("Cancelled reminder {id}"))
                    } else {
                        Ok(format!("No reminder with id {id}"))
                    }
                })
            }),
        );

        // ── Memory tools ───────────────────────────────────────

        let mem = Arc::clone(&memory);
        registry.add(
            ToolSpec {
                name: "write_memory_entry".into(),
                description: "Append a durable note to semantic or procedural memory".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "store": { "type": "string", "enum": ["semantic", "procedural"] },
                        "content": { "type": "string" },
                        "section": { "type": "string" }
                    },
                    "required": ["store", "content"]
                }),
            },
            Arc::new(move |args| {
                let mem = Arc::clone(&mem);
                Box::pin(async move {
                    let store = required_str(&args, "store")?;
                    let content = required_str(&args, "content")?;
                    let section = args["section"].as_str();
                    Ok(mem.write_memory_entry(&store, &content, section))
                })
            }),
        );

        let mem = Arc::clone(&memory);
        registry.add(
            ToolSpec {
                name: "write_goal_entry".into(),
                description: "Create or update a persistent goal".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "progress": { "type": "string" },
                        "status": { "type": "string", "enum": ["active", "completed", "paused", "cancelled"] },
                        "tags": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["title"]
                }),
            },
            Arc::new(move |args| {
                let mem = Arc::clone(&mem);
                Box::pin(async move {
                    let title = required_str(&args, "title")?;
                    let tags: Vec<String> = args["tags"]
                        .as_array()
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|v| v.as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default();
                    Ok(mem.write_goal_entry(
                        &title,
                        args["progress"].as_str(),
                        args["status"].as_str(),
                        tags,
                    ))
                })
            }),
        );

        let mem = Arc::clone(&memory);
        registry.add(
            ToolSpec {
                name: "remember_this".into(),
                description: "Durably remember a fact the user stated".into(),
                parameters: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            },
            Arc::new(move |args| {
                let mem = Arc::clone(&mem);
                Box::pin(async move {
                    let text = required_str(&args, "text")?;
                    Ok(mem.remember_this(&text))
                })
            }),
        );

        registry
    }

    fn add(&mut self, spec: ToolSpec, handler: ToolHandler) {
        self.tools.insert(spec.name.clone(), RegisteredTool { spec, handler });
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Schemas of every registered tool, for the LLM request.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec.clone()).collect()
    }

    /// Execute a model-issued tool call. Never fails: unknown tools and
    /// argument errors come back as strings.
    pub async fn execute(&self, call: &ToolCall) -> String {
        let Some(_) = self.tools.get(&call.name) else {
            return format!("Unknown tool: {}", call.name);
        };
        let args = match call.parse_arguments() {
            Ok(args) => args,
            Err(e) => return format!("Error executing {}: {}", call.name, e),
        };
        self.invoke(&call.name, args).await
    }

    /// Invoke a tool directly (deterministic router, integrity guards).
    /// Emits the paired `tool:start`/`tool:end` events around the handler.
    pub async fn invoke(&self, name: &str, args: Value) -> String {
        let Some(tool) = self.tools.get(name) else {
            return format!("Unknown tool: {name}");
        };

        debug!(tool = name, "executing tool");
        self.bus.tool_start(name, &args);
        let started = Instant::now();
        let output = match (tool.handler)(args).await {
            Ok(output) => output,
            Err(e) => format!("Error executing {name}: {e}"),
        };
        self.bus
            .tool_end(name, started.elapsed().as_millis() as u64, &output);
        output
    }
}

/// Extract a required string argument or produce an InvalidInput error the
/// registry will render as an `Error executing …` string.
fn required_str(args: &Value, key: &str) -> Result<String> {
    args[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
        .ok_or_else(|| vigil_core::VigilError::InvalidInput(format!("missing '{key}' argument")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Stub collaborators with fixed outputs, for tests.
    pub struct StubWallet;
    #[async_trait]
    impl WalletProvider for StubWallet {
        async fn address(&self) -> Result<String> {
            Ok("0xFEED...BEEF".into())
        }
        async fn balance(&self) -> Result<String> {
            Ok("Balance: 1.2345 ETH".into())
        }
    }

    pub struct StubSearch;
    #[async_trait]
    impl SearchProvider for StubSearch {
        async fn search(&self, query: &str, max_results: u32) -> Result<String> {
            Ok(format!("Results for '{query}' (top {max_results}): nothing new"))
        }
    }

    pub struct StubSocial;
    #[async_trait]
    impl SocialProvider for StubSocial {
        async fn post(&self, text: &str) -> Result<String> {
            Ok(format!("Posted: {text}"))
        }
        async fn mentions(&self) -> Result<String> {
            Ok("No new mentions".into())
        }
    }

    pub struct StubBrowser;
    #[async_trait]
    impl BrowserProvider for StubBrowser {
        async fn fetch(&self, url: &str) -> Result<String> {
            Ok(format!("Contents of {url}"))
        }
    }

    pub fn stub_collaborators() -> Collaborators {
        Collaborators {
            wallet: Arc::new(StubWallet),
            search: Arc::new(StubSearch),
            social: Arc::new(StubSocial),
            browser: Arc::new(StubBrowser),
        }
    }
}
