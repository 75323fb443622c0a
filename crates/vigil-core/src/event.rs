use serde::{Deserialize, Serialize};
use serde_json::Value;

use std::sync::Arc;
use tokio::sync::broadcast;

/// Maximum characters of tool output carried in a `ToolEnd` event.
pub const OUTPUT_PREVIEW_MAX: usize = 1200;

/// What the agent is currently doing, for the status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentActivity {
    Idle,
    Thinking,
    Streaming,
}

/// Events flowing through the runtime. Every tool invocation emits exactly
/// one `ToolStart` and one `ToolEnd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    ToolStart {
        tool: String,
        args: Value,
        label: String,
    },
    ToolEnd {
        tool: String,
        duration_ms: u64,
        success: bool,
        output_preview: String,
    },
    AgentStatus {
        activity: AgentActivity,
    },
}

/// A broadcast-based event bus for runtime-wide pub/sub. Fire-and-forget:
/// publishing never blocks and listeners must not block the publisher.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Emit a paired tool start event with a human label.
    pub fn tool_start(&self, tool: &str, args: &Value) {
        self.publish(Event::ToolStart {
            tool: tool.to_string(),
            args: args.clone(),
            label: tool_label(tool, args),
        });
    }

    /// Emit the matching tool end event. `success` is derived from the
    /// output string: anything starting with `Error` counts as a failure.
    pub fn tool_end(&self, tool: &str, duration_ms: u64, output: &str) {
        let preview: String = output.chars().take(OUTPUT_PREVIEW_MAX).collect();
        self.publish(Event::ToolEnd {
            tool: tool.to_string(),
            duration_ms,
            success: !output.starts_with("Error"),
            output_preview: preview,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

/// Compute a human-readable label for a tool invocation, used by push
/// notifications and dashboards.
pub fn tool_label(tool: &str, args: &Value) -> String {
    let arg = |key: &str| args.get(key).and_then(|v| v.as_str()).unwrap_or("");
    match tool {
        "get_datetime" => "Checking the current date and time".into(),
        "wallet_address" => "Looking up wallet address".into(),
        "wallet_balance" => "Checking wallet balance".into(),
        "perplexity_search" => {
            let q = arg("query");
            if q.is_empty() {
                "Searching the web".into()
            } else {
                format!("Searching the web for \"{q}\"")
            }
        }
        "browser_fetch" => format!("Fetching {}", arg("url")),
        "social_post" => "Posting an update".into(),
        "social_mentions" => "Reading mentions".into(),
        "schedule_reminder" => "Scheduling a reminder".into(),
        "list_reminders" => "Listing reminders".into(),
        "cancel_reminder" => "Cancelling a reminder".into(),
        "write_memory_entry" => "Saving a memory note".into(),
        "write_goal_entry" => "Updating goals".into(),
        "remember_this" => "Remembering that".into(),
        _ => format!("Using {tool}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_and_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.tool_start("wallet_balance", &json!({}));
        bus.tool_end("wallet_balance", 12, "0.42 ETH");

        match rx.recv().await.unwrap() {
            Event::ToolStart { tool, label, .. } => {
                assert_eq!(tool, "wallet_balance");
                assert_eq!(label, "Checking wallet balance");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            Event::ToolEnd { success, output_preview, .. } => {
                assert!(success);
                assert_eq!(output_preview, "0.42 ETH");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn error_output_marks_failure() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.tool_end("browser_fetch", 3, "Error executing browser_fetch: timeout");
        match rx.try_recv().unwrap() {
            Event::ToolEnd { success, .. } => assert!(!success),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn preview_is_truncated() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let long = "x".repeat(5000);
        bus.tool_end("perplexity_search", 100, &long);
        match rx.try_recv().unwrap() {
            Event::ToolEnd { output_preview, .. } => {
                assert_eq!(output_preview.len(), OUTPUT_PREVIEW_MAX);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_tool_label_falls_back() {
        assert_eq!(tool_label("mystery_tool", &json!({})), "Using mystery_tool");
    }
}
