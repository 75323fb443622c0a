use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Description of a tool that can be called by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique name, e.g. "wallet_balance", "perplexity_search".
    pub name: String,
    /// Human-readable description for the LLM.
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
}

/// A request from the LLM to call a tool.
///
/// `arguments` is the raw JSON string as emitted by the model. Streaming
/// providers concatenate argument fragments in index order before freezing
/// the call, so the string may still fail to parse; handlers report that as
/// an `Error executing <tool>: …` string rather than an error value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    /// Parse the accumulated argument string. An empty string parses as `{}`.
    pub fn parse_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// Handler contract: async, takes the parsed argument map, returns a string.
/// Handlers never raise to the agent loop; failures are returned as strings
/// beginning with `Error`.
pub type ToolHandler = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = crate::Result<String>> + Send>> + Send + Sync,
>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_arguments_parse_as_object() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "get_time".into(),
            arguments: String::new(),
        };
        let parsed = call.parse_arguments().unwrap();
        assert!(parsed.is_object());
    }

    #[test]
    fn malformed_arguments_error() {
        let call = ToolCall {
            id: "call_2".into(),
            name: "get_time".into(),
            arguments: "{\"q\": ".into(),
        };
        assert!(call.parse_arguments().is_err());
    }
}
