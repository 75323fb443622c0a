use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use vigil_core::{Message, MessageContent, Result, Role, ToolCall, VigilError};

use crate::provider::*;

/// OpenAI-compatible chat-completions provider (works with OpenAI, Azure,
/// Together, vLLM, and other compatible gateways).
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    provider_name: String,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            provider_name: "openai".into(),
        }
    }

    /// Use a custom base URL (for Azure, Together, vLLM, etc.)
    pub fn with_base_url(mut self, url: String, name: String) -> Self {
        self.base_url = url;
        self.provider_name = name;
        self
    }

    fn request_body(request: &LlmRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": &request.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": wire_messages(&request.messages),
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }

        body
    }
}

/// Convert a history into the chat-completions wire format.
fn wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };

            let content = match &msg.content {
                MessageContent::Text(t) => {
                    if t.is_empty() && !msg.tool_calls.is_empty() {
                        Value::Null
                    } else {
                        json!(t)
                    }
                }
                MessageContent::Parts(parts) => json!(parts
                    .iter()
                    .map(|p| match p {
                        vigil_core::ContentPart::Text { text } =>
                            json!({ "type": "text", "text": text }),
                        vigil_core::ContentPart::ImageUrl { url } =>
                            json!({ "type": "image_url", "image_url": { "url": url } }),
                    })
                    .collect::<Vec<_>>()),
            };

            let mut obj = json!({ "role": role, "content": content });

            if let Some(ref id) = msg.tool_call_id {
                obj["tool_call_id"] = json!(id);
            }
            if !msg.tool_calls.is_empty() {
                let tc: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.name, "arguments": tc.arguments },
                        })
                    })
                    .collect();
                obj["tool_calls"] = json!(tc);
            }
            obj
        })
        .collect()
}

fn parse_stop_reason(finish_reason: &str, has_tool_calls: bool) -> StopReason {
    match finish_reason {
        "length" => StopReason::MaxTokens,
        "content_filter" => StopReason::ContentFilter,
        _ if has_tool_calls => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = Self::request_body(request, false);

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| VigilError::LlmProvider(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(VigilError::LlmProvider(format!("HTTP {status}: {text}")));
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| VigilError::LlmProvider(e.to_string()))?;

        let choice = &data["choices"][0];
        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let tool_calls: Vec<ToolCall> = choice["message"]["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| {
                        Some(ToolCall {
                            id: c["id"].as_str()?.to_string(),
                            name: c["function"]["name"].as_str()?.to_string(),
                            arguments: c["function"]["arguments"]
                                .as_str()
                                .unwrap_or("{}")
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let has_tool_calls = !tool_calls.is_empty();
        let finish_reason = choice["finish_reason"].as_str().unwrap_or("");
        let usage = Usage {
            prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(LlmResponse {
            content,
            tool_calls,
            usage,
            stop_reason: parse_stop_reason(finish_reason, has_tool_calls),
        })
    }

    async fn stream(
        &self,
        request: &LlmRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamChunk>> {
        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let body = Self::request_body(request, true);

        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();

        tokio::spawn(async move {
            let resp = client
                .post(format!("{base_url}/chat/completions"))
                .header("Authorization", format!("Bearer {api_key}"))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(resp) if resp.status().is_success() => {
                    use futures::StreamExt;
                    let mut stream = resp.bytes_stream();
                    let mut buffer = String::new();
                    // Tool call deltas accumulate by index: index → (id, name, arguments).
                    // Argument fragments concatenate monotonically until the
                    // stream terminates, then the calls freeze in index order.
                    let mut tool_calls: std::collections::BTreeMap<u64, (String, String, String)> =
                        std::collections::BTreeMap::new();
                    let mut usage = Usage::default();
                    let mut finish_reason: Option<String> = None;

                    while let Some(chunk_result) = stream.next().await {
                        match chunk_result {
                            Ok(bytes) => {
                                buffer.push_str(&String::from_utf8_lossy(&bytes));
                                while let Some(newline_pos) = buffer.find('\n') {
                                    let line = buffer[..newline_pos].trim().to_string();
                                    buffer = buffer[newline_pos + 1..].to_string();

                                    if line.is_empty() || line.starts_with(':') {
                                        continue;
                                    }
                                    let Some(data) = line.strip_prefix("data: ") else {
                                        continue;
                                    };
                                    if data.trim() == "[DONE]" {
                                        // Freeze accumulated tool calls in index order.
                                        let frozen = !tool_calls.is_empty();
                                        for (idx, (id, name, args)) in
                                            std::mem::take(&mut tool_calls)
                                        {
                                            debug!(index = idx, tool = %name, "freezing tool call");
                                            let _ = tx
                                                .send(StreamChunk::ToolCall(ToolCall {
                                                    id,
                                                    name,
                                                    arguments: args,
                                                }))
                                                .await;
                                        }
                                        let stop = parse_stop_reason(
                                            finish_reason.as_deref().unwrap_or(""),
                                            frozen,
                                        );
                                        let _ = tx.send(StreamChunk::Usage(usage)).await;
                                        let _ = tx.send(StreamChunk::Done(stop)).await;
                                        return;
                                    }
                                    let Ok(event) = serde_json::from_str::<Value>(data) else {
                                        continue;
                                    };
                                    let delta = &event["choices"][0]["delta"];
                                    if let Some(text) = delta["content"].as_str() {
                                        if !text.is_empty() {
                                            let _ = tx
                                                .send(StreamChunk::TextDelta(text.to_string()))
                                                .await;
                                        }
                                    }
                                    if let Some(tcs) = delta["tool_calls"].as_array() {
                                        for tc in tcs {
                                            let idx = tc["index"].as_u64().unwrap_or(0);
                                            let entry = tool_calls.entry(idx).or_default();
                                            if let Some(id) = tc["id"].as_str() {
                                                entry.0 = id.to_string();
                                            }
                                            if let Some(name) = tc["function"]["name"].as_str() {
                                                entry.1.push_str(name);
                                            }
                                            if let Some(args) =
                                                tc["function"]["arguments"].as_str()
                                            {
                                                entry.2.push_str(args);
                                            }
                                        }
                                    }
                                    if let Some(fr) = event["choices"][0]["finish_reason"].as_str()
                                    {
                                        finish_reason = Some(fr.to_string());
                                    }
                                    if let Some(u) = event.get("usage") {
                                        if let Some(pt) = u["prompt_tokens"].as_u64() {
                                            usage.prompt_tokens = pt as u32;
                                        }
                                        if let Some(ct) = u["completion_tokens"].as_u64() {
                                            usage.completion_tokens = ct as u32;
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(StreamChunk::Error(e.to_string())).await;
                                return;
                            }
                        }
                    }
                    // Stream ended without [DONE].
                    let _ = tx.send(StreamChunk::Done(StopReason::EndTurn)).await;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    let _ = tx
                        .send(StreamChunk::Error(format!("HTTP {status}: {text}")))
                        .await;
                }
                Err(e) => {
                    let _ = tx.send(StreamChunk::Error(e.to_string())).await;
                }
            }
        });

        Ok(rx)
    }
}
