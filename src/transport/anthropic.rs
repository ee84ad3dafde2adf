//! Anthropic transport (spec §4.2.3): message serialization, system-prompt
//! consolidation, tool_use/tool_result mapping, usage normalization.
//!
//! Grounded on the teacher's `AnthropicProvider` (`llm/anthropic.rs`):
//! `build_request_body`'s per-role mapping, `convert_usage`'s cache-token
//! folding, and `parse_finish_reason`'s status mapping are all kept, but
//! retargeted from the flat `Message{role, content: String}` model to
//! `BaseMessage`/`ContentPart`, and extended with the spec's
//! consecutive-tool_use coalescing and orphan tool_use dropping (neither of
//! which the teacher needed, since it never replayed a trimmed/compacted
//! history back to Anthropic).

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::config::ToolChoice;
use crate::error::{Error, Result};
use crate::message::{BaseMessage, ContentPart, FunctionCallBody, RawItem, ToolCall};
use crate::tools::ToolDefinition;

use super::{ChatInvokeCompletion, ChatInvokeInput, InvokeContext, InvokeUsage, LLMTransport, ProviderMeta, StopReason};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub fn is_supported_model(model: &str) -> bool {
    model.starts_with("claude-")
}

pub struct AnthropicTransport {
    client: reqwest::Client,
    api_key: String,
    default_model: String,
    max_tokens: u32,
}

impl AnthropicTransport {
    pub fn new(api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            max_tokens: 8192,
        }
    }

    fn model_for(&self, input: &ChatInvokeInput<'_>) -> String {
        input.model_override.map(str::to_string).unwrap_or_else(|| self.default_model.clone())
    }
}

/// Consolidates every system message's text into a single string (spec
/// §4.2.3: "consolidates system messages into a single string").
fn consolidate_system_prompt(messages: &[BaseMessage]) -> Option<String> {
    let texts: Vec<String> = messages
        .iter()
        .filter_map(|m| match m {
            BaseMessage::System { content } => Some(content.iter().map(ContentPart::describe).collect::<Vec<_>>().join("")),
            _ => None,
        })
        .filter(|t| !t.is_empty())
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n\n"))
    }
}

/// Builds Anthropic `messages` array content, applying:
/// - tool_call_id on a `Tool` message maps to a `tool_result` block inside
///   a user-role message.
/// - consecutive assistant tool_use-bearing messages coalesce into one.
/// - a `tool_use` block with no matching later `tool_result` is dropped
///   (spec §4.2.3 "drops orphan tool_use blocks not followed by matching
///   tool_result blocks").
fn build_messages(messages: &[BaseMessage]) -> Vec<Value> {
    let tool_result_ids: std::collections::HashSet<&str> = messages
        .iter()
        .filter_map(|m| match m {
            BaseMessage::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();

    let mut out: Vec<Value> = Vec::new();

    for message in messages {
        match message {
            BaseMessage::System { .. } => continue,
            BaseMessage::User { content } => {
                out.push(json!({
                    "role": "user",
                    "content": content.iter().map(convert_user_part).collect::<Vec<_>>(),
                }));
            }
            BaseMessage::Assistant { content, tool_calls, .. } => {
                let mut blocks: Vec<Value> = Vec::new();
                if let Some(parts) = content {
                    for part in parts {
                        if let ContentPart::Text { text } = part {
                            if !text.is_empty() {
                                blocks.push(json!({"type": "text", "text": text}));
                            }
                        }
                    }
                }
                if let Some(calls) = tool_calls {
                    for call in calls {
                        if tool_result_ids.contains(call.id.as_str()) {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call.id,
                                "name": call.function.name,
                                "input": call.parse_arguments(),
                            }));
                        }
                    }
                }
                if blocks.is_empty() {
                    continue;
                }
                if let Some(Value::Object(last)) = out.last_mut() {
                    if last.get("role").and_then(Value::as_str) == Some("assistant") {
                        if let Some(Value::Array(existing)) = last.get_mut("content") {
                            existing.extend(blocks);
                            continue;
                        }
                    }
                }
                out.push(json!({"role": "assistant", "content": blocks}));
            }
            BaseMessage::Tool { tool_call_id, content, is_error, .. } => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": content,
                        "is_error": is_error.unwrap_or(false),
                    }],
                }));
            }
            BaseMessage::Reasoning { .. } => continue,
        }
    }

    out
}

fn convert_user_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"type": "text", "text": text}),
        ContentPart::ImageUrl { url, media_type, .. } => json!({
            "type": "image",
            "source": {"type": "url", "url": url, "media_type": media_type},
        }),
        ContentPart::Document { data, media_type } => json!({
            "type": "document",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }),
        ContentPart::Other { provider, payload, .. } if provider == "anthropic" => payload.clone(),
        other => json!({"type": "text", "text": other.describe()}),
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|tool| match tool {
            ToolDefinition::Function { name, description, parameters, .. } => Some(json!({
                "name": name,
                "description": description,
                "input_schema": parameters,
            })),
            ToolDefinition::HostedSearch { .. } => None,
        })
        .collect()
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({"type": "auto"}),
        ToolChoice::Required => json!({"type": "any"}),
        ToolChoice::None => json!({"type": "none"}),
        ToolChoice::Named(name) => json!({"type": "tool", "name": name}),
    }
}

fn parse_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("end_turn") => StopReason::EndTurn,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("tool_use") => StopReason::ToolCalls,
        Some("stop_sequence") => StopReason::StopSequence,
        Some(other) => StopReason::Other(other.to_string()),
        None => StopReason::EndTurn,
    }
}

/// Usage is normalized so `input_tokens` includes cache-read and
/// cache-creation tokens (spec §4.2.3 and §4.2.4).
fn convert_usage(usage: &Value, model: &str) -> InvokeUsage {
    let base = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let cache_read = usage.get("cache_read_input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let cache_create = usage.get("cache_creation_input_tokens").and_then(Value::as_u64).unwrap_or(0);
    let output = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
    InvokeUsage {
        model: model.to_string(),
        input_tokens: base + cache_read + cache_create,
        input_cached_tokens: Some(cache_read),
        input_cache_creation_tokens: Some(cache_create),
        output_tokens: output,
        total_tokens: base + cache_read + cache_create + output,
    }
}

fn parse_content_blocks(blocks: &[Value]) -> Vec<BaseMessage> {
    let mut messages = Vec::new();
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                text_parts.push(ContentPart::text(block.get("text").and_then(Value::as_str).unwrap_or_default()));
            }
            Some("thinking") => {
                messages.push(BaseMessage::reasoning(
                    block.get("thinking").and_then(Value::as_str).map(str::to_string),
                    Some(RawItem {
                        provider: "anthropic".to_string(),
                        kind: "thinking".to_string(),
                        payload: block.clone(),
                    }),
                ));
            }
            Some("tool_use") => {
                tool_calls.push(ToolCall {
                    id: block.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                    call_type: "function".to_string(),
                    function: FunctionCallBody {
                        name: block.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                        arguments: block.get("input").map(|v| v.to_string()).unwrap_or_else(|| "{}".to_string()),
                    },
                    provider_meta: None,
                });
            }
            _ => {}
        }
    }

    if !tool_calls.is_empty() {
        let content = if text_parts.is_empty() { None } else { Some(text_parts) };
        messages.push(BaseMessage::assistant_tool_calls(content, tool_calls));
    } else if !text_parts.is_empty() {
        messages.push(BaseMessage::Assistant { content: Some(text_parts), tool_calls: None, refusal: None });
    }

    messages
}

#[async_trait]
impl LLMTransport for AnthropicTransport {
    fn provider(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn invoke(&self, input: ChatInvokeInput<'_>, context: Option<InvokeContext<'_>>) -> Result<ChatInvokeCompletion> {
        let abort = context.map(|c| c.abort).unwrap_or_default();
        let model = self.model_for(&input);
        let system = consolidate_system_prompt(input.messages);
        let messages = build_messages(input.messages);
        let tools = convert_tools(input.tools);

        let mut body = json!({
            "model": model,
            "max_tokens": self.max_tokens,
            "messages": messages,
            "stream": true,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = convert_tool_choice(&input.tool_choice);
        }

        if abort.is_cancelled() {
            return Err(Error::Aborted);
        }

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::ApiStatus { status: status.as_u16(), body: body_text });
        }

        let message = accumulate_stream(response, &abort).await?;

        let blocks = message.get("content").and_then(Value::as_array).cloned().unwrap_or_default();
        let messages = parse_content_blocks(&blocks);
        let stop_reason = parse_stop_reason(message.get("stop_reason").and_then(Value::as_str));
        let usage = message.get("usage").map(|u| convert_usage(u, &model));

        Ok(ChatInvokeCompletion {
            messages,
            usage,
            stop_reason: Some(stop_reason),
            provider_meta: ProviderMeta {
                response_id: message.get("id").and_then(Value::as_str).map(str::to_string),
                transport: "http".to_string(),
                websocket_mode: None,
                fallback_used: false,
                chain_reset: false,
                ws_reconnect_count: 0,
                ws_input_mode: None,
            },
        })
    }
}

/// Consumes an Anthropic SSE stream, reconstructing the final `message`
/// object from `message_start`/`content_block_delta`/`message_delta`
/// events, mirroring the accumulation the teacher does per-chunk for
/// `ChatCompletionChunk`.
async fn accumulate_stream(response: reqwest::Response, abort: &tokio_util::sync::CancellationToken) -> Result<Value> {
    use eventsource_stream::Eventsource;

    let mut stream = response.bytes_stream().eventsource();
    let mut message = json!({"content": []});

    while let Some(event) = stream.next().await {
        if abort.is_cancelled() {
            return Err(Error::Aborted);
        }
        let event = event.map_err(|e| Error::Transport(e.to_string()))?;
        let parsed: Value = serde_json::from_str(&event.data).unwrap_or(Value::Null);
        match parsed.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                if let Some(msg) = parsed.get("message") {
                    message = msg.clone();
                }
            }
            Some("content_block_start") => {
                if let (Some(index), Some(block)) = (parsed.get("index").and_then(Value::as_u64), parsed.get("content_block")) {
                    let content = message["content"].as_array_mut().unwrap();
                    while content.len() <= index as usize {
                        content.push(json!({}));
                    }
                    content[index as usize] = block.clone();
                }
            }
            Some("content_block_delta") => {
                if let (Some(index), Some(delta)) = (parsed.get("index").and_then(Value::as_u64), parsed.get("delta")) {
                    let content = message["content"].as_array_mut().unwrap();
                    if let Some(block) = content.get_mut(index as usize) {
                        apply_content_delta(block, delta);
                    }
                }
            }
            Some("message_delta") => {
                if let Some(delta) = parsed.get("delta") {
                    if let Some(stop_reason) = delta.get("stop_reason") {
                        message["stop_reason"] = stop_reason.clone();
                    }
                }
                if let Some(usage) = parsed.get("usage") {
                    message["usage"] = usage.clone();
                }
            }
            Some("message_stop") => break,
            _ => continue,
        }
    }

    Ok(message)
}

fn apply_content_delta(block: &mut Value, delta: &Value) {
    match delta.get("type").and_then(Value::as_str) {
        Some("text_delta") => {
            let existing = block.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
            let addition = delta.get("text").and_then(Value::as_str).unwrap_or_default();
            block["text"] = json!(format!("{existing}{addition}"));
            block["type"] = json!("text");
        }
        Some("input_json_delta") => {
            let existing = block.get("_partial_json").and_then(Value::as_str).unwrap_or_default().to_string();
            let addition = delta.get("partial_json").and_then(Value::as_str).unwrap_or_default();
            let combined = format!("{existing}{addition}");
            block["_partial_json"] = json!(combined);
            if let Ok(parsed) = serde_json::from_str::<Value>(&combined) {
                block["input"] = parsed;
            }
        }
        Some("thinking_delta") => {
            let existing = block.get("thinking").and_then(Value::as_str).unwrap_or_default().to_string();
            let addition = delta.get("thinking").and_then(Value::as_str).unwrap_or_default();
            block["thinking"] = json!(format!("{existing}{addition}"));
            block["type"] = json!("thinking");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consolidates_multiple_system_messages() {
        let messages = vec![BaseMessage::system_text("be helpful")];
        assert_eq!(consolidate_system_prompt(&messages), Some("be helpful".to_string()));
    }

    #[test]
    fn orphan_tool_use_is_dropped() {
        let call = ToolCall::new("call_1", "bash", "{}");
        let messages = vec![BaseMessage::assistant_tool_calls(None, vec![call])];
        let built = build_messages(&messages);
        assert!(built.is_empty(), "assistant message with no matching tool_result should be dropped entirely");
    }

    #[test]
    fn tool_use_with_matching_result_is_kept() {
        let call = ToolCall::new("call_1", "bash", "{}");
        let messages = vec![
            BaseMessage::assistant_tool_calls(None, vec![call]),
            BaseMessage::tool_result("call_1", "bash", "ok", false),
        ];
        let built = build_messages(&messages);
        assert_eq!(built[0]["role"], "assistant");
        assert_eq!(built[0]["content"][0]["type"], "tool_use");
        assert_eq!(built[1]["content"][0]["type"], "tool_result");
    }

    #[test]
    fn usage_normalizes_cache_tokens_into_input_tokens() {
        let usage = json!({"input_tokens": 100, "cache_read_input_tokens": 20, "cache_creation_input_tokens": 5, "output_tokens": 10});
        let normalized = convert_usage(&usage, "claude-opus-4");
        assert_eq!(normalized.input_tokens, 125);
        assert_eq!(normalized.total_tokens, 135);
    }

    #[test]
    fn reasoning_messages_are_dropped_on_replay() {
        let messages = vec![BaseMessage::reasoning(Some("thinking...".to_string()), None)];
        assert!(build_messages(&messages).is_empty());
    }
}
