//! OpenAI transport: HTTP-streaming path (spec §4.2.1) and WebSocket
//! response-id-chaining path (spec §4.2.2).
//!
//! The HTTP path follows the teacher's `OpenAIProvider` SSE handling
//! (`llm/openai.rs`'s `chat`/`chat_loop`, built on `reqwest` +
//! `eventsource-stream`), retargeted from the Chat Completions wire format
//! to the Responses API shape the spec requires. The WS chaining
//! path has no teacher counterpart; it's grounded directly on spec §4.2.2's
//! state machine, using `tokio-tungstenite` (pulled in from the pack's
//! `sblanchard-SerialAgent` dependency list, the only example with a WS
//! client dependency).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::{OpenAiWebsocketConfig, RetryPolicyConfig, ToolChoice, WebsocketMode};
use crate::error::{Error, Result};
use crate::message::{BaseMessage, ContentPart, FunctionCallBody, RawItem, ToolCall};
use crate::retry::RetryConfig;
use crate::tools::ToolDefinition;

use super::{ChatInvokeCompletion, ChatInvokeInput, InvokeContext, InvokeUsage, LLMTransport, ProviderMeta, StopReason};

const RESPONSES_PATH: &str = "/responses";
const WS_IDLE_REUSE_WINDOW: Duration = Duration::from_secs(30);
const WS_SESSION_TTL: Duration = Duration::from_secs(600);
const WS_DISABLE_TTL: Duration = Duration::from_secs(60);

/// True for the model families the Responses API actually supports
/// (mirrors the teacher's `is_supported_model` allow-list check).
pub fn is_supported_model(model: &str) -> bool {
    model.starts_with("gpt-5") || model.starts_with("o1") || model.starts_with("gpt-4o")
}

/// Per session-key WS bookkeeping (spec §3 `WsSessionState`).
#[derive(Debug, Clone, Default)]
struct WsSessionState {
    previous_response_id: Option<String>,
    instructions_hash: u64,
    tools_hash: u64,
    model: String,
    last_input: Vec<Value>,
    last_used_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainDecision {
    Fresh,
    Chainable,
    Regenerate,
}

pub struct OpenAiTransport {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
    ws_config: OpenAiWebsocketConfig,
    retry: RetryPolicyConfig,
    ws_sessions: Mutex<HashMap<String, WsSessionState>>,
    disabled_until: Mutex<HashMap<String, Instant>>,
}

impl OpenAiTransport {
    pub fn new(api_key: impl Into<String>, default_model: impl Into<String>, ws_config: OpenAiWebsocketConfig, retry: RetryPolicyConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            default_model: default_model.into(),
            ws_config,
            retry,
            ws_sessions: Mutex::new(HashMap::new()),
            disabled_until: Mutex::new(HashMap::new()),
        }
    }

    fn model_for(&self, input: &ChatInvokeInput<'_>) -> String {
        input.model_override.map(str::to_string).unwrap_or_else(|| self.default_model.clone())
    }

    fn build_request_body(&self, input: &ChatInvokeInput<'_>, model: &str, previous_response_id: Option<&str>, items: Vec<Value>) -> Value {
        let has_web_search = input
            .tools
            .iter()
            .any(|t| matches!(t, ToolDefinition::HostedSearch { .. }));

        let mut include = vec!["reasoning.encrypted_content".to_string()];
        if has_web_search {
            include.push("web_search_call.action.sources".to_string());
            include.push("web_search_call.results".to_string());
        }

        let mut body = json!({
            "model": model,
            "input": items,
            "store": false,
            "include": include,
            "reasoning": {"effort": "medium", "summary": "auto"},
            "tools": convert_tools(input.tools),
            "tool_choice": convert_tool_choice(&input.tool_choice),
        });
        if let Some(prev) = previous_response_id {
            body["previous_response_id"] = json!(prev);
        }
        body
    }

    async fn http_invoke(&self, input: ChatInvokeInput<'_>, abort: &tokio_util::sync::CancellationToken) -> Result<ChatInvokeCompletion> {
        let model = self.model_for(&input);
        let items = convert_messages_to_input(input.messages);
        let body = self.build_request_body(&input, &model, None, items);

        let retry_config = RetryConfig {
            max_attempts: self.retry.max_retries.max(1),
            base_delay: self.retry.base_delay,
            max_delay: self.retry.max_delay,
            multiplier: 2.0,
        };

        let response_value = crate::retry::with_retry(&retry_config, || {
            let body = body.clone();
            async {
                if abort.is_cancelled() {
                    return Err(Error::Aborted);
                }
                let response = self
                    .client
                    .post(format!("{}{}", self.base_url, RESPONSES_PATH))
                    .bearer_auth(&self.api_key)
                    .json(&body)
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(Error::ApiStatus {
                        status: status.as_u16(),
                        body: body_text,
                    });
                }

                self.stream_to_completion(response, abort).await
            }
        })
        .await?;

        let (messages, stop_reason, response_id, usage) = parse_response(&response_value, &model);
        Ok(ChatInvokeCompletion {
            messages,
            usage,
            stop_reason,
            provider_meta: ProviderMeta {
                response_id,
                transport: "http".to_string(),
                websocket_mode: Some(websocket_mode_label(self.ws_config.mode)),
                fallback_used: false,
                chain_reset: false,
                ws_reconnect_count: 0,
                ws_input_mode: None,
            },
        })
    }

    /// Consumes a Responses API SSE stream to its `response.completed` frame.
    async fn stream_to_completion(&self, response: reqwest::Response, abort: &tokio_util::sync::CancellationToken) -> Result<Value> {
        let mut stream = response.bytes_stream().eventsource();
        while let Some(event) = stream.next().await {
            if abort.is_cancelled() {
                return Err(Error::Aborted);
            }
            let event = event.map_err(|e| Error::Transport(e.to_string()))?;
            let parsed: Value = serde_json::from_str(&event.data).unwrap_or(Value::Null);
            match parsed.get("type").and_then(Value::as_str) {
                Some("response.completed") => {
                    return Ok(parsed["response"].clone());
                }
                Some("response.failed") => {
                    let message = parsed["response"]["error"]["message"]
                        .as_str()
                        .unwrap_or("response failed")
                        .to_string();
                    return Err(Error::Transport(message));
                }
                _ => continue,
            }
        }
        Err(Error::Transport("stream ended before response.completed".to_string()))
    }

    fn decide_chain(&self, session_key: &str, model: &str, instructions_hash: u64, tools_hash: u64, items: &[Value]) -> (ChainDecision, Option<String>) {
        let sessions = self.ws_sessions.lock().unwrap();
        let Some(state) = sessions.get(session_key) else {
            return (ChainDecision::Fresh, None);
        };
        let unchanged = state.model == model && state.instructions_hash == instructions_hash && state.tools_hash == tools_hash;
        let is_prefix_extension = unchanged
            && items.len() >= state.last_input.len()
            && items.iter().zip(state.last_input.iter()).all(|(a, b)| a == b);
        if unchanged && is_prefix_extension {
            (ChainDecision::Chainable, state.previous_response_id.clone())
        } else {
            (ChainDecision::Regenerate, None)
        }
    }

    fn ws_session_reusable(&self, session_key: &str) -> bool {
        let sessions = self.ws_sessions.lock().unwrap();
        match sessions.get(session_key).and_then(|s| s.last_used_at) {
            Some(last_used) => last_used.elapsed() <= WS_IDLE_REUSE_WINDOW,
            None => false,
        }
    }

    fn record_ws_session(&self, session_key: &str, response_id: Option<String>, model: &str, instructions_hash: u64, tools_hash: u64, items: Vec<Value>) {
        let mut sessions = self.ws_sessions.lock().unwrap();
        sessions.insert(
            session_key.to_string(),
            WsSessionState {
                previous_response_id: response_id,
                instructions_hash,
                tools_hash,
                model: model.to_string(),
                last_input: items,
                last_used_at: Some(Instant::now()),
            },
        );
    }

    fn evict_stale_sessions(&self) {
        let mut sessions = self.ws_sessions.lock().unwrap();
        sessions.retain(|_, state| state.last_used_at.map(|t| t.elapsed() < WS_SESSION_TTL).unwrap_or(false));
    }

    fn is_disabled(&self, session_key: &str) -> bool {
        let disabled = self.disabled_until.lock().unwrap();
        disabled.get(session_key).map(|deadline| Instant::now() < *deadline).unwrap_or(false)
    }

    fn disable(&self, session_key: &str) {
        let mut disabled = self.disabled_until.lock().unwrap();
        disabled.insert(session_key.to_string(), Instant::now() + WS_DISABLE_TTL);
    }

    async fn ws_invoke(&self, input: ChatInvokeInput<'_>, session_key: &str, abort: &tokio_util::sync::CancellationToken) -> Result<ChatInvokeCompletion> {
        self.evict_stale_sessions();
        let needs_reconnect = !self.ws_session_reusable(session_key);
        if needs_reconnect {
            log::debug!("openai ws: no reusable socket for session {session_key}, opening fresh");
        }
        let model = self.model_for(&input);
        let items = convert_messages_to_input(input.messages);
        let instructions_hash = hash_value(&json!(input.options));
        let tools_hash = hash_value(&json!(convert_tools(input.tools)));

        let (decision, previous_response_id) = self.decide_chain(session_key, &model, instructions_hash, tools_hash, &items);

        let (send_items, ws_input_mode) = match decision {
            ChainDecision::Fresh => (items.clone(), "full".to_string()),
            ChainDecision::Chainable => {
                let suffix: Vec<Value> = {
                    let sessions = self.ws_sessions.lock().unwrap();
                    let prior_len = sessions.get(session_key).map(|s| s.last_input.len()).unwrap_or(0);
                    items[prior_len.min(items.len())..].to_vec()
                };
                let mode = if suffix.is_empty() { "empty" } else { "incremental" };
                (suffix, mode.to_string())
            }
            ChainDecision::Regenerate => (items.clone(), "full_regenerated".to_string()),
        };

        let chain_reset = matches!(decision, ChainDecision::Regenerate);
        let retry_config = RetryConfig {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        };

        // A stale or never-established session counts as a reconnect on the
        // next successful call, even if that call's own attempt loop never
        // has to retry.
        let mut reconnect_count = if needs_reconnect { 1u32 } else { 0u32 };
        let mut last_err = None;
        let mut attempt = 0;
        loop {
            if abort.is_cancelled() {
                return Err(Error::Aborted);
            }
            let body = self.build_request_body(&input, &model, previous_response_id.as_deref(), send_items.clone());
            match self.ws_single_attempt(&body, abort).await {
                Ok(response_value) => {
                    let (messages, stop_reason, response_id, usage) = parse_response(&response_value, &model);
                    self.record_ws_session(session_key, response_id.clone(), &model, instructions_hash, tools_hash, items);
                    return Ok(ChatInvokeCompletion {
                        messages,
                        usage,
                        stop_reason,
                        provider_meta: ProviderMeta {
                            response_id,
                            transport: "websocket".to_string(),
                            websocket_mode: Some(websocket_mode_label(self.ws_config.mode)),
                            fallback_used: false,
                            chain_reset,
                            ws_reconnect_count: reconnect_count,
                            ws_input_mode: Some(ws_input_mode),
                        },
                    });
                }
                Err(err) => {
                    last_err = Some(err);
                    attempt += 1;
                    if self.ws_config.mode != WebsocketMode::On || attempt >= retry_config.max_attempts {
                        break;
                    }
                    reconnect_count += 1;
                    let backoff = retry_config.base_delay * 2u32.pow(attempt - 1);
                    tokio::time::sleep(backoff.min(retry_config.max_delay)).await;
                }
            }
        }

        let err = last_err.unwrap_or_else(|| Error::Transport("websocket attempt exhausted".to_string()));
        if is_previous_response_not_found(&err) {
            self.disable(session_key);
        }

        if self.ws_config.mode == WebsocketMode::Auto {
            let mut completion = self.http_invoke(input, abort).await?;
            completion.provider_meta.fallback_used = true;
            completion.provider_meta.chain_reset = true;
            completion.provider_meta.ws_input_mode = Some(ws_input_mode);
            completion.provider_meta.ws_reconnect_count = reconnect_count;
            Ok(completion)
        } else {
            Err(err)
        }
    }

    async fn ws_single_attempt(&self, body: &Value, abort: &tokio_util::sync::CancellationToken) -> Result<Value> {
        let url = format!(
            "wss://api.openai.com/v1/realtime?responses_websockets={}",
            self.ws_config.api_version
        );
        let (mut socket, _response) = tokio::time::timeout(self.ws_config.connect_timeout, tokio_tungstenite::connect_async(&url))
            .await
            .map_err(|_| Error::WebSocket("connect timeout".to_string()))?
            .map_err(upgrade_error)?;

        let create_frame = json!({"type": "response.create", "response": body});
        socket
            .send(WsMessage::Text(create_frame.to_string()))
            .await
            .map_err(|e| Error::WebSocket(format!("could not send data: {e}")))?;

        let result = tokio::time::timeout(self.ws_config.response_idle_timeout, async {
            loop {
                if abort.is_cancelled() {
                    return Err(Error::Aborted);
                }
                match socket.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                        match parsed.get("type").and_then(Value::as_str) {
                            Some("response.completed") => return Ok(parsed["response"].clone()),
                            Some("response.failed") => {
                                let message = parsed["response"]["error"]["message"].as_str().unwrap_or("response failed").to_string();
                                return Err(Error::WebSocket(message));
                            }
                            _ => continue,
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return Err(Error::WebSocket("websocket is not open".to_string()));
                    }
                    Some(Err(e)) => return Err(Error::WebSocket(e.to_string())),
                    _ => continue,
                }
            }
        })
        .await
        .map_err(|_| Error::WebSocket("response timeout".to_string()))?;

        let _ = socket.close(None).await;
        result
    }
}

const WS_UPGRADE_BODY_SNIPPET_MAX: usize = 2 * 1024;
const WS_UPGRADE_HEADER_LIMIT: usize = 16;

/// Converts a `connect_async` failure into our error type. An HTTP-level
/// rejection during the upgrade (the most common 4xx/5xx case) carries its
/// status, a bounded subset of headers, and a bounded body snippet —
/// tungstenite already buffers the response body synchronously, so no
/// further read or timeout is needed here.
fn upgrade_error(err: tokio_tungstenite::tungstenite::Error) -> Error {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .take(WS_UPGRADE_HEADER_LIMIT)
                .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("<binary>").to_string()))
                .collect();
            let body_snippet = response
                .body()
                .as_ref()
                .map(|bytes| {
                    let cap = bytes.len().min(WS_UPGRADE_BODY_SNIPPET_MAX);
                    String::from_utf8_lossy(&bytes[..cap]).into_owned()
                })
                .unwrap_or_default();
            Error::WebSocketUpgrade { status, headers, body_snippet }
        }
        other => Error::WebSocket(other.to_string()),
    }
}

fn is_previous_response_not_found(err: &Error) -> bool {
    let message = match err {
        Error::WebSocket(m) | Error::Transport(m) => m.as_str(),
        Error::ApiStatus { body, .. } => body.as_str(),
        Error::WebSocketUpgrade { body_snippet, .. } => body_snippet.as_str(),
        _ => return false,
    };
    message.contains("previous_response_not_found")
}

fn websocket_mode_label(mode: WebsocketMode) -> String {
    match mode {
        WebsocketMode::Off => "off",
        WebsocketMode::Auto => "auto",
        WebsocketMode::On => "on",
    }
    .to_string()
}

fn hash_value(value: &Value) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.to_string().hash(&mut hasher);
    hasher.finish()
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Required => json!("required"),
        ToolChoice::None => json!("none"),
        ToolChoice::Named(name) => json!({"type": "function", "name": name}),
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| match tool {
            ToolDefinition::Function { name, description, parameters, strict } => json!({
                "type": "function",
                "name": name,
                "description": description,
                "parameters": parameters,
                "strict": strict,
            }),
            ToolDefinition::HostedSearch { name, domain_filters, max_uses, user_location, .. } => json!({
                "type": "web_search",
                "name": name,
                "filters": {"allowed_domains": domain_filters},
                "max_uses": max_uses,
                "user_location": user_location,
            }),
        })
        .collect()
}

/// Converts the neutral message history into Responses API `input` items
/// (spec §4.2.4). Leading system messages are folded into `instructions`
/// by the caller building the request body; this only emits the
/// conversational items.
fn convert_messages_to_input(messages: &[BaseMessage]) -> Vec<Value> {
    let mut items = Vec::new();
    for message in messages {
        match message {
            BaseMessage::System { .. } => continue,
            BaseMessage::User { content } => {
                items.push(json!({
                    "type": "message",
                    "role": "user",
                    "content": content.iter().map(convert_content_part_to_input).collect::<Vec<_>>(),
                }));
            }
            BaseMessage::Assistant { content, tool_calls, .. } => {
                if let Some(parts) = content {
                    if !parts.is_empty() {
                        items.push(json!({
                            "type": "message",
                            "role": "assistant",
                            "content": parts.iter().map(convert_content_part_to_output).collect::<Vec<_>>(),
                        }));
                    }
                }
                if let Some(calls) = tool_calls {
                    for call in calls {
                        items.push(json!({
                            "type": "function_call",
                            "call_id": call.id,
                            "name": call.function.name,
                            "arguments": call.function.arguments,
                        }));
                    }
                }
            }
            BaseMessage::Tool { tool_call_id, content, .. } => {
                items.push(json!({
                    "type": "function_call_output",
                    "call_id": tool_call_id,
                    "output": content,
                }));
            }
            BaseMessage::Reasoning { raw_item, .. } => {
                if let Some(item) = raw_item {
                    if item.provider == "openai" {
                        items.push(item.payload.clone());
                    }
                }
            }
        }
    }
    items
}

fn convert_content_part_to_input(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"type": "input_text", "text": text}),
        ContentPart::ImageUrl { url, detail, .. } => json!({
            "type": "input_image",
            "image_url": url,
            "detail": detail.clone().unwrap_or_else(|| "auto".to_string()),
        }),
        ContentPart::Document { data, media_type } => json!({
            "type": "input_file",
            "file_data": data,
            "media_type": media_type,
        }),
        ContentPart::Other { provider, payload, .. } if provider == "openai" => payload.clone(),
        other => json!({"type": "input_text", "text": other.describe()}),
    }
}

fn convert_content_part_to_output(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"type": "output_text", "text": text}),
        ContentPart::Other { provider, payload, .. } if provider == "openai" => payload.clone(),
        other => json!({"type": "output_text", "text": other.describe()}),
    }
}

/// Parses a Responses API `response` object into neutral messages, stop
/// reason, response id, and usage.
fn parse_response(response: &Value, requested_model: &str) -> (Vec<BaseMessage>, Option<StopReason>, Option<String>, Option<InvokeUsage>) {
    let response_id = response.get("id").and_then(Value::as_str).map(str::to_string);
    let mut messages = Vec::new();
    let mut has_tool_calls = false;

    if let Some(output) = response.get("output").and_then(Value::as_array) {
        for item in output {
            match item.get("type").and_then(Value::as_str) {
                Some("message") => {
                    let parts: Vec<ContentPart> = item
                        .get("content")
                        .and_then(Value::as_array)
                        .map(|parts| {
                            parts
                                .iter()
                                .map(|part| match part.get("type").and_then(Value::as_str) {
                                    Some("output_text") | Some("text") => ContentPart::text(part.get("text").and_then(Value::as_str).unwrap_or_default()),
                                    _ => ContentPart::Other {
                                        provider: "openai".to_string(),
                                        kind: part.get("type").and_then(Value::as_str).unwrap_or("unknown").to_string(),
                                        payload: part.clone(),
                                    },
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    if item.get("tool_calls").is_none() {
                        messages.push(BaseMessage::Assistant { content: Some(parts), tool_calls: None, refusal: None });
                    }
                }
                Some("function_call") => {
                    has_tool_calls = true;
                    let call = ToolCall {
                        id: item.get("call_id").and_then(Value::as_str).unwrap_or_default().to_string(),
                        call_type: "function".to_string(),
                        function: FunctionCallBody {
                            name: item.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                            arguments: item.get("arguments").and_then(Value::as_str).unwrap_or_default().to_string(),
                        },
                        provider_meta: None,
                    };
                    messages.push(BaseMessage::assistant_tool_calls(None, vec![call]));
                }
                Some("reasoning") => {
                    let text = item
                        .get("summary")
                        .and_then(Value::as_array)
                        .and_then(|arr| arr.first())
                        .and_then(|s| s.get("text"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    messages.push(BaseMessage::reasoning(
                        text,
                        Some(RawItem {
                            provider: "openai".to_string(),
                            kind: "reasoning".to_string(),
                            payload: item.clone(),
                        }),
                    ));
                }
                Some("web_search_call") => {
                    messages.push(BaseMessage::reasoning(
                        None,
                        Some(RawItem {
                            provider: "openai".to_string(),
                            kind: "web_search_call".to_string(),
                            payload: item.clone(),
                        }),
                    ));
                }
                _ => {}
            }
        }
    }

    let stop_reason = if has_tool_calls {
        Some(StopReason::ToolCalls)
    } else {
        match response.get("status").and_then(Value::as_str) {
            Some("incomplete") => Some(StopReason::MaxTokens),
            _ => Some(StopReason::EndTurn),
        }
    };

    let usage = response.get("usage").map(|u| InvokeUsage {
        model: response.get("model").and_then(Value::as_str).unwrap_or(requested_model).to_string(),
        input_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
        input_cached_tokens: u.get("input_tokens_details").and_then(|d| d.get("cached_tokens")).and_then(Value::as_u64),
        input_cache_creation_tokens: None,
        output_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
        total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0),
    });

    (messages, stop_reason, response_id, usage)
}

#[async_trait]
impl LLMTransport for OpenAiTransport {
    fn provider(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn invoke(&self, input: ChatInvokeInput<'_>, context: Option<InvokeContext<'_>>) -> Result<ChatInvokeCompletion> {
        let abort = context.as_ref().map(|c| c.abort.clone()).unwrap_or_default();
        let session_key = context.as_ref().and_then(|c| c.session_key);

        let use_ws = self.ws_config.mode != WebsocketMode::Off
            && session_key.is_some()
            && !session_key.map(|k| self.is_disabled(k)).unwrap_or(false);

        if use_ws {
            let key = session_key.unwrap();
            return self.ws_invoke(input, key, &abort).await;
        }

        self.http_invoke(input, &abort).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_known_model_families() {
        assert!(is_supported_model("gpt-5-thinking"));
        assert!(is_supported_model("o1-preview"));
        assert!(is_supported_model("gpt-4o"));
        assert!(!is_supported_model("gpt-3.5-turbo"));
    }

    #[test]
    fn convert_messages_drops_system_and_maps_tool_messages() {
        let messages = vec![
            BaseMessage::system_text("be helpful"),
            BaseMessage::user_text("hi"),
            BaseMessage::tool_result("call_1", "bash", "ok", false),
        ];
        let items = convert_messages_to_input(&messages);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["role"], "user");
        assert_eq!(items[1]["type"], "function_call_output");
    }

    #[test]
    fn reasoning_raw_item_passes_through_for_openai_only() {
        let openai_item = BaseMessage::reasoning(
            None,
            Some(RawItem {
                provider: "openai".to_string(),
                kind: "reasoning".to_string(),
                payload: json!({"type": "reasoning", "id": "r1"}),
            }),
        );
        let anthropic_item = BaseMessage::reasoning(
            None,
            Some(RawItem {
                provider: "anthropic".to_string(),
                kind: "thinking".to_string(),
                payload: json!({"type": "thinking"}),
            }),
        );
        let items = convert_messages_to_input(&[openai_item, anthropic_item]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], "r1");
    }

    #[test]
    fn decide_chain_is_fresh_with_no_prior_session() {
        let transport = OpenAiTransport::new("key", "gpt-5", OpenAiWebsocketConfig::default(), RetryPolicyConfig::default());
        let (decision, prev) = transport.decide_chain("session-1", "gpt-5", 1, 2, &[json!({"a": 1})]);
        assert_eq!(decision, ChainDecision::Fresh);
        assert!(prev.is_none());
    }

    #[test]
    fn decide_chain_is_chainable_when_new_items_extend_prior_input() {
        let transport = OpenAiTransport::new("key", "gpt-5", OpenAiWebsocketConfig::default(), RetryPolicyConfig::default());
        let prior_items = vec![json!({"type": "message", "role": "user"})];
        transport.record_ws_session("session-1", Some("resp_1".to_string()), "gpt-5", 1, 2, prior_items.clone());

        let mut extended = prior_items;
        extended.push(json!({"type": "message", "role": "assistant"}));
        let (decision, prev) = transport.decide_chain("session-1", "gpt-5", 1, 2, &extended);
        assert_eq!(decision, ChainDecision::Chainable);
        assert_eq!(prev.unwrap(), "resp_1");
    }

    #[test]
    fn decide_chain_regenerates_when_tools_hash_differs() {
        let transport = OpenAiTransport::new("key", "gpt-5", OpenAiWebsocketConfig::default(), RetryPolicyConfig::default());
        let prior_items = vec![json!({"type": "message", "role": "user"})];
        transport.record_ws_session("session-1", Some("resp_1".to_string()), "gpt-5", 1, 2, prior_items.clone());

        let (decision, prev) = transport.decide_chain("session-1", "gpt-5", 1, 999, &prior_items);
        assert_eq!(decision, ChainDecision::Regenerate);
        assert!(prev.is_none());
    }

    #[test]
    fn decide_chain_regenerates_when_history_diverges_from_recorded_prefix() {
        let transport = OpenAiTransport::new("key", "gpt-5", OpenAiWebsocketConfig::default(), RetryPolicyConfig::default());
        let prior_items = vec![json!({"type": "message", "role": "user", "id": "u1"})];
        transport.record_ws_session("session-1", Some("resp_1".to_string()), "gpt-5", 1, 2, prior_items);

        let diverged = vec![json!({"type": "message", "role": "user", "id": "different"})];
        let (decision, prev) = transport.decide_chain("session-1", "gpt-5", 1, 2, &diverged);
        assert_eq!(decision, ChainDecision::Regenerate);
        assert!(prev.is_none());
    }

    #[test]
    fn parse_response_extracts_function_call_and_stop_reason() {
        let response = json!({
            "id": "resp_1",
            "model": "gpt-5",
            "status": "completed",
            "output": [
                {"type": "function_call", "call_id": "call_1", "name": "bash", "arguments": "{}"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5, "total_tokens": 15}
        });
        let (messages, stop_reason, response_id, usage) = parse_response(&response, "gpt-5");
        assert_eq!(response_id.unwrap(), "resp_1");
        assert_eq!(stop_reason, Some(StopReason::ToolCalls));
        assert_eq!(messages.len(), 1);
        assert_eq!(usage.unwrap().total_tokens, 15);
    }
}
