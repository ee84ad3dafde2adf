//! The reason-act agent loop (spec §4.1) and its event stream (spec §3 `AgentEvent`).
//!
//! Generalizes the teacher's `chat_loop_with_tools` (`llm/helpers.rs`) —
//! which drives a `ChatLoopHandle.next()` loop, executing tools via a
//! registry-or-executor fallback and logging each step through
//! `crate::log` — into the full state machine spec §4.1 describes: an
//! ordered event stream, tool-output trimming before every call,
//! compaction checks after every turn, permission-hook gating, and the
//! `TaskComplete` control signal. Modeled as an explicit async generator
//! per spec §9's "Async generators" design note, using `async-stream`
//! (already a teacher dependency) rather than a spawned task, since the
//! loop only ever has one borrower of `history`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::compaction;
use crate::config::{AgentConfig, ToolChoice};
use crate::error::{Error, Result};
use crate::history::History;
use crate::message::{BaseMessage, ContentPart, ToolCall};
use crate::model_registry::{ModelRegistry, ModelSpec};
use crate::session::{SessionRecord, SessionSink};
use crate::tool_cache::{self, ToolCacheConfig, ToolOutputStore};
use crate::tools::{dispatch_tool_call, PermissionHook, ToolContext, ToolRegistry};
use crate::transport::{ChatInvokeInput, InvokeContext, LLMTransport};
use crate::usage::UsageAccountant;

/// Input to a `run`/`run_stream` call (spec §4.1: "text string or sequence
/// of content parts").
#[derive(Debug, Clone)]
pub enum AgentInput {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl From<&str> for AgentInput {
    fn from(text: &str) -> Self {
        AgentInput::Text(text.to_string())
    }
}

impl From<String> for AgentInput {
    fn from(text: String) -> Self {
        AgentInput::Text(text)
    }
}

/// Options accepted by `run_stream` (spec §4.1).
#[derive(Default)]
pub struct RunOptions {
    pub session: Option<Arc<dyn SessionSink>>,
    pub signal: CancellationToken,
    pub force_compaction: bool,
}

/// Events emitted by a run, in the order spec §5 guarantees.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Reasoning { text: Option<String> },
    StepStart { step_id: String },
    ToolCall { step_id: String, call: ToolCall },
    ToolResult { step_id: String, content: String, is_error: bool },
    StepComplete { step_id: String, is_error: bool },
    Text { text: String },
    CompactionStart,
    CompactionComplete,
    Final { content: String },
}

/// Owns everything a conversation needs across one or more `run`/`run_stream`
/// calls: history, usage, and the collaborators spec §3 says the agent
/// exclusively owns.
pub struct Agent {
    pub history: History,
    pub usage: UsageAccountant,
    pub config: AgentConfig,
    pub transport: Arc<dyn LLMTransport>,
    pub tools: Arc<ToolRegistry>,
    pub permission_hook: Option<Arc<dyn PermissionHook>>,
    pub tool_output_store: Arc<dyn ToolOutputStore>,
    pub model_registry: Arc<ModelRegistry>,
    pub model_id: String,
    pub session_key: Option<String>,
    run_counter: AtomicU64,
}

// `run_counter` starts at 0 and is never reset; each `run_stream` call gets
// a fresh, monotonically increasing run id for its session records.

impl Agent {
    pub fn new(
        transport: Arc<dyn LLMTransport>,
        tools: Arc<ToolRegistry>,
        tool_output_store: Arc<dyn ToolOutputStore>,
        model_registry: Arc<ModelRegistry>,
        model_id: impl Into<String>,
        config: AgentConfig,
    ) -> Self {
        Self {
            history: History::new(),
            usage: UsageAccountant::new(),
            config,
            transport,
            tools,
            permission_hook: None,
            tool_output_store,
            model_registry,
            model_id: model_id.into(),
            session_key: None,
            run_counter: AtomicU64::new(0),
        }
    }

    pub fn enqueue_system(&mut self, text: impl Into<String>) {
        self.history.enqueue_system(vec![ContentPart::text(text)]);
    }

    /// Drains the stream and returns the `final` event's content. Spec §4.1:
    /// "run(message) → text: drains the stream, returns the final event
    /// content."
    pub async fn run(&mut self, message: impl Into<AgentInput>) -> Result<String> {
        use futures::StreamExt;
        let mut stream = Box::pin(self.run_stream(message.into(), RunOptions::default()));
        let mut final_content = None;
        while let Some(event) = stream.next().await {
            if let AgentEvent::Final { content } = event? {
                final_content = Some(content);
            }
        }
        Ok(final_content.unwrap_or_default())
    }

    fn next_run_id(&self) -> String {
        format!("run-{}", self.run_counter.fetch_add(1, Ordering::SeqCst))
    }

    async fn record(&self, session: &Option<Arc<dyn SessionSink>>, run_id: &str, seq: &AtomicU64, kind: &str, payload: serde_json::Value) {
        if let Some(sink) = session {
            let n = seq.fetch_add(1, Ordering::SeqCst);
            sink.append(SessionRecord::new(run_id, n, kind, payload)).await;
        }
    }

    /// The full spec §4.1 algorithm as an ordered event stream.
    pub fn run_stream<'a>(&'a mut self, message: AgentInput, options: RunOptions) -> impl Stream<Item = Result<AgentEvent>> + 'a {
        try_stream! {
            let run_id = self.next_run_id();
            let seq = AtomicU64::new(0);

            if options.force_compaction {
                // `compaction=null` disables the service entirely (spec
                // table); forcing a run with nothing configured collapses
                // to a full reset rather than a no-op, since there's no
                // policy to decide what to keep.
                if self.config.compaction.is_some() {
                    self.run_compaction(&options).await?;
                } else {
                    self.history.replace_all(Vec::new());
                }
                yield AgentEvent::Final { content: "Compaction run completed.".to_string() };
                return;
            }

            match message {
                AgentInput::Text(text) => self.history.enqueue_user_text(text),
                AgentInput::Parts(parts) => self.history.enqueue_user(parts),
            }

            let max_iterations = self.config.max_iterations;
            let mut iteration = 0u32;

            loop {
                if options.signal.is_cancelled() {
                    Err(Error::Aborted)?;
                }
                if iteration >= max_iterations {
                    break;
                }
                iteration += 1;

                let model = self.model_registry.resolve(&self.model_id, Some(self.transport.provider())).ok().cloned();
                self.apply_tool_output_trim(model.as_ref());

                let tool_choice = self.config.tool_choice.clone();
                let definitions = self.tools.definitions();
                let input = ChatInvokeInput {
                    messages: self.history.messages(),
                    tools: &definitions,
                    tool_choice: tool_choice.clone(),
                    model_override: None,
                    options: json!({}),
                };

                self.record(&options.session, &run_id, &seq, "llm.request", json!({"tool_choice": format!("{:?}", tool_choice)})).await;

                if options.signal.is_cancelled() {
                    Err(Error::Aborted)?;
                }
                let completion = self
                    .transport
                    .invoke(
                        input,
                        Some(InvokeContext { session_key: self.session_key.as_deref(), abort: options.signal.clone() }),
                    )
                    .await?;

                self.record(&options.session, &run_id, &seq, "llm.response", json!({"stop_reason": format!("{:?}", completion.stop_reason)})).await;

                if let Some(usage) = &completion.usage {
                    self.usage.record(usage.to_token_usage());
                }
                self.history.commit_response(completion.messages.clone());

                let mut reasoning_texts = Vec::new();
                let mut assistant_texts = Vec::new();
                let mut tool_calls: Vec<ToolCall> = Vec::new();
                let mut hosted_callbacks = Vec::new();

                for msg in &completion.messages {
                    match msg {
                        BaseMessage::Reasoning { content, raw_item } => {
                            if msg.hosted_tool_callback().is_some() {
                                hosted_callbacks.push(msg.clone());
                            } else {
                                reasoning_texts.push(content.clone());
                            }
                            let _ = raw_item;
                        }
                        BaseMessage::Assistant { content, tool_calls: calls, .. } => {
                            if let Some(parts) = content {
                                let text = parts.iter().map(ContentPart::describe).collect::<Vec<_>>().join("");
                                if !text.is_empty() {
                                    assistant_texts.push(text);
                                }
                            }
                            if let Some(calls) = calls {
                                tool_calls.extend(calls.iter().cloned());
                            }
                        }
                        _ => {}
                    }
                }

                for text in &reasoning_texts {
                    yield AgentEvent::Reasoning { text: text.clone() };
                }

                let mut emitted_steps: HashMap<String, bool> = HashMap::new();
                for callback in &hosted_callbacks {
                    if let Some(raw) = callback.hosted_tool_callback() {
                        let step_id = raw.payload.get("id").and_then(|v| v.as_str()).unwrap_or("hosted").to_string();
                        if emitted_steps.insert(step_id.clone(), true).is_some() {
                            continue;
                        }
                        yield AgentEvent::StepStart { step_id: step_id.clone() };
                        let name = raw.kind.clone();
                        yield AgentEvent::ToolCall { step_id: step_id.clone(), call: ToolCall::new(step_id.clone(), name, "{}") };
                        yield AgentEvent::ToolResult { step_id: step_id.clone(), content: String::new(), is_error: false };
                        yield AgentEvent::StepComplete { step_id: step_id.clone(), is_error: false };
                    }
                }

                if tool_calls.is_empty() {
                    if !self.config.require_done_tool {
                        if self.should_compact(&model) {
                            yield AgentEvent::CompactionStart;
                            self.run_compaction(&options).await?;
                            yield AgentEvent::CompactionComplete;
                        }
                        let joined = assistant_texts.join("");
                        yield AgentEvent::Final { content: joined };
                        return;
                    } else {
                        for text in &assistant_texts {
                            yield AgentEvent::Text { text: text.clone() };
                        }
                        if self.should_compact(&model) {
                            yield AgentEvent::CompactionStart;
                            self.run_compaction(&options).await?;
                            yield AgentEvent::CompactionComplete;
                        }
                        continue;
                    }
                }

                for text in &assistant_texts {
                    yield AgentEvent::Text { text: text.clone() };
                }

                let mut done_signal = None;
                for call in &tool_calls {
                    if options.signal.is_cancelled() {
                        Err(Error::Aborted)?;
                    }
                    let step_id = call.id.clone();
                    yield AgentEvent::StepStart { step_id: step_id.clone() };
                    yield AgentEvent::ToolCall { step_id: step_id.clone(), call: call.clone() };

                    let ctx = ToolContext::new(options.signal.clone());
                    let outcome = dispatch_tool_call(&self.tools, call, self.permission_hook.as_deref(), &ctx).await;

                    let processed = tool_cache::process_tool_message(
                        BaseMessage::tool_result(call.id.clone(), call.name().to_string(), outcome.content.clone(), outcome.is_error),
                        &ToolCacheConfig::from(&self.config.tool_output_cache),
                        self.tool_output_store.as_ref(),
                    )
                    .await;
                    let processed_content = processed.text();
                    self.history.enqueue_tool_result(processed);

                    self.record(&options.session, &run_id, &seq, "tool.output", json!({"tool_call_id": call.id, "is_error": outcome.is_error})).await;

                    yield AgentEvent::ToolResult { step_id: step_id.clone(), content: processed_content, is_error: outcome.is_error };
                    yield AgentEvent::StepComplete { step_id: step_id.clone(), is_error: outcome.is_error };

                    if let Some(force_final) = outcome.force_final {
                        yield AgentEvent::Final { content: force_final };
                        return;
                    }
                    if let Some(signal) = outcome.done {
                        done_signal = Some(signal);
                        break;
                    }
                }

                if let Some(signal) = done_signal {
                    let content = signal.message().map(str::to_string).unwrap_or_else(|| assistant_texts.join(""));
                    yield AgentEvent::Final { content };
                    return;
                }

                if self.should_compact(&model) {
                    yield AgentEvent::CompactionStart;
                    self.run_compaction(&options).await?;
                    yield AgentEvent::CompactionComplete;
                }
            }

            let summary = self.summarize_after_cap(&options).await;
            match summary {
                Ok(text) => yield AgentEvent::Final { content: format!("[Max Iterations Reached]\n\n{text}") },
                Err(Error::Aborted) => Err(Error::Aborted)?,
                Err(_) => yield AgentEvent::Final { content: "[Max Iterations Reached]\n\nSummary unavailable due to an internal error.".to_string() },
            }
        }
    }

    fn apply_tool_output_trim(&mut self, model: Option<&ModelSpec>) {
        let config = ToolCacheConfig::from(&self.config.tool_output_cache);
        // `messages()` hands back a read-only slice; trimming mutates in
        // place through the adapter's own replace method to respect
        // History's "mutated exclusively by the agent loop" contract.
        let mut messages = self.history.messages().to_vec();
        tool_cache::trim_to_budget(&mut messages, &config, model);
        self.history.replace_all(messages);
    }

    fn should_compact(&self, model: &Option<ModelSpec>) -> bool {
        let Some(compaction_config) = &self.config.compaction else { return false };
        let Some(model) = model else { return false };
        compaction::is_due(compaction_config, self.usage.last(), model)
    }

    async fn run_compaction(&mut self, options: &RunOptions) -> Result<()> {
        let Some(compaction_config) = self.config.compaction.clone() else {
            return Ok(());
        };
        let rebuilt = compaction::compact(
            self.history.messages(),
            &compaction_config,
            self.transport.as_ref(),
            None,
            Some(InvokeContext { session_key: self.session_key.as_deref(), abort: options.signal.clone() }),
        )
        .await?;
        self.history.replace_all(rebuilt);
        Ok(())
    }

    /// Spec §4.1 step 4: one final LLM call with a one-shot summarizer
    /// message, `tools=None`, `tool_choice="none"`.
    async fn summarize_after_cap(&mut self, options: &RunOptions) -> Result<String> {
        let mut messages = self.history.messages().to_vec();
        messages.push(BaseMessage::user_text(
            "The conversation has reached its iteration limit. Summarize the outcome so far in a few sentences.",
        ));
        let input = ChatInvokeInput {
            messages: &messages,
            tools: &[],
            tool_choice: ToolChoice::None,
            model_override: None,
            options: json!({}),
        };
        let completion = self
            .transport
            .invoke(
                input,
                Some(InvokeContext { session_key: self.session_key.as_deref(), abort: options.signal.clone() }),
            )
            .await?;
        Ok(completion
            .messages
            .iter()
            .map(BaseMessage::text)
            .collect::<Vec<_>>()
            .join(""))
    }
}
