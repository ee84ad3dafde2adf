//! Shared test double for integration tests: a transport that replays a
//! fixed script of completions in order, the same shape as the teacher's
//! channel-driven `ChatLoopHandle` test doubles but simplified to a `Vec`.

use std::sync::Mutex;

use agent_core::prelude::*;
use agent_core::transport::{ChatInvokeCompletion, ChatInvokeInput, InvokeContext, ProviderMeta, StopReason};
use async_trait::async_trait;

/// A tool-output store that always "persists" successfully, for exercising
/// the cache's ref-marker path without a real external store.
pub struct RecordingStore;

#[async_trait]
impl ToolOutputStore for RecordingStore {
    async fn save(&self, tool_call_id: &str, _tool_name: &str, content: &str, _is_error: bool) -> Option<agent_core::message::OutputRef> {
        Some(agent_core::message::OutputRef {
            id: format!("ref-{tool_call_id}"),
            byte_size: content.len(),
            line_count: content.lines().count(),
        })
    }
}

pub struct ScriptedTransport {
    script: Mutex<Vec<ChatInvokeCompletion>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<ChatInvokeCompletion>) -> Self {
        Self { script: Mutex::new(script) }
    }
}

#[async_trait]
impl LLMTransport for ScriptedTransport {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn invoke(&self, _input: ChatInvokeInput<'_>, _context: Option<InvokeContext<'_>>) -> Result<ChatInvokeCompletion> {
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Err(Error::Transport("script exhausted".to_string()));
        }
        Ok(script.remove(0))
    }
}

pub fn plain_completion(text: &str) -> ChatInvokeCompletion {
    ChatInvokeCompletion {
        messages: vec![BaseMessage::assistant_text(text)],
        usage: None,
        stop_reason: Some(StopReason::EndTurn),
        provider_meta: ProviderMeta::default(),
    }
}

pub fn tool_call_completion(call_id: &str, tool_name: &str, arguments: &str) -> ChatInvokeCompletion {
    let call = ToolCall::new(call_id, tool_name, arguments);
    ChatInvokeCompletion {
        messages: vec![BaseMessage::assistant_tool_calls(None, vec![call])],
        usage: None,
        stop_reason: Some(StopReason::ToolCalls),
        provider_meta: ProviderMeta::default(),
    }
}

pub fn new_agent(transport: ScriptedTransport, tools: ToolRegistry, config: AgentConfig) -> Agent {
    Agent::new(
        std::sync::Arc::new(transport),
        std::sync::Arc::new(tools),
        std::sync::Arc::new(NullToolOutputStore),
        std::sync::Arc::new(ModelRegistry::new()),
        "scripted-model",
        config,
    )
}
