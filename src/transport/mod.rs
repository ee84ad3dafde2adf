//! Provider-polymorphic LLM transport abstraction (spec §4.2).
//!
//! Generalizes the teacher's per-provider `LLMProvider` trait
//! (`llm/provider.rs`) — which bundles chat, chat_loop, compaction, and
//! history bookkeeping into one trait — into a single `invoke` seam. The
//! agent loop (`agent.rs`) owns history, usage, and compaction; a
//! transport's only job is turning one `ChatInvokeInput` into one
//! `ChatInvokeCompletion`.

pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::ToolChoice;
use crate::error::Result;
use crate::message::BaseMessage;
use crate::tools::ToolDefinition;

/// Input to one `invoke` call.
pub struct ChatInvokeInput<'a> {
    pub messages: &'a [BaseMessage],
    pub tools: &'a [ToolDefinition],
    pub tool_choice: ToolChoice,
    pub model_override: Option<&'a str>,
    /// Provider-specific extras (e.g. reasoning effort override) the
    /// transport is free to interpret; unrecognized keys are ignored.
    pub options: Value,
}

/// Per-call context, distinct from `ChatInvokeInput` because it concerns
/// the transport's own bookkeeping rather than the request payload.
pub struct InvokeContext<'a> {
    /// Binds this call to provider-side prompt-cache state and, for
    /// OpenAI, to WS response-id chaining.
    pub session_key: Option<&'a str>,
    pub abort: CancellationToken,
}

/// Normalized stop reason across providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolCalls,
    MaxTokens,
    StopSequence,
    Other(String),
}

/// Usage for one call, prior to folding into the running
/// [`crate::usage::UsageAccountant`].
#[derive(Debug, Clone)]
pub struct InvokeUsage {
    pub model: String,
    pub input_tokens: u64,
    pub input_cached_tokens: Option<u64>,
    pub input_cache_creation_tokens: Option<u64>,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl InvokeUsage {
    pub fn to_token_usage(&self) -> crate::usage::TokenUsage {
        crate::usage::TokenUsage {
            prompt_tokens: self.input_tokens,
            completion_tokens: self.output_tokens,
            cached_prompt_tokens: self.input_cached_tokens.unwrap_or(0)
                + self.input_cache_creation_tokens.unwrap_or(0),
            reasoning_tokens: 0,
        }
    }
}

/// Diagnostic metadata about how a call was actually carried out (spec
/// §4.2, used heavily by scenarios S1-S7).
#[derive(Debug, Clone, Default)]
pub struct ProviderMeta {
    pub response_id: Option<String>,
    pub transport: String,
    pub websocket_mode: Option<String>,
    pub fallback_used: bool,
    pub chain_reset: bool,
    pub ws_reconnect_count: u32,
    pub ws_input_mode: Option<String>,
}

/// Result of one `invoke` call.
#[derive(Debug, Clone)]
pub struct ChatInvokeCompletion {
    pub messages: Vec<BaseMessage>,
    pub usage: Option<InvokeUsage>,
    pub stop_reason: Option<StopReason>,
    pub provider_meta: ProviderMeta,
}

/// A single provider's transport implementation.
#[async_trait]
pub trait LLMTransport: Send + Sync {
    fn provider(&self) -> &str;
    fn default_model(&self) -> &str;
    async fn invoke(&self, input: ChatInvokeInput<'_>, context: Option<InvokeContext<'_>>) -> Result<ChatInvokeCompletion>;
}
