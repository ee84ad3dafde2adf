//! Tool-output cache service (spec §4.3.1).
//!
//! New relative to the teacher, but grounded on `OpenAIProvider::prune_tool_turns`
//! (`llm/openai.rs`) — the same idea of keeping history within budget by
//! rewriting or dropping tool messages, generalized here from "last N tool
//! turns" to byte-bounded per-message truncation plus a whole-history
//! token-budget pass.

use async_trait::async_trait;

use crate::message::{BaseMessage, OutputRef};
use crate::model_registry::ModelSpec;

const DEFAULT_MAX_MESSAGE_BYTES: usize = 50 * 1024;
const DEFAULT_MAX_LINE_LENGTH: usize = 2_000;
const BUDGET_MIN: u64 = 20_000;
const BUDGET_MAX: u64 = 100_000;

/// External store a tool message's full text is persisted to before
/// truncation (spec §6.2). Save failures are swallowed by the cache, not
/// surfaced to the agent loop.
#[async_trait]
pub trait ToolOutputStore: Send + Sync {
    async fn save(&self, tool_call_id: &str, tool_name: &str, content: &str, is_error: bool) -> Option<OutputRef>;
}

/// A store that never persists anything; every save "fails" (returns
/// `None`), so messages proceed without a ref. Useful as the default.
pub struct NullToolOutputStore;

#[async_trait]
impl ToolOutputStore for NullToolOutputStore {
    async fn save(&self, _tool_call_id: &str, _tool_name: &str, _content: &str, _is_error: bool) -> Option<OutputRef> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct ToolCacheConfig {
    pub enabled: bool,
    pub context_budget_tokens: Option<u64>,
    pub total_budget_trim: bool,
    pub max_message_bytes: usize,
    pub max_line_length: usize,
}

impl Default for ToolCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            context_budget_tokens: None,
            total_budget_trim: true,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl From<&crate::config::ToolOutputCacheConfig> for ToolCacheConfig {
    fn from(c: &crate::config::ToolOutputCacheConfig) -> Self {
        Self {
            enabled: c.enabled,
            context_budget_tokens: c.context_budget_tokens,
            total_budget_trim: c.total_budget_trim,
            max_message_bytes: c.max_message_bytes,
            max_line_length: c.max_line_length,
        }
    }
}

/// Tools that bypass immediate per-message truncation, per spec §4.3.1.
const TRUNCATION_EXEMPT_TOOLS: &[&str] = &["tool_output_cache", "tool_output_cache_grep"];

/// Persists a tool message's full text, then truncates the in-history copy
/// to `max_message_bytes`, appending a ref marker when anything was cut.
/// Returns the possibly-rewritten message; `store` failures are swallowed.
pub async fn process_tool_message(message: BaseMessage, config: &ToolCacheConfig, store: &dyn ToolOutputStore) -> BaseMessage {
    let BaseMessage::Tool { tool_call_id, tool_name, content, is_error, .. } = message else {
        return message;
    };

    if !config.enabled {
        return BaseMessage::Tool {
            tool_call_id,
            tool_name,
            content,
            is_error,
            output_ref: None,
            trimmed: None,
        };
    }

    let output_ref = store.save(&tool_call_id, &tool_name, &content, is_error.unwrap_or(false)).await;

    if TRUNCATION_EXEMPT_TOOLS.contains(&tool_name.as_str()) {
        return BaseMessage::Tool { tool_call_id, tool_name, content, is_error, output_ref, trimmed: None };
    }

    let truncated = truncate_bytes(&content, config.max_message_bytes, config.max_line_length);
    let was_truncated = truncated.len() != content.len();
    let final_content = if was_truncated {
        match &output_ref {
            Some(r) => format!("{truncated}\n\n[tool output truncated; ref={}]", r.id),
            None => truncated,
        }
    } else {
        content
    };

    BaseMessage::Tool {
        tool_call_id,
        tool_name,
        content: final_content,
        is_error,
        output_ref,
        trimmed: None,
    }
}

/// Truncates `text` to at most `max_bytes`, breaking at line boundaries
/// where possible and clamping any single line to `max_line_length`.
fn truncate_bytes(text: &str, max_bytes: usize, max_line_length: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut out = String::new();
    for line in text.lines() {
        let clamped: String = if line.len() > max_line_length { line.chars().take(max_line_length).collect() } else { line.to_string() };
        if out.len() + clamped.len() + 1 > max_bytes {
            break;
        }
        out.push_str(&clamped);
        out.push('\n');
    }
    if out.is_empty() {
        out = text.chars().take(max_bytes).collect();
    }
    out
}

/// Resolves the whole-history trim budget: explicit override, else
/// `clamp(floor(context_window * 0.25), 20_000, 100_000)`.
fn resolve_budget(config: &ToolCacheConfig, model: Option<&ModelSpec>) -> u64 {
    if let Some(budget) = config.context_budget_tokens {
        return budget;
    }
    let context_window = model.and_then(ModelSpec::effective_context_limit).unwrap_or(BUDGET_MAX * 4);
    ((context_window as f64 * 0.25).floor() as u64).clamp(BUDGET_MIN, BUDGET_MAX)
}

/// Approximate token count for a tool message's content: `bytes / 4`.
fn approx_tokens(content: &str) -> u64 {
    (content.len() as u64) / 4
}

/// Whole-history trimming pass (spec §4.3.1): if the summed approximate
/// token count across all tool messages exceeds budget, replace entire
/// tool messages (in order) with a trim placeholder until within budget.
/// Idempotent: a second pass over already-trimmed messages changes
/// nothing, since trimmed messages' placeholder text is far below budget.
pub fn trim_to_budget(messages: &mut [BaseMessage], config: &ToolCacheConfig, model: Option<&ModelSpec>) {
    if !config.total_budget_trim {
        return;
    }
    let budget = resolve_budget(config, model);

    let mut total: u64 = messages
        .iter()
        .filter_map(|m| match m {
            BaseMessage::Tool { content, .. } => Some(approx_tokens(content)),
            _ => None,
        })
        .sum();

    if total <= budget {
        return;
    }

    for message in messages.iter_mut() {
        if total <= budget {
            break;
        }
        if let BaseMessage::Tool { tool_call_id, tool_name, content, is_error, output_ref, trimmed } = message {
            if *trimmed == Some(true) {
                continue;
            }
            let before = approx_tokens(content);
            let ref_id = output_ref.as_ref().map(|r| r.id.clone()).unwrap_or_else(|| "unknown".to_string());
            *content = format!("[tool output trimmed; ref={ref_id}]");
            *trimmed = Some(true);
            let after = approx_tokens(content);
            total = total.saturating_sub(before.saturating_sub(after));
            let _ = (&*tool_call_id, &*tool_name, &*is_error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingStore;

    #[async_trait]
    impl ToolOutputStore for RecordingStore {
        async fn save(&self, _id: &str, _name: &str, content: &str, _is_error: bool) -> Option<OutputRef> {
            Some(OutputRef { id: "ref1".to_string(), byte_size: content.len(), line_count: content.lines().count() })
        }
    }

    #[tokio::test]
    async fn long_tool_output_is_truncated_with_ref_marker() {
        let config = ToolCacheConfig { max_message_bytes: 100, ..Default::default() };
        let content = "x".repeat(500);
        let message = BaseMessage::tool_result("call_1", "bash", content, false);
        let processed = process_tool_message(message, &config, &RecordingStore).await;
        match processed {
            BaseMessage::Tool { content, output_ref, .. } => {
                assert!(content.contains("[tool output truncated; ref=ref1]"));
                assert!(output_ref.is_some());
            }
            _ => panic!("expected tool message"),
        }
    }

    #[tokio::test]
    async fn exempt_tool_bypasses_truncation() {
        let config = ToolCacheConfig { max_message_bytes: 10, ..Default::default() };
        let content = "x".repeat(500);
        let message = BaseMessage::tool_result("call_1", "tool_output_cache", content.clone(), false);
        let processed = process_tool_message(message, &config, &RecordingStore).await;
        match processed {
            BaseMessage::Tool { content: c, .. } => assert_eq!(c, content),
            _ => panic!("expected tool message"),
        }
    }

    #[test]
    fn trim_to_budget_replaces_tool_messages_until_within_budget() {
        let config = ToolCacheConfig { context_budget_tokens: Some(10), ..Default::default() };
        let mut messages = vec![
            BaseMessage::tool_result("c1", "bash", "x".repeat(100), false),
            BaseMessage::tool_result("c2", "bash", "y".repeat(100), false),
        ];
        trim_to_budget(&mut messages, &config, None);
        for message in &messages {
            if let BaseMessage::Tool { content, .. } = message {
                assert!(content.starts_with("[tool output trimmed"));
            }
        }
    }

    #[test]
    fn trim_to_budget_is_idempotent() {
        let config = ToolCacheConfig { context_budget_tokens: Some(10), ..Default::default() };
        let mut messages = vec![BaseMessage::tool_result("c1", "bash", "x".repeat(100), false)];
        trim_to_budget(&mut messages, &config, None);
        let first_pass = messages.clone();
        trim_to_budget(&mut messages, &config, None);
        assert_eq!(first_pass, messages);
    }

    #[test]
    fn resolve_budget_clamps_to_bounds() {
        let config = ToolCacheConfig::default();
        let spec = ModelSpec {
            id: "m".into(),
            provider: "p".into(),
            aliases: vec![],
            context_window: Some(1_000_000),
            max_input_tokens: None,
            max_output_tokens: None,
            supports_tools: true,
        };
        assert_eq!(resolve_budget(&config, Some(&spec)), BUDGET_MAX);
    }
}
