//! Compaction service (spec §4.3.2).
//!
//! Grounded on the same `prune_tool_turns` idea in the teacher's
//! `llm/openai.rs` as `tool_cache.rs`, but generalized further: instead of
//! dropping the oldest tool turns by count, this summarizes the whole
//! history through an LLM call and rebuilds it from `<retain>`/`<summary>`
//! tags, per spec.

use regex::Regex;

use crate::config::CompactionConfig;
use crate::error::{Error, Result};
use crate::message::BaseMessage;
use crate::model_registry::ModelSpec;
use crate::transport::{ChatInvokeInput, InvokeContext, LLMTransport};
use crate::usage::TokenUsage;

/// Whether compaction should run before the next LLM call (spec §4.3.2).
/// `usage` is the last recorded usage; `model` should already have had any
/// dated-snapshot suffix stripped by the caller (the model registry does
/// this as part of resolution).
pub fn is_due(config: &CompactionConfig, usage: Option<TokenUsage>, model: &ModelSpec) -> bool {
    if !config.enabled || !config.auto {
        return false;
    }
    let Some(usage) = usage else { return false };
    let Some(limit) = model.effective_context_limit() else {
        return false;
    };
    usage.total() >= (limit as f64 * config.threshold_ratio).floor() as u64
}

struct ParsedSummary {
    retain: Option<String>,
    summary: String,
}

fn parse_tags(text: &str) -> ParsedSummary {
    let retain_re = Regex::new(r"(?s)<retain>(.*?)</retain>").unwrap();
    let summary_re = Regex::new(r"(?s)<summary>(.*?)</summary>").unwrap();

    let retain = retain_re.captures(text).map(|c| c[1].trim().to_string());
    let summary = summary_re.captures(text).map(|c| c[1].trim().to_string());

    match summary {
        Some(summary) => ParsedSummary { retain, summary },
        None => ParsedSummary { retain, summary: text.trim().to_string() },
    }
}

/// Drops a trailing assistant message carrying tool_calls with no content
/// (spec §4.3.2: "drop a trailing assistant message that has tool_calls
/// (unless it has content)") before sending history to the compaction
/// call — an incomplete tool round-trip would otherwise confuse the
/// summarizer.
fn strip_dangling_tool_call(messages: &[BaseMessage]) -> Vec<BaseMessage> {
    let mut trimmed = messages.to_vec();
    if let Some(BaseMessage::Assistant { content, tool_calls, .. }) = trimmed.last() {
        let has_content = content.as_ref().map(|c| !c.is_empty()).unwrap_or(false);
        if tool_calls.is_some() && !has_content {
            trimmed.pop();
        }
    }
    trimmed
}

/// Runs compaction: drops a dangling tool-call tail, appends a compaction
/// instruction, invokes the transport with `tools=None`/`tool_choice=none`,
/// parses `<retain>`/`<summary>` tags, and rebuilds history as: existing
/// system messages, retain block (if any), summary, then the last
/// `retain_last_turns` turns. On abort, re-raises; on any other error,
/// returns the history unchanged so the turn can proceed.
pub async fn compact(
    messages: &[BaseMessage],
    config: &CompactionConfig,
    transport: &dyn LLMTransport,
    model_override: Option<&str>,
    context: Option<InvokeContext<'_>>,
) -> Result<Vec<BaseMessage>> {
    let trimmed = strip_dangling_tool_call(messages);
    let mut invocation_messages = trimmed.clone();
    invocation_messages.push(BaseMessage::user_text(
        config
            .summary_prompt
            .clone()
            .unwrap_or_else(default_summary_prompt),
    ));

    let input = ChatInvokeInput {
        messages: &invocation_messages,
        tools: &[],
        tool_choice: crate::config::ToolChoice::None,
        model_override: config.model.as_deref().or(model_override),
        options: serde_json::json!({}),
    };

    let completion = match transport.invoke(input, context).await {
        Ok(completion) => completion,
        Err(Error::Aborted) => return Err(Error::Aborted),
        Err(_) => return Ok(messages.to_vec()),
    };

    let text = completion
        .messages
        .iter()
        .map(BaseMessage::text)
        .collect::<Vec<_>>()
        .join("\n");

    let parsed = parse_tags(&text);

    let system_messages: Vec<BaseMessage> = trimmed
        .iter()
        .filter(|m| matches!(m, BaseMessage::System { .. }))
        .cloned()
        .collect();

    let last_turns = last_user_bounded_turns(&trimmed, config.retain_last_turns.max(1));

    let mut rebuilt = system_messages;
    if let Some(retain) = parsed.retain {
        rebuilt.push(BaseMessage::user_text(retain));
    }
    rebuilt.push(BaseMessage::user_text(parsed.summary));
    rebuilt.extend(last_turns);

    Ok(rebuilt)
}

fn default_summary_prompt() -> String {
    "Summarize the conversation so far. Wrap anything that must be preserved verbatim in <retain></retain> \
     tags, and the summary itself in <summary></summary> tags."
        .to_string()
}

/// The last `n` turns, where a turn starts at a user message and runs
/// through the messages that follow it up to (not including) the next
/// user message.
fn last_user_bounded_turns(messages: &[BaseMessage], n: usize) -> Vec<BaseMessage> {
    let mut turn_starts: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| matches!(m, BaseMessage::User { .. }))
        .map(|(i, _)| i)
        .collect();
    if turn_starts.is_empty() {
        return Vec::new();
    }
    let keep_from_index = turn_starts.split_off(turn_starts.len().saturating_sub(n));
    let start = keep_from_index.first().copied().unwrap_or(0);
    messages[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_retain_and_summary_tags() {
        let text = "<retain>keep this verbatim</retain>\n<summary>short summary</summary>";
        let parsed = parse_tags(text);
        assert_eq!(parsed.retain.unwrap(), "keep this verbatim");
        assert_eq!(parsed.summary, "short summary");
    }

    #[test]
    fn falls_back_to_whole_text_when_no_tags_present() {
        let parsed = parse_tags("just a plain summary");
        assert!(parsed.retain.is_none());
        assert_eq!(parsed.summary, "just a plain summary");
    }

    #[test]
    fn strip_dangling_tool_call_removes_contentless_tail() {
        let call = crate::message::ToolCall::new("c1", "bash", "{}");
        let messages = vec![BaseMessage::user_text("hi"), BaseMessage::assistant_tool_calls(None, vec![call])];
        let trimmed = strip_dangling_tool_call(&messages);
        assert_eq!(trimmed.len(), 1);
    }

    #[test]
    fn last_user_bounded_turns_keeps_only_requested_count() {
        let messages = vec![
            BaseMessage::user_text("turn1"),
            BaseMessage::assistant_text("reply1"),
            BaseMessage::user_text("turn2"),
            BaseMessage::assistant_text("reply2"),
        ];
        let kept = last_user_bounded_turns(&messages, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].text(), "turn2");
    }

    #[test]
    fn is_due_requires_threshold_and_context_limit() {
        let config = CompactionConfig::default();
        let model = ModelSpec {
            id: "m".into(),
            provider: "p".into(),
            aliases: vec![],
            context_window: Some(1000),
            max_input_tokens: None,
            max_output_tokens: None,
            supports_tools: false,
        };
        let usage = TokenUsage { prompt_tokens: 850, completion_tokens: 0, cached_prompt_tokens: 0, reasoning_tokens: 0 };
        assert!(is_due(&config, Some(usage), &model));

        let low_usage = TokenUsage { prompt_tokens: 10, completion_tokens: 0, cached_prompt_tokens: 0, reasoning_tokens: 0 };
        assert!(!is_due(&config, Some(low_usage), &model));
    }
}
