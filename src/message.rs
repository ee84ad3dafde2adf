//! Message model and content parts (spec §3).
//!
//! `BaseMessage` generalizes the teacher's flat `Message { role, content:
//! String, tool_call_id, tool_calls }` into a tagged variant per role, each
//! carrying the richer content shape its role actually needs. A provider
//! transport maps this neutral model to and from its own wire format; the
//! agent loop and history adapter only ever see these types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One part of a multi-part message body.
///
/// `Other` is a provider-opaque escape hatch: payloads a provider emits
/// that have no neutral representation are preserved verbatim so a reply
/// round-tripped through history back to the *same* provider is faithfully
/// replayable. Rendered to other providers as a readable marker (see
/// `ContentPart::describe`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    Document {
        /// Base64-encoded document bytes.
        data: String,
        #[serde(default = "ContentPart::default_document_media_type")]
        media_type: String,
    },
    /// Provider-opaque content. `payload` is passed through verbatim when
    /// serializing back to `provider`; any other provider sees
    /// `describe()`'s textual marker instead.
    Other {
        provider: String,
        kind: String,
        payload: Value,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    fn default_document_media_type() -> String {
        "application/pdf".to_string()
    }

    /// Best-effort plain-text rendering, used when concatenating assistant
    /// output or logging. `Other` degrades to `[other:provider/kind] ...`.
    pub fn describe(&self) -> String {
        match self {
            ContentPart::Text { text } => text.clone(),
            ContentPart::ImageUrl { url, .. } => format!("[image: {url}]"),
            ContentPart::Document { media_type, .. } => format!("[document: {media_type}]"),
            ContentPart::Other {
                provider, kind, ..
            } => format!("[other:{provider}/{kind}] (opaque payload)"),
        }
    }

    /// Whether this part can be replayed verbatim to `target_provider`.
    pub fn replayable_to(&self, target_provider: &str) -> bool {
        match self {
            ContentPart::Other { provider, .. } => provider == target_provider,
            _ => true,
        }
    }
}

/// A tool call emitted by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "ToolCall::default_type")]
    pub call_type: String,
    pub function: FunctionCallBody,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub provider_meta: Option<Value>,
}

impl ToolCall {
    fn default_type() -> String {
        "function".to_string()
    }

    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: Self::default_type(),
            function: FunctionCallBody {
                name: name.into(),
                arguments: arguments.into(),
            },
            provider_meta: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn arguments_raw(&self) -> &str {
        &self.function.arguments
    }

    /// Parse `arguments` as JSON. Per spec §4.4 step 3, a parse failure is
    /// not fatal: callers fall back to `{"_raw": arguments}`.
    pub fn parse_arguments(&self) -> Value {
        serde_json::from_str(&self.function.arguments).unwrap_or_else(|_| {
            serde_json::json!({ "_raw": self.function.arguments })
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCallBody {
    pub name: String,
    /// Raw JSON text, not yet parsed. Kept as text because some providers
    /// stream arguments incrementally and because malformed JSON must be
    /// preserved for the caller's inspection rather than rejected here.
    pub arguments: String,
}

/// A raw, provider-native payload preserved on a reasoning message so it
/// can be replayed verbatim to the *same* provider (e.g. encrypted
/// thinking blocks, `web_search_call` records). Never replayed across
/// providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawItem {
    pub provider: String,
    pub kind: String,
    pub payload: Value,
}

/// A reference to a tool output persisted externally by the tool-output
/// cache (spec §4.3.1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputRef {
    pub id: String,
    pub byte_size: usize,
    pub line_count: usize,
}

/// A single message in a conversation, tagged by role. Each variant's
/// required/optional fields follow the table in spec §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum BaseMessage {
    System {
        content: Vec<ContentPart>,
    },
    User {
        content: Vec<ContentPart>,
    },
    Assistant {
        /// `None` is legal only when `tool_calls` is non-empty (enforced by
        /// `BaseMessage::assistant`, the sole constructor used internally).
        content: Option<Vec<ContentPart>>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        tool_calls: Option<Vec<ToolCall>>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        refusal: Option<String>,
    },
    Reasoning {
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        raw_item: Option<RawItem>,
    },
    Tool {
        tool_call_id: String,
        tool_name: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        is_error: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        output_ref: Option<OutputRef>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        trimmed: Option<bool>,
    },
}

impl BaseMessage {
    pub fn system_text(text: impl Into<String>) -> Self {
        BaseMessage::System {
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        BaseMessage::User {
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        BaseMessage::User { content: parts }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        BaseMessage::Assistant {
            content: Some(vec![ContentPart::text(text)]),
            tool_calls: None,
            refusal: None,
        }
    }

    /// Construct an assistant message with tool calls. `content` may be
    /// `None` only because `tool_calls` is guaranteed non-empty here.
    pub fn assistant_tool_calls(
        content: Option<Vec<ContentPart>>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        debug_assert!(!tool_calls.is_empty());
        BaseMessage::Assistant {
            content,
            tool_calls: Some(tool_calls),
            refusal: None,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        BaseMessage::Tool {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            is_error: if is_error { Some(true) } else { None },
            output_ref: None,
            trimmed: None,
        }
    }

    pub fn reasoning(content: Option<String>, raw_item: Option<RawItem>) -> Self {
        BaseMessage::Reasoning { content, raw_item }
    }

    pub fn role_name(&self) -> &'static str {
        match self {
            BaseMessage::System { .. } => "system",
            BaseMessage::User { .. } => "user",
            BaseMessage::Assistant { .. } => "assistant",
            BaseMessage::Reasoning { .. } => "reasoning",
            BaseMessage::Tool { .. } => "tool",
        }
    }

    /// Plain-text rendering of the message's content, used for logging and
    /// for joining assistant texts in the agent loop (spec §4.1.f).
    pub fn text(&self) -> String {
        match self {
            BaseMessage::System { content } | BaseMessage::User { content } => content
                .iter()
                .map(ContentPart::describe)
                .collect::<Vec<_>>()
                .join(""),
            BaseMessage::Assistant { content, .. } => content
                .as_ref()
                .map(|parts| parts.iter().map(ContentPart::describe).collect::<Vec<_>>().join(""))
                .unwrap_or_default(),
            BaseMessage::Reasoning { content, .. } => content.clone().unwrap_or_default(),
            BaseMessage::Tool { content, .. } => content.clone(),
        }
    }

    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        match self {
            BaseMessage::Assistant { tool_calls, .. } => tool_calls.as_deref(),
            _ => None,
        }
    }

    /// The `web_search_call` style hosted-tool callback payload, if this is
    /// a reasoning message wrapping one (spec §4.1.d, §GLOSSARY).
    pub fn hosted_tool_callback(&self) -> Option<&RawItem> {
        match self {
            BaseMessage::Reasoning {
                raw_item: Some(item),
                ..
            } if item.kind == "web_search_call" => Some(item),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_text_joins_parts() {
        let msg = BaseMessage::Assistant {
            content: Some(vec![ContentPart::text("hello "), ContentPart::text("world")]),
            tool_calls: None,
            refusal: None,
        };
        assert_eq!(msg.text(), "hello world");
    }

    #[test]
    fn tool_call_parses_malformed_arguments_as_raw() {
        let call = ToolCall::new("id1", "echo", "not json");
        let parsed = call.parse_arguments();
        assert_eq!(parsed["_raw"], "not json");
    }

    #[test]
    fn other_content_part_describes_for_foreign_provider() {
        let part = ContentPart::Other {
            provider: "openai".to_string(),
            kind: "web_search_call".to_string(),
            payload: serde_json::json!({"id": "ws_1"}),
        };
        assert!(!part.replayable_to("anthropic"));
        assert!(part.replayable_to("openai"));
        assert!(part.describe().contains("other:openai/web_search_call"));
    }

    #[test]
    fn round_trips_through_serde_json() {
        let msg = BaseMessage::tool_result("call_1", "bash", "ok", false);
        let json = serde_json::to_string(&msg).unwrap();
        let back: BaseMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
