//! Tool pipeline: definitions, execution context, permission hooks, and
//! call dispatch (spec §4.4).
//!
//! Generalizes the teacher's `ToolProvider` trait (inferred from its use in
//! `tools/bash.rs`/`tools/editor_edit.rs` — `name`/`brief`/`full_description`/
//! `parameters`/`execute`) to the spec's richer `ToolDefinition` (function vs
//! hosted_search), structured `ToolReturn`, permission-hook gating, and the
//! `TaskComplete` control signal.

pub mod registry;
pub mod task_complete;

pub use registry::ToolRegistry;
pub use task_complete::TaskComplete;

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::message::{ContentPart, ToolCall};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Declares a tool's shape to the provider. `Function` is normalized once
/// at registration time via [`normalize_schema`]; `HostedSearch` describes
/// a provider-hosted tool the core never executes locally.
#[derive(Debug, Clone)]
pub enum ToolDefinition {
    Function {
        name: String,
        description: String,
        parameters: Value,
        strict: bool,
    },
    HostedSearch {
        name: String,
        provider: Option<String>,
        domain_filters: Vec<String>,
        max_uses: Option<u32>,
        user_location: Option<Value>,
    },
}

impl ToolDefinition {
    pub fn name(&self) -> &str {
        match self {
            ToolDefinition::Function { name, .. } => name,
            ToolDefinition::HostedSearch { name, .. } => name,
        }
    }

    /// Builds a normalized function tool definition: `additionalProperties`
    /// forced false and every declared property required, per spec §4.4's
    /// "strict=true at the provider level".
    pub fn function(name: impl Into<String>, description: impl Into<String>, mut parameters: Value) -> Self {
        normalize_schema(&mut parameters);
        ToolDefinition::Function {
            name: name.into(),
            description: description.into(),
            parameters,
            strict: true,
        }
    }
}

/// Walks a JSON Schema (draft-07) tree, forcing `additionalProperties:
/// false` on every object schema that doesn't already declare it and
/// requiring every property it declares. Recurses into `properties`,
/// `items`, and `$defs`/`definitions` so nested object schemas are
/// normalized too.
pub fn normalize_schema(schema: &mut Value) {
    let Value::Object(map) = schema else { return };

    let is_object_schema = map.get("type").map(|t| t == "object").unwrap_or(false) || map.contains_key("properties");
    if is_object_schema {
        map.entry("additionalProperties").or_insert(Value::Bool(false));
        if let Some(Value::Object(props)) = map.get("properties") {
            let keys: Vec<String> = props.keys().cloned().collect();
            map.insert("required".to_string(), Value::Array(keys.into_iter().map(Value::String).collect()));
        }
    }

    if let Some(Value::Object(props)) = map.get_mut("properties") {
        for (_, value) in props.iter_mut() {
            normalize_schema(value);
        }
    }
    if let Some(items) = map.get_mut("items") {
        normalize_schema(items);
    }
    for defs_key in ["$defs", "definitions"] {
        if let Some(Value::Object(defs)) = map.get_mut(defs_key) {
            for (_, value) in defs.iter_mut() {
                normalize_schema(value);
            }
        }
    }
}

/// What a tool's `execute` hands back on success.
#[derive(Debug, Clone)]
pub enum ToolReturn {
    Text(String),
    Parts(Vec<ContentPart>),
    Json(Value),
}

impl ToolReturn {
    /// Renders to the plain-text `tool` message content the agent loop
    /// commits to history (spec §4.4 step 5).
    pub fn into_content(self) -> String {
        match self {
            ToolReturn::Text(text) => text,
            ToolReturn::Parts(parts) => parts.iter().map(ContentPart::describe).collect::<Vec<_>>().join(""),
            ToolReturn::Json(value) => value.to_string(),
        }
    }
}

/// Either an ordinary return value or the `TaskComplete` control signal.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Return(ToolReturn),
    Complete(TaskComplete),
}

/// Per-call execution context. `resolve` memoizes a dependency by key for
/// the lifetime of the turn, as spec §4.4 requires ("each key is created at
/// most once per turn").
pub struct ToolContext {
    pub abort: CancellationToken,
    resolved: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl ToolContext {
    pub fn new(abort: CancellationToken) -> Self {
        Self {
            abort,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `key`, or builds it with `factory` and
    /// caches it. `factory` is not called again once a value exists.
    pub fn resolve<T: Send + Sync + 'static>(&self, key: &str, factory: impl FnOnce() -> T) -> Arc<T> {
        let mut guard = self.resolved.lock().unwrap();
        if let Some(existing) = guard.get(key) {
            if let Ok(value) = existing.clone().downcast::<T>() {
                return value;
            }
        }
        let value = Arc::new(factory());
        guard.insert(key.to_string(), value.clone());
        value
    }
}

/// A locally executable tool. Mirrors the teacher's inferred
/// `ToolProvider` shape, generalized to return a [`ToolOutcome`] instead of
/// a bare string so `TaskComplete` has a typed path out of `execute`.
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    fn execute<'a>(&'a self, call: &'a ToolCall, ctx: &'a ToolContext) -> BoxFuture<'a, Result<ToolOutcome, String>>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(self.name(), self.description(), self.parameters())
    }
}

/// A permission hook's verdict on a tool call (spec §6.4).
#[derive(Debug, Clone)]
pub enum PermissionDecision {
    Allow,
    Deny { reason: Option<String>, stop_turn: bool },
}

#[async_trait]
pub trait PermissionHook: Send + Sync {
    async fn check(&self, call: &ToolCall, raw_args: &Value, ctx: &ToolContext) -> PermissionDecision;
}

/// The result of dispatching one tool call through the full pipeline
/// (spec §4.4 steps 1-5): the content to commit as a `tool` history
/// message, whether it's an error, and whether the turn must stop.
pub struct DispatchOutcome {
    pub content: String,
    pub is_error: bool,
    pub done: Option<TaskComplete>,
    /// Set when a `deny{stop_turn=true}` permission decision forces the
    /// turn to end immediately after this call.
    pub force_final: Option<String>,
}

/// Runs the full tool-call pipeline: lookup, permission check, argument
/// parsing, execution, and result conversion.
pub async fn dispatch_tool_call(
    registry: &ToolRegistry,
    call: &ToolCall,
    permission_hook: Option<&(dyn PermissionHook)>,
    ctx: &ToolContext,
) -> DispatchOutcome {
    let Some(tool) = registry.get(call.name()) else {
        return DispatchOutcome {
            content: format!("Error: Unknown tool '{}'", call.name()),
            is_error: true,
            done: None,
            force_final: None,
        };
    };

    let raw_args = call.parse_arguments();

    if let Some(hook) = permission_hook {
        match hook.check(call, &raw_args, ctx).await {
            PermissionDecision::Allow => {}
            PermissionDecision::Deny { reason, stop_turn } => {
                let reason_text = reason.unwrap_or_else(|| "no reason given".to_string());
                return DispatchOutcome {
                    content: format!("Permission denied: {reason_text}"),
                    is_error: true,
                    done: None,
                    force_final: if stop_turn {
                        Some(
                            "Permission request was denied. Turn stopped. Please send your next input to continue."
                                .to_string(),
                        )
                    } else {
                        None
                    },
                };
            }
        }
    }

    match tool.execute(call, ctx).await {
        Ok(ToolOutcome::Return(value)) => DispatchOutcome {
            content: value.into_content(),
            is_error: false,
            done: None,
            force_final: None,
        },
        Ok(ToolOutcome::Complete(signal)) => DispatchOutcome {
            content: "Task complete".to_string(),
            is_error: false,
            done: Some(signal),
            force_final: None,
        },
        Err(message) => DispatchOutcome {
            content: format!("Error: {message}"),
            is_error: true,
            done: None,
            force_final: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_schema_adds_additional_properties_false_and_required() {
        let mut schema = serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "count": {"type": "integer"}
            }
        });
        normalize_schema(&mut schema);
        assert_eq!(schema["additionalProperties"], false);
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "path"));
        assert!(required.iter().any(|v| v == "count"));
    }

    #[test]
    fn normalize_schema_recurses_into_nested_object_properties() {
        let mut schema = serde_json::json!({
            "type": "object",
            "properties": {
                "opts": {
                    "type": "object",
                    "properties": {"flag": {"type": "boolean"}}
                }
            }
        });
        normalize_schema(&mut schema);
        assert_eq!(schema["properties"]["opts"]["additionalProperties"], false);
    }

    #[tokio::test]
    async fn context_resolve_memoizes_per_key() {
        let ctx = ToolContext::new(CancellationToken::new());
        let calls = std::sync::atomic::AtomicU32::new(0);
        let first = ctx.resolve("db", || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            42u32
        });
        let second = ctx.resolve("db", || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            99u32
        });
        assert_eq!(*first, 42);
        assert_eq!(*second, 42);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_yields_error_message() {
        let registry = ToolRegistry::new();
        let ctx = ToolContext::new(CancellationToken::new());
        let call = ToolCall::new("id1", "nonexistent", "{}");
        let outcome = dispatch_tool_call(&registry, &call, None, &ctx).await;
        assert!(outcome.is_error);
        assert!(outcome.content.contains("Unknown tool"));
    }
}
