//! Tool registry (spec §4.4), generalized from the teacher's
//! `llm::registry::ToolRegistry` (a `HashMap<String, Arc<dyn ToolProvider>>`
//! with register/get/tool_names/execute) to the new `ToolProvider` shape.

use std::collections::HashMap;
use std::sync::Arc;

use super::{ToolDefinition, ToolProvider};

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolProvider>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn ToolProvider>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolProvider>> {
        self.tools.get(name).cloned()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Definitions for every registered tool, in the shape the transport
    /// serializes for the provider.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;
    use crate::tools::{BoxFuture, ToolContext, ToolOutcome, ToolReturn};
    use tokio_util::sync::CancellationToken;

    struct EchoTool;

    impl ToolProvider for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        fn execute<'a>(&'a self, call: &'a ToolCall, _ctx: &'a ToolContext) -> BoxFuture<'a, Result<ToolOutcome, String>> {
            Box::pin(async move {
                let args = call.parse_arguments();
                Ok(ToolOutcome::Return(ToolReturn::Text(
                    args["text"].as_str().unwrap_or("").to_string(),
                )))
            })
        }
    }

    #[test]
    fn register_and_lookup_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.has_tool("echo"));
        assert_eq!(registry.tool_names(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn registered_tool_executes() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let tool = registry.get("echo").unwrap();
        let ctx = ToolContext::new(CancellationToken::new());
        let call = ToolCall::new("id1", "echo", r#"{"text": "hi"}"#);
        let outcome = tool.execute(&call, &ctx).await.unwrap();
        match outcome {
            ToolOutcome::Return(ToolReturn::Text(text)) => assert_eq!(text, "hi"),
            _ => panic!("expected text return"),
        }
    }

    #[test]
    fn definitions_are_schema_normalized() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let defs = registry.definitions();
        match &defs[0] {
            ToolDefinition::Function { parameters, .. } => {
                assert_eq!(parameters["additionalProperties"], false);
            }
            _ => panic!("expected function definition"),
        }
    }
}
