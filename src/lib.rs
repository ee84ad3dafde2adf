pub mod agent;
pub mod compaction;
pub mod config;
pub mod error;
pub mod history;
pub mod logger;
pub mod message;
pub mod model_registry;
pub mod retry;
pub mod session;
pub mod tool_cache;
pub mod tools;
pub mod transport;
pub mod usage;

// Re-export the types most callers need for a single `use agent_core::prelude::*;`
pub mod prelude {
    pub use crate::agent::{Agent, AgentEvent, AgentInput, RunOptions};
    pub use crate::config::{AgentConfig, CompactionConfig, ToolChoice, ToolOutputCacheConfig};
    pub use crate::error::{Error, Result};
    pub use crate::history::History;
    pub use crate::message::{BaseMessage, ContentPart, ToolCall};
    pub use crate::model_registry::{ModelRegistry, ModelSpec};
    pub use crate::session::{NullSessionSink, SessionSink};
    pub use crate::tool_cache::{NullToolOutputStore, ToolOutputStore};
    pub use crate::tools::{PermissionDecision, PermissionHook, ToolDefinition, ToolProvider, ToolRegistry};
    pub use crate::transport::{anthropic::AnthropicTransport, openai::OpenAiTransport, LLMTransport};
}

pub use logger::log;
