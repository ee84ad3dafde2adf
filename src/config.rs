//! Agent configuration surface (spec §6.6).
//!
//! Built as a builder, following the teacher's `ProviderConfig`/
//! `ChatLoopConfig` convention of constructing policy objects through a
//! fluent `with_*`/`.build()` chain rather than public-field structs.

use std::time::Duration;

/// `tool_choice` policy passed to the transport on each invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    Required,
    None,
    Named(String),
}

impl Default for ToolChoice {
    fn default() -> Self {
        ToolChoice::Auto
    }
}

/// Compaction policy. `AgentConfig::compaction = None` disables the
/// compaction service entirely (spec §6.6).
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    pub enabled: bool,
    pub auto: bool,
    pub threshold_ratio: f64,
    pub model: Option<String>,
    pub summary_prompt: Option<String>,
    pub retain_prompt: Option<String>,
    pub retain_last_turns: usize,
    pub directives: Vec<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto: true,
            threshold_ratio: 0.8,
            model: None,
            summary_prompt: None,
            retain_prompt: None,
            retain_last_turns: 1,
            directives: Vec::new(),
        }
    }
}

/// Tool-output cache policy (spec §4.3.1, §6.6).
#[derive(Debug, Clone)]
pub struct ToolOutputCacheConfig {
    pub enabled: bool,
    pub context_budget_tokens: Option<u64>,
    pub total_budget_trim: bool,
    pub max_message_bytes: usize,
    pub max_line_length: usize,
}

impl Default for ToolOutputCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            context_budget_tokens: None,
            total_budget_trim: true,
            max_message_bytes: 50 * 1024,
            max_line_length: 2_000,
        }
    }
}

/// HTTP retry policy for the provider transport (spec §6.6).
#[derive(Debug, Clone)]
pub struct RetryPolicyConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            retryable_status_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

/// OpenAI WebSocket chaining policy (spec §4.2.2, §6.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebsocketMode {
    Off,
    Auto,
    On,
}

impl Default for WebsocketMode {
    fn default() -> Self {
        WebsocketMode::Auto
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiWebsocketConfig {
    pub mode: WebsocketMode,
    pub api_version: String,
    pub connect_timeout: Duration,
    pub response_idle_timeout: Duration,
}

impl Default for OpenAiWebsocketConfig {
    fn default() -> Self {
        Self {
            mode: WebsocketMode::Auto,
            api_version: "v2".to_string(),
            connect_timeout: Duration::from_secs(10),
            response_idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Full agent configuration, as recognized by `run_stream` and its
/// collaborators. Construct via [`AgentConfigBuilder`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub tool_choice: ToolChoice,
    pub require_done_tool: bool,
    pub compaction: Option<CompactionConfig>,
    pub tool_output_cache: ToolOutputCacheConfig,
    pub retry: RetryPolicyConfig,
    pub openai_websocket: OpenAiWebsocketConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tool_choice: ToolChoice::default(),
            require_done_tool: false,
            compaction: Some(CompactionConfig::default()),
            tool_output_cache: ToolOutputCacheConfig::default(),
            retry: RetryPolicyConfig::default(),
            openai_websocket: OpenAiWebsocketConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    pub fn max_iterations(mut self, n: u32) -> Self {
        self.config.max_iterations = n;
        self
    }

    pub fn tool_choice(mut self, choice: ToolChoice) -> Self {
        self.config.tool_choice = choice;
        self
    }

    pub fn require_done_tool(mut self, required: bool) -> Self {
        self.config.require_done_tool = required;
        self
    }

    pub fn compaction(mut self, compaction: Option<CompactionConfig>) -> Self {
        self.config.compaction = compaction;
        self
    }

    pub fn tool_output_cache(mut self, cache: ToolOutputCacheConfig) -> Self {
        self.config.tool_output_cache = cache;
        self
    }

    pub fn retry(mut self, retry: RetryPolicyConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn openai_websocket(mut self, ws: OpenAiWebsocketConfig) -> Self {
        self.config.openai_websocket = ws;
        self
    }

    pub fn build(self) -> AgentConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = AgentConfig::default();
        assert_eq!(config.max_iterations, 200);
        assert_eq!(config.tool_choice, ToolChoice::Auto);
        assert!(!config.require_done_tool);
        assert!(config.compaction.is_some());
        assert_eq!(config.tool_output_cache.max_message_bytes, 50 * 1024);
    }

    #[test]
    fn builder_overrides_selected_fields_only() {
        let config = AgentConfig::builder()
            .max_iterations(50)
            .require_done_tool(true)
            .build();
        assert_eq!(config.max_iterations, 50);
        assert!(config.require_done_tool);
        assert_eq!(config.tool_choice, ToolChoice::Auto);
    }

    #[test]
    fn compaction_none_disables_service() {
        let config = AgentConfig::builder().compaction(None).build();
        assert!(config.compaction.is_none());
    }
}
