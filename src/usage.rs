//! Token usage accounting (spec §3 `ChatInvokeCompletion.usage`, §4.1).
//!
//! Generalizes the teacher's `TokenUsage`/`update_usage_state` pattern
//! (`llm/provider.rs`, `llm/anthropic.rs`) into a standalone accountant the
//! agent loop updates after every provider call and exposes for callers who
//! want running totals across a whole task.

use serde::{Deserialize, Serialize};

/// Usage reported for a single provider call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Portion of `prompt_tokens` served from a provider-side prompt cache.
    /// Anthropic reports this as the sum of `cache_creation_input_tokens`
    /// and `cache_read_input_tokens`, folded into `prompt_tokens` by the
    /// transport and echoed here separately for callers that care.
    pub cached_prompt_tokens: u64,
    pub reasoning_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cached_prompt_tokens += other.cached_prompt_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
    }
}

/// Running totals for a task, plus the most recent call's usage. The agent
/// loop owns one of these per `run_stream` invocation; it is not shared
/// across tasks.
#[derive(Debug, Clone, Default)]
pub struct UsageAccountant {
    aggregate: TokenUsage,
    last: Option<TokenUsage>,
    call_count: u32,
}

impl UsageAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, usage: TokenUsage) {
        self.aggregate.add(&usage);
        self.last = Some(usage);
        self.call_count += 1;
    }

    pub fn aggregate(&self) -> TokenUsage {
        self.aggregate
    }

    pub fn last(&self) -> Option<TokenUsage> {
        self.last
    }

    pub fn call_count(&self) -> u32 {
        self.call_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_accumulates_across_calls() {
        let mut acc = UsageAccountant::new();
        acc.record(TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 20,
            cached_prompt_tokens: 0,
            reasoning_tokens: 0,
        });
        acc.record(TokenUsage {
            prompt_tokens: 150,
            completion_tokens: 30,
            cached_prompt_tokens: 50,
            reasoning_tokens: 5,
        });
        assert_eq!(acc.aggregate().prompt_tokens, 250);
        assert_eq!(acc.aggregate().completion_tokens, 50);
        assert_eq!(acc.call_count(), 2);
        assert_eq!(acc.last().unwrap().prompt_tokens, 150);
    }

    #[test]
    fn total_sums_prompt_and_completion() {
        let usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            cached_prompt_tokens: 0,
            reasoning_tokens: 0,
        };
        assert_eq!(usage.total(), 15);
    }
}
