//! Model registry and id/alias resolution (spec §3 `ModelSpec`, §4.2).
//!
//! The teacher hardcodes supported-model checks as `is_supported_model`
//! match arms in each provider file (`llm/openai.rs`, `llm/anthropic.rs`).
//! This generalizes that into a lookup table plus a resolution chain, since
//! the spec requires alias and provider-qualified and snapshot-suffix
//! fallback rather than a flat allow-list.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Static description of a model: its canonical id, owning provider, and
/// context-window limits. `context_window` is preferred over
/// `max_input_tokens` wherever both are available (spec §4.3.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSpec {
    pub id: String,
    pub provider: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub context_window: Option<u64>,
    pub max_input_tokens: Option<u64>,
    pub max_output_tokens: Option<u64>,
    #[serde(default)]
    pub supports_tools: bool,
}

impl ModelSpec {
    /// The limit to use for budget/compaction-threshold math: `context_window`
    /// if present, else `max_input_tokens`.
    pub fn effective_context_limit(&self) -> Option<u64> {
        self.context_window.or(self.max_input_tokens)
    }
}

/// Maps model id/alias to `ModelSpec`, following the five-step resolution
/// strategy in spec §3:
///
/// 1. direct id match
/// 2. alias, scoped to a given provider
/// 3. alias, unique across all providers
/// 4. provider-qualified `"provider/id"`
/// 5. strip one trailing `-YYYY-MM-DD` snapshot suffix and retry from (1)
#[derive(Debug, Default)]
pub struct ModelRegistry {
    by_id: HashMap<String, ModelSpec>,
    /// (provider, alias) -> id, for step 2.
    alias_by_provider: HashMap<(String, String), String>,
    /// alias -> Vec<id>, for step 3 (unique-across-providers check).
    alias_global: HashMap<String, Vec<String>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ModelSpec) {
        for alias in &spec.aliases {
            self.alias_by_provider
                .insert((spec.provider.clone(), alias.clone()), spec.id.clone());
            self.alias_global
                .entry(alias.clone())
                .or_default()
                .push(spec.id.clone());
        }
        self.by_id.insert(spec.id.clone(), spec);
    }

    /// Resolve `requested` to a `ModelSpec`, optionally scoped to
    /// `provider_hint` (used for step 2; ignored by steps 1, 3, 4).
    pub fn resolve(&self, requested: &str, provider_hint: Option<&str>) -> Result<&ModelSpec> {
        if let Some(spec) = self.by_id.get(requested) {
            return Ok(spec);
        }

        if let Some(provider) = provider_hint {
            if let Some(id) = self
                .alias_by_provider
                .get(&(provider.to_string(), requested.to_string()))
            {
                if let Some(spec) = self.by_id.get(id) {
                    return Ok(spec);
                }
            }
        }

        if let Some(ids) = self.alias_global.get(requested) {
            let mut distinct = ids.clone();
            distinct.sort();
            distinct.dedup();
            if distinct.len() == 1 {
                if let Some(spec) = self.by_id.get(&distinct[0]) {
                    return Ok(spec);
                }
            }
        }

        if let Some((provider, id)) = requested.split_once('/') {
            if let Some(spec) = self.by_id.get(id) {
                if spec.provider == provider {
                    return Ok(spec);
                }
            }
        }

        if let Some(base) = strip_snapshot_suffix(requested) {
            if base != requested {
                return self.resolve(base, provider_hint);
            }
        }

        Err(Error::UnknownModel(requested.to_string()))
    }
}

/// Strips one trailing `-YYYY-MM-DD` suffix. Returns the input unchanged if
/// no such suffix is present; callers compare to the original to detect
/// whether anything was actually stripped.
fn strip_snapshot_suffix(id: &str) -> Option<&str> {
    if id.len() < 11 {
        return Some(id);
    }
    let tail = &id[id.len() - 11..];
    let mut chars = tail.chars();
    let dash_ok = chars.next() == Some('-');
    let is_date = dash_ok
        && tail[1..].split('-').collect::<Vec<_>>().len() == 3
        && tail[1..]
            .split('-')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
    if is_date {
        Some(&id[..id.len() - 11])
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, provider: &str, aliases: &[&str]) -> ModelSpec {
        ModelSpec {
            id: id.to_string(),
            provider: provider.to_string(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            context_window: Some(200_000),
            max_input_tokens: None,
            max_output_tokens: None,
            supports_tools: true,
        }
    }

    #[test]
    fn resolves_direct_id() {
        let mut reg = ModelRegistry::new();
        reg.register(spec("gpt-5", "openai", &[]));
        assert_eq!(reg.resolve("gpt-5", None).unwrap().id, "gpt-5");
    }

    #[test]
    fn resolves_alias_scoped_to_provider() {
        let mut reg = ModelRegistry::new();
        reg.register(spec("claude-opus-4", "anthropic", &["opus"]));
        assert_eq!(
            reg.resolve("opus", Some("anthropic")).unwrap().id,
            "claude-opus-4"
        );
    }

    #[test]
    fn resolves_alias_unique_across_providers_without_hint() {
        let mut reg = ModelRegistry::new();
        reg.register(spec("claude-opus-4", "anthropic", &["opus"]));
        assert_eq!(reg.resolve("opus", None).unwrap().id, "claude-opus-4");
    }

    #[test]
    fn ambiguous_alias_without_hint_fails() {
        let mut reg = ModelRegistry::new();
        reg.register(spec("model-a", "openai", &["fast"]));
        reg.register(spec("model-b", "anthropic", &["fast"]));
        assert!(reg.resolve("fast", None).is_err());
    }

    #[test]
    fn resolves_provider_qualified_form() {
        let mut reg = ModelRegistry::new();
        reg.register(spec("gpt-5", "openai", &[]));
        assert_eq!(reg.resolve("openai/gpt-5", None).unwrap().id, "gpt-5");
    }

    #[test]
    fn strips_trailing_snapshot_date_suffix() {
        let mut reg = ModelRegistry::new();
        reg.register(spec("gpt-4o", "openai", &[]));
        assert_eq!(
            reg.resolve("gpt-4o-2024-08-06", None).unwrap().id,
            "gpt-4o"
        );
    }

    #[test]
    fn unknown_model_errors() {
        let reg = ModelRegistry::new();
        assert!(reg.resolve("nonexistent", None).is_err());
    }

    #[test]
    fn effective_context_limit_prefers_context_window() {
        let s = ModelSpec {
            id: "m".into(),
            provider: "p".into(),
            aliases: vec![],
            context_window: Some(128_000),
            max_input_tokens: Some(64_000),
            max_output_tokens: None,
            supports_tools: false,
        };
        assert_eq!(s.effective_context_limit(), Some(128_000));
    }
}
