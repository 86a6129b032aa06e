// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::env;

use super::resolve_env_field;

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_extraction_model() -> String {
    "llama-3.1-8b-instant".to_string()
}
fn default_summary_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_temperature() -> f32 {
    0.3
}

/// Chat-completion backend used by the extraction worker and the on-demand path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible root (`.../v1`); `/chat/completions` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// "ENV" means: read from GROQ_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_extraction_model")]
    pub extraction_model: String,
    #[serde(default = "default_summary_model")]
    pub summary_model: String,
    /// Tried in order when the primary model is unreachable.
    #[serde(default)]
    pub fallback_models: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: default_api_key(),
            extraction_model: default_extraction_model(),
            summary_model: default_summary_model(),
            fallback_models: Vec::new(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

impl LlmConfig {
    pub(crate) fn resolve_env(&mut self) {
        self.api_key = resolve_env_field(&self.api_key, "GROQ_API_KEY");
        if let Ok(base) = env::var("LLM_BASE_URL") {
            if !base.trim().is_empty() {
                self.base_url = base.trim().to_string();
            }
        }

        // Sanitize
        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = default_temperature();
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        self.fallback_models.retain(|m| !m.trim().is_empty());
    }

    /// Primary extraction model followed by the fallbacks, without duplicates.
    pub fn extraction_models(&self) -> Vec<String> {
        Self::chain(&self.extraction_model, &self.fallback_models)
    }

    pub fn summary_models(&self) -> Vec<String> {
        Self::chain(&self.summary_model, &self.fallback_models)
    }

    fn chain(primary: &str, rest: &[String]) -> Vec<String> {
        let mut out = vec![primary.to_string()];
        for m in rest {
            if !out.iter().any(|o| o == m) {
                out.push(m.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_chain_dedups_fallbacks() {
        let cfg = LlmConfig {
            fallback_models: vec!["a".into(), "llama-3.1-8b-instant".into(), "b".into()],
            ..LlmConfig::default()
        };
        assert_eq!(
            cfg.extraction_models(),
            vec!["llama-3.1-8b-instant", "a", "b"]
        );
    }
}
