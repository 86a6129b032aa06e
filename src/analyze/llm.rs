// src/analyze/llm.rs
//! Chat-completion client abstraction plus the OpenAI-compatible (Groq) backend.
//! A scripted client is provided for tests and local runs.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::LlmConfig;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Primary model first; later entries are tried only when earlier ones are unreachable.
    pub models: Vec<String>,
    pub json_mode: bool,
    pub temperature: f32,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Return the completion text. Fails with `PipelineError::Llm` when no model answered.
    async fn complete(&self, req: &ChatRequest) -> Result<String>;
    fn name(&self) -> &'static str;
}

/// OpenAI-compatible chat completions (Groq by default).
pub struct GroqClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

impl GroqClient {
    pub fn new(http: reqwest::Client, cfg: &LlmConfig) -> Self {
        Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.trim().to_string(),
        }
    }

    /// Build with its own HTTP client bounded by the configured timeout.
    pub fn from_config(cfg: &LlmConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("kpulse-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self::new(http, cfg))
    }

    async fn call_model(&self, model: &str, req: &ChatRequest) -> std::result::Result<String, String> {
        let body = WireRequest {
            model,
            messages: &req.messages,
            temperature: req.temperature,
            response_format: req.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("http post: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("http status {status}"));
        }
        let parsed: WireResponse = resp.json().await.map_err(|e| format!("http body: {e}"))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| "response carried no choices".to_string())
    }
}

#[async_trait]
impl LlmClient for GroqClient {
    async fn complete(&self, req: &ChatRequest) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(PipelineError::Llm("api key not configured".into()));
        }
        let mut last_err = String::from("no model configured");
        for model in &req.models {
            match self.call_model(model, req).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(target: "analyze", model = %model, error = %e, "model unreachable, trying next");
                    last_err = format!("{model}: {e}");
                }
            }
        }
        Err(PipelineError::Llm(last_err))
    }

    fn name(&self) -> &'static str {
        "groq"
    }
}

/// Replays canned completions in order. `None` simulates an unreachable model.
/// Once the script runs out, `fallback` is returned for every call.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Option<String>>>,
    fallback: Option<String>,
    seen: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(replies.into_iter().map(|r| r.map(Into::into)).collect()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always answer `reply`.
    pub fn always(reply: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(reply.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, req: &ChatRequest) -> Result<String> {
        self.seen.lock().push(req.clone());
        let next = self.script.lock().pop_front();
        match next {
            Some(Some(text)) => Ok(text),
            Some(None) => Err(PipelineError::Llm("scripted outage".into())),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| PipelineError::Llm("script exhausted".into())),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg(base: &str, fallbacks: Vec<String>) -> LlmConfig {
        LlmConfig {
            base_url: format!("{base}/openai/v1"),
            api_key: "test-key".into(),
            fallback_models: fallbacks,
            ..LlmConfig::default()
        }
    }

    fn request(cfg: &LlmConfig) -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            models: cfg.extraction_models(),
            json_mode: true,
            temperature: 0.2,
        }
    }

    #[tokio::test]
    async fn sends_json_mode_and_reads_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama-3.1-8b-instant",
                "response_format": {"type": "json_object"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"ok\":true}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = cfg(&server.uri(), vec![]);
        let client = GroqClient::from_config(&cfg).unwrap();
        let text = client.complete(&request(&cfg)).await.unwrap();
        assert_eq!(text, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn falls_back_to_next_model_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"model": "llama-3.1-8b-instant"})))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"model": "backup"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "from backup"}}]
            })))
            .mount(&server)
            .await;

        let cfg = cfg(&server.uri(), vec!["backup".into()]);
        let client = GroqClient::from_config(&cfg).unwrap();
        assert_eq!(client.complete(&request(&cfg)).await.unwrap(), "from backup");
    }

    #[tokio::test]
    async fn all_models_down_is_an_llm_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let cfg = cfg(&server.uri(), vec!["backup".into()]);
        let client = GroqClient::from_config(&cfg).unwrap();
        let err = client.complete(&request(&cfg)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Llm(_)));
    }

    #[tokio::test]
    async fn scripted_client_replays_then_falls_back() {
        let llm = ScriptedLlm::new([Some("a"), None]);
        let req = ChatRequest {
            messages: vec![],
            models: vec![],
            json_mode: false,
            temperature: 0.0,
        };
        assert_eq!(llm.complete(&req).await.unwrap(), "a");
        assert!(llm.complete(&req).await.is_err());
        assert!(llm.complete(&req).await.is_err());
        assert_eq!(llm.calls(), 3);
    }
}
