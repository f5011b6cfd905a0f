use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_AZURE_DEPLOYMENT: &str = "gpt-4";
const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub enum ProviderKind {
    OpenAi {
        api_endpoint: String,
        model: String,
    },
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub api_key: Option<String>,
    pub kind: ProviderKind,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub model: Option<String>,
    pub choices: Vec<ChatChoice>,
    pub usage: Option<ChatUsage>,
}

impl ChatResponse {
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    pub role: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
}

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("LLM not configured: {0}")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: reqwest::StatusCode, body: String },
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty response")]
    EmptyChoices,
}

/// Anything that can answer a chat-completion request.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatResponse, LLMError>;
}

#[derive(Clone)]
pub struct LLMProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

impl LLMProvider {
    pub fn from_env() -> Self {
        Self::new(LLMConfig::from_env())
    }

    pub fn new(config: LLMConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { config, client }
    }

    pub fn is_available(&self) -> bool {
        let has_key = self.config.api_key.as_deref().is_some_and(|v| !v.trim().is_empty());
        has_key
            && match &self.config.kind {
                ProviderKind::OpenAi { api_endpoint, model } => {
                    !api_endpoint.trim().is_empty() && !model.trim().is_empty()
                }
                ProviderKind::Azure { endpoint, deployment, .. } => {
                    !endpoint.trim().is_empty() && !deployment.trim().is_empty()
                }
            }
    }

    pub fn model_name(&self) -> &str {
        match &self.config.kind {
            ProviderKind::OpenAi { model, .. } => model,
            ProviderKind::Azure { deployment, .. } => deployment,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    fn request_url(&self) -> String {
        match &self.config.kind {
            ProviderKind::OpenAi { api_endpoint, .. } => {
                format!("{}/chat/completions", api_endpoint.trim_end_matches('/'))
            }
            ProviderKind::Azure { endpoint, deployment, api_version } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                api_version
            ),
        }
    }

    fn payload(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false
        });
        if let ProviderKind::OpenAi { model, .. } = &self.config.kind {
            payload["model"] = serde_json::Value::from(model.as_str());
        }
        if request.json_mode {
            payload["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        payload
    }
}

#[async_trait]
impl ChatCompletion for LLMProvider {
    /// One HTTP attempt; transport and auth failures surface to the caller.
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatResponse, LLMError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or(LLMError::NotConfigured("LLM_API_KEY"))?;

        let builder = self.client.post(self.request_url()).json(&self.payload(request));
        let builder = match self.config.kind {
            ProviderKind::OpenAi { .. } => builder.bearer_auth(api_key),
            ProviderKind::Azure { .. } => builder.header("api-key", api_key),
        };

        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LLMError::HttpStatus { status, body });
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %String::from_utf8_lossy(&bytes),
                "Failed to parse LLM response JSON"
            );
            LLMError::Json(e)
        })
    }
}

impl LLMConfig {
    pub fn from_env() -> Self {
        let timeout = Duration::from_millis(env_u64("LLM_TIMEOUT").unwrap_or(DEFAULT_TIMEOUT_MS));

        let azure_endpoint = env_string("AZURE_OPENAI_ENDPOINT");
        let azure_key = env_string("AZURE_OPENAI_API_KEY");
        if let (Some(endpoint), Some(api_key)) = (azure_endpoint, azure_key) {
            return Self {
                api_key: Some(api_key),
                kind: ProviderKind::Azure {
                    endpoint,
                    deployment: env_string("AZURE_OPENAI_DEPLOYMENT")
                        .unwrap_or_else(|| DEFAULT_AZURE_DEPLOYMENT.to_string()),
                    api_version: env_string("AZURE_OPENAI_API_VERSION")
                        .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
                },
                timeout,
            };
        }

        let api_endpoint = normalize_endpoint(
            env_string("LLM_API_ENDPOINT")
                .or_else(|| env_string("LLM_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
        );

        Self {
            api_key: env_string("LLM_API_KEY"),
            kind: ProviderKind::OpenAi {
                api_endpoint,
                model: env_string("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            },
            timeout,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key)?.parse().ok()
}

fn normalize_endpoint(endpoint: String) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.contains("/v1/") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}
