//! Single chokepoint for every model call.
//!
//! Structured calls run in JSON mode and are checked against a schema
//! contract; a non-conforming answer gets exactly one re-prompt with a
//! stricter instruction. Transport failures are never retried here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::schema::{self, EvaluationVerdict, SchemaError, Worksheet};
use crate::services::llm_provider::{ChatCompletion, ChatMessage, ChatResponse, CompletionRequest, LLMError};

pub const STRICT_JSON_REMINDER: &str =
    "Your previous answer could not be used. Return valid JSON only: a single JSON object, no prose, no markdown, no code fences.";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CHAT_TEMPERATURE: f32 = 0.7;
const CHAT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("upstream model call failed: {0}")]
    Upstream(#[from] LLMError),
    #[error("upstream model call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("model output did not match the {schema} contract after {attempts} attempts: {source}")]
    MalformedOutput {
        schema: &'static str,
        attempts: u32,
        #[source]
        source: SchemaError,
    },
}

/// A shape a structured response is parsed into.
pub trait StructuredOutput: Sized {
    const SCHEMA: &'static str;

    fn parse(raw: &str) -> Result<Self, SchemaError>;
}

impl StructuredOutput for Worksheet {
    const SCHEMA: &'static str = "worksheet";

    fn parse(raw: &str) -> Result<Self, SchemaError> {
        schema::parse_worksheet(raw)
    }
}

impl StructuredOutput for EvaluationVerdict {
    const SCHEMA: &'static str = "evaluation";

    fn parse(raw: &str) -> Result<Self, SchemaError> {
        schema::parse_evaluation(raw)
    }
}

fn parse_content<T: StructuredOutput>(content: Option<&str>) -> Result<T, SchemaError> {
    content.map_or(Err(SchemaError::EmptyResponse), T::parse)
}

#[derive(Debug, Clone)]
pub struct StructuredPrompt {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone)]
pub struct LlmGateway {
    backend: Arc<dyn ChatCompletion>,
    timeout: Duration,
}

impl LlmGateway {
    pub fn new(backend: Arc<dyn ChatCompletion>) -> Self {
        Self { backend, timeout: DEFAULT_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Parses the reply as `T`. Blank or non-conforming output gets one
    /// stricter re-prompt before `MalformedOutput`.
    pub async fn complete_structured<T: StructuredOutput>(&self, prompt: &StructuredPrompt) -> Result<T, GatewayError> {
        let purpose = T::SCHEMA;
        let mut request = CompletionRequest {
            messages: vec![ChatMessage::system(&prompt.system), ChatMessage::user(&prompt.user)],
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
            json_mode: true,
        };

        let first = self.call(purpose, 1, &request).await?;
        let first_err = match parse_content::<T>(first.as_deref()) {
            Ok(parsed) => return Ok(parsed),
            Err(err) => err,
        };
        tracing::warn!(purpose, error = %first_err, "model output rejected, re-prompting once");

        request.messages[1] = ChatMessage::user(format!("{}\n\n{}", prompt.user, STRICT_JSON_REMINDER));
        let second = self.call(purpose, 2, &request).await?;
        parse_content::<T>(second.as_deref()).map_err(|source| {
            tracing::warn!(purpose, error = %source, "model output rejected twice");
            GatewayError::MalformedOutput { schema: purpose, attempts: 2, source }
        })
    }

    /// Free-text reply; `turns` are already in chronological order.
    pub async fn complete_chat(&self, turns: &[ChatMessage], system_prompt: &str) -> Result<String, GatewayError> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend_from_slice(turns);

        let request = CompletionRequest {
            messages,
            temperature: CHAT_TEMPERATURE,
            max_tokens: CHAT_MAX_TOKENS,
            json_mode: false,
        };
        self.call("chat", 1, &request)
            .await?
            .ok_or(GatewayError::Upstream(LLMError::EmptyChoices))
    }

    /// One timed attempt. `None` means the reply had no usable content.
    async fn call(
        &self,
        purpose: &'static str,
        attempt: u32,
        request: &CompletionRequest,
    ) -> Result<Option<String>, GatewayError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.backend.complete(request)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let response: ChatResponse = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::warn!(target: "llm_telemetry", purpose, attempt, latency_ms, error = %err, "llm call failed");
                return Err(GatewayError::Upstream(err));
            }
            Err(_) => {
                tracing::warn!(target: "llm_telemetry", purpose, attempt, latency_ms, "llm call timed out");
                return Err(GatewayError::Timeout(self.timeout));
            }
        };

        let usage = response.usage.clone().unwrap_or_default();
        tracing::info!(
            target: "llm_telemetry",
            purpose,
            attempt,
            latency_ms,
            model = response.model.as_deref().unwrap_or("unknown"),
            prompt_tokens = usage.prompt_tokens.unwrap_or(0),
            completion_tokens = usage.completion_tokens.unwrap_or(0),
            total_tokens = usage.total_tokens.unwrap_or(0),
            "llm call completed"
        );

        Ok(response.first_content().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock_llm::{ScriptedCompletion, ScriptedReply};

    const VERDICT: &str = r#"{"is_correct": true, "score": 1.0, "feedback": "ok"}"#;

    fn prompt() -> StructuredPrompt {
        StructuredPrompt {
            system: "judge".into(),
            user: "answer: suis".into(),
            temperature: 0.2,
            max_tokens: 256,
        }
    }

    #[tokio::test]
    async fn conforming_output_needs_one_call() {
        let backend = Arc::new(ScriptedCompletion::new([ScriptedReply::text(VERDICT)]));
        let gateway = LlmGateway::new(backend.clone());

        let verdict: EvaluationVerdict = gateway.complete_structured(&prompt()).await.unwrap();

        assert!(verdict.is_correct);
        assert_eq!(verdict.feedback, "ok");
        assert_eq!(backend.call_count(), 1);
        assert!(backend.requests()[0].json_mode);
    }

    #[tokio::test]
    async fn malformed_output_is_retried_exactly_once() {
        let backend = Arc::new(ScriptedCompletion::new([
            ScriptedReply::text("I think it is correct!"),
            ScriptedReply::text(VERDICT),
        ]));
        let gateway = LlmGateway::new(backend.clone());

        assert!(gateway.complete_structured::<EvaluationVerdict>(&prompt()).await.is_ok());

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].messages[1].content.ends_with(STRICT_JSON_REMINDER));
        assert!(!requests[0].messages[1].content.contains(STRICT_JSON_REMINDER));
    }

    #[tokio::test]
    async fn second_malformed_output_is_surfaced() {
        let backend = Arc::new(ScriptedCompletion::new([
            ScriptedReply::text("nope"),
            ScriptedReply::text(r#"{"is_correct": true, "score": 7}"#),
            ScriptedReply::text(VERDICT),
        ]));
        let gateway = LlmGateway::new(backend.clone());

        let err = gateway.complete_structured::<EvaluationVerdict>(&prompt()).await.unwrap_err();

        assert!(matches!(
            err,
            GatewayError::MalformedOutput { attempts: 2, source: SchemaError::ScoreOutOfRange(_), .. }
        ));
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn upstream_failure_is_not_retried() {
        let backend = Arc::new(ScriptedCompletion::new([
            ScriptedReply::upstream_error(),
            ScriptedReply::text(VERDICT),
        ]));
        let gateway = LlmGateway::new(backend.clone());

        let err = gateway.complete_structured::<EvaluationVerdict>(&prompt()).await.unwrap_err();

        assert!(matches!(err, GatewayError::Upstream(_)));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn blank_output_is_retried_like_malformed_output() {
        let backend = Arc::new(ScriptedCompletion::new([
            ScriptedReply::text("   "),
            ScriptedReply::text(VERDICT),
        ]));
        let gateway = LlmGateway::new(backend.clone());

        let verdict: EvaluationVerdict = gateway.complete_structured(&prompt()).await.unwrap();

        assert_eq!(verdict.score, 1.0);
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn blank_output_twice_is_malformed() {
        let backend = Arc::new(ScriptedCompletion::new([ScriptedReply::text(""), ScriptedReply::text("\n")]));
        let gateway = LlmGateway::new(backend.clone());

        let err = gateway.complete_structured::<Worksheet>(&prompt()).await.unwrap_err();

        assert!(matches!(
            err,
            GatewayError::MalformedOutput { schema: "worksheet", attempts: 2, source: SchemaError::EmptyResponse }
        ));
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn blank_chat_reply_is_an_upstream_error() {
        let backend = Arc::new(ScriptedCompletion::new([ScriptedReply::text("  ")]));
        let gateway = LlmGateway::new(backend.clone());

        let err = gateway.complete_chat(&[ChatMessage::user("hola")], "tutor").await.unwrap_err();

        assert!(matches!(err, GatewayError::Upstream(LLMError::EmptyChoices)));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let backend = Arc::new(ScriptedCompletion::new([
            ScriptedReply::text("late").delayed(Duration::from_millis(200)),
        ]));
        let gateway = LlmGateway::new(backend).with_timeout(Duration::from_millis(20));

        let err = gateway.complete_chat(&[ChatMessage::user("hola")], "tutor").await.unwrap_err();

        assert!(matches!(err, GatewayError::Timeout(_)));
    }

    #[tokio::test]
    async fn chat_prepends_system_prompt() {
        let backend = Arc::new(ScriptedCompletion::new([ScriptedReply::text("  ¡Hola!  ")]));
        let gateway = LlmGateway::new(backend.clone());

        let reply = gateway
            .complete_chat(&[ChatMessage::user("hola")], "You are a tutor.")
            .await
            .unwrap();

        assert_eq!(reply, "¡Hola!");
        let request = &backend.requests()[0];
        assert_eq!(request.messages[0], ChatMessage::system("You are a tutor."));
        assert_eq!(request.messages[1], ChatMessage::user("hola"));
        assert!(!request.json_mode);
    }
}
