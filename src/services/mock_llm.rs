//! Scripted completion backend.
//!
//! Queue replies before use; each `complete()` consumes one and records the
//! request it was given. When the queue runs dry the responder (if any)
//! answers instead, otherwise the call fails as an upstream error.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::services::llm_provider::{
    ChatChoice, ChatCompletion, ChatResponse, ChatUsage, ChoiceMessage, CompletionRequest, LLMError,
};

#[derive(Debug, Clone)]
enum Outcome {
    Text(String),
    UpstreamError,
}

#[derive(Debug, Clone)]
pub struct ScriptedReply {
    outcome: Outcome,
    delay: Option<Duration>,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { outcome: Outcome::Text(text.into()), delay: None }
    }

    pub fn upstream_error() -> Self {
        Self { outcome: Outcome::UpstreamError, delay: None }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Responder = Box<dyn Fn(&CompletionRequest) -> ScriptedReply + Send + Sync>;

pub struct ScriptedCompletion {
    queue: Mutex<VecDeque<ScriptedReply>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            queue: Mutex::new(replies.into_iter().collect()),
            responder: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_responder(
        responder: impl Fn(&CompletionRequest) -> ScriptedReply + Send + Sync + 'static,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            responder: Some(Box::new(responder)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.queue.lock().push_back(reply);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatResponse, LLMError> {
        self.requests.lock().push(request.clone());

        let queued = self.queue.lock().pop_front();
        let reply = match (queued, &self.responder) {
            (Some(reply), _) => reply,
            (None, Some(responder)) => responder(request),
            (None, None) => ScriptedReply::upstream_error(),
        };

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }

        match reply.outcome {
            Outcome::Text(content) => Ok(ChatResponse {
                model: Some("scripted".to_string()),
                choices: vec![ChatChoice {
                    message: ChoiceMessage {
                        role: Some("assistant".to_string()),
                        content: Some(content),
                    },
                }],
                usage: Some(ChatUsage {
                    prompt_tokens: Some(0),
                    completion_tokens: Some(0),
                    total_tokens: Some(0),
                }),
            }),
            Outcome::UpstreamError => Err(LLMError::HttpStatus {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "scripted upstream failure".to_string(),
            }),
        }
    }
}
