use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::db::StoreError;
use crate::services::conversation::ConversationError;
use crate::services::evaluation::EvaluationError;
use crate::services::gateway::GatewayError;
use crate::services::worksheet::GenerationError;

const INTERNAL_MESSAGE: &str = "Internal server error";
const UPSTREAM_MESSAGE: &str = "The language model service failed, please retry";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    is_operational: bool,
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
            is_operational: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Message safe to show a client; internal details stay in the logs.
    pub fn public_message(&self) -> &str {
        if self.is_operational {
            &self.message
        } else {
            INTERNAL_MESSAGE
        }
    }

    fn operational(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            is_operational: true,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if !self.is_operational {
            tracing::error!(code = %self.code, error = %self.message, "request failed");
        }

        let body = ErrorResponse {
            success: false,
            error: self.public_message().to_string(),
            code: self.code,
        };

        (self.status, Json(body)).into_response()
    }
}

pub fn json_error(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> AppError {
    AppError::operational(status, code, message)
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match &err {
            GatewayError::Upstream(_) => json_error(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", UPSTREAM_MESSAGE),
            GatewayError::Timeout(_) => json_error(StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT", err.to_string()),
            GatewayError::MalformedOutput { .. } => {
                json_error(StatusCode::BAD_GATEWAY, "MALFORMED_OUTPUT", err.to_string())
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::not_found(format!("{entity} {id} not found")),
            StoreError::Conflict(detail) => Self::conflict(detail),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::InvalidInput(message) => Self::validation(message),
            GenerationError::Gateway(err) => err.into(),
            GenerationError::Store(err) => err.into(),
        }
    }
}

impl From<EvaluationError> for AppError {
    fn from(err: EvaluationError) -> Self {
        match err {
            EvaluationError::InvalidInput(message) => Self::validation(message),
            EvaluationError::ExerciseNotFound(id) => Self::not_found(format!("exercise {id} not found")),
            EvaluationError::Gateway(err) => err.into(),
            EvaluationError::Store(err) => err.into(),
        }
    }
}

impl From<ConversationError> for AppError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::InvalidInput(message) => Self::validation(message),
            ConversationError::NotFound(id) => Self::not_found(format!("conversation {id} not found")),
            err @ ConversationError::SessionBusy { .. } => {
                json_error(StatusCode::CONFLICT, "SESSION_BUSY", err.to_string())
            }
            ConversationError::ConcurrentModification(detail) => {
                json_error(StatusCode::CONFLICT, "CONCURRENT_MODIFICATION", detail)
            }
            ConversationError::Upstream(err) => err.into(),
            ConversationError::Store(err) => err.into(),
            err @ ConversationError::Aborted(_) => Self::internal(err.to_string()),
        }
    }
}
