//! Per-conversation WebSocket channel. Only text envelopes are served;
//! audio frames are answered with an error.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parse_id;
use crate::response::AppError;
use crate::services::conversation::ConversationError;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientEnvelope {
    Text {
        data: String,
        #[serde(default)]
        language: Option<String>,
    },
    Audio {
        #[serde(default)]
        data: String,
        #[serde(default)]
        language: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEnvelope {
    Transcript { text: String },
    Reply {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        correction: Option<String>,
    },
    Error { message: String },
}

pub async fn conversation_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let conversation_id = match parse_id(&id, "conversation") {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = state.conversations().get(conversation_id).await {
        return AppError::from(err).into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, conversation_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, conversation_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    tracing::info!(%conversation_id, "websocket connected");

    while let Some(msg) = receiver.next().await {
        let envelope = match msg {
            Ok(Message::Text(text)) => handle_text_frame(&state, conversation_id, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(data)) => {
                if sender.send(Message::Pong(data)).await.is_err() {
                    break;
                }
                continue;
            }
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(%conversation_id, error = %err, "websocket receive failed");
                break;
            }
        };

        if send_envelope(&mut sender, &envelope).await.is_err() {
            break;
        }
    }

    tracing::info!(%conversation_id, "websocket disconnected");
}

async fn handle_text_frame(state: &AppState, conversation_id: Uuid, frame: &str) -> ServerEnvelope {
    let envelope: ClientEnvelope = match serde_json::from_str(frame) {
        Ok(envelope) => envelope,
        Err(err) => {
            return ServerEnvelope::Error {
                message: format!("unreadable message: {err}"),
            }
        }
    };

    match envelope {
        ClientEnvelope::Text { data, .. } => {
            match state.conversations().submit_detached(conversation_id, data).await {
                Ok(reply) => ServerEnvelope::Reply {
                    text: reply.reply,
                    correction: reply.correction,
                },
                Err(err) => error_envelope(conversation_id, err),
            }
        }
        ClientEnvelope::Audio { .. } => ServerEnvelope::Error {
            message: "audio messages are not supported; send text".to_string(),
        },
    }
}

fn error_envelope(conversation_id: Uuid, err: ConversationError) -> ServerEnvelope {
    tracing::warn!(%conversation_id, error = %err, "websocket message failed");
    let err = AppError::from(err);
    ServerEnvelope::Error {
        message: err.public_message().to_string(),
    }
}

async fn send_envelope(
    sender: &mut SplitSink<WebSocket, Message>,
    envelope: &ServerEnvelope,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(envelope) {
        Ok(json) => json,
        Err(err) => {
            tracing::error!(error = %err, "failed to encode websocket envelope");
            return Ok(());
        }
    };
    sender.send(Message::Text(json)).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::Config;
    use crate::db::{MemoryStore, StoreError};
    use crate::schema::{Language, Role};
    use crate::services::gateway::LlmGateway;
    use crate::services::mock_llm::{ScriptedCompletion, ScriptedReply};

    async fn socket_state(replies: Vec<ScriptedReply>) -> (AppState, Arc<ScriptedCompletion>, Uuid) {
        let llm = Arc::new(ScriptedCompletion::new(replies));
        let gateway = LlmGateway::new(llm.clone()).with_timeout(Duration::from_secs(2));
        let state = AppState::new(Config::default(), Arc::new(MemoryStore::new()), gateway);
        let session = state
            .conversations()
            .start(Uuid::new_v4(), Language::Es, Some("En el mercado"))
            .await
            .unwrap();
        (state, llm, session.id)
    }

    async fn turn_count(state: &AppState, id: Uuid) -> usize {
        state.conversations().get(id).await.unwrap().turns.len()
    }

    #[tokio::test]
    async fn text_frame_runs_one_exchange() {
        let (state, llm, id) = socket_state(vec![ScriptedReply::text(
            "¡Claro! ¿Qué frutas quieres?\nCorrection: Quiero comprar manzanas.",
        )])
        .await;

        let envelope = handle_text_frame(&state, id, r#"{"type":"text","data":"Quiero compra manzanas","language":"es"}"#).await;

        assert_eq!(
            envelope,
            ServerEnvelope::Reply {
                text: "¡Claro! ¿Qué frutas quieres?".into(),
                correction: Some("Quiero comprar manzanas.".into()),
            }
        );
        assert_eq!(llm.call_count(), 1);
        let session = state.conversations().get(id).await.unwrap();
        assert_eq!(session.turns.len(), 2);
        assert_eq!(session.turns[0].role, Role::User);
        assert_eq!(session.turns[0].corrected_text.as_deref(), Some("Quiero comprar manzanas."));
    }

    #[tokio::test]
    async fn audio_frame_is_answered_with_error() {
        let (state, llm, id) = socket_state(vec![]).await;

        let envelope = handle_text_frame(&state, id, r#"{"type":"audio","data":"UklGRg==","language":"es"}"#).await;

        assert!(matches!(envelope, ServerEnvelope::Error { .. }));
        assert_eq!(llm.call_count(), 0);
        assert_eq!(turn_count(&state, id).await, 0);
    }

    #[tokio::test]
    async fn undecodable_frames_are_answered_with_error() {
        let (state, llm, id) = socket_state(vec![]).await;

        for frame in ["not json", r#"{"type":"video","data":"x"}"#, r#"{"data":"Hola"}"#] {
            let envelope = handle_text_frame(&state, id, frame).await;
            assert!(matches!(envelope, ServerEnvelope::Error { .. }), "frame {frame}");
        }
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn upstream_failure_keeps_turns_unchanged() {
        let (state, llm, id) = socket_state(vec![ScriptedReply::upstream_error()]).await;

        let envelope = handle_text_frame(&state, id, r#"{"type":"text","data":"Hola"}"#).await;

        let ServerEnvelope::Error { message } = envelope else {
            panic!("expected error envelope, got {envelope:?}");
        };
        assert!(!message.contains("scripted upstream failure"));
        assert_eq!(llm.call_count(), 1);
        assert_eq!(turn_count(&state, id).await, 0);
    }

    #[tokio::test]
    async fn blank_text_frame_is_rejected_without_a_model_call() {
        let (state, llm, id) = socket_state(vec![]).await;

        let envelope = handle_text_frame(&state, id, r#"{"type":"text","data":"   "}"#).await;

        assert!(matches!(envelope, ServerEnvelope::Error { .. }));
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn store_errors_are_not_leaked_to_the_socket() {
        let err = ConversationError::Store(StoreError::Decode("column turn_index: bad row 42".into()));

        let envelope = error_envelope(Uuid::new_v4(), err);

        assert_eq!(
            envelope,
            ServerEnvelope::Error {
                message: "Internal server error".into()
            }
        );
    }

    #[test]
    fn client_envelopes_decode_by_type() {
        let text: ClientEnvelope = serde_json::from_str(r#"{"type":"text","data":"Hola","language":"es"}"#).unwrap();
        assert_eq!(
            text,
            ClientEnvelope::Text {
                data: "Hola".into(),
                language: Some("es".into())
            }
        );

        let audio: ClientEnvelope = serde_json::from_str(r#"{"type":"audio","data":"AAAA"}"#).unwrap();
        assert!(matches!(audio, ClientEnvelope::Audio { .. }));

        assert!(serde_json::from_str::<ClientEnvelope>(r#"{"type":"video"}"#).is_err());
    }

    #[test]
    fn server_envelopes_encode_with_type_tag() {
        let reply = serde_json::to_value(ServerEnvelope::Reply {
            text: "¡Hola!".into(),
            correction: None,
        })
        .unwrap();
        assert_eq!(reply, serde_json::json!({"type": "reply", "text": "¡Hola!"}));

        let error = serde_json::to_value(ServerEnvelope::Error { message: "busy".into() }).unwrap();
        assert_eq!(error["type"], "error");
    }
}
