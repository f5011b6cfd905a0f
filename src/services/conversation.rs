//! Conversation sessions.
//!
//! A session is `AwaitingUser` until a message arrives, `Processing` while
//! the tutor reply is being produced, then `AwaitingUser` again. The user
//! turn and its reply are written together only after the model answered,
//! so a failed call leaves the turn sequence exactly as it was.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::operations::conversations::NewConversation;
use crate::db::{Store, StoreError};
use crate::schema::{ConversationSession, ConversationTurn, Language, Role};
use crate::services::gateway::{GatewayError, LlmGateway};
use crate::services::llm_provider::ChatMessage;
use crate::services::session_lock::SessionLocks;

pub const DEFAULT_MEMORY_WINDOW: usize = 10;
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(35);

const CORRECTION_LABEL: &str = "correction";

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("conversation {0} not found")]
    NotFound(Uuid),
    #[error("conversation {session_id} is busy with another message")]
    SessionBusy { session_id: Uuid, waited: Duration },
    #[error("conversation changed concurrently: {0}")]
    ConcurrentModification(String),
    #[error(transparent)]
    Upstream(#[from] GatewayError),
    #[error(transparent)]
    Store(StoreError),
    #[error("message task ended unexpectedly: {0}")]
    Aborted(String),
}

impl From<StoreError> for ConversationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(detail) => Self::ConcurrentModification(detail),
            StoreError::NotFound { entity: "conversation", id } => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingUser,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TutorReply {
    pub reply: String,
    pub correction: Option<String>,
}

#[derive(Clone)]
pub struct ConversationManager {
    gateway: LlmGateway,
    store: Arc<dyn Store>,
    locks: Arc<SessionLocks>,
    memory_window: usize,
    lock_wait: Duration,
}

impl ConversationManager {
    pub fn new(gateway: LlmGateway, store: Arc<dyn Store>) -> Self {
        Self {
            gateway,
            store,
            locks: Arc::new(SessionLocks::new()),
            memory_window: DEFAULT_MEMORY_WINDOW,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    pub fn with_memory_window(mut self, turns: usize) -> Self {
        self.memory_window = turns;
        self
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub async fn start(
        &self,
        user_id: Uuid,
        target_language: Language,
        scenario_context: Option<&str>,
    ) -> Result<ConversationSession, ConversationError> {
        let scenario_context = scenario_context
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        self.store.ensure_user(user_id).await?;
        let session = self
            .store
            .create_conversation(&NewConversation {
                user_id,
                target_language,
                scenario_context,
            })
            .await?;

        tracing::info!(conversation_id = %session.id, language = %target_language, "conversation started");
        Ok(session)
    }

    pub async fn get(&self, conversation_id: Uuid) -> Result<ConversationSession, ConversationError> {
        self.store
            .get_conversation(conversation_id)
            .await?
            .ok_or(ConversationError::NotFound(conversation_id))
    }

    pub fn state(&self, conversation_id: Uuid) -> SessionState {
        if self.locks.is_held(conversation_id) {
            SessionState::Processing
        } else {
            SessionState::AwaitingUser
        }
    }

    /// Runs one exchange. At most one exchange per session is in flight;
    /// later callers wait up to the configured lock wait.
    pub async fn submit_user_message(&self, conversation_id: Uuid, text: &str) -> Result<TutorReply, ConversationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ConversationError::InvalidInput("text must not be empty".into()));
        }

        let _guard = self
            .locks
            .acquire(conversation_id, self.lock_wait)
            .await
            .map_err(|timeout| ConversationError::SessionBusy {
                session_id: timeout.session_id,
                waited: timeout.waited,
            })?;

        let session = self.get(conversation_id).await?;
        let mut messages: Vec<ChatMessage> = context_window(&session.turns, self.memory_window)
            .iter()
            .map(to_chat_message)
            .collect();
        messages.push(ChatMessage::user(text));

        let system_prompt = build_system_prompt(session.target_language, session.scenario_context.as_deref());
        let raw_reply = match self.gateway.complete_chat(&messages, &system_prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(%conversation_id, error = %err, "tutor reply failed, no turns recorded");
                return Err(err.into());
            }
        };

        let (reply, correction) = extract_correction(&raw_reply, text);
        let user_index = session.next_turn_index();
        let user_turn = ConversationTurn::user(user_index, text, correction.clone());
        let assistant_turn = ConversationTurn::assistant(user_index + 1, reply.clone());
        self.store
            .append_exchange(conversation_id, &user_turn, &assistant_turn)
            .await?;

        tracing::debug!(
            %conversation_id,
            turn_index = user_index,
            context_turns = messages.len() - 1,
            corrected = correction.is_some(),
            "exchange recorded"
        );
        Ok(TutorReply { reply, correction })
    }

    /// Like [`submit_user_message`](Self::submit_user_message) but on its own
    /// task, so dropping the returned future does not cancel the exchange.
    pub async fn submit_detached(&self, conversation_id: Uuid, text: String) -> Result<TutorReply, ConversationError> {
        let manager = self.clone();
        tokio::spawn(async move { manager.submit_user_message(conversation_id, &text).await })
            .await
            .map_err(|err| ConversationError::Aborted(err.to_string()))?
    }
}

/// The most recent `n` turns in chronological order.
pub fn context_window(turns: &[ConversationTurn], n: usize) -> &[ConversationTurn] {
    &turns[turns.len().saturating_sub(n)..]
}

fn to_chat_message(turn: &ConversationTurn) -> ChatMessage {
    match turn.role {
        Role::User => ChatMessage::user(&turn.text),
        Role::Assistant => ChatMessage::assistant(&turn.text),
    }
}

pub fn build_system_prompt(language: Language, scenario_context: Option<&str>) -> String {
    let name = language.display_name();
    let mut prompt = format!(
        "You are a friendly language tutor holding a natural conversation in {name}. \
         Always answer in {name}, in two to four sentences, and ask a follow-up question to keep the dialogue going. \
         If the learner's last message contains a grammar, vocabulary or verb-tense mistake, answer naturally first, \
         then end your reply with one final line of the form \"Correction: <the learner's sentence, corrected>\". \
         Leave that line out when the message was correct."
    );
    if let Some(scenario) = scenario_context {
        prompt.push_str("\n\nScenario: ");
        prompt.push_str(scenario);
    }
    prompt
}

/// Splits a trailing `Correction: ...` line off a tutor reply.
///
/// Returns the reply to store and the corrected learner sentence, if any.
/// A correction that only repeats the learner's text is dropped.
pub fn extract_correction(raw_reply: &str, learner_text: &str) -> (String, Option<String>) {
    let trimmed = raw_reply.trim();
    let (body, last_line) = match trimmed.rsplit_once('\n') {
        Some((body, last)) => (body, last),
        None => ("", trimmed),
    };

    let Some(corrected) = correction_text(last_line) else {
        return (trimmed.to_string(), None);
    };

    let body = body.trim_end();
    let reply = if body.is_empty() { trimmed } else { body };
    let correction = (!corrected.is_empty() && corrected.to_lowercase() != learner_text.trim().to_lowercase())
        .then(|| corrected.to_string());

    (reply.to_string(), correction)
}

fn correction_text(line: &str) -> Option<&str> {
    let emphasis = |c: char| c == '*' || c == '_' || c.is_whitespace();

    let line = line.trim_start_matches(emphasis);
    let label = line.get(..CORRECTION_LABEL.len())?;
    if !label.eq_ignore_ascii_case(CORRECTION_LABEL) {
        return None;
    }
    let rest = line[CORRECTION_LABEL.len()..].trim_start_matches(emphasis);
    let rest = rest.strip_prefix(':')?;
    Some(rest.trim_matches(emphasis))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turns(n: usize) -> Vec<ConversationTurn> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ConversationTurn::user(i as i32, format!("u{i}"), None)
                } else {
                    ConversationTurn::assistant(i as i32, format!("a{i}"))
                }
            })
            .collect()
    }

    #[test]
    fn window_keeps_last_turns_in_order() {
        let all = turns(23);
        let window = context_window(&all, 10);
        assert_eq!(window.len(), 10);
        assert_eq!(window.first().map(|t| t.turn_index), Some(13));
        assert_eq!(window.last().map(|t| t.turn_index), Some(22));

        assert_eq!(context_window(&turns(4), 10).len(), 4);
        assert!(context_window(&[], 10).is_empty());
    }

    #[test]
    fn correction_line_is_split_off() {
        let (reply, correction) = extract_correction(
            "¡Qué bien! ¿Qué quieres practicar hoy?\nCorrection: Yo quiero practicar",
            "Yo quiere practicar",
        );
        assert_eq!(reply, "¡Qué bien! ¿Qué quieres practicar hoy?");
        assert_eq!(correction.as_deref(), Some("Yo quiero practicar"));
    }

    #[test]
    fn markdown_label_is_tolerated() {
        let (reply, correction) =
            extract_correction("Très bien !\n\n**Correction:** Je suis allé au marché.", "Je suis allé au marché hier");
        assert_eq!(reply, "Très bien !");
        assert_eq!(correction.as_deref(), Some("Je suis allé au marché."));

        let (_, correction) = extract_correction("Oui.\n_correction :_ Je vais bien", "je va bien");
        assert_eq!(correction.as_deref(), Some("Je vais bien"));
    }

    #[test]
    fn reply_without_marker_is_untouched() {
        let (reply, correction) = extract_correction("  Hola, ¿cómo estás?  ", "Hola");
        assert_eq!(reply, "Hola, ¿cómo estás?");
        assert_eq!(correction, None);

        let (_, correction) = extract_correction("The correction: is fine", "x");
        assert_eq!(correction, None);
    }

    #[test]
    fn correction_repeating_the_learner_is_dropped() {
        let (reply, correction) = extract_correction("Good!\nCorrection: hello there", "  Hello there ");
        assert_eq!(reply, "Good!");
        assert_eq!(correction, None);
    }

    #[test]
    fn reply_made_only_of_a_correction_keeps_its_text() {
        let (reply, correction) = extract_correction("Correction: Je suis", "Je es");
        assert_eq!(reply, "Correction: Je suis");
        assert_eq!(correction.as_deref(), Some("Je suis"));
    }

    #[test]
    fn system_prompt_names_language_and_scenario() {
        let prompt = build_system_prompt(Language::Es, Some("Checking in at a hotel"));
        assert!(prompt.contains("Spanish"));
        assert!(prompt.contains("Correction:"));
        assert!(prompt.ends_with("Scenario: Checking in at a hotel"));
        assert!(!build_system_prompt(Language::Fr, None).contains("Scenario"));
    }

    #[test]
    fn store_conflict_maps_to_concurrent_modification() {
        let err: ConversationError = StoreError::Conflict("turn 2".into()).into();
        assert!(matches!(err, ConversationError::ConcurrentModification(_)));
    }
}
