use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Fr,
    Es,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Fr => "fr",
            Self::Es => "es",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Fr => "French",
            Self::Es => "Spanish",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Self::En),
            "fr" => Some(Self::Fr),
            "es" => Some(Self::Es),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    /// Only ever set on user turns.
    pub corrected_text: Option<String>,
    pub turn_index: i32,
}

impl ConversationTurn {
    pub fn user(turn_index: i32, text: impl Into<String>, corrected_text: Option<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            corrected_text,
            turn_index,
        }
    }

    pub fn assistant(turn_index: i32, text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            corrected_text: None,
            turn_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub target_language: Language,
    pub scenario_context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<ConversationTurn>,
}

impl ConversationSession {
    pub fn next_turn_index(&self) -> i32 {
        self.turns.len() as i32
    }

    /// True when the next accepted turn is a user turn.
    pub fn is_awaiting_user(&self) -> bool {
        self.turns.last().map_or(true, |turn| turn.role == Role::Assistant)
    }

    /// Contiguous zero-based indices, strict user/assistant alternation
    /// starting with the user, and corrections only on user turns.
    pub fn is_well_formed(&self) -> bool {
        self.turns.iter().enumerate().all(|(i, turn)| {
            let expected_role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            turn.turn_index == i as i32
                && turn.role == expected_role
                && (turn.role == Role::User || turn.corrected_text.is_none())
        }) && self.turns.len() % 2 == 0
    }
}
