//! Conversation turns supplied by the caller
//!
//! The engine does not persist conversation state; prior turns arrive
//! with each question and are only used for context window assembly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Student,
    Tutor,
}

/// A single prior turn in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    /// When the turn happened; used only for logging
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn student(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Student,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn tutor(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Tutor,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_constructors() {
        let turn = Turn::student("What is a heap?");
        assert_eq!(turn.role, TurnRole::Student);
        assert_eq!(turn.text, "What is a heap?");
    }
}
