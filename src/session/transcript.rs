//! Displayable transcript of a session

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A recorded chat bubble
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered, append-only list of turns
#[derive(Debug, Clone, Default)]
pub struct TranscriptStore {
    turns: Vec<Turn>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Text of the last turn if it is a user turn still waiting for a reply
    pub fn pending_user_text(&self) -> Option<&str> {
        match self.turns.last() {
            Some(Turn {
                role: Role::User,
                content,
            }) => Some(content),
            _ => None,
        }
    }

    /// Two-column CSV (`Role`, `Content`), header first, one row per turn
    pub fn export_csv(&self) -> Result<Vec<u8>, csv::Error> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["Role", "Content"])?;
        for turn in &self.turns {
            writer.write_record([turn.role.as_str(), turn.content.as_str()])?;
        }
        writer.into_inner().map_err(|e| e.into_error().into())
    }
}

/// Download name for an exported transcript.
///
/// Only ASCII alphanumerics, `-` and `_` survive from the user name so the
/// result is safe inside a `Content-Disposition` header.
pub fn export_file_name(user_name: &str, at: NaiveDateTime) -> String {
    let name: String = user_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("assessment_log_{name}_{}.csv", at.format("%Y%m%d_%H%M%S"))
}
