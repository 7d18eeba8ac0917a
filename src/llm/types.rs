//! Common types for chat model interactions

use super::LlmError;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

/// Role of a history entry, in the model API's vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Model,
}

/// A single text part of a history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// One message of the model-facing conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub parts: Vec<Part>,
}

impl HistoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::User,
            parts: vec![Part { text: text.into() }],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::Model,
            parts: vec![Part { text: text.into() }],
        }
    }
}

/// One logical chat turn: the system instruction plus the complete prior history.
///
/// Handles are consumed by `send`; a new one is opened for every user turn.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    system_instruction: Arc<str>,
    history: Vec<HistoryEntry>,
}

impl ChatHandle {
    pub fn new(system_instruction: Arc<str>, history: Vec<HistoryEntry>) -> Self {
        Self {
            system_instruction,
            history,
        }
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }
}

/// Incremental piece of a streamed reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFragment {
    pub text: String,
}

impl ResponseFragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Lazy, finite, non-restartable sequence of reply fragments
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<ResponseFragment, LlmError>> + Send>>;

/// Reply to a `send`
pub enum ChatResponse {
    /// Whole reply delivered at once
    Direct(String),
    /// Reply delivered as fragments; drain to obtain the full text
    Streamed(FragmentStream),
}

impl ChatResponse {
    /// Drain the response into its full text
    pub async fn into_text(self) -> Result<String, LlmError> {
        match self {
            ChatResponse::Direct(text) => Ok(text),
            ChatResponse::Streamed(mut fragments) => {
                let mut text = String::new();
                while let Some(fragment) = fragments.next().await {
                    text.push_str(&fragment?.text);
                }
                Ok(text)
            }
        }
    }
}

impl fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatResponse::Direct(text) => f.debug_tuple("Direct").field(text).finish(),
            ChatResponse::Streamed(_) => f.write_str("Streamed(..)"),
        }
    }
}
