//! Model-facing conversation history
//!
//! The chat API is stateless, so the full history is resent on every call.
//! Entries are appended one exchange at a time and never edited.

use super::transcript::{Role, Turn};
use crate::llm::HistoryEntry;

#[derive(Debug, Clone, Default)]
pub struct HistoryAdapter {
    entries: Vec<HistoryEntry>,
}

impl HistoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed exchange. `model_text` must already be free of
    /// the completion marker.
    pub fn append(&mut self, user_text: &str, model_text: &str) {
        self.entries.push(HistoryEntry::user(user_text));
        self.entries.push(HistoryEntry::model(model_text));
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Owned copy for opening a chat handle
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.clone()
    }

    pub fn exchange_count(&self) -> usize {
        self.entries.len() / 2
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Rebuild the history from a transcript.
    ///
    /// The opening prompt is the hidden user side of the first exchange. Each
    /// assistant turn is paired with the most recent unanswered user text; a
    /// user turn that is superseded before any reply is not part of an exchange.
    pub fn derive(opening_prompt: Option<&str>, transcript: &[Turn]) -> Vec<HistoryEntry> {
        let mut entries = Vec::with_capacity(transcript.len() + 1);
        let mut pending = opening_prompt;

        for turn in transcript {
            match turn.role {
                Role::User => pending = Some(&turn.content),
                Role::Assistant => {
                    if let Some(user_text) = pending.take() {
                        entries.push(HistoryEntry::user(user_text));
                        entries.push(HistoryEntry::model(turn.content.as_str()));
                    }
                }
            }
        }

        entries
    }
}
