//! Session controller
//!
//! Owns one session's state, transcript and model history, and runs each
//! exchange to completion before accepting the next.

use super::completion::{self, scan};
use super::history::HistoryAdapter;
use super::state::{transition, SessionEvent, SessionState, SessionStatus, TransitionError};
use super::transcript::{export_file_name, TranscriptStore, Turn};
use crate::llm::{ChatClient, ChatResponse, HistoryEntry, LlmError};
use crate::sink::{TurnLog, UNKNOWN_USER};
use crate::system_prompt::opening_prompt;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Receives the marker-free text accumulated so far while a reply streams in
pub type PreviewSender = mpsc::UnboundedSender<String>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Chat request failed: {0}")]
    Transport(#[from] LlmError),
    #[error("The transcript can be exported once the assessment is finished")]
    NotFinished,
    #[error("Failed to build export: {0}")]
    Export(#[from] csv::Error),
}

impl SessionError {
    /// Message suitable for showing to the user
    pub fn notice(&self) -> String {
        match self {
            SessionError::Transport(e) if e.kind.is_retryable() => {
                "The mentor could not be reached. Please send your message again.".to_string()
            }
            SessionError::Transport(_) => {
                "The mentor could not answer this message. Please try again, and contact the \
                 administrator if the problem persists."
                    .to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Transport(e) if e.kind.is_retryable())
    }
}

/// Downloadable transcript
#[derive(Debug, Clone)]
pub struct Export {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

pub struct SessionController<C: ChatClient> {
    id: String,
    client: C,
    log: TurnLog,
    state: SessionState,
    transcript: TranscriptStore,
    history: HistoryAdapter,
    opening_prompt: Option<String>,
}

impl<C: ChatClient> SessionController<C> {
    pub fn new(id: impl Into<String>, client: C, log: TurnLog) -> Self {
        Self {
            id: id.into(),
            client,
            log,
            state: SessionState::default(),
            transcript: TranscriptStore::new(),
            history: HistoryAdapter::new(),
            opening_prompt: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn transcript(&self) -> &TranscriptStore {
        &self.transcript
    }

    pub fn history(&self) -> &[HistoryEntry] {
        self.history.entries()
    }

    pub fn exchange_count(&self) -> usize {
        self.history.exchange_count()
    }

    /// History rebuilt from the transcript; always equal to `history()`
    pub fn derived_history(&self) -> Vec<HistoryEntry> {
        HistoryAdapter::derive(self.opening_prompt.as_deref(), self.transcript.turns())
    }

    fn user_id(&self) -> &str {
        if self.state.user_name.is_empty() {
            UNKNOWN_USER
        } else {
            &self.state.user_name
        }
    }

    /// Begin the assessment and record the opening assistant turn.
    ///
    /// On failure the session stays NOT_STARTED and can be started again.
    pub async fn start(&mut self, user_name: &str) -> Result<Turn, SessionError> {
        let started = transition(
            &self.state,
            SessionEvent::Start {
                user_name: user_name.to_string(),
            },
        )?;
        let prompt = opening_prompt(&started.user_name);

        let reply = match self.exchange(&prompt, false, None).await {
            Ok(reply) => reply,
            Err(e) => {
                self.log
                    .system(&started.user_name, format!("Opening exchange failed: {e}"));
                return Err(e.into());
            }
        };
        self.log
            .system(&started.user_name, format!("Session {} started", self.id));

        let scanned = scan(&reply);
        let next = transition(
            &started,
            SessionEvent::ReplyRecorded {
                finished: scanned.finished,
            },
        )?;
        self.state = next;
        self.opening_prompt = Some(prompt.clone());
        Ok(self.record_reply(&prompt, scanned.clean_text, scanned.finished))
    }

    /// Submit a user message and record the assistant's reply.
    ///
    /// The user turn is recorded before the call so it stays visible if the
    /// call fails. Resubmitting the same text after a failure re-uses that
    /// turn.
    pub async fn submit(
        &mut self,
        text: &str,
        preview: Option<&PreviewSender>,
    ) -> Result<Turn, SessionError> {
        transition(&self.state, SessionEvent::UserMessage)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        if self.transcript.pending_user_text() != Some(text) {
            self.transcript.push(Turn::user(text));
            self.log.user(self.user_id(), text);
        } else {
            self.log.system(self.user_id(), "Retrying previous message");
        }

        let reply = match self.exchange(text, true, preview).await {
            Ok(reply) => reply,
            Err(e) => {
                self.log
                    .system(self.user_id(), format!("Chat request failed: {e}"));
                return Err(e.into());
            }
        };

        let scanned = scan(&reply);
        self.state = transition(
            &self.state,
            SessionEvent::ReplyRecorded {
                finished: scanned.finished,
            },
        )?;
        Ok(self.record_reply(text, scanned.clean_text, scanned.finished))
    }

    fn record_reply(&mut self, user_text: &str, clean_text: String, finished: bool) -> Turn {
        let turn = Turn::assistant(clean_text);
        self.history.append(user_text, &turn.content);
        self.transcript.push(turn.clone());
        self.log.ai(self.user_id(), turn.content.as_str());
        if finished {
            self.log.system(
                self.user_id(),
                format!("Assessment finished after {} exchanges", self.exchange_count()),
            );
        }
        debug_assert_eq!(self.history.entries(), self.derived_history().as_slice());
        turn
    }

    /// Clear everything back to a fresh, not-started session
    pub fn reset(&mut self) {
        self.log.system(self.user_id(), "Session reset");
        self.state = transition(&self.state, SessionEvent::Reset).unwrap_or_default();
        self.transcript.clear();
        self.history.clear();
        self.opening_prompt = None;
    }

    /// CSV transcript, available once the assessment is finished
    pub fn export(&self) -> Result<Export, SessionError> {
        if self.state.status != SessionStatus::Finished {
            return Err(SessionError::NotFinished);
        }
        let bytes = self.transcript.export_csv()?;
        let file_name = export_file_name(&self.state.user_name, chrono::Local::now().naive_local());
        Ok(Export { file_name, bytes })
    }

    /// Run one call against the full history and return the raw reply text.
    /// Nothing is recorded here, so a failure leaves no partial turn behind.
    async fn exchange(
        &self,
        message: &str,
        streaming: bool,
        preview: Option<&PreviewSender>,
    ) -> Result<String, LlmError> {
        let handle = self.client.open(self.history.snapshot());
        let response = self.client.send(handle, message, streaming).await?;
        let Some(tx) = preview else {
            return response.into_text().await;
        };

        // Receiver gone means nobody is watching; the reply still counts.
        match response {
            ChatResponse::Direct(text) => {
                let _ = tx.send(completion::preview(&text));
                Ok(text)
            }
            ChatResponse::Streamed(mut fragments) => {
                let mut text = String::new();
                while let Some(fragment) = fragments.next().await {
                    text.push_str(&fragment?.text);
                    let _ = tx.send(completion::preview(&text));
                }
                Ok(text)
            }
        }
    }
}
