//! Session lifecycle state and its pure transition function

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of one assessment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    NotStarted,
    Active,
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub user_name: String,
}

impl SessionState {
    /// Whether a user message may be submitted right now
    pub fn accepts_input(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Inputs that drive the lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Start { user_name: String },
    UserMessage,
    ReplyRecorded { finished: bool },
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("A name is required to start the assessment")]
    MissingUserName,
    #[error("The assessment has already started")]
    AlreadyStarted,
    #[error("The assessment has not started yet")]
    NotStarted,
    #[error("The assessment is finished; reset to begin again")]
    Finished,
}

/// Pure transition function
///
/// Given the same inputs it always produces the same output and performs no
/// I/O. Callers commit the returned state only once the side effects that go
/// with it have succeeded.
pub fn transition(
    state: &SessionState,
    event: SessionEvent,
) -> Result<SessionState, TransitionError> {
    match (state.status, event) {
        (_, SessionEvent::Reset) => Ok(SessionState::default()),

        (SessionStatus::NotStarted, SessionEvent::Start { user_name }) => {
            let user_name = user_name.trim();
            if user_name.is_empty() {
                return Err(TransitionError::MissingUserName);
            }
            Ok(SessionState {
                status: SessionStatus::Active,
                user_name: user_name.to_string(),
            })
        }
        (_, SessionEvent::Start { .. }) => Err(TransitionError::AlreadyStarted),

        (SessionStatus::Active, SessionEvent::UserMessage) => Ok(state.clone()),

        (SessionStatus::Active, SessionEvent::ReplyRecorded { finished }) => Ok(SessionState {
            status: if finished {
                SessionStatus::Finished
            } else {
                SessionStatus::Active
            },
            user_name: state.user_name.clone(),
        }),

        (SessionStatus::NotStarted, _) => Err(TransitionError::NotStarted),
        (SessionStatus::Finished, _) => Err(TransitionError::Finished),
    }
}
