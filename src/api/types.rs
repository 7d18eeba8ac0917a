//! API request and response types

use crate::llm::ChatClient;
use crate::session::{SessionController, SessionStatus, Turn};
use serde::{Deserialize, Serialize};

/// Response to session creation
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// Request to start the assessment
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub user_name: String,
}

/// Request to submit a user message
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

/// Everything the display needs to render a session
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    pub user_name: String,
    pub turns: Vec<Turn>,
    pub accepts_input: bool,
    pub exchange_count: usize,
}

impl SessionSnapshot {
    pub fn of<C: ChatClient>(session: &SessionController<C>) -> Self {
        Self {
            session_id: session.id().to_string(),
            status: session.state().status,
            user_name: session.state().user_name.clone(),
            turns: session.transcript().turns().to_vec(),
            accepts_input: session.state().accepts_input(),
            exchange_count: session.exchange_count(),
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
