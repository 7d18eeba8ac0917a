//! Chat model client abstraction
//!
//! The remote chat API keeps no session between calls, so every request is
//! opened with the full history reconstructed by the caller.

mod error;
mod gemini;
mod mock;
#[cfg(test)]
pub mod testing;
mod types;

pub use error::LlmError;
#[allow(unused_imports)] // Public API re-exports
pub use error::LlmErrorKind;
pub use gemini::{GeminiClient, DEFAULT_BASE_URL};
pub use mock::MockChatClient;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for chat backends
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Open one logical chat turn over the complete prior history.
    /// The backend's system instruction is attached here.
    fn open(&self, history: Vec<HistoryEntry>) -> ChatHandle;

    /// Send the new user message on an opened handle
    async fn send(
        &self,
        handle: ChatHandle,
        message: &str,
        streaming: bool,
    ) -> Result<ChatResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: ChatClient + ?Sized> ChatClient for Arc<T> {
    fn open(&self, history: Vec<HistoryEntry>) -> ChatHandle {
        (**self).open(history)
    }

    async fn send(
        &self,
        handle: ChatHandle,
        message: &str,
        streaming: bool,
    ) -> Result<ChatResponse, LlmError> {
        (**self).send(handle, message, streaming).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Logging wrapper for chat clients
pub struct LoggingClient {
    inner: Arc<dyn ChatClient>,
    model_id: String,
}

impl LoggingClient {
    pub fn new(inner: Arc<dyn ChatClient>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl ChatClient for LoggingClient {
    fn open(&self, history: Vec<HistoryEntry>) -> ChatHandle {
        self.inner.open(history)
    }

    async fn send(
        &self,
        handle: ChatHandle,
        message: &str,
        streaming: bool,
    ) -> Result<ChatResponse, LlmError> {
        let history_len = handle.history().len();
        let start = std::time::Instant::now();
        let result = self.inner.send(handle, message, streaming).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    history_len,
                    streaming,
                    "Chat request accepted"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = ?e.kind,
                    retryable = e.kind.is_retryable(),
                    retry_after = ?e.retry_after,
                    "Chat request failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
