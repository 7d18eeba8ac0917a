//! Offline chat client used when debug mode is enabled
//!
//! Produces deterministic replies after a fixed delay so the whole session
//! flow can be exercised without an API key.

use super::types::{ChatHandle, ChatResponse, HistoryEntry, ResponseFragment};
use super::{ChatClient, LlmError};
use crate::session::END_OF_ASSESSMENT;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

const MOCK_MODEL_ID: &str = "mock-model";

pub struct MockChatClient {
    system_instruction: Arc<str>,
    delay: Duration,
    /// Number of user exchanges after which the reply carries the end marker
    finish_after: usize,
}

impl MockChatClient {
    pub fn new(system_instruction: impl Into<Arc<str>>, delay: Duration, finish_after: usize) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            delay,
            finish_after,
        }
    }

    /// Reply text for the given history and message.
    ///
    /// The history length tells which exchange this is: an empty history is
    /// the opening exchange.
    fn reply_for(&self, history: &[HistoryEntry], message: &str) -> String {
        let exchange = history.len() / 2;
        if exchange == 0 {
            return "Debug mode is active. Let's begin the assessment: what part of your \
                    work are you most proud of this year?"
                .to_string();
        }

        let mut reply = format!("Debug reply {exchange}: you said \"{message}\".");
        if exchange >= self.finish_after {
            reply.push_str(" That concludes the assessment. Thank you!");
            reply.push_str(END_OF_ASSESSMENT);
        }
        reply
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    fn open(&self, history: Vec<HistoryEntry>) -> ChatHandle {
        ChatHandle::new(self.system_instruction.clone(), history)
    }

    async fn send(
        &self,
        handle: ChatHandle,
        message: &str,
        streaming: bool,
    ) -> Result<ChatResponse, LlmError> {
        let reply = self.reply_for(handle.history(), message);
        tokio::time::sleep(self.delay).await;

        if !streaming {
            return Ok(ChatResponse::Direct(reply));
        }

        // Word-sized fragments; the marker is split in two so consumers see
        // it straddle a fragment boundary.
        let mut fragments: Vec<String> = Vec::new();
        let body = reply.strip_suffix(END_OF_ASSESSMENT).unwrap_or(&reply);
        fragments.extend(body.split_inclusive(' ').map(str::to_string));
        if body.len() != reply.len() {
            let (head, tail) = END_OF_ASSESSMENT.split_at(END_OF_ASSESSMENT.len() / 2);
            fragments.push(head.to_string());
            fragments.push(tail.to_string());
        }

        let stream = futures::stream::iter(fragments)
            .map(|text| Ok::<_, LlmError>(ResponseFragment::new(text)));
        Ok(ChatResponse::Streamed(Box::pin(stream)))
    }

    fn model_id(&self) -> &str {
        MOCK_MODEL_ID
    }
}
