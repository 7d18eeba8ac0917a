//! Scripted chat client for tests
//!
//! Replies are queued up front and handed out in order; every call is
//! recorded so tests can inspect the history each request carried.

use super::types::{ChatHandle, ChatResponse, HistoryEntry, ResponseFragment};
use super::{ChatClient, LlmError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

enum Scripted {
    Reply(Vec<String>),
    Fail(LlmError),
    FailMidStream(Vec<String>, LlmError),
}

/// A recorded `send` call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system_instruction: String,
    pub history: Vec<HistoryEntry>,
    pub message: String,
    pub streaming: bool,
}

#[derive(Clone)]
pub struct ScriptedChatClient {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    system_instruction: Arc<str>,
}

impl ScriptedChatClient {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            system_instruction: Arc::from("You are a mentor running an assessment."),
        }
    }

    /// Queue a reply delivered as the given fragments
    pub fn queue_fragments(&self, fragments: &[&str]) {
        self.script.lock().unwrap().push_back(Scripted::Reply(
            fragments.iter().map(|f| (*f).to_string()).collect(),
        ));
    }

    /// Queue a single-fragment reply
    pub fn queue_reply(&self, text: &str) {
        self.queue_fragments(&[text]);
    }

    /// Queue a failure returned from `send`
    pub fn queue_error(&self, error: LlmError) {
        self.script.lock().unwrap().push_back(Scripted::Fail(error));
    }

    /// Queue a stream that yields some fragments and then fails
    pub fn queue_stream_error(&self, fragments: &[&str], error: LlmError) {
        self.script.lock().unwrap().push_back(Scripted::FailMidStream(
            fragments.iter().map(|f| (*f).to_string()).collect(),
            error,
        ));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    fn open(&self, history: Vec<HistoryEntry>) -> ChatHandle {
        ChatHandle::new(self.system_instruction.clone(), history)
    }

    async fn send(
        &self,
        handle: ChatHandle,
        message: &str,
        streaming: bool,
    ) -> Result<ChatResponse, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall {
            system_instruction: handle.system_instruction().to_string(),
            history: handle.history().to_vec(),
            message: message.to_string(),
            streaming,
        });

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Scripted::Fail(LlmError::network("No scripted reply queued")));

        match next {
            Scripted::Fail(error) => Err(error),
            Scripted::Reply(fragments) if !streaming => Ok(ChatResponse::Direct(fragments.concat())),
            Scripted::Reply(fragments) => {
                let items: Vec<Result<ResponseFragment, LlmError>> =
                    fragments.into_iter().map(|f| Ok(ResponseFragment::new(f))).collect();
                Ok(ChatResponse::Streamed(Box::pin(futures::stream::iter(items))))
            }
            Scripted::FailMidStream(_, error) if !streaming => Err(error),
            Scripted::FailMidStream(fragments, error) => {
                let mut items: Vec<Result<ResponseFragment, LlmError>> =
                    fragments.into_iter().map(|f| Ok(ResponseFragment::new(f))).collect();
                items.push(Err(error));
                Ok(ChatResponse::Streamed(Box::pin(futures::stream::iter(items))))
            }
        }
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }
}
