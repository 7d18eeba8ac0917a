//! Google Gemini chat client

use super::types::{ChatHandle, ChatResponse, HistoryEntry, HistoryRole, ResponseFragment};
use super::{ChatClient, LlmError};
use crate::config::{validate_api_key, validate_model_id, ConfigError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response};
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini client. Holds no conversation state: every `send` carries the
/// complete history from its handle.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
    system_instruction: Arc<str>,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        system_instruction: impl Into<Arc<str>>,
        base_url: &str,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        let model = model.into();
        validate_api_key(&api_key)?;
        validate_model_id(&model)?;

        let system_instruction = system_instruction.into();
        if system_instruction.trim().is_empty() {
            return Err(ConfigError::EmptyPrompt);
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            system_instruction,
        })
    }

    fn endpoint(&self, streaming: bool) -> String {
        let model = self.model.strip_prefix("models/").unwrap_or(&self.model);
        if streaming {
            format!(
                "{}/v1beta/models/{model}:streamGenerateContent?alt=sse",
                self.base_url
            )
        } else {
            format!("{}/v1beta/models/{model}:generateContent", self.base_url)
        }
    }

    fn request(&self, streaming: bool, body: &GeminiRequest) -> RequestBuilder {
        self.http
            .post(self.endpoint(streaming))
            .header("x-goog-api-key", &self.api_key)
            .json(body)
    }

    async fn send_direct(&self, body: &GeminiRequest) -> Result<ChatResponse, LlmError> {
        let response = self
            .request(false, body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
        let parsed: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        if let Some(reason) = parsed.block_reason() {
            return Err(LlmError::invalid_request(format!("Prompt blocked: {reason}")));
        }
        if parsed.candidates.is_empty() {
            return Err(LlmError::unknown("No candidates in response"));
        }
        note_finish_reason(parsed.finish_reason());

        Ok(ChatResponse::Direct(parsed.text()))
    }

    async fn send_streaming(&self, body: &GeminiRequest) -> Result<ChatResponse, LlmError> {
        let mut source = self
            .request(true, body)
            .eventsource()
            .map_err(|e| LlmError::invalid_request(format!("Failed to build request: {e}")))?;

        // Surface connect and status failures from `send` itself rather than
        // from the first fragment.
        let first = loop {
            match source.next().await {
                Some(Ok(Event::Open)) => continue,
                Some(Ok(Event::Message(msg))) => break parse_stream_chunk(&msg.data)?,
                Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                    note_finish_reason(None);
                    return Ok(ChatResponse::Streamed(Box::pin(futures::stream::empty::<
                        Result<ResponseFragment, LlmError>,
                    >())));
                }
                Some(Err(e)) => {
                    source.close();
                    return Err(error_from_eventsource(e).await);
                }
            }
        };

        let rest = futures::stream::unfold(
            Some(OpenStream {
                source,
                finished: first.finished,
            }),
            next_fragment,
        );
        let fragments = futures::stream::iter(first.fragment.map(Ok)).chain(rest);
        Ok(ChatResponse::Streamed(Box::pin(fragments)))
    }
}

#[async_trait]
impl ChatClient for GeminiClient {
    fn open(&self, history: Vec<HistoryEntry>) -> ChatHandle {
        ChatHandle::new(self.system_instruction.clone(), history)
    }

    async fn send(
        &self,
        handle: ChatHandle,
        message: &str,
        streaming: bool,
    ) -> Result<ChatResponse, LlmError> {
        let body = translate_request(&handle, message);
        if streaming {
            self.send_streaming(&body).await
        } else {
            self.send_direct(&body).await
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Event source of a reply in progress
struct OpenStream {
    source: EventSource,
    /// A chunk carrying `finishReason` has been seen
    finished: bool,
}

/// Pull the next text fragment off the event source. The source is dropped
/// after the first error so it never reconnects and replays the request.
async fn next_fragment(
    stream: Option<OpenStream>,
) -> Option<(Result<ResponseFragment, LlmError>, Option<OpenStream>)> {
    let mut stream = stream?;
    loop {
        match stream.source.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(msg))) => match parse_stream_chunk(&msg.data) {
                Ok(chunk) => {
                    stream.finished |= chunk.finished;
                    if let Some(fragment) = chunk.fragment {
                        return Some((Ok(fragment), Some(stream)));
                    }
                }
                Err(e) => {
                    stream.source.close();
                    return Some((Err(e), None));
                }
            },
            Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                stream.source.close();
                if !stream.finished {
                    note_finish_reason(None);
                }
                return None;
            }
            Some(Err(e)) => {
                stream.source.close();
                return Some((Err(error_from_eventsource(e).await), None));
            }
        }
    }
}

/// Warn when a reply may be truncated: stopped for any reason but `STOP`,
/// or ended without saying why
fn note_finish_reason(reason: Option<&str>) {
    match reason {
        Some("STOP") => {}
        Some(reason) => tracing::warn!(finish_reason = %reason, "Model reply ended abnormally"),
        None => tracing::warn!("Model reply ended without a finish reason"),
    }
}

fn translate_request(handle: &ChatHandle, message: &str) -> GeminiRequest {
    let mut contents: Vec<GeminiContent> = handle
        .history()
        .iter()
        .map(|entry| GeminiContent {
            role: Some(
                match entry.role {
                    HistoryRole::User => "user",
                    HistoryRole::Model => "model",
                }
                .to_string(),
            ),
            parts: entry
                .parts
                .iter()
                .map(|p| GeminiPart {
                    text: p.text.clone(),
                })
                .collect(),
        })
        .collect();

    contents.push(GeminiContent {
        role: Some("user".to_string()),
        parts: vec![GeminiPart {
            text: message.to_string(),
        }],
    });

    GeminiRequest {
        contents,
        system_instruction: GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: handle.system_instruction().to_string(),
            }],
        },
    }
}

/// One parsed SSE `data:` payload
#[derive(Debug)]
struct StreamChunk {
    /// `None` for chunks without text, such as usage-only trailers
    fragment: Option<ResponseFragment>,
    finished: bool,
}

fn parse_stream_chunk(data: &str) -> Result<StreamChunk, LlmError> {
    let chunk: GeminiResponse = serde_json::from_str(data)
        .map_err(|e| LlmError::unknown(format!("Failed to parse stream chunk: {e} - data: {data}")))?;

    if let Some(reason) = chunk.block_reason() {
        return Err(LlmError::invalid_request(format!("Prompt blocked: {reason}")));
    }

    let finish_reason = chunk.finish_reason();
    if finish_reason.is_some() {
        note_finish_reason(finish_reason);
    }

    let text = chunk.text();
    Ok(StreamChunk {
        fragment: (!text.is_empty()).then(|| ResponseFragment::new(text)),
        finished: finish_reason.is_some(),
    })
}

async fn error_from_response(response: Response) -> LlmError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<GeminiErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);

    let error = LlmError::from_status(status, &message);
    match retry_after {
        Some(delay) => error.with_retry_after(delay),
        None => error,
    }
}

async fn error_from_eventsource(error: reqwest_eventsource::Error) -> LlmError {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(_, response) => {
            error_from_response(response).await
        }
        reqwest_eventsource::Error::Transport(e) => {
            LlmError::network(format!("Stream transport failed: {e}"))
        }
        reqwest_eventsource::Error::InvalidContentType(content_type, _) => LlmError::unknown(
            format!("Unexpected content type for stream: {content_type:?}"),
        ),
        other => LlmError::unknown(format!("Stream failed: {other}")),
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    system_instruction: GeminiContent,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

impl GeminiResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }

    fn finish_reason(&self) -> Option<&str> {
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
    }

    fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}
