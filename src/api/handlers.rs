//! HTTP request handlers

use super::sse::{reply_stream, Outcome};
use super::types::{
    CreateSessionResponse, ErrorResponse, MessageRequest, SessionSnapshot, StartRequest,
};
use super::{AppState, SharedSession};
use crate::session::{SessionError, SessionStatus, TransitionError};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::sync::{mpsc, oneshot};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/start", post(start_session))
        .route("/api/sessions/:id/messages", post(send_message))
        .route("/api/sessions/:id/reset", post(reset_session))
        .route("/api/sessions/:id/export", get(export_session))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Sessions
// ============================================================

async fn create_session(
    State(state): State<AppState>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    let session_id = state.create_session().await.ok_or_else(|| {
        AppError::Unavailable("Too many active sessions, please try again later".to_string())
    })?;
    Ok(Json(CreateSessionResponse { session_id }))
}

async fn find_session(state: &AppState, id: &str) -> Result<SharedSession, AppError> {
    state
        .session(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session not found: {id}")))
}

fn busy() -> AppError {
    AppError::Conflict("A reply is still in progress for this session".to_string())
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session = find_session(&state, &id).await?;
    let session = session.try_lock().map_err(|_| busy())?;
    Ok(Json(SessionSnapshot::of(&*session)))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let session = find_session(&state, &id).await?;
    let _guard = session.try_lock().map_err(|_| busy())?;
    state.remove_session(&id).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StartRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session = find_session(&state, &id).await?;
    let mut session = session.try_lock().map_err(|_| busy())?;
    session.start(&req.user_name).await?;
    Ok(Json(SessionSnapshot::of(&*session)))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Result<Response, AppError> {
    let session = find_session(&state, &id).await?;
    let mut session = session.try_lock_owned().map_err(|_| busy())?;

    // Reject up front so the caller gets a status code instead of a stream
    if !session.state().accepts_input() {
        let reason = match session.state().status {
            SessionStatus::NotStarted => TransitionError::NotStarted,
            _ => TransitionError::Finished,
        };
        return Err(SessionError::from(reason).into());
    }
    if req.text.trim().is_empty() {
        return Err(SessionError::EmptyMessage.into());
    }

    let (preview_tx, preview_rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcome_rx) = oneshot::channel();

    // The exchange runs to completion even if the client disconnects
    tokio::spawn(async move {
        let outcome = match session.submit(&req.text, Some(&preview_tx)).await {
            Ok(turn) => Outcome::Recorded {
                turn,
                finished: session.state().status == SessionStatus::Finished,
            },
            Err(e) => Outcome::Failed {
                message: e.notice(),
                retryable: e.is_retryable(),
            },
        };
        drop(preview_tx);
        if outcome_tx.send(outcome).is_err() {
            tracing::debug!(session_id = %session.id(), "Client left before the reply completed");
        }
    });

    Ok(reply_stream(preview_rx, outcome_rx).into_response())
}

async fn reset_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session = find_session(&state, &id).await?;
    let mut session = session.try_lock().map_err(|_| busy())?;
    session.reset();
    Ok(Json(SessionSnapshot::of(&*session)))
}

async fn export_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let session = find_session(&state, &id).await?;
    let session = session.try_lock().map_err(|_| busy())?;
    let export = session.export()?;

    let headers = [
        (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", export.file_name),
        ),
    ];
    Ok((headers, export.bytes).into_response())
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("mentor-assessment ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Upstream(String),
    Unavailable(String),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match &e {
            SessionError::Transition(TransitionError::MissingUserName)
            | SessionError::EmptyMessage => AppError::BadRequest(e.notice()),
            SessionError::Transition(_) | SessionError::NotFinished => {
                AppError::Conflict(e.notice())
            }
            SessionError::Transport(_) => AppError::Upstream(e.notice()),
            SessionError::Export(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SessionLimits;
    use crate::llm::testing::ScriptedChatClient;
    use crate::llm::{ChatClient, LlmError};
    use crate::session::END_OF_ASSESSMENT;
    use crate::sink::TurnLog;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(client: &ScriptedChatClient) -> (AppState, Router) {
        app_with_limits(client, SessionLimits::default())
    }

    fn app_with_limits(client: &ScriptedChatClient, limits: SessionLimits) -> (AppState, Router) {
        let client: Arc<dyn ChatClient> = Arc::new(client.clone());
        let state = AppState::new(client, TurnLog::disabled(), limits);
        (state.clone(), create_router(state))
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        router.clone().oneshot(request).await.unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    async fn new_session(router: &Router) -> String {
        let response = call(router, "POST", "/api/sessions", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await["session_id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_full_assessment_over_http() {
        let client = ScriptedChatClient::new();
        client.queue_reply("Welcome, Alice.");
        client.queue_fragments(&["Great answer. ", "Thank you!", END_OF_ASSESSMENT]);
        let (_, router) = app(&client);
        let id = new_session(&router).await;

        let response = call(
            &router,
            "POST",
            &format!("/api/sessions/{id}/start"),
            Some(json!({ "user_name": "Alice" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot = body_json(response).await;
        assert_eq!(snapshot["status"], "active");
        assert_eq!(snapshot["turns"][0]["role"], "assistant");
        assert_eq!(snapshot["turns"][0]["content"], "Welcome, Alice.");

        let response = call(
            &router,
            "POST",
            &format!("/api/sessions/{id}/messages"),
            Some(json!({ "text": "I value teamwork." })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let events = body_text(response).await;
        assert!(events.contains("event: preview"));
        assert!(events.contains("event: turn"));
        assert!(events.contains("event: finished"));
        assert!(events.contains("event: done"));
        assert!(!events.contains(END_OF_ASSESSMENT));

        let response = call(&router, "GET", &format!("/api/sessions/{id}"), None).await;
        let snapshot = body_json(response).await;
        assert_eq!(snapshot["status"], "finished");
        assert_eq!(snapshot["accepts_input"], false);
        assert_eq!(snapshot["exchange_count"], 2);

        let response = call(&router, "GET", &format!("/api/sessions/{id}/export"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=\"assessment_log_Alice_"));
        let csv = body_text(response).await;
        assert_eq!(csv.lines().count(), 4);
        assert!(csv.starts_with("Role,Content"));
    }

    #[tokio::test]
    async fn test_failed_reply_streams_error_notice() {
        let client = ScriptedChatClient::new();
        client.queue_reply("Welcome");
        client.queue_error(LlmError::network("connection refused"));
        let (_, router) = app(&client);
        let id = new_session(&router).await;
        call(
            &router,
            "POST",
            &format!("/api/sessions/{id}/start"),
            Some(json!({ "user_name": "Bob" })),
        )
        .await;

        let response = call(
            &router,
            "POST",
            &format!("/api/sessions/{id}/messages"),
            Some(json!({ "text": "hello" })),
        )
        .await;
        let events = body_text(response).await;
        assert!(events.contains("event: error"));
        assert!(events.contains("\"retryable\":true"));
        assert!(events.contains("event: done"));
        assert!(!events.contains("event: turn"));

        let snapshot = body_json(call(&router, "GET", &format!("/api/sessions/{id}"), None).await).await;
        assert_eq!(snapshot["turns"].as_array().unwrap().len(), 2);
        assert_eq!(snapshot["status"], "active");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let client = ScriptedChatClient::new();
        client.queue_reply("Welcome");
        let (_, router) = app(&client);

        let response = call(&router, "GET", "/api/sessions/nope", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let id = new_session(&router).await;
        let response = call(
            &router,
            "POST",
            &format!("/api/sessions/{id}/messages"),
            Some(json!({ "text": "too early" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = call(
            &router,
            "POST",
            &format!("/api/sessions/{id}/start"),
            Some(json!({ "user_name": "" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());

        let response = call(&router, "GET", &format!("/api/sessions/{id}/export"), None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_busy_session_is_rejected() {
        let client = ScriptedChatClient::new();
        let (state, router) = app(&client);
        let id = new_session(&router).await;

        let session = state.session(&id).await.unwrap();
        let _guard = session.lock().await;

        let response = call(
            &router,
            "POST",
            &format!("/api/sessions/{id}/start"),
            Some(json!({ "user_name": "Carol" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reset_returns_fresh_snapshot() {
        let client = ScriptedChatClient::new();
        client.queue_reply("Welcome");
        let (_, router) = app(&client);
        let id = new_session(&router).await;
        call(
            &router,
            "POST",
            &format!("/api/sessions/{id}/start"),
            Some(json!({ "user_name": "Dana" })),
        )
        .await;

        let response = call(&router, "POST", &format!("/api/sessions/{id}/reset"), None).await;
        let snapshot = body_json(response).await;
        assert_eq!(snapshot["status"], "not_started");
        assert_eq!(snapshot["user_name"], "");
        assert_eq!(snapshot["turns"], json!([]));
        assert_eq!(snapshot["exchange_count"], 0);
    }

    #[tokio::test]
    async fn test_deleted_session_is_gone() {
        let client = ScriptedChatClient::new();
        let (_, router) = app(&client);
        let id = new_session(&router).await;

        let response = call(&router, "DELETE", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = call(&router, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = call(&router, "DELETE", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_busy_session_cannot_be_deleted() {
        let client = ScriptedChatClient::new();
        let (state, router) = app(&client);
        let id = new_session(&router).await;

        let session = state.session(&id).await.unwrap();
        let guard = session.lock().await;
        let response = call(&router, "DELETE", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        drop(guard);

        let response = call(&router, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let client = ScriptedChatClient::new();
        let limits = SessionLimits {
            idle_ttl: Duration::ZERO,
            max_sessions: 10,
        };
        let (state, router) = app_with_limits(&client, limits);
        let idle = new_session(&router).await;
        let busy = new_session(&router).await;

        let busy_session = state.session(&busy).await.unwrap();
        let guard = busy_session.lock().await;
        assert_eq!(state.evict_idle().await, 1);
        drop(guard);

        let response = call(&router, "GET", &format!("/api/sessions/{idle}"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = call(&router, "GET", &format!("/api/sessions/{busy}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_session_limit() {
        let client = ScriptedChatClient::new();
        let limits = SessionLimits {
            idle_ttl: Duration::from_secs(3600),
            max_sessions: 1,
        };
        let (_, router) = app_with_limits(&client, limits);
        let first = new_session(&router).await;

        let response = call(&router, "POST", "/api/sessions", None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        call(&router, "DELETE", &format!("/api/sessions/{first}"), None).await;
        new_session(&router).await;
    }

    #[tokio::test]
    async fn test_full_table_evicts_idle_sessions_first() {
        let client = ScriptedChatClient::new();
        let limits = SessionLimits {
            idle_ttl: Duration::ZERO,
            max_sessions: 1,
        };
        let (_, router) = app_with_limits(&client, limits);
        let first = new_session(&router).await;
        let second = new_session(&router).await;

        assert_ne!(first, second);
        let response = call(&router, "GET", &format!("/api/sessions/{first}"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_version() {
        let client = ScriptedChatClient::new();
        let (_, router) = app(&client);
        let text = body_text(call(&router, "GET", "/version", None).await).await;
        assert!(text.starts_with("mentor-assessment "));
    }
}
