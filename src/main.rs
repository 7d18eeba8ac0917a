//! Mentor assessment - guided assessment conversations with a chat model
//!
//! Serves an HTTP API where each session walks a user through a scripted
//! assessment, streams the model's replies, and exports the transcript.

mod api;
mod config;
mod llm;
mod session;
mod sink;
mod system_prompt;

use api::{create_router, AppState};
use config::{AppConfig, Backend};
use llm::{ChatClient, GeminiClient, LoggingClient, MockChatClient};
use sink::{LogSink, RotatingFileSink, SheetsSink, TurnLog};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use system_prompt::load_system_instruction;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv = dotenvy::dotenv();
    let config = AppConfig::from_env()?;
    let _log_guard = init_tracing(&config.log_dir)?;

    match dotenv {
        Ok(path) => tracing::info!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Failed to load .env"),
    }

    // Chat backend
    let system_instruction = load_system_instruction(config.prompt_path.as_deref())?;
    let backend: Arc<dyn ChatClient> = match config.backend()? {
        Backend::Gemini { api_key, model } => {
            tracing::info!(model = %model, "Using Gemini chat client");
            Arc::new(GeminiClient::new(
                api_key,
                model,
                system_instruction,
                &config.gemini_base_url,
            )?)
        }
        Backend::Mock => {
            tracing::warn!(
                delay_ms = %config.mock_delay.as_millis(),
                finish_after = config.mock_finish_after,
                "Debug mode enabled, using mock chat client"
            );
            Arc::new(MockChatClient::new(
                system_instruction,
                config.mock_delay,
                config.mock_finish_after,
            ))
        }
    };
    let client: Arc<dyn ChatClient> = Arc::new(LoggingClient::new(backend));

    // Conversation log
    let (log, writer) = TurnLog::spawn(build_sinks(&config).await);
    log.system(sink::UNKNOWN_USER, "Server started");

    let state = AppState::new(client, log, config.session_limits);
    let sweeper = state.spawn_sweeper(SESSION_SWEEP_INTERVAL);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Mentor assessment server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Once the sweeper's copy of the state is gone too, the writer drains and exits
    sweeper.abort();
    let _ = sweeper.await;
    if tokio::time::timeout(LOG_FLUSH_TIMEOUT, writer).await.is_err() {
        tracing::warn!("Timed out flushing conversation log");
    }

    Ok(())
}

/// JSON diagnostics to stdout plus a daily-rolling file in `log_dir`
fn init_tracing(log_dir: &Path) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("diagnostics")
        .filename_suffix("log")
        .build(log_dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mentor_assessment=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

/// File sink always, Sheets sink when configured; failures only disable
/// the sink
async fn build_sinks(config: &AppConfig) -> Vec<Box<dyn LogSink>> {
    let mut sinks: Vec<Box<dyn LogSink>> = Vec::new();

    match RotatingFileSink::new(&config.log_dir) {
        Ok(sink) => {
            tracing::info!(path = %sink.path().display(), "Conversation log file ready");
            sinks.push(Box::new(sink));
        }
        Err(e) => tracing::warn!(error = %e, "Conversation log file disabled"),
    }

    if let Some(sheets) = config.sheets.clone() {
        let worksheet = sheets.worksheet.clone();
        match SheetsSink::connect(sheets).await {
            Ok(sink) => {
                tracing::info!(worksheet = %worksheet, "Connected to Google Sheets");
                sinks.push(Box::new(sink));
            }
            Err(e) => tracing::warn!(error = %e, "Google Sheets logging disabled"),
        }
    }

    sinks
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
