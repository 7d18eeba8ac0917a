//! Conversation audit log
//!
//! Every session start, turn, completion, reset and error is recorded as a
//! `LogRecord` and appended to the configured sinks. Appends happen on a
//! background writer so a slow or unavailable sink never holds up a session.

mod file;
mod sheets;

pub use file::RotatingFileSink;
pub use sheets::{SheetsAuth, SheetsConfig, SheetsSink, SHEETS_BASE_URL};

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Column header shared by every sink
pub const HEADER: [&str; 4] = ["Timestamp", "User ID", "Category", "Message"];

/// Placeholder user id before a name is known
pub const UNKNOWN_USER: &str = "N/A";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SINK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    System,
    User,
    #[serde(rename = "AI")]
    Ai,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::System => "System",
            Category::User => "User",
            Category::Ai => "AI",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: String,
    pub user_id: String,
    pub category: Category,
    pub message: String,
}

impl LogRecord {
    /// Build a record stamped with the current local time
    pub fn now(user_id: &str, category: Category, message: impl Into<String>) -> Self {
        let user_id = if user_id.trim().is_empty() {
            UNKNOWN_USER
        } else {
            user_id
        };
        Self {
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            user_id: user_id.to_string(),
            category,
            message: message.into(),
        }
    }

    pub fn row(&self) -> [&str; 4] {
        [
            self.timestamp.as_str(),
            self.user_id.as_str(),
            self.category.as_str(),
            self.message.as_str(),
        ]
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sheets API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Sheets authentication failed: {0}")]
    Auth(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Append-only destination for log records
#[async_trait]
pub trait LogSink: Send + Sync {
    fn name(&self) -> &str;

    async fn append(&self, record: &LogRecord) -> Result<(), SinkError>;
}

/// Cloneable handle that sessions use to emit records
#[derive(Clone)]
pub struct TurnLog {
    tx: Option<mpsc::UnboundedSender<LogRecord>>,
}

impl TurnLog {
    /// Start the background writer. It exits once every handle is dropped.
    pub fn spawn(sinks: Vec<Box<dyn LogSink>>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(sinks, rx));
        (Self { tx: Some(tx) }, writer)
    }

    /// A handle that only traces records
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, user_id: &str, category: Category, message: impl Into<String>) {
        let record = LogRecord::now(user_id, category, message);
        tracing::info!(
            user_id = %record.user_id,
            category = %record.category,
            message = %record.message,
            "Conversation log"
        );
        if let Some(tx) = &self.tx {
            if tx.send(record).is_err() {
                tracing::warn!("Log writer has stopped, record dropped");
            }
        }
    }

    pub fn system(&self, user_id: &str, message: impl Into<String>) {
        self.emit(user_id, Category::System, message);
    }

    pub fn user(&self, user_id: &str, message: impl Into<String>) {
        self.emit(user_id, Category::User, message);
    }

    pub fn ai(&self, user_id: &str, message: impl Into<String>) {
        self.emit(user_id, Category::Ai, message);
    }
}

async fn run_writer(sinks: Vec<Box<dyn LogSink>>, mut rx: mpsc::UnboundedReceiver<LogRecord>) {
    while let Some(record) = rx.recv().await {
        for sink in &sinks {
            let result = match tokio::time::timeout(SINK_TIMEOUT, sink.append(&record)).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(SINK_TIMEOUT)),
            };
            if let Err(e) = result {
                tracing::warn!(sink = sink.name(), error = %e, "Failed to append log record");
            }
        }
    }
    tracing::debug!("Log writer finished");
}

#[cfg(test)]
pub mod testing {
    use super::{LogRecord, LogSink, SinkError};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Sink that keeps records in memory
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        records: Arc<Mutex<Vec<LogRecord>>>,
    }

    impl RecordingSink {
        pub fn records(&self) -> Vec<LogRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LogSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn append(&self, record: &LogRecord) -> Result<(), SinkError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    /// Sink that always fails
    pub struct FailingSink;

    #[async_trait]
    impl LogSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn append(&self, _record: &LogRecord) -> Result<(), SinkError> {
            Err(SinkError::Api {
                status: 503,
                body: "unavailable".to_string(),
            })
        }
    }
}
