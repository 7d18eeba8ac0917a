//! Startup configuration
//!
//! Read once from the environment and validated before any session starts.

use crate::api::SessionLimits;
use crate::llm::DEFAULT_BASE_URL;
use crate::sink::{SheetsAuth, SheetsConfig, SHEETS_BASE_URL};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PORT: u16 = 8501;
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_MOCK_DELAY_MS: u64 = 1000;
const DEFAULT_MOCK_FINISH_AFTER: usize = 5;
const DEFAULT_WORKSHEET: &str = "log";
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
const DEFAULT_MAX_SESSIONS: usize = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No API key configured. Set GOOGLE_API_KEY or GEMINI_API_KEY, or enable DEBUG_MODE.")]
    MissingApiKey,
    #[error("No model configured. Set GEMINI_MODEL, or enable DEBUG_MODE.")]
    MissingModel,
    #[error("API key is malformed")]
    InvalidApiKey,
    #[error("Model id {0:?} is malformed")]
    InvalidModel(String),
    #[error("{key} is required when {required_by} is set")]
    Missing {
        key: &'static str,
        required_by: &'static str,
    },
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Cannot read assessment script {path}: {reason}")]
    Prompt { path: PathBuf, reason: String },
    #[error("Assessment script is empty")]
    EmptyPrompt,
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Non-empty and free of whitespace
pub fn validate_api_key(key: &str) -> Result<(), ConfigError> {
    if key.is_empty() {
        return Err(ConfigError::MissingApiKey);
    }
    if key.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidApiKey);
    }
    Ok(())
}

/// Non-empty ASCII alphanumerics plus `-._/`
pub fn validate_model_id(model: &str) -> Result<(), ConfigError> {
    if model.is_empty() {
        return Err(ConfigError::MissingModel);
    }
    let valid = model
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '/'));
    if !valid {
        return Err(ConfigError::InvalidModel(model.to_string()));
    }
    Ok(())
}

/// Which chat backend to run against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Gemini { api_key: String, model: String },
    Mock,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub debug_mode: bool,
    pub gemini_base_url: String,
    pub prompt_path: Option<PathBuf>,
    pub port: u16,
    pub log_dir: PathBuf,
    pub mock_delay: Duration,
    pub mock_finish_after: usize,
    pub session_limits: SessionLimits,
    pub sheets: Option<SheetsConfig>,
}

impl AppConfig {
    /// Read from the process environment. Load `.env` first to include it.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        // A service-account key wins over a fixed token
        let sheets_auth = match (get("SHEETS_CREDENTIALS_PATH"), get("SHEETS_ACCESS_TOKEN")) {
            (Some(path), _) => Some(SheetsAuth::ServiceAccount(PathBuf::from(path))),
            (None, Some(token)) => Some(SheetsAuth::AccessToken(token)),
            (None, None) => None,
        };
        let sheets = match (get("SHEETS_ID"), sheets_auth) {
            (Some(sheet_id), Some(auth)) => Some(SheetsConfig {
                sheet_id,
                worksheet: get("SHEETS_WORKSHEET").unwrap_or_else(|| DEFAULT_WORKSHEET.to_string()),
                auth,
                base_url: get("SHEETS_BASE_URL").unwrap_or_else(|| SHEETS_BASE_URL.to_string()),
            }),
            (Some(_), None) => {
                return Err(ConfigError::Missing {
                    key: "SHEETS_CREDENTIALS_PATH",
                    required_by: "SHEETS_ID",
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::Missing {
                    key: "SHEETS_ID",
                    required_by: "SHEETS_CREDENTIALS_PATH or SHEETS_ACCESS_TOKEN",
                })
            }
            (None, None) => None,
        };

        let session_limits = SessionLimits {
            idle_ttl: Duration::from_secs(parse_or(
                "ASSESSMENT_SESSION_TTL_SECS",
                get("ASSESSMENT_SESSION_TTL_SECS"),
                DEFAULT_SESSION_TTL_SECS,
            )?),
            max_sessions: parse_or(
                "ASSESSMENT_MAX_SESSIONS",
                get("ASSESSMENT_MAX_SESSIONS"),
                DEFAULT_MAX_SESSIONS,
            )?,
        };

        Ok(Self {
            api_key: get("GOOGLE_API_KEY").or_else(|| get("GEMINI_API_KEY")),
            model: get("GEMINI_MODEL"),
            debug_mode: get("DEBUG_MODE").is_some_and(|v| parse_flag(&v)),
            gemini_base_url: get("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            prompt_path: get("ASSESSMENT_PROMPT_PATH").map(PathBuf::from),
            port: parse_or("ASSESSMENT_PORT", get("ASSESSMENT_PORT"), DEFAULT_PORT)?,
            log_dir: get("ASSESSMENT_LOG_DIR")
                .map_or_else(|| PathBuf::from(DEFAULT_LOG_DIR), PathBuf::from),
            mock_delay: Duration::from_millis(parse_or(
                "ASSESSMENT_MOCK_DELAY_MS",
                get("ASSESSMENT_MOCK_DELAY_MS"),
                DEFAULT_MOCK_DELAY_MS,
            )?),
            mock_finish_after: parse_or(
                "ASSESSMENT_MOCK_FINISH_AFTER",
                get("ASSESSMENT_MOCK_FINISH_AFTER"),
                DEFAULT_MOCK_FINISH_AFTER,
            )?,
            session_limits,
            sheets,
        })
    }

    /// Resolve the chat backend. Debug mode always uses the mock; otherwise
    /// a missing or malformed key or model is fatal.
    pub fn backend(&self) -> Result<Backend, ConfigError> {
        if self.debug_mode {
            return Ok(Backend::Mock);
        }
        let api_key = self.api_key.clone().unwrap_or_default();
        let model = self.model.clone().unwrap_or_default();
        validate_api_key(&api_key)?;
        validate_model_id(&model)?;
        Ok(Backend::Gemini { api_key, model })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "t")
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
