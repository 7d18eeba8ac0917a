//! Assessment script and opening prompt
//!
//! The script is the model's system instruction for every call. It is
//! embedded at build time and can be replaced at startup with a file.

use crate::config::ConfigError;
use std::path::Path;

/// Built-in assessment script
const EMBEDDED_SCRIPT: &str = include_str!("../prompts/assessment.md");

/// Load the system instruction, preferring `override_path` when given
pub fn load_system_instruction(override_path: Option<&Path>) -> Result<String, ConfigError> {
    let script = match override_path {
        Some(path) => std::fs::read_to_string(path).map_err(|e| ConfigError::Prompt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?,
        None => EMBEDDED_SCRIPT.to_string(),
    };

    if script.trim().is_empty() {
        return Err(ConfigError::EmptyPrompt);
    }
    Ok(script)
}

/// Hidden first user message that asks the model to open the assessment
pub fn opening_prompt(user_name: &str) -> String {
    format!("The user {user_name} has joined. Please begin the assessment.")
}
