//! Process Configuration
//!
//! Credentials and tuning knobs loaded from the environment (and `.env`)
//! before the core runs. CLI flags layer on top of this in `main.rs`.

use crate::error::{Result, Text2SqlError};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_SCHEMA_PATH: &str = "table_documentation.json";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_attempts: u32,
    pub call_timeout: Duration,
    pub schema_path: PathBuf,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup (the environment, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = non_empty("GROQ_API_KEY")
            .or_else(|| non_empty("OPENAI_API_KEY"))
            .ok_or_else(|| {
                Text2SqlError::Config(
                    "GROQ_API_KEY not found. Check that a .env file exists and defines GROQ_API_KEY"
                        .to_string(),
                )
            })?;

        let model = non_empty("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = non_empty("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let max_attempts = match non_empty("TEXT2SQL_MAX_ATTEMPTS") {
            Some(raw) => parse_positive("TEXT2SQL_MAX_ATTEMPTS", &raw)? as u32,
            None => DEFAULT_MAX_ATTEMPTS,
        };

        let timeout_secs = match non_empty("TEXT2SQL_TIMEOUT_SECS") {
            Some(raw) => parse_positive("TEXT2SQL_TIMEOUT_SECS", &raw)?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let schema_path = non_empty("TEXT2SQL_SCHEMA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SCHEMA_PATH));

        Ok(Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_attempts,
            call_timeout: Duration::from_secs(timeout_secs),
            schema_path,
        })
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<u64> {
    let value: u64 = raw.trim().parse().map_err(|_| {
        Text2SqlError::Config(format!("{} must be a positive integer, got '{}'", key, raw))
    })?;
    check_positive(key, value)
}

/// Bounds shared by environment values and CLI overrides.
pub fn check_positive(key: &str, value: u64) -> Result<u64> {
    if value == 0 || value > u32::MAX as u64 {
        return Err(Text2SqlError::Config(format!(
            "{} must be between 1 and {}, got {}",
            key,
            u32::MAX,
            value
        )));
    }
    Ok(value)
}
