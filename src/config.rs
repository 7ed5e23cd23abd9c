//! Runtime configuration read from the environment (and `.env`).

use crate::error::ConfigError;
use crate::llm::LlmSettings;
use crate::orchestrator::StageTimeouts;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.mistral.ai/v1";
pub const DEFAULT_LLM_MODEL: &str = "codestral-latest";
pub const DEFAULT_SAMPLE_ROWS: u32 = 3;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub llm: LlmSettings,
    pub timeouts: StageTimeouts,
    pub schema_sample_rows: u32,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url =
            var("DATABASE_URL").ok_or_else(|| ConfigError::MissingEnv("DATABASE_URL".to_string()))?;
        let api_key = var("LLM_API_KEY")
            .or_else(|| var("MISTRAL_API_KEY"))
            .or_else(|| var("OPENAI_API_KEY"))
            .ok_or_else(|| ConfigError::MissingEnv("LLM_API_KEY".to_string()))?;

        let llm = LlmSettings {
            api_key,
            base_url: var("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            model: var("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            temperature: parsed(&var, "LLM_TEMPERATURE", 0.1)?,
            max_tokens: parsed(&var, "LLM_MAX_TOKENS", 2048)?,
        };

        let defaults = StageTimeouts::default();
        let timeouts = StageTimeouts {
            schema: seconds(&var, "SCHEMA_TIMEOUT_SECS", defaults.schema)?,
            generation: seconds(&var, "GENERATION_TIMEOUT_SECS", defaults.generation)?,
            execution: seconds(&var, "EXECUTION_TIMEOUT_SECS", defaults.execution)?,
        };

        Ok(Self {
            database_url,
            llm,
            timeouts,
            schema_sample_rows: parsed(&var, "SCHEMA_SAMPLE_ROWS", DEFAULT_SAMPLE_ROWS)?,
        })
    }
}

fn parsed<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            name: name.to_string(),
            value: raw,
        }),
    }
}

fn seconds(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let secs: u64 = parsed(var, name, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: "0".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
