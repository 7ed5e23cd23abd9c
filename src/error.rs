use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Timed out after {millis}ms during {stage}")]
    Timeout { stage: String, millis: u64 },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Startup-time configuration failures. These are fatal: the gate refuses to
/// run rather than fall back to a permissive default.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("table allowlist must not be empty")]
    EmptyAllowlist,

    #[error("max row limit must be greater than zero")]
    NonPositiveMaxLimit,

    #[error("denylist pattern #{0} is empty")]
    EmptyPattern(usize),

    #[error("missing environment variable {0}")]
    MissingEnv(String),

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },

    #[error("cannot load policy file {path}: {reason}")]
    PolicyFile { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, GateError>;
