//! Policy Configuration
//!
//! The read-only rule set the validation engine checks candidate queries against.
//! Built once at startup, validated, then shared behind an `Arc`.

use crate::error::ConfigError;
use crate::validation::lexical;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::warn;

/// Tables the generator is allowed to read by default.
pub const DEFAULT_ALLOWED_TABLES: &[&str] = &["dim_tickers", "dimtime", "fact_ohlcv"];

/// Large fact tables that may only be read with an explicit row cap.
pub const DEFAULT_SENSITIVE_TABLES: &[&str] = &["fact_ohlcv"];

pub const DEFAULT_MAX_LIMIT: u64 = 500;

/// Lexical denylist, matched case-insensitively against whitespace-collapsed
/// query text. Order matters: the first hit is the one reported.
pub const DEFAULT_DENIED_PATTERNS: &[&str] = &[
    // statement chaining and comment termination
    "; --",
    ";--",
    "--",
    "/*",
    // set operations
    "union select",
    "union all select",
    "intersect select",
    "except select",
    // denial of service and server-side file access
    "pg_sleep",
    "pg_read_file",
    "pg_read_binary_file",
    "pg_ls_dir",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "lo_import",
    "lo_export",
    "dblink",
    "generate_series",
    // data mutation
    "drop table",
    "drop schema",
    "truncate ",
    "delete from",
    "insert into",
    "alter table",
    "copy ",
    "grant ",
    "revoke ",
];

/// Validated, immutable policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyConfig {
    allowed_tables: BTreeSet<String>,
    sensitive_tables: BTreeSet<String>,
    max_limit: u64,
    require_limit_on_sensitive: bool,
    denied_patterns: Vec<String>,
    default_schema: Option<String>,
}

/// On-disk shape of a policy file. Every field except the allowlist falls back
/// to the built-in default.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyFile {
    pub allowed_tables: Vec<String>,
    #[serde(default)]
    pub sensitive_tables: Option<Vec<String>>,
    #[serde(default)]
    pub max_limit: Option<u64>,
    #[serde(default)]
    pub require_limit_on_sensitive: Option<bool>,
    #[serde(default)]
    pub denied_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub default_schema: Option<String>,
}

impl PolicyConfig {
    pub fn new(
        allowed_tables: impl IntoIterator<Item = impl Into<String>>,
        sensitive_tables: impl IntoIterator<Item = impl Into<String>>,
        max_limit: u64,
        denied_patterns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, ConfigError> {
        let allowed_tables: BTreeSet<String> = allowed_tables.into_iter().map(Into::into).collect();
        if allowed_tables.is_empty() {
            return Err(ConfigError::EmptyAllowlist);
        }
        if max_limit == 0 {
            return Err(ConfigError::NonPositiveMaxLimit);
        }

        // Stored in normalized form so matching never re-normalizes them.
        let denied_patterns: Vec<String> = denied_patterns
            .into_iter()
            .map(|p| lexical::normalize_pattern(&p.into()))
            .collect();
        if let Some(idx) = denied_patterns.iter().position(|p| p.trim().is_empty()) {
            return Err(ConfigError::EmptyPattern(idx));
        }

        let sensitive_tables: BTreeSet<String> =
            sensitive_tables.into_iter().map(Into::into).collect();
        for table in sensitive_tables.difference(&allowed_tables) {
            warn!("Sensitive table '{}' is not in the allowlist and can never be read", table);
        }

        Ok(Self {
            allowed_tables,
            sensitive_tables,
            max_limit,
            require_limit_on_sensitive: true,
            denied_patterns,
            default_schema: None,
        })
    }

    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    pub fn with_require_limit_on_sensitive(mut self, required: bool) -> Self {
        self.require_limit_on_sensitive = required;
        self
    }

    pub fn from_policy_file(file: PolicyFile) -> Result<Self, ConfigError> {
        let sensitive = file.sensitive_tables.unwrap_or_else(|| {
            DEFAULT_SENSITIVE_TABLES.iter().map(|s| s.to_string()).collect()
        });
        let patterns = file.denied_patterns.unwrap_or_else(|| {
            DEFAULT_DENIED_PATTERNS.iter().map(|s| s.to_string()).collect()
        });
        let mut config = Self::new(
            file.allowed_tables,
            sensitive,
            file.max_limit.unwrap_or(DEFAULT_MAX_LIMIT),
            patterns,
        )?;
        if let Some(required) = file.require_limit_on_sensitive {
            config = config.with_require_limit_on_sensitive(required);
        }
        if let Some(schema) = file.default_schema {
            config = config.with_default_schema(schema);
        }
        Ok(config)
    }

    /// Load a JSON policy file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let policy_error = |reason: String| ConfigError::PolicyFile {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| policy_error(e.to_string()))?;
        let file: PolicyFile = serde_json::from_str(&raw).map_err(|e| policy_error(e.to_string()))?;
        Self::from_policy_file(file)
    }

    pub fn allowed_tables(&self) -> &BTreeSet<String> {
        &self.allowed_tables
    }

    pub fn sensitive_tables(&self) -> &BTreeSet<String> {
        &self.sensitive_tables
    }

    pub fn max_limit(&self) -> u64 {
        self.max_limit
    }

    pub fn require_limit_on_sensitive(&self) -> bool {
        self.require_limit_on_sensitive
    }

    pub fn denied_patterns(&self) -> &[String] {
        &self.denied_patterns
    }

    pub fn default_schema(&self) -> Option<&str> {
        self.default_schema.as_deref()
    }

    pub fn is_sensitive(&self, table: &str) -> bool {
        self.sensitive_tables.contains(table)
    }
}

impl Default for PolicyConfig {
    /// Built-in policy for the market-data warehouse.
    fn default() -> Self {
        Self {
            allowed_tables: DEFAULT_ALLOWED_TABLES.iter().map(|s| s.to_string()).collect(),
            sensitive_tables: DEFAULT_SENSITIVE_TABLES.iter().map(|s| s.to_string()).collect(),
            max_limit: DEFAULT_MAX_LIMIT,
            require_limit_on_sensitive: true,
            denied_patterns: DEFAULT_DENIED_PATTERNS.iter().map(|s| s.to_string()).collect(),
            default_schema: Some("public".to_string()),
        }
    }
}
