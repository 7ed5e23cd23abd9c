//! Collaborator Interfaces
//!
//! The three external services the orchestrator drives. Implementations must be
//! shareable across concurrent pipelines.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Describes the tables the generator may use.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn fetch_schema(&self, tables: &BTreeSet<String>) -> Result<String>;
}

/// Turns a question into candidate SQL. Output is untrusted.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate(&self, question: &str, schema: &str) -> Result<String>;
}

/// Runs approved SQL against the store.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, approved_query: &str) -> Result<QueryResult>;
}

/// Tabular result with text cells; `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = |value: &Option<String>| value.clone().unwrap_or_else(|| "NULL".to_string());

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &self.rows {
            for (idx, value) in row.iter().enumerate() {
                let len = cell(value).chars().count();
                match widths.get_mut(idx) {
                    Some(width) => *width = (*width).max(len),
                    None => widths.push(len),
                }
            }
        }

        let header: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, name)| format!("{:<width$}", name, width = widths[idx]))
            .collect();
        writeln!(f, "{}", header.join(" | "))?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", rule.join("-+-"))?;

        for row in &self.rows {
            let line: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(idx, value)| format!("{:<width$}", cell(value), width = widths[idx]))
                .collect();
            writeln!(f, "{}", line.join(" | "))?;
        }
        write!(f, "({} row{})", self.rows.len(), if self.rows.len() == 1 { "" } else { "s" })
    }
}
