//! Read-only execution of approved queries.

use crate::collaborators::{QueryExecutor, QueryResult};
use crate::error::{GateError, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Executor, Row, ValueRef};
use std::time::Duration;
use tracing::{debug, info};

pub struct PgQueryExecutor {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgQueryExecutor {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    async fn execute(&self, approved_query: &str) -> Result<QueryResult> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        // SET does not take bind parameters
        let timeout_sql = format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        );
        sqlx::query(&timeout_sql).execute(&mut *tx).await?;

        // Simple protocol: every cell comes back in text format.
        let conn: &mut sqlx::PgConnection = &mut tx;
        let rows = conn.fetch_all(sqlx::raw_sql(approved_query)).await?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => {
                let described = conn.describe(approved_query).await?;
                described
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            }
        };
        let cells = rows.iter().map(row_cells).collect::<Result<Vec<_>>>()?;
        tx.rollback().await?;

        info!("Executed approved query, {} row(s)", cells.len());
        debug!("Columns: {:?}", columns);
        Ok(QueryResult::new(columns, cells))
    }
}

/// Text rendering of every cell in a simple-protocol row.
pub(crate) fn row_cells(row: &PgRow) -> Result<Vec<Option<String>>> {
    (0..row.len())
        .map(|idx| {
            let value = row.try_get_raw(idx)?;
            if value.is_null() {
                return Ok(None);
            }
            value
                .as_str()
                .map(|s| Some(s.to_string()))
                .map_err(|e| GateError::Execution(format!("column {}: {}", idx, e)))
        })
        .collect()
}
