//! Schema description for the generator prompt.
//!
//! Each allowlisted table becomes a `CREATE TABLE` block followed by a comment
//! holding a few sample rows. Only allowlisted names are ever interpolated.

use crate::collaborators::SchemaProvider;
use crate::db::executor::row_cells;
use crate::db::quote_ident;
use crate::error::{GateError, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Column, Row};
use std::collections::BTreeSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

pub struct PgSchemaProvider {
    pool: PgPool,
    schema_name: String,
    sample_rows: u32,
}

impl PgSchemaProvider {
    pub fn new(pool: PgPool, sample_rows: u32) -> Self {
        Self {
            pool,
            schema_name: "public".to_string(),
            sample_rows,
        }
    }

    pub fn with_schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = schema_name.into();
        self
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT column_name::text, data_type::text, is_nullable::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(&self.schema_name)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, is_nullable)| ColumnInfo {
                name,
                data_type,
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
            })
            .collect())
    }

    async fn samples(&self, table: &str) -> Result<(Vec<String>, Vec<Vec<Option<String>>>)> {
        if self.sample_rows == 0 {
            return Ok((Vec::new(), Vec::new()));
        }
        let sql = format!(
            "SELECT * FROM {}.{} LIMIT {}",
            quote_ident(&self.schema_name),
            quote_ident(table),
            self.sample_rows
        );
        let rows = sqlx::raw_sql(&sql).fetch_all(&self.pool).await?;

        let header = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let cells = rows.iter().map(row_cells).collect::<Result<Vec<_>>>()?;
        Ok((header, cells))
    }
}

#[async_trait]
impl SchemaProvider for PgSchemaProvider {
    async fn fetch_schema(&self, tables: &BTreeSet<String>) -> Result<String> {
        let mut blocks = Vec::with_capacity(tables.len());

        for table in tables {
            let columns = self.columns(table).await?;
            if columns.is_empty() {
                warn!("Table {} has no visible columns, skipping", table);
                continue;
            }
            let (header, rows) = self.samples(table).await?;
            blocks.push(render_table(table, &columns, &header, &rows));
        }

        if blocks.is_empty() {
            return Err(GateError::Schema(
                "none of the allowlisted tables exist".to_string(),
            ));
        }
        debug!("Described {} table(s)", blocks.len());
        Ok(blocks.join("\n\n"))
    }
}

pub fn render_table(
    table: &str,
    columns: &[ColumnInfo],
    sample_header: &[String],
    sample_rows: &[Vec<Option<String>>],
) -> String {
    let definitions: Vec<String> = columns
        .iter()
        .map(|c| {
            let null = if c.nullable { "" } else { " NOT NULL" };
            format!("\t{} {}{}", c.name, c.data_type.to_uppercase(), null)
        })
        .collect();
    let mut out = format!("CREATE TABLE {} (\n{}\n)", table, definitions.join(", \n"));

    if !sample_rows.is_empty() {
        out.push_str(&format!(
            "\n\n/*\n{} rows from {} table:\n{}",
            sample_rows.len(),
            table,
            sample_header.join("\t")
        ));
        for row in sample_rows {
            let line: Vec<&str> = row
                .iter()
                .map(|v| v.as_deref().unwrap_or("None"))
                .collect();
            out.push('\n');
            out.push_str(&line.join("\t"));
        }
        out.push_str("\n*/");
    }
    out
}
