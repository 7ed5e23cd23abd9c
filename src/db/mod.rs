//! PostgreSQL collaborators: connection pool, schema description, read-only execution.

pub mod connection;
pub mod executor;
pub mod schema;

pub use connection::init_pool;
pub use executor::PgQueryExecutor;
pub use schema::PgSchemaProvider;

/// Double-quote an identifier for interpolation into SQL text.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
