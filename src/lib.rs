//! nl2sql-gate
//!
//! Answers natural-language questions about a stock-market database by having
//! an LLM draft SQL, then refusing to run anything that is not a single,
//! bounded, read-only query over allowlisted tables.

pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod policy;
pub mod sql;
pub mod validation;

pub use collaborators::{QueryExecutor, QueryGenerator, QueryResult, SchemaProvider};
pub use config::AppConfig;
pub use error::{ConfigError, GateError, Result};
pub use orchestrator::{Orchestrator, PipelineRun, PipelineState, RequestOutcome, StageTimeouts};
pub use policy::PolicyConfig;
pub use validation::{validate, ReasonCode, Rejection, Verdict};
