use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nl2sql_gate::db::{init_pool, PgQueryExecutor, PgSchemaProvider};
use nl2sql_gate::llm::{LlmClient, LlmQueryGenerator};
use nl2sql_gate::{validate, AppConfig, Orchestrator, PolicyConfig, RequestOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nl2sql-gate")]
#[command(about = "Ask questions of the stock database through a read-only SQL safety gate")]
struct Args {
    /// JSON policy file overriding the built-in allowlist and limits
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a natural-language question end to end
    Ask { question: String },
    /// Check a SQL query against the policy without running it
    Validate { sql: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let policy = match &args.policy {
        Some(path) => PolicyConfig::load(path)?,
        None => PolicyConfig::default(),
    };

    match args.command {
        Command::Validate { sql } => {
            let verdict = validate(&sql, &policy);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if !verdict.is_approved() {
                std::process::exit(2);
            }
            Ok(())
        }
        Command::Ask { question } => ask(policy, &question).await,
    }
}

async fn ask(policy: PolicyConfig, question: &str) -> Result<()> {
    let config = AppConfig::from_env()?;
    let pool = init_pool(&config.database_url)
        .await
        .context("connecting to the database")?;

    let schema = PgSchemaProvider::new(pool.clone(), config.schema_sample_rows);
    let generator = LlmQueryGenerator::new(LlmClient::new(config.llm.clone()));
    let executor = PgQueryExecutor::new(pool, config.timeouts.execution);

    let orchestrator = Orchestrator::new(
        Arc::new(policy),
        Arc::new(schema),
        Arc::new(generator),
        Arc::new(executor),
    )
    .with_timeouts(config.timeouts);

    let run = orchestrator.run(question).await;
    info!(request_id = %run.request_id, "Pipeline finished");

    match run.outcome {
        RequestOutcome::Executed { query, result } => {
            println!("\n=== Query ===\n{}\n", query);
            println!("{}", result);
        }
        RequestOutcome::Rejected { query, rejection } => {
            println!("\n=== Rejected ===\n{}\n", query);
            println!("{}", rejection);
            std::process::exit(2);
        }
        RequestOutcome::Failed { stage, error } => {
            anyhow::bail!("pipeline failed while {}: {}", stage, error);
        }
    }
    Ok(())
}
