use crate::collaborators::QueryGenerator;
use crate::error::{GateError, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?im)^```[a-z]*\s*$|^```\s*|```\s*$").unwrap();
}

/// Connection settings for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone)]
pub struct LlmClient {
    settings: LlmSettings,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    async fn call_llm(&self, system: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.settings.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/')))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GateError::Generation(format!(
                "LLM API returned {}: {}",
                status, detail
            )));
        }

        let response_json: serde_json::Value = response.json().await?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| GateError::Generation("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

/// Generates candidate SQL from a question and a schema description.
pub struct LlmQueryGenerator {
    client: LlmClient,
}

impl LlmQueryGenerator {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueryGenerator for LlmQueryGenerator {
    async fn generate(&self, question: &str, schema: &str) -> Result<String> {
        info!("Generating SQL with model {}", self.client.model());
        let prompt = build_prompt(question, schema);
        let raw = self
            .client
            .call_llm("You translate questions into a single PostgreSQL query. Reply with SQL only.", &prompt)
            .await?;
        debug!("Raw LLM output: {}", raw);

        let sql = extract_sql(&raw);
        if sql.is_empty() {
            return Err(GateError::Generation("LLM returned no SQL".to_string()));
        }
        Ok(sql)
    }
}

pub fn build_prompt(question: &str, schema: &str) -> String {
    format!(
        r#"Stock market database schema:
{}

User question: {}

Write ONE safe PostgreSQL SELECT query that answers the question, using only the tables above (join dim_tickers, dimtime and fact_ohlcv as needed).
Always include a LIMIT clause. Reply with the SQL query only, no explanation.
If the requested date is not a trading day, use the latest available date before it (MAX(date) <= target_date)."#,
        schema, question
    )
}

/// Strip markdown code fences and surrounding whitespace. The SQL itself is
/// never touched.
pub fn extract_sql(raw: &str) -> String {
    CODE_FENCE.replace_all(raw, "").trim().to_string()
}
