// sql generation - turns a plain english question into sql via claude
// whatever comes back is untrusted and goes through the safety gate

use crate::Error;
use serde::{Deserialize, Serialize};
use tracing::debug;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const MODEL: &str = "claude-sonnet-4-20250514";

/// Anything that can turn a question plus schema description into sql.
pub trait SqlGenerator: Send + Sync + 'static {
    fn generate(
        &self,
        question: &str,
        schema: &str,
    ) -> impl Future<Output = Result<String, Error>> + Send;
}

pub struct Claude {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Serialize)]
struct Request {
    model: &'static str,
    max_tokens: u32,
    messages: Vec<Message>,
    system: String,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct Response {
    content: Vec<Content>,
}

#[derive(Deserialize)]
struct Content {
    text: String,
}

impl Claude {
    /// Use the given key, or fall back to the usual env var names.
    pub fn new(api_key: Option<String>) -> Result<Self, Error> {
        let api_key = match api_key {
            Some(key) => key,
            None => std::env::var("ANTHROPIC_API_KEY")
                .or_else(|_| std::env::var("CLAUDE_API_KEY"))
                .or_else(|_| std::env::var("CLAUDE_KEY"))
                .map_err(|_| Error::MissingApiKey)?,
        };

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
        })
    }
}

impl SqlGenerator for Claude {
    async fn generate(&self, question: &str, schema: &str) -> Result<String, Error> {
        let system = format!(
            r#"You are a SQL query generator for PostgreSQL. Given a natural language request, generate one read-only SQL query.

Database schema:
{schema}

Rules:
- Output ONLY the SQL query, no explanations or markdown
- Generate exactly one SELECT statement
- Be precise with table and column names from the schema
- Cast timestamp/date columns to text (e.g., created_at::text)
- Add reasonable LIMIT if none specified (max 100 rows)"#
        );

        let request = Request {
            model: MODEL,
            max_tokens: 1024,
            system,
            messages: vec![Message {
                role: "user",
                content: question.to_string(),
            }],
        };

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            return Err(Error::Generator(format!("{status}: {body}")));
        }

        let response: Response = response.json().await?;
        let sql = response
            .content
            .first()
            .map(|c| strip_code_fence(&c.text))
            .unwrap_or_default();

        if sql.is_empty() {
            return Err(Error::Generator("empty completion".to_string()));
        }

        debug!(bytes = sql.len(), "generated sql");
        Ok(sql)
    }
}

// claude sometimes wraps sql in markdown code blocks
fn strip_code_fence(text: &str) -> String {
    text.trim()
        .trim_start_matches("```sql")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .to_string()
}
