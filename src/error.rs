use miette::Diagnostic;
use thiserror::Error;

use crate::core::PolicyError;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("SQL generation error: {0}")]
    Generator(String),

    #[error("Missing API key. Set one of: ANTHROPIC_API_KEY, CLAUDE_API_KEY, or CLAUDE_KEY")]
    #[diagnostic(help("or pass --api-key"))]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Policy(#[from] PolicyError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Server(String),
}
