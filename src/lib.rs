// querygate library - natural language to sql behind a safety gate

pub mod cli;
mod config;
mod core;
mod error;
mod logging;
mod output;
mod server;

pub use config::{LogFormat, ServerConfig, load_policy};
pub use core::{
    Claude, Cte, Db, LexError, Lexer, PolicyConfig, PolicyError, PolicyFile, PoolSettings,
    QueryExecutor, QueryResult, ReasonCode, Relation, Shape, SqlGenerator, StatementType, Token,
    TokenKind, Tokenize, Verdict, classify, excerpt, relations, split_statements, validate,
    validate_with,
};
pub use error::Error;
pub use server::{AppState, Server, build_app};
