// core logic - the sql safety gate, plus the generator and executor it sits between

mod ai;
mod db;
mod lexer;
mod policy;
mod safety;
mod statement;

pub use ai::{Claude, SqlGenerator};
pub use db::{Db, PoolSettings, QueryExecutor, QueryResult};
pub use lexer::{LexError, Lexer, Token, TokenKind, Tokenize};
pub use policy::{PolicyConfig, PolicyError, PolicyFile};
pub use safety::{ReasonCode, Verdict, excerpt, validate, validate_with};
pub use statement::{Cte, Relation, Shape, StatementType, classify, relations, split_statements};
