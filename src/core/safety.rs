// sql safety gate
// works on the token stream, never on raw text, so quoting and comments
// can neither hide a keyword nor fake one

use serde::Serialize;
use std::fmt;

use super::lexer::{Lexer, Token, TokenKind, Tokenize};
use super::policy::PolicyConfig;
use super::statement::{self, StatementType};

/// Why a statement was allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReasonCode {
    ForbiddenKeyword,
    DisallowedStatementType,
    UnparseableStatement,
    SchemaViolation,
    TooLong,
    MultiStatementInjection,
    Allowed,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForbiddenKeyword => "ForbiddenKeyword",
            Self::DisallowedStatementType => "DisallowedStatementType",
            Self::UnparseableStatement => "UnparseableStatement",
            Self::SchemaViolation => "SchemaViolation",
            Self::TooLong => "TooLong",
            Self::MultiStatementInjection => "MultiStatementInjection",
            Self::Allowed => "Allowed",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one validation call. `detail` is for logs only; any input
/// text it quotes has been run through [`excerpt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub is_safe: bool,
    pub reason: ReasonCode,
    pub detail: String,
    pub statement_type: Option<StatementType>,
}

impl Verdict {
    fn allowed(statement_type: Option<StatementType>) -> Self {
        Self {
            is_safe: true,
            reason: ReasonCode::Allowed,
            detail: "all checks passed".to_string(),
            statement_type,
        }
    }

    fn deny(
        reason: ReasonCode,
        detail: impl Into<String>,
        statement_type: Option<StatementType>,
    ) -> Self {
        Self {
            is_safe: false,
            reason,
            detail: detail.into(),
            statement_type,
        }
    }

    // input we couldn't classify is always denied; strict mode only
    // decides which reason gets reported
    fn ambiguous(policy: &PolicyConfig, why: impl fmt::Display) -> Self {
        if policy.strict_mode() {
            Self::deny(ReasonCode::UnparseableStatement, why.to_string(), None)
        } else {
            Self::deny(
                ReasonCode::DisallowedStatementType,
                format!("statement could not be classified: {why}"),
                None,
            )
        }
    }
}

/// Validate one piece of generated sql against the policy.
pub fn validate(sql: &str, policy: &PolicyConfig) -> Verdict {
    validate_with(&Lexer, sql, policy)
}

/// Same as [`validate`] with a caller supplied tokenizer.
pub fn validate_with<T>(tokenizer: &T, sql: &str, policy: &PolicyConfig) -> Verdict
where
    T: Tokenize + ?Sized,
{
    // cheapest check first, and it bounds the cost of everything after it
    if sql.len() > policy.max_statement_length() {
        return Verdict::deny(
            ReasonCode::TooLong,
            format!(
                "statement is {} bytes, limit is {}",
                sql.len(),
                policy.max_statement_length()
            ),
            None,
        );
    }

    let tokens = match tokenizer.tokenize(sql) {
        Ok(tokens) => tokens,
        Err(e) => return Verdict::ambiguous(policy, e),
    };

    let statements = statement::split_statements(&tokens);
    if statements.is_empty() {
        return Verdict::ambiguous(policy, "no statement found");
    }
    if statements.len() > 1 && !policy.allow_multi_statement() {
        return Verdict::deny(
            ReasonCode::MultiStatementInjection,
            format!("{} statements in one batch", statements.len()),
            None,
        );
    }

    let mut first = None;
    for stmt in statements {
        match check_statement(stmt, policy) {
            Ok(kind) => {
                first.get_or_insert(kind);
            }
            Err(verdict) => return verdict,
        }
    }

    Verdict::allowed(first)
}

fn check_statement(tokens: &[Token<'_>], policy: &PolicyConfig) -> Result<StatementType, Verdict> {
    let shape = statement::classify(tokens).map_err(|why| Verdict::ambiguous(policy, why))?;
    let kind = shape.kind;

    if kind == StatementType::Other {
        return Err(Verdict::deny(
            ReasonCode::DisallowedStatementType,
            format!("unrecognized leading verb {}", excerpt(shape.verb)),
            Some(kind),
        ));
    }
    if !policy.allows(kind) {
        return Err(Verdict::deny(
            ReasonCode::DisallowedStatementType,
            format!("{kind} statements are not allowed"),
            Some(kind),
        ));
    }

    // a quoted name only reaches the scan when it is called, since "pg_sleep"(1)
    // runs the same function as pg_sleep(1)
    let hit = tokens.iter().enumerate().find_map(|(i, t)| match t.kind {
        TokenKind::Word if policy.forbids(t.text) => Some((t.text.to_uppercase(), t.offset)),
        TokenKind::QuotedIdent => statement::quoted_callee(tokens, i)
            .filter(|name| policy.forbids_function(name))
            .map(|name| (name.to_uppercase(), t.offset)),
        _ => None,
    });
    if let Some((word, offset)) = hit {
        return Err(Verdict::deny(
            ReasonCode::ForbiddenKeyword,
            format!("forbidden keyword {} at byte {offset}", excerpt(&word)),
            Some(kind),
        ));
    }

    if policy.restricts_relations() {
        let relations =
            statement::relations(tokens).map_err(|why| Verdict::ambiguous(policy, why))?;
        for relation in relations {
            if relation.schema.is_none() && shape.cte_visible(&relation.name, relation.at) {
                continue;
            }
            let schema = relation
                .schema
                .as_deref()
                .unwrap_or(policy.default_schema());
            let qualified = format!("{schema}.{}", relation.name);

            if !policy.allowed_schemas().is_empty() && !policy.allowed_schemas().contains(schema) {
                return Err(Verdict::deny(
                    ReasonCode::SchemaViolation,
                    format!("schema {} is not allow-listed", excerpt(schema)),
                    Some(kind),
                ));
            }

            let tables = policy.allowed_tables();
            let table_ok = tables.is_empty()
                || tables.contains(&qualified)
                || (schema == policy.default_schema() && tables.contains(&relation.name));
            if !table_ok {
                return Err(Verdict::deny(
                    ReasonCode::SchemaViolation,
                    format!("relation {} is not allow-listed", excerpt(&qualified)),
                    Some(kind),
                ));
            }
        }
    }

    Ok(kind)
}

const EXCERPT_CHARS: usize = 64;

/// Make untrusted text safe to put in a log line: control and non-ascii
/// characters are escaped and the result is cut to a fixed length.
pub fn excerpt(text: &str) -> String {
    let mut out: String = text
        .chars()
        .take(EXCERPT_CHARS)
        .flat_map(char::escape_default)
        .collect();
    if text.chars().nth(EXCERPT_CHARS).is_some() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_escapes_and_truncates() {
        assert_eq!(excerpt("a\nb"), "a\\nb");
        let long = "x".repeat(100);
        assert_eq!(excerpt(&long), format!("{}...", "x".repeat(64)));
    }

    #[test]
    fn test_ambiguous_reason_depends_on_strict_mode() {
        let strict = PolicyConfig::default();
        let lenient = PolicyConfig::default().with_strict_mode(false);
        assert_eq!(
            Verdict::ambiguous(&strict, "x").reason,
            ReasonCode::UnparseableStatement
        );
        assert_eq!(
            Verdict::ambiguous(&lenient, "x").reason,
            ReasonCode::DisallowedStatementType
        );
    }
}
