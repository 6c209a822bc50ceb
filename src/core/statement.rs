// statement level view of a token stream: splitting batches, finding the
// leading verb and pulling out the relations a statement touches

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use super::lexer::{Token, TokenKind};

/// Operation category of a statement, taken from its leading verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Create,
    Alter,
    Drop,
    Truncate,
    Grant,
    Revoke,
    Explain,
    Copy,
    Call,
    Execute,
    Set,
    Show,
    Transaction,
    /// anything we don't recognise; never allowed
    Other,
}

impl StatementType {
    pub fn from_verb(verb: &str) -> Self {
        match verb.to_ascii_uppercase().as_str() {
            // VALUES and TABLE are read-only shorthands for SELECT in postgres
            "SELECT" | "VALUES" | "TABLE" => Self::Select,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "MERGE" => Self::Merge,
            "CREATE" => Self::Create,
            "ALTER" => Self::Alter,
            "DROP" => Self::Drop,
            "TRUNCATE" => Self::Truncate,
            "GRANT" => Self::Grant,
            "REVOKE" => Self::Revoke,
            "EXPLAIN" => Self::Explain,
            "COPY" => Self::Copy,
            "CALL" => Self::Call,
            "EXECUTE" | "EXEC" | "PREPARE" | "DO" => Self::Execute,
            "SET" | "RESET" => Self::Set,
            "SHOW" => Self::Show,
            "BEGIN" | "START" | "COMMIT" | "END" | "ROLLBACK" | "ABORT" | "SAVEPOINT"
            | "RELEASE" => Self::Transaction,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Merge => "MERGE",
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
            Self::Drop => "DROP",
            Self::Truncate => "TRUNCATE",
            Self::Grant => "GRANT",
            Self::Revoke => "REVOKE",
            Self::Explain => "EXPLAIN",
            Self::Copy => "COPY",
            Self::Call => "CALL",
            Self::Execute => "EXECUTE",
            Self::Set => "SET",
            Self::Show => "SHOW",
            Self::Transaction => "TRANSACTION",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split on every `;`. Statements with no tokens (blank or comment-only)
/// are dropped, so a trailing semicolon doesn't count as a second statement.
pub fn split_statements<'t, 'a>(tokens: &'t [Token<'a>]) -> Vec<&'t [Token<'a>]> {
    tokens
        .split(|t| t.kind == TokenKind::Semicolon)
        .filter(|stmt| !stmt.is_empty())
        .collect()
}

/// What classification found out about one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape<'a> {
    pub kind: StatementType,
    pub verb: &'a str,
    /// names bound by a leading WITH clause, in declaration order
    pub ctes: Vec<Cte>,
    pub recursive: bool,
}

/// One common table expression. `body` is the token range of its
/// parenthesised query, parens included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cte {
    pub name: String,
    pub body: Range<usize>,
}

impl Shape<'_> {
    /// Whether an unqualified `name` at token index `at` refers to one of
    /// the statement's CTEs rather than a real table. Without RECURSIVE a
    /// CTE body only sees the CTEs declared before it.
    pub fn cte_visible(&self, name: &str, at: usize) -> bool {
        let inside = self.ctes.iter().position(|c| c.body.contains(&at));
        self.ctes
            .iter()
            .enumerate()
            .any(|(k, c)| c.name == name && (self.recursive || inside.is_none_or(|j| k < j)))
    }
}

/// Find the statement's main verb. Errors describe why the statement
/// could not be classified.
pub fn classify<'a>(tokens: &[Token<'a>]) -> Result<Shape<'a>, &'static str> {
    let mut i = skip_lparens(tokens, 0);
    let mut ctes = Vec::new();
    let mut recursive = false;

    if tokens.get(i).is_some_and(|t| t.is_word("WITH")) {
        i += 1;
        if tokens.get(i).is_some_and(|t| t.is_word("RECURSIVE")) {
            recursive = true;
            i += 1;
        }
        i = parse_ctes(tokens, i, &mut ctes)
            .ok_or("could not resolve the main statement of a WITH clause")?;
        i = skip_lparens(tokens, i);
    }

    let verb = match tokens.get(i) {
        Some(t) if t.kind == TokenKind::Word => t,
        Some(_) => return Err("statement does not start with a keyword"),
        None => return Err("statement has no leading verb"),
    };

    let mut kind = StatementType::from_verb(verb.text);
    // SELECT ... INTO creates a table
    if kind == StatementType::Select && has_top_level_into(tokens, i) {
        kind = StatementType::Create;
    }

    Ok(Shape {
        kind,
        verb: verb.text,
        ctes,
        recursive,
    })
}

fn skip_lparens(tokens: &[Token<'_>], mut i: usize) -> usize {
    while tokens.get(i).is_some_and(|t| t.kind == TokenKind::LParen) {
        i += 1;
    }
    i
}

// tokens[i] must be `(`; returns the index after its matching `)`
fn skip_group(tokens: &[Token<'_>], i: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (j, t) in tokens.iter().enumerate().skip(i) {
        match t.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(j + 1);
                }
            }
            _ => {}
        }
    }
    None
}

// name [(cols)] AS [NOT] [MATERIALIZED] (...) [, ...]
fn parse_ctes(tokens: &[Token<'_>], mut i: usize, ctes: &mut Vec<Cte>) -> Option<usize> {
    loop {
        let name = tokens.get(i).filter(|t| t.is_name())?;
        i += 1;

        if tokens.get(i)?.kind == TokenKind::LParen {
            i = skip_group(tokens, i)?;
        }
        if !tokens.get(i)?.is_word("AS") {
            return None;
        }
        i += 1;
        if tokens.get(i)?.is_word("NOT") {
            i += 1;
        }
        if tokens.get(i)?.is_word("MATERIALIZED") {
            i += 1;
        }
        if tokens.get(i)?.kind != TokenKind::LParen {
            return None;
        }
        let start = i;
        i = skip_group(tokens, i)?;
        ctes.push(Cte {
            name: normalize_name(name),
            body: start..i,
        });

        if tokens.get(i)?.kind == TokenKind::Comma {
            i += 1;
        } else {
            return Some(i);
        }
    }
}

fn has_top_level_into(tokens: &[Token<'_>], verb: usize) -> bool {
    let base = tokens[..verb]
        .iter()
        .filter(|t| t.kind == TokenKind::LParen)
        .count() as isize
        - tokens[..verb]
            .iter()
            .filter(|t| t.kind == TokenKind::RParen)
            .count() as isize;

    let mut depth = base;
    for t in &tokens[verb + 1..] {
        match t.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth -= 1,
            _ if depth == base && t.is_word("INTO") => return true,
            _ => {}
        }
    }
    false
}

/// Unquoted names fold to lower case, quoted ones keep their exact text.
pub fn normalize_name(token: &Token<'_>) -> String {
    match token.kind {
        TokenKind::QuotedIdent => quoted_ident(token.text, '\\'),
        _ => token.text.to_lowercase(),
    }
}

/// The function name when the quoted identifier at `i` is called, as in
/// `"pg_sleep"(1)` or `U&"pg!005fsleep" UESCAPE '!' (1)`.
pub fn quoted_callee(tokens: &[Token<'_>], i: usize) -> Option<String> {
    let ident = tokens.get(i).filter(|t| t.kind == TokenKind::QuotedIdent)?;
    let mut next = i + 1;
    let mut escape = '\\';

    if tokens.get(next).is_some_and(|t| t.is_word("UESCAPE")) {
        let literal = tokens.get(next + 1)?.text;
        let mut chars = literal.strip_prefix('\'')?.strip_suffix('\'')?.chars();
        escape = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        next += 2;
    }

    if tokens.get(next)?.kind != TokenKind::LParen {
        return None;
    }
    Some(quoted_ident(ident.text, escape))
}

fn quoted_ident(text: &str, escape: char) -> String {
    let (unicode, rest) = match text.strip_prefix("U&").or_else(|| text.strip_prefix("u&")) {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let inner = rest
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(rest)
        .replace("\"\"", "\"");

    if unicode {
        unescape_unicode(&inner, escape)
    } else {
        inner
    }
}

// U& escapes: \XXXX and \+XXXXXX code points, a doubled escape for itself.
// malformed escapes are kept as written
fn unescape_unicode(text: &str, escape: char) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(escape) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + escape.len_utf8()..];

        if let Some(tail) = rest.strip_prefix(escape) {
            out.push(escape);
            rest = tail;
            continue;
        }

        let (digits, len) = if rest.starts_with('+') {
            (rest.get(1..7), 7)
        } else {
            (rest.get(..4), 4)
        };
        match digits
            .and_then(|d| u32::from_str_radix(d, 16).ok())
            .and_then(char::from_u32)
        {
            Some(c) => {
                out.push(c);
                rest = &rest[len..];
            }
            None => out.push(escape),
        }
    }

    out.push_str(rest);
    out
}

/// A table or table function referenced by a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub schema: Option<String>,
    pub name: String,
    /// token index of the name
    pub at: usize,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

const RELATION_INTRODUCERS: &[&str] = &[
    "FROM", "JOIN", "INTO", "UPDATE", "TABLE", "USING", "TRUNCATE",
];

// reserved words that can't be a relation name because they start the
// next clause. unreserved ones like SET are valid table names
const CLAUSE_WORDS: &[&str] = &[
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL", "ON", "USING",
    "GROUP", "ORDER", "LIMIT", "OFFSET", "HAVING", "WINDOW", "UNION", "INTERSECT", "EXCEPT",
    "FETCH", "FOR", "DEFAULT", "SELECT", "RETURNING", "TABLESAMPLE", "WITH", "LATERAL", "ONLY",
    "WHEN", "THEN", "AS",
];

// a FROM or USING list ends at the first of these outside parens, all
// reserved so none can be an alias
const LIST_END: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "WINDOW", "ORDER", "LIMIT", "OFFSET", "FETCH", "FOR", "UNION",
    "INTERSECT", "EXCEPT", "RETURNING", "INTO", "WHEN", "DO",
];

// FROM inside EXTRACT(...), TRIM(...) and IS DISTINCT FROM isn't a table
const NON_RELATION_FROM: &[&str] = &[
    "DISTINCT", "YEAR", "MONTH", "DAY", "HOUR", "MINUTE", "SECOND", "EPOCH", "DOW", "DOY",
    "ISODOW", "ISOYEAR", "WEEK", "QUARTER", "DECADE", "CENTURY", "MILLENNIUM",
    "MILLISECONDS", "MICROSECONDS", "TIMEZONE", "TIMEZONE_HOUR", "TIMEZONE_MINUTE", "JULIAN",
    "LEADING", "TRAILING", "BOTH",
];

/// Every relation named after FROM, JOIN, INTO, UPDATE, TABLE, USING or
/// TRUNCATE, including every item of a comma separated FROM list and the
/// first table of a parenthesised join. Subqueries are walked as part of
/// the same token stream. Errors when a FROM item is something we can't
/// read as a relation or subquery.
pub fn relations(tokens: &[Token<'_>]) -> Result<Vec<Relation>, &'static str> {
    let mut found = Vec::new();

    for (i, t) in tokens.iter().enumerate() {
        if !RELATION_INTRODUCERS.iter().any(|w| t.is_word(w)) {
            continue;
        }
        let prev = i.checked_sub(1).and_then(|p| tokens.get(p));
        if t.is_word("FROM")
            && prev.is_some_and(|p| NON_RELATION_FROM.iter().any(|w| p.is_word(w)))
        {
            continue;
        }
        // FOR [NO KEY] UPDATE, ON CONFLICT DO UPDATE, WHEN MATCHED THEN UPDATE
        if t.is_word("UPDATE")
            && prev.is_some_and(|p| {
                ["FOR", "KEY", "DO", "THEN", "ON"]
                    .iter()
                    .any(|w| p.is_word(w))
            })
        {
            continue;
        }
        // JOIN ... USING (col, ...) names columns
        if t.is_word("USING") && joins_before(tokens, i) {
            continue;
        }

        if t.is_word("FROM") || t.is_word("USING") {
            for item in list_items(tokens, i + 1) {
                found.extend(relation_at(tokens, item)?);
            }
        } else {
            found.extend(relation_at(tokens, i + 1)?);
        }
    }

    Ok(found)
}

// start of every item in a FROM or USING list: the first token and the one
// after each comma at the list's own paren depth
fn list_items(tokens: &[Token<'_>], start: usize) -> Vec<usize> {
    let mut items = vec![start];
    let mut depth = 0usize;

    for (j, t) in tokens.iter().enumerate().skip(start) {
        match t.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => break,
            },
            TokenKind::Comma if depth == 0 => items.push(j + 1),
            TokenKind::Word if depth == 0 && LIST_END.iter().any(|w| t.is_word(w)) => break,
            _ => {}
        }
    }
    items
}

// whether the USING at `i` closes a JOIN rather than opening a DELETE or
// MERGE source list
fn joins_before(tokens: &[Token<'_>], i: usize) -> bool {
    let mut depth = 0usize;
    for t in tokens[..i].iter().rev() {
        match t.kind {
            TokenKind::RParen => depth += 1,
            TokenKind::LParen => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            TokenKind::Word if depth == 0 => {
                if t.is_word("JOIN") {
                    return true;
                }
                if ["FROM", "INTO", "DELETE", "MERGE", "USING", "ON"]
                    .iter()
                    .any(|w| t.is_word(w))
                {
                    return false;
                }
            }
            _ => {}
        }
    }
    false
}

// [ONLY|LATERAL] name[.name[.name]] or ( joined table )
fn relation_at(tokens: &[Token<'_>], mut i: usize) -> Result<Option<Relation>, &'static str> {
    while tokens
        .get(i)
        .is_some_and(|t| t.is_word("ONLY") || t.is_word("LATERAL") || t.is_word("TABLE"))
    {
        i += 1;
    }

    // (a JOIN b ...) names a table straight away; (SELECT ...) and friends
    // are subqueries whose own FROM gets walked separately
    let opened = i;
    i = skip_lparens(tokens, i);
    if i > opened
        && tokens.get(i).is_some_and(|t| {
            ["SELECT", "VALUES", "WITH", "TABLE"]
                .iter()
                .any(|w| t.is_word(w))
        })
    {
        return Ok(None);
    }

    let Some(first) = tokens.get(i) else {
        return Ok(None);
    };
    match first.kind {
        TokenKind::Word | TokenKind::QuotedIdent => {}
        // [name] quoting from other dialects
        TokenKind::Operator if first.text == "[" => return Err("unrecognized FROM item"),
        _ => return Ok(None),
    }
    if first.kind == TokenKind::Word && CLAUSE_WORDS.iter().any(|w| first.is_word(w)) {
        return Ok(None);
    }

    let mut parts = vec![normalize_name(first)];
    let mut at = i;
    i += 1;
    while tokens.get(i).is_some_and(|t| t.kind == TokenKind::Dot) {
        let Some(part) = tokens.get(i + 1).filter(|t| t.is_name()) else {
            return Err("incomplete qualified name");
        };
        parts.push(normalize_name(part));
        at = i + 1;
        i += 2;
    }

    let Some(name) = parts.pop() else {
        return Ok(None);
    };
    // catalog.schema.table: the catalog is always the current database
    let schema = parts.pop();
    Ok(Some(Relation { schema, name, at }))
}
