// tests for the sql lexer

use querygate::{LexError, Lexer, TokenKind, Tokenize};

fn words(sql: &str) -> Vec<String> {
    Lexer
        .tokenize(sql)
        .unwrap()
        .iter()
        .filter(|t| t.kind == TokenKind::Word)
        .map(|t| t.text.to_string())
        .collect()
}

#[test]
fn test_basic_tokens() {
    let tokens = Lexer.tokenize("SELECT a.b, 1.5 FROM t WHERE x = $1;").unwrap();
    let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::Word,
            TokenKind::Word,
            TokenKind::Dot,
            TokenKind::Word,
            TokenKind::Comma,
            TokenKind::Number,
            TokenKind::Word,
            TokenKind::Word,
            TokenKind::Word,
            TokenKind::Word,
            TokenKind::Operator,
            TokenKind::Param,
            TokenKind::Semicolon,
        ]
    );
}

#[test]
fn test_offsets_are_byte_positions() {
    let tokens = Lexer.tokenize("SELECT  'é' , x").unwrap();
    assert_eq!(tokens[0].offset, 0);
    assert_eq!(tokens[1].offset, 8);
    assert_eq!(tokens[1].text, "'é'");
    // 'é' is two bytes
    assert_eq!(tokens[3].offset, 15);
}

#[test]
fn test_strings_hide_their_content() {
    assert_eq!(words("SELECT 'DROP TABLE x'"), vec!["SELECT"]);
    assert_eq!(words("SELECT 'it''s DROP'"), vec!["SELECT"]);
    assert_eq!(words("SELECT E'\\' DROP'"), vec!["SELECT"]);
    assert_eq!(words("SELECT U&'d\\0061ta DROP'"), vec!["SELECT"]);
    assert_eq!(words("SELECT $x$ DROP $x$, $$ DELETE $$"), vec!["SELECT"]);
}

#[test]
fn test_quoted_identifiers() {
    let tokens = Lexer.tokenize("SELECT \"we\"\"ird\" FROM U&\"t\"").unwrap();
    assert_eq!(tokens[1].kind, TokenKind::QuotedIdent);
    assert_eq!(tokens[1].text, "\"we\"\"ird\"");
    assert_eq!(tokens[3].kind, TokenKind::QuotedIdent);
    assert_eq!(tokens[3].text, "U&\"t\"");
}

#[test]
fn test_comments_are_dropped() {
    assert_eq!(words("SELECT -- DROP\n 1"), vec!["SELECT"]);
    assert_eq!(words("SELECT /* DROP */ 1"), vec!["SELECT"]);
    // block comments nest in postgres
    assert_eq!(words("SELECT /* a /* DROP */ still comment */ 1"), vec!["SELECT"]);
    // line comment running to the end of input is fine
    assert_eq!(words("SELECT 1 -- trailing"), vec!["SELECT"]);
}

#[test]
fn test_comment_splits_words() {
    assert_eq!(words("DR/**/OP"), vec!["DR", "OP"]);
}

#[test]
fn test_comment_markers_inside_strings() {
    assert_eq!(words("SELECT '--' , '/*' , x"), vec!["SELECT", "x"]);
}

#[test]
fn test_unterminated_states() {
    assert_eq!(
        Lexer.tokenize("SELECT 'abc"),
        Err(LexError::UnterminatedString { offset: 7 })
    );
    assert_eq!(
        Lexer.tokenize("SELECT \"abc"),
        Err(LexError::UnterminatedIdentifier { offset: 7 })
    );
    assert_eq!(
        Lexer.tokenize("SELECT /* /* */"),
        Err(LexError::UnterminatedComment { offset: 7 })
    );
    assert_eq!(
        Lexer.tokenize("SELECT $t$ abc $x$"),
        Err(LexError::UnterminatedDollarQuote { offset: 7 })
    );
}

#[test]
fn test_parenthesis_balance() {
    assert!(Lexer.tokenize("SELECT ((1) + (2))").is_ok());
    assert_eq!(
        Lexer.tokenize("SELECT (1"),
        Err(LexError::UnclosedParen { offset: 7 })
    );
    assert_eq!(
        Lexer.tokenize("SELECT 1)"),
        Err(LexError::UnbalancedParen { offset: 8 })
    );
    // parens inside strings and comments don't count
    assert!(Lexer.tokenize("SELECT '(' /* ) */").is_ok());
}

#[test]
fn test_unsupported_characters() {
    assert_eq!(
        Lexer.tokenize("SELECT `x`"),
        Err(LexError::UnsupportedChar { ch: '`', offset: 7 })
    );
    assert_eq!(
        Lexer.tokenize("SELECT \u{7f}"),
        Err(LexError::UnsupportedChar {
            ch: '\u{7f}',
            offset: 7
        })
    );
    // backtick inside a string is just data
    assert!(Lexer.tokenize("SELECT '`'").is_ok());
}

#[test]
fn test_non_ascii_identifiers() {
    assert_eq!(words("SELECT größe FROM tür"), vec!["SELECT", "größe", "FROM", "tür"]);
}

#[test]
fn test_numeric_forms() {
    let tokens = Lexer
        .tokenize("SELECT 1_000, 0x1F, 0o17, 0b101, 1.5e-3, .5, 2E10, 3.")
        .unwrap();
    let numbers: Vec<&str> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Number)
        .map(|t| t.text)
        .collect();
    assert_eq!(
        numbers,
        vec!["1_000", "0x1F", "0o17", "0b101", "1.5e-3", ".5", "2E10", "3."]
    );
}

#[test]
fn test_number_glued_to_word() {
    assert_eq!(
        Lexer.tokenize("SELECT 1FROM secret"),
        Err(LexError::TrailingJunk { offset: 7 })
    );
    assert_eq!(
        Lexer.tokenize("SELECT 1DELETE"),
        Err(LexError::TrailingJunk { offset: 7 })
    );
    assert!(Lexer.tokenize("SELECT 0x1G").is_err());
    assert!(Lexer.tokenize("SELECT 1e5x").is_err());
    assert_eq!(words("SELECT 1 FROM t"), vec!["SELECT", "FROM", "t"]);
}
