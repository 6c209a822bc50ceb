// tests for policy loading and startup validation

use querygate::{PolicyConfig, PolicyError, PolicyFile, StatementType, load_policy};
use std::io::Write;

fn write_policy(ext: &str, body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(ext)
        .tempfile()
        .expect("temp policy");
    file.write_all(body.as_bytes()).expect("write policy");
    file
}

#[test]
fn test_default_policy_is_read_only() {
    let policy = PolicyConfig::default();
    assert!(policy.allows(StatementType::Select));
    assert!(!policy.allows(StatementType::Insert));
    assert!(policy.forbids("drop"));
    assert!(policy.forbids("Truncate"));
    assert!(policy.forbids("GRANT"));
    assert!(policy.forbids("alter"));
    assert!(!policy.forbids("select"));
    assert!(policy.strict_mode());
    assert!(!policy.allow_multi_statement());
    assert!(!policy.restricts_relations());
    assert_eq!(policy.default_schema(), "public");
}

#[test]
fn test_load_toml() {
    let file = write_policy(
        ".toml",
        r#"
allowed_statement_types = ["SELECT", "INSERT"]
forbidden_keywords = ["drop", "pg_sleep"]
max_statement_length = 2048
strict_mode = false
allowed_schemas = ["Public"]
allowed_tables = ["users", "public.orders"]
"#,
    );

    let policy = PolicyConfig::load(file.path()).unwrap();
    assert!(policy.allows(StatementType::Insert));
    assert_eq!(policy.forbidden_keywords().len(), 2);
    assert!(policy.forbids("PG_SLEEP"));
    assert!(!policy.forbids("delete"));
    assert_eq!(policy.max_statement_length(), 2048);
    assert!(!policy.strict_mode());
    assert!(policy.allowed_schemas().contains("public"));
    assert!(policy.allowed_tables().contains("public.orders"));
    assert!(policy.restricts_relations());
}

#[test]
fn test_load_json_with_defaults() {
    let file = write_policy(".json", r#"{ "allow_multi_statement": true }"#);
    let policy = PolicyConfig::load(file.path()).unwrap();
    assert!(policy.allow_multi_statement());
    // everything else falls back to defaults
    assert!(policy.forbids("drop"));
    assert_eq!(policy.max_statement_length(), 10_000);
}

#[test]
fn test_unknown_fields_rejected() {
    let file = write_policy(".toml", "strict = true\n");
    assert!(matches!(
        PolicyConfig::load(file.path()),
        Err(PolicyError::Parse(_))
    ));
}

#[test]
fn test_unknown_statement_type_rejected() {
    let file = write_policy(".toml", "allowed_statement_types = [\"select\"]\n");
    assert!(matches!(
        PolicyConfig::load(file.path()),
        Err(PolicyError::Parse(_))
    ));
}

#[test]
fn test_unsupported_extension() {
    let file = write_policy(".yaml", "strict_mode: true\n");
    assert!(matches!(
        PolicyConfig::load(file.path()),
        Err(PolicyError::UnsupportedExtension(ext)) if ext == "yaml"
    ));
}

#[test]
fn test_missing_file() {
    assert!(matches!(
        PolicyConfig::load("/definitely/not/here.toml"),
        Err(PolicyError::Read { .. })
    ));
}

#[test]
fn test_startup_invariants() {
    let empty_types = PolicyFile {
        allowed_statement_types: Vec::new(),
        ..PolicyFile::default()
    };
    assert!(matches!(
        PolicyConfig::try_from(empty_types),
        Err(PolicyError::NoStatementTypes)
    ));

    let other = PolicyFile {
        allowed_statement_types: vec![StatementType::Other],
        ..PolicyFile::default()
    };
    assert!(matches!(
        PolicyConfig::try_from(other),
        Err(PolicyError::OtherAllowed)
    ));

    let zero = PolicyFile {
        max_statement_length: 0,
        ..PolicyFile::default()
    };
    assert!(matches!(
        PolicyConfig::try_from(zero),
        Err(PolicyError::ZeroLength)
    ));

    let phrase = PolicyFile {
        forbidden_keywords: vec!["DROP TABLE".to_string()],
        ..PolicyFile::default()
    };
    assert!(matches!(
        PolicyConfig::try_from(phrase),
        Err(PolicyError::InvalidKeyword(k)) if k == "DROP TABLE"
    ));

    let blank = PolicyFile {
        allowed_tables: vec!["  ".to_string()],
        ..PolicyFile::default()
    };
    assert!(matches!(
        PolicyConfig::try_from(blank),
        Err(PolicyError::BlankEntry("allowed_tables"))
    ));
}

#[test]
fn test_invariants_apply_to_files_too() {
    let file = write_policy(".toml", "allowed_statement_types = []\n");
    assert!(matches!(
        PolicyConfig::load(file.path()),
        Err(PolicyError::NoStatementTypes)
    ));
}

#[test]
fn test_policy_round_trips_through_toml() {
    let policy = PolicyConfig::default();
    let text = toml::to_string(&policy).unwrap();
    let back: PolicyConfig = toml::from_str(&text).unwrap();
    assert_eq!(policy, back);
}

#[test]
fn test_strict_mode_override() {
    let file = write_policy(".toml", "strict_mode = true\n");
    let policy = load_policy(Some(file.path()), Some(false)).unwrap();
    assert!(!policy.strict_mode());

    let policy = load_policy(None, None).unwrap();
    assert_eq!(policy, PolicyConfig::default());
}
