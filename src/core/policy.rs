// safety policy - built once at startup, read-only afterwards

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::statement::StatementType;

const MAX_POLICY_BYTES: usize = 1024 * 1024;

/// Configuration problems. These are fatal at startup, never per query.
#[derive(Error, Diagnostic, Debug)]
pub enum PolicyError {
    #[error("allowed_statement_types must not be empty")]
    #[diagnostic(help("allow at least SELECT"))]
    NoStatementTypes,

    #[error("OTHER cannot be allow-listed")]
    OtherAllowed,

    #[error("max_statement_length must be greater than zero")]
    ZeroLength,

    #[error("forbidden keyword {0:?} must be a single word")]
    InvalidKeyword(String),

    #[error("{0} contains a blank entry")]
    BlankEntry(&'static str),

    #[error("default_schema must not be blank")]
    BlankDefaultSchema,

    #[error("could not read policy file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("policy file is too large ({size} bytes; max {max} bytes)", max = MAX_POLICY_BYTES)]
    TooLarge { size: usize },

    #[error("policy file is not valid: {0}")]
    Parse(String),

    #[error("unsupported policy extension: {0}")]
    #[diagnostic(help("use a .toml or .json file"))]
    UnsupportedExtension(String),
}

/// On-disk shape of a policy. Every field is optional; omitted fields fall
/// back to the read-only defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyFile {
    #[serde(default = "default_allowed_statement_types")]
    pub allowed_statement_types: Vec<StatementType>,
    #[serde(default = "default_forbidden_keywords")]
    pub forbidden_keywords: Vec<String>,
    /// bytes
    #[serde(default = "default_max_statement_length")]
    pub max_statement_length: usize,
    #[serde(default = "default_strict_mode")]
    pub strict_mode: bool,
    #[serde(default)]
    pub allow_multi_statement: bool,
    #[serde(default)]
    pub allowed_schemas: Vec<String>,
    /// `table` (resolved against `default_schema`) or `schema.table`
    #[serde(default)]
    pub allowed_tables: Vec<String>,
    #[serde(default = "default_schema")]
    pub default_schema: String,
}

fn default_allowed_statement_types() -> Vec<StatementType> {
    vec![StatementType::Select]
}

fn default_forbidden_keywords() -> Vec<String> {
    [
        // ddl and dml verbs
        "DROP", "TRUNCATE", "ALTER", "CREATE", "GRANT", "REVOKE", "INSERT", "UPDATE", "DELETE",
        "MERGE", "COPY", "CALL", "DO", "EXECUTE", "PREPARE", "VACUUM", "REINDEX", "CLUSTER",
        "LOCK", "LISTEN", "NOTIFY", "LOAD", "IMPORT",
        // server side functions with side effects outside the query
        "PG_SLEEP", "PG_READ_FILE", "PG_READ_BINARY_FILE", "PG_LS_DIR", "PG_STAT_FILE",
        "PG_TERMINATE_BACKEND", "PG_CANCEL_BACKEND", "PG_RELOAD_CONF", "SET_CONFIG",
        "LO_IMPORT", "LO_EXPORT", "DBLINK", "DBLINK_EXEC",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

const fn default_max_statement_length() -> usize {
    10_000
}

const fn default_strict_mode() -> bool {
    true
}

fn default_schema() -> String {
    "public".to_string()
}

impl Default for PolicyFile {
    fn default() -> Self {
        Self {
            allowed_statement_types: default_allowed_statement_types(),
            forbidden_keywords: default_forbidden_keywords(),
            max_statement_length: default_max_statement_length(),
            strict_mode: default_strict_mode(),
            allow_multi_statement: false,
            allowed_schemas: Vec::new(),
            allowed_tables: Vec::new(),
            default_schema: default_schema(),
        }
    }
}

impl PolicyFile {
    fn check(&self) -> Result<(), PolicyError> {
        if self.allowed_statement_types.is_empty() {
            return Err(PolicyError::NoStatementTypes);
        }
        if self.allowed_statement_types.contains(&StatementType::Other) {
            return Err(PolicyError::OtherAllowed);
        }
        if self.max_statement_length == 0 {
            return Err(PolicyError::ZeroLength);
        }
        if let Some(bad) = self.forbidden_keywords.iter().find(|k| !is_single_word(k)) {
            return Err(PolicyError::InvalidKeyword(bad.clone()));
        }
        if self.allowed_schemas.iter().any(|s| s.trim().is_empty()) {
            return Err(PolicyError::BlankEntry("allowed_schemas"));
        }
        if self.allowed_tables.iter().any(|s| s.trim().is_empty()) {
            return Err(PolicyError::BlankEntry("allowed_tables"));
        }
        if self.default_schema.trim().is_empty() {
            return Err(PolicyError::BlankDefaultSchema);
        }
        Ok(())
    }
}

fn is_single_word(keyword: &str) -> bool {
    !keyword.is_empty()
        && keyword
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Immutable validation policy. Only constructible through validation, so
/// a value of this type always satisfies the startup invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicyFile", into = "PolicyFile")]
pub struct PolicyConfig {
    allowed_statement_types: BTreeSet<StatementType>,
    // upper case
    forbidden_keywords: BTreeSet<String>,
    max_statement_length: usize,
    strict_mode: bool,
    allow_multi_statement: bool,
    // lower case
    allowed_schemas: BTreeSet<String>,
    allowed_tables: BTreeSet<String>,
    default_schema: String,
}

impl TryFrom<PolicyFile> for PolicyConfig {
    type Error = PolicyError;

    fn try_from(file: PolicyFile) -> Result<Self, Self::Error> {
        file.check()?;
        Ok(Self::normalized(file))
    }
}

impl From<PolicyConfig> for PolicyFile {
    fn from(policy: PolicyConfig) -> Self {
        Self {
            allowed_statement_types: policy.allowed_statement_types.into_iter().collect(),
            forbidden_keywords: policy.forbidden_keywords.into_iter().collect(),
            max_statement_length: policy.max_statement_length,
            strict_mode: policy.strict_mode,
            allow_multi_statement: policy.allow_multi_statement,
            allowed_schemas: policy.allowed_schemas.into_iter().collect(),
            allowed_tables: policy.allowed_tables.into_iter().collect(),
            default_schema: policy.default_schema,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::normalized(PolicyFile::default())
    }
}

impl PolicyConfig {
    fn normalized(file: PolicyFile) -> Self {
        let lower = |items: Vec<String>| -> BTreeSet<String> {
            items
                .into_iter()
                .map(|s| s.trim().to_lowercase())
                .collect()
        };

        Self {
            allowed_statement_types: file.allowed_statement_types.into_iter().collect(),
            forbidden_keywords: file
                .forbidden_keywords
                .into_iter()
                .map(|k| k.to_uppercase())
                .collect(),
            max_statement_length: file.max_statement_length,
            strict_mode: file.strict_mode,
            allow_multi_statement: file.allow_multi_statement,
            allowed_schemas: lower(file.allowed_schemas),
            allowed_tables: lower(file.allowed_tables),
            default_schema: file.default_schema.trim().to_lowercase(),
        }
    }

    /// Load a policy from a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.len() > MAX_POLICY_BYTES {
            return Err(PolicyError::TooLarge { size: bytes.len() });
        }
        let raw = String::from_utf8(bytes).map_err(|e| PolicyError::Parse(e.to_string()))?;

        let file: PolicyFile = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => {
                serde_json::from_str(&raw).map_err(|e| PolicyError::Parse(e.to_string()))?
            }
            Some("toml") | None => {
                toml::from_str(&raw).map_err(|e| PolicyError::Parse(e.to_string()))?
            }
            Some(other) => return Err(PolicyError::UnsupportedExtension(other.to_string())),
        };

        file.try_into()
    }

    /// Copy of this policy with strict mode forced on or off. Meant for
    /// startup overrides, before the policy is shared.
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn allows(&self, kind: StatementType) -> bool {
        self.allowed_statement_types.contains(&kind)
    }

    pub fn forbids(&self, word: &str) -> bool {
        self.forbidden_keywords.contains(&word.to_uppercase())
    }

    /// Quoted function names don't fold, so only the lower case spelling
    /// names the same function as the forbidden keyword.
    pub fn forbids_function(&self, name: &str) -> bool {
        name == name.to_lowercase() && self.forbids(name)
    }

    pub fn allowed_statement_types(&self) -> &BTreeSet<StatementType> {
        &self.allowed_statement_types
    }

    pub fn forbidden_keywords(&self) -> &BTreeSet<String> {
        &self.forbidden_keywords
    }

    pub fn max_statement_length(&self) -> usize {
        self.max_statement_length
    }

    pub fn strict_mode(&self) -> bool {
        self.strict_mode
    }

    pub fn allow_multi_statement(&self) -> bool {
        self.allow_multi_statement
    }

    pub fn allowed_schemas(&self) -> &BTreeSet<String> {
        &self.allowed_schemas
    }

    pub fn allowed_tables(&self) -> &BTreeSet<String> {
        &self.allowed_tables
    }

    pub fn default_schema(&self) -> &str {
        &self.default_schema
    }

    /// True when either relation allow-list is in effect.
    pub fn restricts_relations(&self) -> bool {
        !self.allowed_schemas.is_empty() || !self.allowed_tables.is_empty()
    }
}
