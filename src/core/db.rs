// query execution over sqlx, postgres only

use crate::Error;
use serde::Serialize;
use sqlx::{AnyPool, Column, Row, any::AnyPoolOptions};
use tracing::{debug, info};

/// Runs sql that already passed the safety gate.
pub trait QueryExecutor: Send + Sync + 'static {
    fn execute(&self, sql: &str) -> impl Future<Output = Result<QueryResult, Error>> + Send;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
        }
    }
}

// the safety gate only speaks postgres, so nothing else gets a pool
fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

pub struct Db {
    pool: AnyPool,
}

impl Db {
    pub async fn connect(url: &str, settings: PoolSettings) -> Result<Self, Error> {
        // never echo the url, it usually carries a password
        if !is_postgres_url(url) {
            return Err(Error::Config(
                "DATABASE_URL must be a postgres:// url".to_string(),
            ));
        }

        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .min_connections(settings.min_connections)
            .max_connections(settings.max_connections)
            .connect(url)
            .await?;

        info!(
            min = settings.min_connections,
            max = settings.max_connections,
            "database pool ready"
        );
        Ok(Self { pool })
    }

    /// Table and column listing handed to the sql generator.
    pub async fn schema(&self) -> Result<String, Error> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            r#"SELECT table_name::text, column_name::text, data_type::text
               FROM information_schema.columns
               WHERE table_schema = 'public'
               ORDER BY table_name, ordinal_position"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(format_schema(rows))
    }
}

impl QueryExecutor for Db {
    async fn execute(&self, sql: &str) -> Result<QueryResult, Error> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;

        let Some(first) = rows.first() else {
            return Ok(QueryResult::default());
        };
        let columns: Vec<String> = first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let rows: Vec<Vec<serde_json::Value>> = rows
            .iter()
            .map(|row| (0..columns.len()).map(|i| value_to_json(row, i)).collect())
            .collect();

        debug!(rows = rows.len(), "query executed");
        Ok(QueryResult {
            row_count: rows.len(),
            columns,
            rows,
        })
    }
}

// TABLE name (\n  column type\n ...)
fn format_schema(rows: Vec<(String, String, String)>) -> String {
    let mut out = String::new();
    let mut current: Option<String> = None;

    for (table, column, dtype) in rows {
        if current.as_deref() != Some(table.as_str()) {
            if current.is_some() {
                out.push_str(")\n\n");
            }
            out.push_str(&format!("TABLE {table} (\n"));
            current = Some(table);
        }
        out.push_str(&format!("  {column} {dtype}\n"));
    }

    if current.is_some() {
        out.push(')');
    }
    out
}

// the any driver only decodes a handful of types, try them most common first
fn value_to_json(row: &sqlx::any::AnyRow, index: usize) -> serde_json::Value {
    use serde_json::Value;
    use sqlx::ValueRef;

    if row.try_get_raw(index).map(|v| v.is_null()).unwrap_or(true) {
        return Value::Null;
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Value::String(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Value::Number(v.into());
    }
    if let Ok(v) = row.try_get::<i32, _>(index) {
        return Value::Number(v.into());
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Value::Bool(v);
    }
    Value::String("<unsupported>".to_string())
}
