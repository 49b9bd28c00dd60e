//! Query Executor
//!
//! Runs one validated statement against the relational store and returns
//! either a result set or a classified failure. Read path only; no retry.

use crate::execution_loop::error_classifier::{classify_sqlx_error, ExecutionFailure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static NULL: Value = Value::Null;

/// Rows and column names returned by a successful statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,

    pub rows: Vec<Vec<Value>>,

    /// True when rows past the executor's row limit were dropped
    #[serde(default)]
    pub truncated: bool,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            truncated: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }

    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).unwrap_or(&NULL))
                .collect(),
        )
    }

    /// First `limit` rows as JSON objects keyed by column name.
    pub fn to_records(&self, limit: usize) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .take(limit)
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Map<String, Value>>()
            })
            .collect()
    }

    /// Keep at most `limit` rows.
    pub fn truncate(&mut self, limit: usize) {
        if self.rows.len() > limit {
            self.rows.truncate(limit);
            self.truncated = true;
        }
    }
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> std::result::Result<ResultSet, ExecutionFailure>;
}

/// Postgres executor. Every statement runs in its own read-only
/// transaction that is always rolled back.
pub struct PgQueryExecutor {
    pool: PgPool,
    statement_timeout: Duration,
    row_limit: usize,
}

impl PgQueryExecutor {
    pub fn new(pool: PgPool, statement_timeout: Duration, row_limit: usize) -> Self {
        Self {
            pool,
            statement_timeout,
            row_limit,
        }
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    async fn execute(&self, sql: &str) -> std::result::Result<ResultSet, ExecutionFailure> {
        let started = Instant::now();
        debug!(sql = %sql, "Executing statement");

        let mut tx = self.pool.begin().await.map_err(|e| classify_sqlx_error(&e, sql))?;

        let guard = format!(
            "SET TRANSACTION READ ONLY; SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        );
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&guard))
            .await
            .map_err(|e| classify_sqlx_error(&e, &guard))?;

        // Simple protocol: every value arrives in text form.
        let fetched = sqlx::Executor::fetch_all(&mut *tx, sqlx::raw_sql(sql)).await;

        if let Err(e) = tx.rollback().await {
            warn!("Rollback of read-only transaction failed: {}", e);
        }

        let rows = fetched.map_err(|e| classify_sqlx_error(&e, sql))?;

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut result = ResultSet::new(columns, rows.iter().map(row_to_values).collect());
        result.truncate(self.row_limit);

        info!(
            "✅ Statement returned {} rows{} in {}ms",
            result.row_count(),
            if result.truncated { " (truncated)" } else { "" },
            started.elapsed().as_millis()
        );
        Ok(result)
    }
}

/// Decode a simple-protocol row into JSON values.
pub fn row_to_values(row: &PgRow) -> Vec<Value> {
    row.columns()
        .iter()
        .map(|col| {
            let text: Option<String> = row.try_get_unchecked(col.ordinal()).unwrap_or(None);
            match text {
                Some(text) => text_to_json(col.type_info().name(), text),
                None => Value::Null,
            }
        })
        .collect()
}

/// Convert a text-format Postgres value to JSON based on its type name.
pub fn text_to_json(type_name: &str, text: String) -> Value {
    match type_name {
        "BOOL" => match text.as_str() {
            "t" | "true" => Value::Bool(true),
            "f" | "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        "INT2" | "INT4" | "INT8" | "OID" => text
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or(Value::String(text)),
        "FLOAT4" | "FLOAT8" | "NUMERIC" | "MONEY" => {
            let cleaned = text.replace(['$', ','], "");
            cleaned
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::String(text))
        }
        "JSON" | "JSONB" => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_to_json_by_type() {
        assert_eq!(text_to_json("INT8", "42".to_string()), json!(42));
        assert_eq!(text_to_json("NUMERIC", "1234.50".to_string()), json!(1234.5));
        assert_eq!(text_to_json("BOOL", "t".to_string()), json!(true));
        assert_eq!(text_to_json("JSONB", r#"{"a":1}"#.to_string()), json!({"a": 1}));
        assert_eq!(text_to_json("TEXT", "Seattle".to_string()), json!("Seattle"));
        assert_eq!(text_to_json("NUMERIC", "NaN".to_string()), json!("NaN"));
        assert_eq!(text_to_json("DATE", "2024-03-01".to_string()), json!("2024-03-01"));
    }

    // Compiles only while the executor future can cross threads.
    #[allow(dead_code)]
    fn spawn_statement(executor: std::sync::Arc<PgQueryExecutor>) {
        tokio::spawn(async move { executor.execute("SELECT 1").await });
    }

    #[test]
    fn test_pg_executor_is_shareable() {
        fn assert_shared<T: QueryExecutor + Send + Sync + 'static>() {}
        assert_shared::<PgQueryExecutor>();
    }

    #[test]
    fn test_result_set_helpers() {
        let mut result = ResultSet::new(
            vec!["city".to_string(), "Total".to_string()],
            vec![
                vec![json!("Seattle"), json!(37.7)],
                vec![json!("Phoenix"), json!(8.0)],
                vec![json!("Miami"), json!(61.9)],
            ],
        );
        assert_eq!(result.column_index("total"), Some(1));
        assert_eq!(result.column_values("city").unwrap().len(), 3);

        let records = result.to_records(1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["city"], json!("Seattle"));

        result.truncate(2);
        assert!(result.truncated);
        assert_eq!(result.row_count(), 2);
    }
}
