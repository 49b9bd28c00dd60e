//! Plan Parser
//!
//! Turns raw model text into a structured plan and rejects anything that is
//! not a single read-only query. Failures here are observations for the
//! orchestrator, never fatal.

use crate::chart::ChartSpec;
use crate::error::{AgentError, Result};
use crate::execution_loop::error_classifier::{ExecutionFailure, SqlErrorClass};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::debug;

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"```(?:[a-zA-Z]+)?\s*([\s\S]*?)\s*```").unwrap();
    static ref WRITE_KEYWORD: Regex = Regex::new(
        r"(?i)\b(insert|update|delete|merge|upsert|drop|create|alter|truncate|grant|revoke|copy|vacuum|reindex|call|do|lock|comment|refresh|cluster|set|reset)\b"
    )
    .unwrap();
    static ref STRING_LITERAL: Regex = Regex::new(r"'(?:[^']|'')*'").unwrap();
    static ref QUOTED_IDENT: Regex = Regex::new(r#""(?:[^"]|"")*""#).unwrap();
}

/// What the model decided to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryPlan {
    SqlStatement(String),
    ChartSpec(ChartSpec),
    FinalAnswer(String),
}

impl QueryPlan {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryPlan::SqlStatement(_) => "sql",
            QueryPlan::ChartSpec(_) => "chart",
            QueryPlan::FinalAnswer(_) => "answer",
        }
    }
}

/// Strip Markdown code fences the model may wrap its answer in.
pub fn clean_llm_output(raw: &str) -> String {
    if !raw.contains("```") {
        return raw.trim().to_string();
    }
    match CODE_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim().to_string(),
        None => raw.replace("```", "").trim().to_string(),
    }
}

/// Outermost `{...}` of a response. Provider error pages come back as HTML
/// and are rejected outright.
pub fn extract_json_object(text: &str) -> Result<&str> {
    let trimmed = text.trim();
    let lowered = trimmed.to_lowercase();
    if lowered.starts_with("<!doctype") || lowered.starts_with("<html") {
        return Err(AgentError::Parse(
            "response is an HTML page, not JSON".to_string(),
        ));
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => Ok(&trimmed[start..=end]),
        _ => Err(AgentError::Parse("no JSON object in response".to_string())),
    }
}

fn looks_like_sql(text: &str) -> bool {
    let head = text.trim_start().to_uppercase();
    head.starts_with("SELECT") || head.starts_with("WITH") || head.starts_with("(SELECT")
}

fn normalize_sql(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim().to_string()
}

/// Parse a model response into a plan.
///
/// Accepted shapes: `{"action": "sql", "sql": ...}`,
/// `{"action": "answer", "answer": ...}`, `{"action": "chart", ...}` or a bare
/// SQL statement.
pub fn parse_query_plan(raw: &str) -> Result<QueryPlan> {
    let cleaned = clean_llm_output(raw);
    if cleaned.is_empty() {
        return Err(AgentError::Parse("empty response".to_string()));
    }

    if looks_like_sql(&cleaned) {
        return Ok(QueryPlan::SqlStatement(normalize_sql(&cleaned)));
    }

    let object = extract_json_object(&cleaned)?;
    let value: Value = serde_json::from_str(object)
        .map_err(|e| AgentError::Parse(format!("invalid JSON: {}", e)))?;

    let action = value
        .get("action")
        .and_then(Value::as_str)
        .map(|a| a.trim().to_lowercase());

    let plan = match action.as_deref() {
        Some("sql") | Some("query") => QueryPlan::SqlStatement(required_text(&value, "sql")?),
        Some("answer") | Some("final_answer") => {
            QueryPlan::FinalAnswer(required_text(&value, "answer")?)
        }
        Some("chart") => {
            let spec: ChartSpec = serde_json::from_value(value.clone())
                .map_err(|e| AgentError::Parse(format!("invalid chart plan: {}", e)))?;
            QueryPlan::ChartSpec(spec)
        }
        Some(other) => {
            return Err(AgentError::Parse(format!(
                "unknown action '{}', expected sql, answer or chart",
                other
            )))
        }
        None if value.get("sql").is_some() => {
            QueryPlan::SqlStatement(required_text(&value, "sql")?)
        }
        None if value.get("answer").is_some() => {
            QueryPlan::FinalAnswer(required_text(&value, "answer")?)
        }
        None if value.get("chart_type").is_some() || value.get("type").is_some() => {
            let spec: ChartSpec = serde_json::from_value(value.clone())
                .map_err(|e| AgentError::Parse(format!("invalid chart plan: {}", e)))?;
            QueryPlan::ChartSpec(spec)
        }
        None => {
            return Err(AgentError::Parse(
                "JSON plan has no action field".to_string(),
            ))
        }
    };

    let plan = match plan {
        QueryPlan::SqlStatement(sql) => QueryPlan::SqlStatement(normalize_sql(&sql)),
        other => other,
    };
    debug!("Parsed {} plan", plan.kind());
    Ok(plan)
}

fn required_text(value: &Value, key: &str) -> Result<String> {
    match value.get(key).and_then(Value::as_str).map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(AgentError::Parse(format!(
            "field '{}' is missing or empty",
            key
        ))),
    }
}

/// Accept exactly one read-only query.
///
/// Statements sqlparser cannot parse get a keyword check instead, so dialect
/// features it lacks still reach the database, which reports the real error.
pub fn validate_read_only(sql: &str) -> std::result::Result<(), ExecutionFailure> {
    match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        Ok(statements) => {
            if statements.len() != 1 {
                return Err(ExecutionFailure::new(
                    SqlErrorClass::ReadOnlyViolation,
                    format!("expected exactly one statement, found {}", statements.len()),
                ));
            }
            match &statements[0] {
                Statement::Query(_) => Ok(()),
                other => {
                    let text = other.to_string();
                    let keyword = text.split_whitespace().next().unwrap_or("statement").to_uppercase();
                    Err(ExecutionFailure::new(
                        SqlErrorClass::ReadOnlyViolation,
                        format!("only SELECT queries are allowed, got {}", keyword),
                    )
                    .with_fragment(keyword))
                }
            }
        }
        Err(e) => {
            debug!("sqlparser could not parse statement, using keyword guard: {}", e);
            keyword_guard(sql)
        }
    }
}

fn keyword_guard(sql: &str) -> std::result::Result<(), ExecutionFailure> {
    if !looks_like_sql(sql) {
        return Err(ExecutionFailure::new(
            SqlErrorClass::ReadOnlyViolation,
            "statement must start with SELECT or WITH",
        ));
    }

    let without_literals = STRING_LITERAL.replace_all(sql, "''");
    let without_literals = QUOTED_IDENT.replace_all(&without_literals, "\"\"");

    if without_literals.contains(';') {
        return Err(ExecutionFailure::new(
            SqlErrorClass::ReadOnlyViolation,
            "only one statement is allowed",
        ));
    }
    if let Some(found) = WRITE_KEYWORD.find(&without_literals) {
        return Err(ExecutionFailure::new(
            SqlErrorClass::ReadOnlyViolation,
            format!("'{}' is not allowed in a read-only query", found.as_str()),
        )
        .with_fragment(found.as_str().to_string()));
    }
    Ok(())
}
