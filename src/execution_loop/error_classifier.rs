//! Error Classifier
//!
//! Classifies database failures into a taxonomy for recovery.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgDatabaseError, PgErrorPosition};
use std::fmt;

lazy_static! {
    static ref QUOTED_IDENTIFIER: Regex = Regex::new(r#""([^"]+)""#).unwrap();
}

/// SQL error classification taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlErrorClass {
    Syntax,
    UndefinedColumn,
    UndefinedTable,
    UndefinedFunction,
    AmbiguousColumn,
    ConstraintViolation,
    DataError,
    ReadOnlyViolation,
    /// Statement timeout or explicit cancel on the server
    QueryCanceled,
    /// The database could not be reached at all
    ConnectionFailure,
    Other(String),
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlErrorClass::Syntax => write!(f, "SyntaxError"),
            SqlErrorClass::UndefinedColumn => write!(f, "UndefinedColumn"),
            SqlErrorClass::UndefinedTable => write!(f, "UndefinedTable"),
            SqlErrorClass::UndefinedFunction => write!(f, "UndefinedFunction"),
            SqlErrorClass::AmbiguousColumn => write!(f, "AmbiguousColumn"),
            SqlErrorClass::ConstraintViolation => write!(f, "ConstraintViolation"),
            SqlErrorClass::DataError => write!(f, "DataError"),
            SqlErrorClass::ReadOnlyViolation => write!(f, "ReadOnlyViolation"),
            SqlErrorClass::QueryCanceled => write!(f, "QueryCanceled"),
            SqlErrorClass::ConnectionFailure => write!(f, "ConnectionFailure"),
            SqlErrorClass::Other(code) => write!(f, "Other({})", code),
        }
    }
}

impl SqlErrorClass {
    /// Map a Postgres SQLSTATE code. Returns `None` for codes outside the
    /// taxonomy so the caller can fall back to the message.
    pub fn from_sqlstate(code: &str) -> Option<Self> {
        let class = match code {
            "42601" => SqlErrorClass::Syntax,
            "42703" => SqlErrorClass::UndefinedColumn,
            "42P01" => SqlErrorClass::UndefinedTable,
            "42883" => SqlErrorClass::UndefinedFunction,
            "42702" => SqlErrorClass::AmbiguousColumn,
            "25006" => SqlErrorClass::ReadOnlyViolation,
            "57014" => SqlErrorClass::QueryCanceled,
            c if c.starts_with("23") => SqlErrorClass::ConstraintViolation,
            c if c.starts_with("22") => SqlErrorClass::DataError,
            c if c.starts_with("08") || c == "57P03" => SqlErrorClass::ConnectionFailure,
            _ => return None,
        };
        Some(class)
    }

    /// Pattern matching on error messages
    pub fn from_message(message: &str) -> Self {
        let msg = message.to_lowercase();

        if msg.contains("syntax error") {
            return SqlErrorClass::Syntax;
        }

        if msg.contains("function") && msg.contains("does not exist") {
            return SqlErrorClass::UndefinedFunction;
        }

        if msg.contains("column") && (msg.contains("does not exist") || msg.contains("not found")) {
            return SqlErrorClass::UndefinedColumn;
        }

        if (msg.contains("relation") || msg.contains("table"))
            && (msg.contains("does not exist") || msg.contains("not found"))
        {
            return SqlErrorClass::UndefinedTable;
        }

        if msg.contains("ambiguous") {
            return SqlErrorClass::AmbiguousColumn;
        }

        if msg.contains("violates") && msg.contains("constraint") {
            return SqlErrorClass::ConstraintViolation;
        }

        if msg.contains("read-only transaction") || msg.contains("read-only statement") {
            return SqlErrorClass::ReadOnlyViolation;
        }

        if msg.contains("canceling statement") || msg.contains("statement timeout") {
            return SqlErrorClass::QueryCanceled;
        }

        if msg.contains("connection refused")
            || msg.contains("connection reset")
            || msg.contains("pool timed out")
        {
            return SqlErrorClass::ConnectionFailure;
        }

        if msg.contains("invalid input syntax") || msg.contains("division by zero") || msg.contains("out of range") {
            return SqlErrorClass::DataError;
        }

        SqlErrorClass::Other(message.to_string())
    }

    /// Failures that no rewrite of the statement can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SqlErrorClass::ConnectionFailure)
    }

    /// One-line repair hint for the next planning prompt.
    pub fn repair_hint(&self) -> &'static str {
        match self {
            SqlErrorClass::Syntax => "Fix the SQL syntax near the reported fragment.",
            SqlErrorClass::UndefinedColumn => {
                "A referenced column does not exist. Use only column names listed in the schema, quoted exactly as shown."
            }
            SqlErrorClass::UndefinedTable => {
                "A referenced table does not exist. Use only the tables listed in the schema."
            }
            SqlErrorClass::UndefinedFunction => {
                "A function or operator does not exist for these argument types. Cast the arguments or use a PostgreSQL built-in."
            }
            SqlErrorClass::AmbiguousColumn => {
                "A column reference is ambiguous. Qualify it as \"Table\".\"Column\"."
            }
            SqlErrorClass::ConstraintViolation => "Only read data; never insert or update rows.",
            SqlErrorClass::DataError => {
                "A value could not be converted. Check literals, casts and divisions."
            }
            SqlErrorClass::ReadOnlyViolation => "Only a single SELECT statement is allowed.",
            SqlErrorClass::QueryCanceled => {
                "The query took too long. Add filters, aggregate earlier or add a LIMIT."
            }
            SqlErrorClass::ConnectionFailure => "The database is unreachable.",
            SqlErrorClass::Other(_) => "Review the statement against the schema and fix the error.",
        }
    }
}

/// A failed statement, as the orchestrator observes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub class: SqlErrorClass,
    pub message: String,
    /// Offending part of the statement, when the database points at one
    pub fragment: Option<String>,
}

impl ExecutionFailure {
    pub fn new(class: SqlErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            fragment: None,
        }
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    /// Build from a bare message, as returned by drivers without error codes.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let class = SqlErrorClass::from_message(&message);
        let fragment = quoted_identifier(&message);
        Self {
            class,
            message,
            fragment,
        }
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)?;
        if let Some(ref fragment) = self.fragment {
            write!(f, " (near '{}')", fragment)?;
        }
        Ok(())
    }
}

/// Classify an sqlx error raised while running `sql`.
pub fn classify_sqlx_error(error: &sqlx::Error, sql: &str) -> ExecutionFailure {
    match error {
        sqlx::Error::Database(db_error) => {
            let message = db_error.message().to_string();
            let class = db_error
                .code()
                .and_then(|code| SqlErrorClass::from_sqlstate(&code))
                .unwrap_or_else(|| SqlErrorClass::from_message(&message));

            let fragment = db_error
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(|pg| match pg.position() {
                    Some(PgErrorPosition::Original(position)) => fragment_at(sql, position),
                    _ => None,
                })
                .or_else(|| quoted_identifier(&message));

            ExecutionFailure {
                class,
                message,
                fragment,
            }
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => {
            ExecutionFailure::new(SqlErrorClass::ConnectionFailure, error.to_string())
        }
        other => ExecutionFailure::from_message(other.to_string()),
    }
}

/// Token of `sql` starting at a 1-based character position.
fn fragment_at(sql: &str, position: usize) -> Option<String> {
    let fragment: String = sql
        .chars()
        .skip(position.saturating_sub(1))
        .take_while(|c| !c.is_whitespace() && *c != ',' && *c != ';')
        .take(60)
        .collect();
    if fragment.is_empty() {
        None
    } else {
        Some(fragment)
    }
}

fn quoted_identifier(message: &str) -> Option<String> {
    QUOTED_IDENTIFIER
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
