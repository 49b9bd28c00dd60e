//! Observations and retry bookkeeping
//!
//! An observation is the immutable outcome of one Acting step. It is threaded
//! into the next Planning step and never modified afterwards.

use crate::execution_loop::error_classifier::ExecutionFailure;
use crate::sql_engine::ResultSet;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutStage {
    Completion,
    Query,
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutStage::Completion => write!(f, "language model"),
            TimeoutStage::Query => write!(f, "database"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    ResultSet(ResultSet),
    ExecutionError(ExecutionFailure),
    /// The model's output could not be turned into a plan
    ParseError { message: String, raw: String },
    Timeout { stage: TimeoutStage },
}

impl Observation {
    pub fn kind(&self) -> &'static str {
        match self {
            Observation::ResultSet(_) => "result_set",
            Observation::ExecutionError(_) => "execution_error",
            Observation::ParseError { .. } => "parse_error",
            Observation::Timeout { .. } => "timeout",
        }
    }

    /// One-line description used for observation turns and logs.
    pub fn summary(&self) -> String {
        match self {
            Observation::ResultSet(result) => format!(
                "Query returned {} row(s) with columns [{}]{}",
                result.row_count(),
                result.columns.join(", "),
                if result.truncated { " (truncated)" } else { "" }
            ),
            Observation::ExecutionError(failure) => format!("Query failed: {}", failure),
            Observation::ParseError { message, .. } => {
                format!("Could not parse the model output: {}", message)
            }
            Observation::Timeout { stage } => format!("Timed out waiting for the {}", stage),
        }
    }
}

/// Retry bookkeeping owned by one orchestrator run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    /// Provider calls made so far for this question
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub last_observation: Option<Observation>,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts_made: 0,
            max_attempts,
            last_observation: None,
        }
    }

    pub fn can_attempt(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    pub fn record_attempt(&mut self) {
        self.attempts_made += 1;
    }

    pub fn observe(&mut self, observation: Observation) {
        self.last_observation = Some(observation);
    }
}
