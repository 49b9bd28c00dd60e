//! Deterministic stand-ins for the language model and the database.

#![allow(dead_code)]

use async_trait::async_trait;
use datachat::execution_loop::error_classifier::ExecutionFailure;
use datachat::llm::ProviderKind;
use datachat::schema_context::{ColumnContext, TableContext};
use datachat::{AgentConfig, AgentError, CompletionClient, CompletionConfig, QueryExecutor, ResultSet, SchemaContext};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Replays canned completions in order and records every prompt.
pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<Result<String, AgentError>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedCompletion {
    pub fn new(responses: Vec<Result<String, AgentError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            delay: None,
        }
    }

    pub fn texts(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|r| Ok(r.to_string())).collect())
    }

    /// Every call sleeps for `delay` before answering.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Scripted
    }

    async fn complete(&self, prompt: &str, _config: &CompletionConfig) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::ProviderUnavailable("script exhausted".to_string())))
    }
}

/// Replays canned query results in order and records every statement.
pub struct ScriptedExecutor {
    responses: Mutex<VecDeque<Result<ResultSet, ExecutionFailure>>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(responses: Vec<Result<ResultSet, ExecutionFailure>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, sql: &str) -> Result<ResultSet, ExecutionFailure> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ResultSet::new(Vec::new(), Vec::new())))
    }
}

pub fn result(columns: &[&str], rows: Vec<Vec<Value>>) -> ResultSet {
    ResultSet::new(columns.iter().map(|c| c.to_string()).collect(), rows)
}

pub fn sql_plan(sql: &str) -> String {
    serde_json::json!({"action": "sql", "sql": sql}).to_string()
}

pub fn answer_plan(answer: &str) -> String {
    serde_json::json!({"action": "answer", "answer": answer}).to_string()
}

pub fn fast_config(max_attempts: u32) -> AgentConfig {
    AgentConfig {
        max_attempts,
        completion_timeout: Duration::from_millis(200),
        query_timeout: Duration::from_millis(200),
        ..AgentConfig::default()
    }
}

pub fn sample_schema() -> SchemaContext {
    SchemaContext {
        materials: vec!["Fosfato Supersimples".to_string(), "Milho Moído".to_string()],
        ..SchemaContext::default()
    }
    .with_table(
        "orders",
        TableContext {
            description: "One row per sales order".to_string(),
            columns: vec![
                ColumnContext {
                    name: "city".to_string(),
                    data_type: Some("text".to_string()),
                    description: None,
                },
                ColumnContext {
                    name: "total".to_string(),
                    data_type: Some("numeric".to_string()),
                    description: Some("Order value in BRL".to_string()),
                },
            ],
            samples: Vec::new(),
        },
    )
}
