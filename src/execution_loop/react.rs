//! ReAct Orchestrator
//!
//! Explicit state machine: Planning → Acting → Observing → (Planning |
//! Answering | Failed). Every provider call is charged to the retry budget,
//! and all retryable errors stay inside the loop as observations.

use crate::agent_prompts::{build_sql_prompt, PromptInput};
use crate::config::AgentConfig;
use crate::conversation::ConversationTurn;
use crate::error::AgentError;
use crate::execution_loop::error_classifier::SqlErrorClass;
use crate::execution_loop::observation::{Observation, RetryState, TimeoutStage};
use crate::llm::{CompletionClient, CompletionConfig};
use crate::plan_parser::{parse_query_plan, validate_read_only, QueryPlan};
use crate::schema_context::SchemaContext;
use crate::sql_engine::{QueryExecutor, ResultSet};
use itertools::Itertools;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Rows listed in a rendered answer before the remainder is summarized
const ANSWER_ROW_LIMIT: usize = 20;

/// Successful terminal payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    /// Result the answer was rendered from; `None` when the model answered directly
    pub result: Option<ResultSet>,
    pub sql: Option<String>,
}

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    /// The model never produced a usable plan
    MalformedPlan { detail: String },
    /// The database kept rejecting the generated statements
    DatabaseError { detail: String },
    DatabaseUnavailable { detail: String },
    ProviderUnavailable { detail: String },
    Timeout { stage: TimeoutStage },
    Cancelled,
}

impl FailureCause {
    fn from_observation(observation: Option<&Observation>) -> Self {
        match observation {
            Some(Observation::ExecutionError(failure)) => FailureCause::DatabaseError {
                detail: failure.to_string(),
            },
            Some(Observation::Timeout { stage }) => FailureCause::Timeout { stage: *stage },
            Some(Observation::ParseError { message, .. }) => FailureCause::MalformedPlan {
                detail: message.clone(),
            },
            Some(Observation::ResultSet(_)) | None => FailureCause::MalformedPlan {
                detail: "no plan was produced".to_string(),
            },
        }
    }

    pub fn detail(&self) -> String {
        match self {
            FailureCause::MalformedPlan { detail }
            | FailureCause::DatabaseError { detail }
            | FailureCause::DatabaseUnavailable { detail }
            | FailureCause::ProviderUnavailable { detail } => detail.clone(),
            FailureCause::Timeout { stage } => format!("timed out waiting for the {}", stage),
            FailureCause::Cancelled => "cancelled".to_string(),
        }
    }

    /// Message shown to the user. Distinguishes a question the model could
    /// not turn into a query from an unavailable database or provider.
    pub fn user_message(&self) -> String {
        match self {
            FailureCause::MalformedPlan { .. } => {
                "I could not understand the question well enough to build a query. Could you rephrase it?".to_string()
            }
            FailureCause::DatabaseError { detail } => format!(
                "I could not complete the request: the database rejected every query I tried (last error: {}).",
                detail
            ),
            FailureCause::DatabaseUnavailable { .. } => {
                "The database is unavailable right now. Please try again later.".to_string()
            }
            FailureCause::ProviderUnavailable { .. } => {
                "The language model service is unavailable right now. Please try again later.".to_string()
            }
            FailureCause::Timeout { stage } => format!(
                "I could not complete the request: the {} took too long to respond.",
                stage
            ),
            FailureCause::Cancelled => "The request was cancelled.".to_string(),
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::MalformedPlan { detail } => write!(f, "malformed plan: {}", detail),
            FailureCause::DatabaseError { detail } => write!(f, "database error: {}", detail),
            FailureCause::DatabaseUnavailable { detail } => {
                write!(f, "database unavailable: {}", detail)
            }
            FailureCause::ProviderUnavailable { detail } => {
                write!(f, "provider unavailable: {}", detail)
            }
            FailureCause::Timeout { stage } => write!(f, "timeout waiting for the {}", stage),
            FailureCause::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    Planning,
    Acting(QueryPlan),
    Observing(Observation),
    Answering(Answer),
    Failed(FailureCause),
}

impl LoopState {
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::Planning => "planning",
            LoopState::Acting(_) => "acting",
            LoopState::Observing(_) => "observing",
            LoopState::Answering(_) => "answering",
            LoopState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Answering(_) | LoopState::Failed(_))
    }
}

/// Terminal result of one `SqlAgent::run`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    /// Always `Answering` or `Failed`
    pub state: LoopState,
    /// Provider calls made
    pub attempts: u32,
    /// Last statement the model proposed
    pub sql: Option<String>,
    /// Observation turns produced during the run, in order
    pub transcript: Vec<ConversationTurn>,
    pub budget_exhausted: bool,
}

impl LoopOutcome {
    pub fn answer(&self) -> Option<&Answer> {
        match &self.state {
            LoopState::Answering(answer) => Some(answer),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureCause> {
        match &self.state {
            LoopState::Failed(cause) => Some(cause),
            _ => None,
        }
    }

    /// Answer text, or the failure's user-facing message.
    pub fn message(&self) -> String {
        match &self.state {
            LoopState::Answering(answer) => answer.text.clone(),
            LoopState::Failed(cause) => cause.user_message(),
            other => format!("Run stopped in non-terminal state '{}'", other.name()),
        }
    }

    /// The failure as an error, for callers that propagate with `?`.
    pub fn error(&self) -> Option<AgentError> {
        let cause = self.failure()?;
        if self.budget_exhausted {
            return Some(AgentError::RetryBudgetExhausted {
                attempts: self.attempts,
                cause: cause.to_string(),
            });
        }
        Some(match cause {
            FailureCause::ProviderUnavailable { detail } => {
                AgentError::ProviderUnavailable(detail.clone())
            }
            FailureCause::Cancelled => AgentError::Cancelled,
            FailureCause::Timeout { stage } => AgentError::Timeout(stage.to_string()),
            FailureCause::MalformedPlan { detail } => AgentError::Parse(detail.clone()),
            FailureCause::DatabaseError { detail } | FailureCause::DatabaseUnavailable { detail } => {
                AgentError::Execution(detail.clone())
            }
        })
    }
}

/// Text of a single cell as shown to the user.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Deterministic natural-language rendering of a result.
pub fn render_answer(result: &ResultSet) -> String {
    if result.is_empty() {
        return "No results found.".to_string();
    }
    if result.columns.len() == 1 && result.row_count() == 1 {
        return value_text(&result.rows[0][0]);
    }

    let mut lines: Vec<String> = result
        .rows
        .iter()
        .take(ANSWER_ROW_LIMIT)
        .enumerate()
        .map(|(i, row)| {
            let cells = result
                .columns
                .iter()
                .zip(row.iter())
                .map(|(column, value)| format!("{}={}", column, value_text(value)))
                .join(", ");
            format!("{}) {}", i + 1, cells)
        })
        .collect();

    let hidden = result.row_count().saturating_sub(ANSWER_ROW_LIMIT);
    if hidden > 0 {
        lines.push(format!("... and {} more row(s)", hidden));
    } else if result.truncated {
        lines.push("... (result truncated)".to_string());
    }
    lines.join("\n")
}

/// Drives one question through the repair loop.
pub struct SqlAgent {
    completion: Arc<dyn CompletionClient>,
    executor: Arc<dyn QueryExecutor>,
    schema: Arc<SchemaContext>,
    completion_config: CompletionConfig,
    config: AgentConfig,
}

impl SqlAgent {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        executor: Arc<dyn QueryExecutor>,
        schema: Arc<SchemaContext>,
        completion_config: CompletionConfig,
        config: AgentConfig,
    ) -> Self {
        Self {
            completion,
            executor,
            schema,
            completion_config,
            config,
        }
    }

    /// Run until `Answering` or `Failed`.
    pub async fn run(
        &self,
        question: &str,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> LoopOutcome {
        let mut retry = RetryState::new(self.config.max_attempts);
        let mut transcript = Vec::new();
        let mut last_sql: Option<String> = None;
        // Statement behind the pending observation; None when the model produced it
        let mut observed_sql: Option<String> = None;
        let mut executed = false;
        let mut budget_exhausted = false;
        let mut state = LoopState::Planning;

        while !state.is_terminal() {
            debug!(state = state.name(), attempt = retry.attempts_made, "Orchestrator step");
            state = match state {
                LoopState::Planning => {
                    executed = false;
                    if cancel.is_cancelled() {
                        LoopState::Failed(FailureCause::Cancelled)
                    } else if !retry.can_attempt() {
                        budget_exhausted = true;
                        warn!(
                            attempts = retry.attempts_made,
                            "Retry budget exhausted"
                        );
                        LoopState::Failed(FailureCause::from_observation(
                            retry.last_observation.as_ref(),
                        ))
                    } else {
                        self.plan(question, history, &mut retry, observed_sql.as_deref(), cancel)
                            .await
                    }
                }
                LoopState::Acting(plan) => {
                    executed = matches!(plan, QueryPlan::SqlStatement(_));
                    self.act(plan, retry.attempts_made, &mut last_sql, cancel).await
                }
                LoopState::Observing(observation) => {
                    info!(
                        attempt = retry.attempts_made,
                        kind = observation.kind(),
                        "{}",
                        observation.summary()
                    );
                    transcript.push(ConversationTurn::observation(observation.summary()));
                    match observation {
                        Observation::ResultSet(result) => LoopState::Answering(Answer {
                            text: render_answer(&result),
                            result: Some(result),
                            sql: last_sql.clone(),
                        }),
                        other => {
                            observed_sql = if executed { last_sql.clone() } else { None };
                            retry.observe(other);
                            LoopState::Planning
                        }
                    }
                }
                terminal => terminal,
            };
        }

        match &state {
            LoopState::Answering(_) => {
                info!("✅ Answered after {} attempt(s)", retry.attempts_made)
            }
            LoopState::Failed(cause) => {
                warn!(attempts = retry.attempts_made, "Run failed: {}", cause)
            }
            _ => {}
        }
        LoopOutcome {
            state,
            attempts: retry.attempts_made,
            sql: last_sql,
            transcript,
            budget_exhausted,
        }
    }

    /// One provider call producing the next state.
    async fn plan(
        &self,
        question: &str,
        history: &[ConversationTurn],
        retry: &mut RetryState,
        failed_sql: Option<&str>,
        cancel: &CancellationToken,
    ) -> LoopState {
        retry.record_attempt();
        let attempt = retry.attempts_made;
        info!(attempt, max_attempts = retry.max_attempts, "Planning");

        let prompt = build_sql_prompt(&PromptInput {
            question,
            history,
            schema: &self.schema,
            observation: retry.last_observation.as_ref(),
            failed_sql: retry.last_observation.as_ref().and(failed_sql),
            attempt,
            history_window: self.config.history_window,
            sample_rows: self.config.prompt_sample_rows,
        });
        debug!(attempt, prompt = %prompt, "SQL planning prompt");

        let call = tokio::time::timeout(
            self.config.completion_timeout,
            self.completion.complete(&prompt, &self.completion_config),
        );
        let raw = tokio::select! {
            _ = cancel.cancelled() => return LoopState::Failed(FailureCause::Cancelled),
            outcome = call => match outcome {
                Ok(Ok(raw)) => raw,
                Ok(Err(AgentError::Timeout(_))) | Err(_) => {
                    return LoopState::Observing(Observation::Timeout {
                        stage: TimeoutStage::Completion,
                    })
                }
                Ok(Err(e)) if e.is_retryable() => {
                    return LoopState::Observing(Observation::ParseError {
                        message: e.to_string(),
                        raw: String::new(),
                    })
                }
                Ok(Err(e)) => {
                    return LoopState::Failed(FailureCause::ProviderUnavailable {
                        detail: e.to_string(),
                    })
                }
            }
        };
        debug!(attempt, raw = %raw, "Completion received");

        match parse_query_plan(&raw) {
            Ok(plan) => LoopState::Acting(plan),
            Err(e) => LoopState::Observing(Observation::ParseError {
                message: e.to_string(),
                raw,
            }),
        }
    }

    async fn act(
        &self,
        plan: QueryPlan,
        attempt: u32,
        last_sql: &mut Option<String>,
        cancel: &CancellationToken,
    ) -> LoopState {
        let sql = match plan {
            QueryPlan::FinalAnswer(text) => {
                return LoopState::Answering(Answer {
                    text,
                    result: None,
                    sql: None,
                })
            }
            QueryPlan::ChartSpec(_) => {
                return LoopState::Observing(Observation::ParseError {
                    message: "expected a sql or answer plan, got a chart plan".to_string(),
                    raw: String::new(),
                })
            }
            QueryPlan::SqlStatement(sql) => sql,
        };
        *last_sql = Some(sql.clone());

        if let Err(failure) = validate_read_only(&sql) {
            return LoopState::Observing(Observation::ExecutionError(failure));
        }

        info!(attempt, sql = %sql, "Executing SQL");
        let call = tokio::time::timeout(self.config.query_timeout, self.executor.execute(&sql));
        tokio::select! {
            _ = cancel.cancelled() => LoopState::Failed(FailureCause::Cancelled),
            outcome = call => match outcome {
                Ok(Ok(result)) => LoopState::Observing(Observation::ResultSet(result)),
                Ok(Err(failure)) if failure.class.is_fatal() => {
                    LoopState::Failed(FailureCause::DatabaseUnavailable {
                        detail: failure.to_string(),
                    })
                }
                Ok(Err(failure)) if failure.class == SqlErrorClass::QueryCanceled => {
                    LoopState::Observing(Observation::Timeout { stage: TimeoutStage::Query })
                }
                Ok(Err(failure)) => LoopState::Observing(Observation::ExecutionError(failure)),
                Err(_) => LoopState::Observing(Observation::Timeout { stage: TimeoutStage::Query }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution_loop::error_classifier::ExecutionFailure;
    use serde_json::json;

    #[test]
    fn test_render_single_value() {
        let result = ResultSet::new(vec!["total".into()], vec![vec![json!(42)]]);
        assert_eq!(render_answer(&result), "42");

        let result = ResultSet::new(vec!["city".into()], vec![vec![json!("Uberaba")]]);
        assert_eq!(render_answer(&result), "Uberaba");
    }

    #[test]
    fn test_render_empty_and_rows() {
        assert_eq!(render_answer(&ResultSet::new(vec![], vec![])), "No results found.");

        let result = ResultSet::new(
            vec!["city".into(), "total".into()],
            vec![vec![json!("A"), json!(1)], vec![json!("B"), Value::Null]],
        );
        assert_eq!(render_answer(&result), "1) city=A, total=1\n2) city=B, total=NULL");
    }

    #[test]
    fn test_render_caps_rows() {
        let rows = (0..25).map(|i| vec![json!(i), json!(i * 2)]).collect();
        let result = ResultSet::new(vec!["a".into(), "b".into()], rows);
        let text = render_answer(&result);
        assert_eq!(text.lines().count(), ANSWER_ROW_LIMIT + 1);
        assert!(text.ends_with("... and 5 more row(s)"));
    }

    #[test]
    fn test_failure_cause_from_observation() {
        let failure = ExecutionFailure::new(SqlErrorClass::UndefinedColumn, "column \"x\" does not exist");
        let cause = FailureCause::from_observation(Some(&Observation::ExecutionError(failure)));
        assert!(matches!(cause, FailureCause::DatabaseError { .. }));

        let cause = FailureCause::from_observation(Some(&Observation::ParseError {
            message: "bad".into(),
            raw: String::new(),
        }));
        assert!(cause.user_message().contains("rephrase"));
    }

    #[test]
    fn test_user_messages_distinguish_causes() {
        let unavailable = FailureCause::DatabaseUnavailable { detail: "refused".into() };
        let malformed = FailureCause::MalformedPlan { detail: "bad".into() };
        assert!(unavailable.user_message().contains("unavailable"));
        assert_ne!(unavailable.user_message(), malformed.user_message());
    }

    #[test]
    fn test_outcome_error_mapping() {
        let outcome = LoopOutcome {
            state: LoopState::Failed(FailureCause::MalformedPlan { detail: "bad".into() }),
            attempts: 3,
            sql: None,
            transcript: Vec::new(),
            budget_exhausted: true,
        };
        assert!(matches!(
            outcome.error(),
            Some(AgentError::RetryBudgetExhausted { attempts: 3, .. })
        ));

        let outcome = LoopOutcome {
            state: LoopState::Failed(FailureCause::ProviderUnavailable { detail: "503".into() }),
            attempts: 1,
            sql: None,
            transcript: Vec::new(),
            budget_exhausted: false,
        };
        assert!(matches!(outcome.error(), Some(AgentError::ProviderUnavailable(_))));
    }
}
