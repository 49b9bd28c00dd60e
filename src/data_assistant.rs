//! Data Assistant - conversational access to the database
//!
//! Session facade over the SQL agent, the chart planner and the order
//! extractor. Each call reads the session history from the memory store,
//! runs its own loop and appends the resulting turns. Order drafts are keyed
//! by session; nothing else is shared between sessions except the read-only
//! schema context and the bounded completion client.

use crate::agent_prompts::agent_turn_content;
use crate::chart::{wants_chart, ChartPlanner, ChartSpec};
use crate::config::AgentConfig;
use crate::conversation::{ConversationTurn, MemoryStore};
use crate::error::Result;
use crate::execution_loop::react::{FailureCause, LoopOutcome, SqlAgent};
use crate::extraction::{ExtractedFields, ExtractionAgent, ExtractionRequest, OrderDraft};
use crate::llm::{CompletionClient, CompletionConfig};
use crate::schema_context::SchemaContext;
use crate::sql_engine::QueryExecutor;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AskStatus {
    Ok,
    Failed,
}

/// Response from the data assistant
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    /// Natural language answer, or the failure message
    pub answer: String,

    pub chart: Option<ChartSpec>,

    /// Plotly-style figure rendered from `chart`
    pub figure: Option<Value>,

    /// Statement behind the answer
    pub sql: Option<String>,

    pub status: AskStatus,

    /// Provider calls spent on this question, chart included
    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
}

/// Shared handles every session uses.
#[derive(Clone)]
pub struct AssistantDeps {
    pub schema: Arc<SchemaContext>,
    pub completion: Arc<dyn CompletionClient>,
    pub executor: Arc<dyn QueryExecutor>,
    pub memory: Arc<dyn MemoryStore>,
    pub completion_config: CompletionConfig,
}

pub struct DataAssistant {
    sql_agent: SqlAgent,
    chart_planner: ChartPlanner,
    extractor: ExtractionAgent,
    memory: Arc<dyn MemoryStore>,
    /// Order being filled in, per session
    drafts: DashMap<String, ExtractedFields>,
    config: AgentConfig,
}

impl DataAssistant {
    pub fn new(deps: AssistantDeps, config: AgentConfig) -> Self {
        let sql_agent = SqlAgent::new(
            Arc::clone(&deps.completion),
            Arc::clone(&deps.executor),
            Arc::clone(&deps.schema),
            deps.completion_config.clone(),
            config.clone(),
        );
        let chart_planner = ChartPlanner::new(
            Arc::clone(&deps.completion),
            deps.completion_config.clone(),
            config.completion_timeout,
            config.chart_sample_rows,
        );
        let extractor = ExtractionAgent::new(
            Arc::clone(&deps.completion),
            deps.completion_config,
            Arc::clone(&deps.schema),
            config.clone(),
        );
        Self {
            sql_agent,
            chart_planner,
            extractor,
            memory: deps.memory,
            drafts: DashMap::new(),
            config,
        }
    }

    pub async fn ask(&self, question: &str, session_id: &str) -> Result<AskResponse> {
        self.ask_with_cancel(question, session_id, &CancellationToken::new())
            .await
    }

    /// Answer one question. A cancelled run persists nothing.
    pub async fn ask_with_cancel(
        &self,
        question: &str,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AskResponse> {
        info!(session = %session_id, "Question: {}", question);
        let history = self.memory.get(session_id).await?;

        let outcome = self.sql_agent.run(question, &history, cancel).await;
        let response = self.respond(question, &outcome, cancel).await;

        if matches!(response.failure, Some(FailureCause::Cancelled)) {
            warn!(session = %session_id, "Question cancelled, history left unchanged");
            return Ok(response);
        }

        self.memory
            .append(session_id, ConversationTurn::user(question))
            .await?;
        for turn in outcome.transcript {
            self.memory.append(session_id, turn).await?;
        }
        self.memory
            .append(
                session_id,
                ConversationTurn::agent(agent_turn_content(&response.answer, response.sql.as_deref())),
            )
            .await?;

        info!(
            session = %session_id,
            status = ?response.status,
            attempts = response.attempts,
            "Question handled"
        );
        Ok(response)
    }

    async fn respond(
        &self,
        question: &str,
        outcome: &LoopOutcome,
        cancel: &CancellationToken,
    ) -> AskResponse {
        let mut response = AskResponse {
            answer: outcome.message(),
            chart: None,
            figure: None,
            sql: outcome.sql.clone(),
            status: AskStatus::Failed,
            attempts: outcome.attempts,
            failure: outcome.failure().cloned(),
        };

        let answer = match outcome.answer() {
            Some(answer) => answer,
            None => return response,
        };
        response.status = AskStatus::Ok;
        response.sql = answer.sql.clone();

        let result = match &answer.result {
            Some(result) => result,
            None => return response,
        };
        if !(self.config.always_chart || wants_chart(question)) {
            return response;
        }
        if response.attempts >= self.config.max_attempts {
            info!("Skipping chart: retry budget already spent");
            return response;
        }
        if !ChartPlanner::can_plan(result) {
            return response;
        }

        response.attempts += 1;
        if let Some(spec) = self.chart_planner.plan(question, result, cancel).await {
            match spec.render(result) {
                Ok(figure) => {
                    response.figure = Some(figure);
                    response.chart = Some(spec);
                }
                Err(reason) => warn!("Chart could not be rendered: {}", reason),
            }
        }
        response
    }

    /// Start a new order draft from `text`, using the session history only
    /// to resolve references.
    pub async fn extract(&self, text: &str, session_id: &str) -> Result<OrderDraft> {
        self.extract_fields(text, session_id, Vec::new()).await
    }

    /// Treat `text` as the answer to the last follow-up: extract only the
    /// fields the session's draft still lacks and merge them in.
    pub async fn extract_follow_up(&self, text: &str, session_id: &str) -> Result<OrderDraft> {
        let focus_fields = self
            .drafts
            .get(session_id)
            .map(|draft| {
                draft
                    .missing_required()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        self.extract_fields(text, session_id, focus_fields).await
    }

    /// Extraction restricted to `focus_fields`. A focused extraction is
    /// merged into the session's draft; an unfocused one replaces it.
    pub async fn extract_fields(
        &self,
        text: &str,
        session_id: &str,
        focus_fields: Vec<String>,
    ) -> Result<OrderDraft> {
        let history = self.memory.get(session_id).await?;
        let focused = !focus_fields.is_empty();
        let request = ExtractionRequest::new(text, history, Utc::now().date_naive())
            .with_focus_fields(focus_fields);

        let fields = self.extractor.extract(&request).await?;

        let order = {
            let mut draft = self.drafts.entry(session_id.to_string()).or_default();
            if focused {
                draft.merge(&fields);
            } else {
                *draft = fields;
            }
            draft.clone()
        };
        let draft = OrderDraft::from_fields(order);

        self.memory
            .append(session_id, ConversationTurn::user(text))
            .await?;
        self.memory
            .append(session_id, ConversationTurn::agent(draft.message()))
            .await?;

        if draft.is_complete() {
            info!(session = %session_id, "Order complete, awaiting confirmation");
        } else {
            info!(session = %session_id, "Order still missing: {}", draft.missing.join(", "));
        }
        Ok(draft)
    }
}
