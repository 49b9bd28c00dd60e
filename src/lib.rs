pub mod agent_prompts;
pub mod chart;
pub mod config;
pub mod conversation;
pub mod data_assistant;
pub mod db;
pub mod error;
pub mod execution_loop;
pub mod extraction;
pub mod llm;
pub mod plan_parser;
pub mod schema_context;
pub mod sql_engine;

pub use chart::{ChartPlanner, ChartSpec};
pub use config::{AgentConfig, AppConfig, LlmConfig};
pub use conversation::{ConversationTurn, InMemoryMemoryStore, MemoryStore, Role};
pub use data_assistant::{AskResponse, AskStatus, AssistantDeps, DataAssistant};
pub use error::{AgentError, Result};
pub use execution_loop::react::{FailureCause, LoopOutcome, LoopState, SqlAgent};
pub use extraction::{ExtractedFields, ExtractionAgent, ExtractionRequest, OrderDraft};
pub use llm::{BoundedCompletionClient, CompletionClient, CompletionConfig, HttpCompletionClient};
pub use plan_parser::QueryPlan;
pub use schema_context::SchemaContext;
pub use sql_engine::{PgQueryExecutor, QueryExecutor, ResultSet};
