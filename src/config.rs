//! Configuration
//!
//! Everything is read once at startup (from `.env` and the process
//! environment) and handed to constructors as plain values.

use crate::error::{AgentError, Result};
use crate::llm::{CompletionConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Knobs of the planning/repair loop shared by every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard upper bound on provider calls per user question
    pub max_attempts: u32,

    pub completion_timeout: Duration,

    pub query_timeout: Duration,

    /// Concurrent provider calls allowed across all sessions
    pub max_concurrent_completions: usize,

    /// Number of most recent turns serialized into prompts
    pub history_window: usize,

    /// Rows kept from a result set
    pub row_limit: usize,

    /// Rows of the result set shown to the chart planner
    pub chart_sample_rows: usize,

    /// Sample rows per table included in prompts
    pub prompt_sample_rows: usize,

    /// Plan a chart for every successful answer, not only when asked
    pub always_chart: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            completion_timeout: Duration::from_secs(60),
            query_timeout: Duration::from_secs(30),
            max_concurrent_completions: 4,
            history_window: 10,
            row_limit: 500,
            chart_sample_rows: 50,
            prompt_sample_rows: 3,
            always_chart: false,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_attempts: env_parse("AGENT_MAX_ATTEMPTS", defaults.max_attempts)?,
            completion_timeout: Duration::from_secs(env_parse(
                "AGENT_COMPLETION_TIMEOUT_SECS",
                defaults.completion_timeout.as_secs(),
            )?),
            query_timeout: Duration::from_secs(env_parse(
                "AGENT_QUERY_TIMEOUT_SECS",
                defaults.query_timeout.as_secs(),
            )?),
            max_concurrent_completions: env_parse(
                "AGENT_MAX_CONCURRENT_COMPLETIONS",
                defaults.max_concurrent_completions,
            )?,
            history_window: env_parse("AGENT_HISTORY_WINDOW", defaults.history_window)?,
            row_limit: env_parse("AGENT_ROW_LIMIT", defaults.row_limit)?,
            chart_sample_rows: defaults.chart_sample_rows,
            prompt_sample_rows: env_parse("AGENT_PROMPT_SAMPLE_ROWS", defaults.prompt_sample_rows)?,
            always_chart: env_parse("AGENT_ALWAYS_CHART", defaults.always_chart)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(AgentError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.max_concurrent_completions == 0 {
            return Err(AgentError::Config(
                "max_concurrent_completions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Provider selection and credentials.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Azure only
    pub api_version: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self> {
        let provider: ProviderKind = env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "openai".to_string())
            .parse()?;
        let temperature = env_parse("LLM_TEMPERATURE", 0.0_f32)?;
        let max_tokens = env_parse("LLM_MAX_TOKENS", 1500_u32)?;

        let (api_key, base_url, model, api_version) = match provider {
            ProviderKind::OpenAi => (
                required("OPENAI_API_KEY")?,
                env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                None,
            ),
            ProviderKind::AzureOpenAi => (
                env::var("AZURE_OPENAI_API_KEY").or_else(|_| required("OPENAI_API_KEY"))?,
                required("AZURE_OPENAI_ENDPOINT")?,
                required("AZURE_OPENAI_DEPLOYMENT_NAME")?,
                Some(required("OPENAI_API_VERSION")?),
            ),
            ProviderKind::Gemini => (
                required("GOOGLE_API_KEY")?,
                env::var("GEMINI_BASE_URL")
                    .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string()),
                env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
                None,
            ),
            ProviderKind::Scripted => {
                return Err(AgentError::Config(
                    "the scripted provider cannot be configured from the environment".to_string(),
                ))
            }
        };

        Ok(Self {
            provider,
            api_key: api_key.trim().to_string(),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            model: model.trim().to_string(),
            api_version,
            temperature,
            max_tokens,
        })
    }

    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Top-level configuration of the binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub database_url: String,
    /// JSON overlay with table descriptions, glossary and material catalog
    pub schema_context_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let agent = AgentConfig::from_env()?;
        agent.validate()?;

        Ok(Self {
            llm: LlmConfig::from_env()?,
            agent,
            database_url: required("DATABASE_URL")?,
            schema_context_path: env::var("SCHEMA_CONTEXT_PATH").ok().map(PathBuf::from),
        })
    }
}

fn required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| AgentError::Config(format!("{} is not set", key)))
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| AgentError::Config(format!("{} has an invalid value: '{}'", key, raw))),
        _ => Ok(default),
    }
}
