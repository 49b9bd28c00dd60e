use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Timed out during {0}")]
    Timeout(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Retry budget exhausted after {attempts} attempts: {cause}")]
    RetryBudgetExhausted { attempts: u32, cause: String },

    #[error("Session cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Whether the orchestrator may feed this error back as an observation
    /// and try again within its budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Parse(_) | AgentError::Execution(_) | AgentError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_taxonomy() {
        assert!(AgentError::Parse("bad json".into()).is_retryable());
        assert!(AgentError::Timeout("completion".into()).is_retryable());
        assert!(!AgentError::ProviderUnavailable("503".into()).is_retryable());
        assert!(!AgentError::Cancelled.is_retryable());
        assert!(!AgentError::Config("missing key".into()).is_retryable());
    }
}
