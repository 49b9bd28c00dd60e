//! Conversation history
//!
//! Turns are append-only and owned per session. The memory store itself is an
//! external collaborator; the in-memory store here backs the CLI and tests.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Observation,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Agent => write!(f, "agent"),
            Role::Observation => write!(f, "observation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(Role::Agent, content)
    }

    pub fn observation(content: impl Into<String>) -> Self {
        Self::new(Role::Observation, content)
    }
}

/// Key-value store of conversation history, keyed by session id.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Vec<ConversationTurn>>;

    async fn append(&self, session_id: &str, turn: ConversationTurn) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    sessions: DashMap<String, Vec<ConversationTurn>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn get(&self, session_id: &str) -> Result<Vec<ConversationTurn>> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|turns| turns.value().clone())
            .unwrap_or_default())
    }

    async fn append(&self, session_id: &str, turn: ConversationTurn) -> Result<()> {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .push(turn);
        Ok(())
    }
}

/// Keep only the last `window` turns.
pub fn recent_turns(history: &[ConversationTurn], window: usize) -> &[ConversationTurn] {
    let start = history.len().saturating_sub(window);
    &history[start..]
}
