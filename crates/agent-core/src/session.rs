//! Session Management
//!
//! A session owns one conversation and serialises every interaction on it.
//! Concurrent `input` calls queue on the session lock, so the history is
//! only ever touched by one loop at a time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::message::{Conversation, Message};
use crate::reasoning::{Agent, Reply};

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A conversation bound to an agent
pub struct Session {
    id: SessionId,
    agent: Arc<Agent>,
    conversation: Mutex<Conversation>,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session
    pub fn new(agent: Arc<Agent>) -> Self {
        Self::with_conversation(agent, Conversation::new())
    }

    /// Resume from an existing conversation
    pub fn with_conversation(agent: Arc<Agent>, conversation: Conversation) -> Self {
        Self {
            id: SessionId::new(),
            agent,
            conversation: Mutex::new(conversation),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Run one interaction; waits for any interaction already in progress
    pub async fn input(&self, text: &str) -> Result<Reply> {
        let mut conversation = self.conversation.lock().await;
        tracing::debug!(session = %self.id, "Session input");
        self.agent.run(&mut conversation, text).await
    }

    /// Snapshot of the conversation so far
    pub async fn history(&self) -> Vec<Message> {
        self.conversation.lock().await.messages().to_vec()
    }

    /// Clear all messages except system prompt
    pub async fn reset(&self) {
        self.conversation.lock().await.clear_history();
    }
}
