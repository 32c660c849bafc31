//! Error Types

use std::path::PathBuf;

use thiserror::Error;

use crate::message::Message;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Failure talking to a model backend.
///
/// The `retryable` flag is set by the backend: transport hiccups and rate
/// limits are retryable, malformed requests and auth failures are not.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub retryable: bool,
    pub message: String,
}

impl BackendError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

/// Failure raised by a tool invocation.
///
/// Never leaves the orchestration loop: it is folded into the tool result
/// the model sees.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("execution failed: {0}")]
    Execution(String),
}

impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        ToolError::Execution(format!("{err:#}"))
    }
}

/// Failure persisting an interaction record
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("invalid agent identity for storage: {0:?}")]
    InvalidIdentity(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// The model backend failed and retries (if any) were exhausted
    #[error("Backend error after {attempts} attempt(s): {error}")]
    Backend {
        #[source]
        error: BackendError,
        attempts: u32,
        history: Vec<Message>,
    },

    /// The backend returned something the loop cannot act on
    #[error("Protocol violation: {message}")]
    ProtocolViolation {
        message: String,
        history: Vec<Message>,
    },

    /// The loop ran `max` tool-call rounds without a final answer
    #[error("Maximum iterations ({max}) exceeded")]
    MaxIterationsExceeded { max: usize, history: Vec<Message> },

    /// A tool with this name is already registered
    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Backend { error, .. } if error.retryable)
    }

    /// Conversation state at the moment the interaction failed.
    pub fn partial_history(&self) -> Option<&[Message]> {
        match self {
            AgentError::Backend { history, .. }
            | AgentError::ProtocolViolation { history, .. }
            | AgentError::MaxIterationsExceeded { history, .. } => Some(history),
            AgentError::DuplicateTool(_) | AgentError::Config(_) => None,
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Backend { error, .. } if error.retryable => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            AgentError::Backend { error, .. } => {
                format!("The AI service encountered an error: {}", error.message)
            }
            AgentError::ProtocolViolation { .. } => {
                "The AI service returned a malformed response.".into()
            }
            AgentError::MaxIterationsExceeded { .. } => {
                "The request took too long to process. Please try a simpler query.".into()
            }
            AgentError::DuplicateTool(name) => format!("The tool '{name}' is registered twice."),
            AgentError::Config(msg) => format!("Invalid configuration: {msg}"),
        }
    }
}
