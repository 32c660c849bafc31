//! Agent configuration
//!
//! Supplied by the host at construction time. The loop itself never reads
//! the environment or config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

fn default_model() -> String {
    "llama3.2".into()
}

fn default_max_iterations() -> usize {
    10
}

fn default_max_retries() -> u32 {
    2
}

/// How the loop retries a backend call that failed with a retryable error
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed pause between attempts; zero retries immediately
    #[serde(default)]
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: 0,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Agent configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model identity, written to every interaction record
    #[serde(default = "default_model")]
    pub model: String,

    /// Credential for the backend; never serialized
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Maximum tool-call rounds per interaction
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Prepended as the first message unless history already starts with one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            base_url: None,
            max_iterations: default_max_iterations(),
            system_prompt: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("max_iterations", &self.max_iterations)
            .field("system_prompt", &self.system_prompt)
            .field("retry", &self.retry)
            .finish()
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }
        if self.model.trim().is_empty() {
            return Err(AgentError::Config("model identity must not be empty".into()));
        }
        Ok(())
    }
}
