//! Ollama Model Backend
//!
//! Implementation of `ModelBackend` for local Ollama inference. Tool calling
//! goes through the text protocol in [`crate::protocol`].

use agent_core::{AgentConfig, BackendError, LlmResponse, Message, ModelBackend, Role, ToolSpec};
use async_trait::async_trait;
use ollama_rs::{
    Ollama,
    generation::chat::{ChatMessage, MessageRole, request::ChatMessageRequest},
};

use crate::protocol::{parse_response, render_history};

/// Ollama backend configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Model to chat with
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            model: "llama3.2".into(),
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = std::env::var("OLLAMA_HOST").unwrap_or(defaults.host);
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);
        let model = std::env::var("OLLAMA_MODEL").unwrap_or(defaults.model);

        Self { host, port, model }
    }

    /// Take model identity and `base_url` (e.g. `http://gpu-box:11434`)
    /// from the agent configuration. A missing scheme means `http`.
    pub fn from_agent_config(config: &AgentConfig) -> Self {
        let mut ollama = Self {
            model: config.model.clone(),
            ..Self::default()
        };

        if let Some(url) = config.base_url.as_deref() {
            let url = url.trim_end_matches('/');
            let (scheme, authority) = url.split_once("://").unwrap_or(("http", url));
            match authority.rsplit_once(':').map(|(h, p)| (h, p.parse::<u16>())) {
                Some((host, Ok(port))) => {
                    ollama.host = format!("{scheme}://{host}");
                    ollama.port = port;
                }
                _ => ollama.host = format!("{scheme}://{authority}"),
            }
        }

        ollama
    }
}

/// Ollama model backend
pub struct OllamaBackend {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaBackend {
    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Self {
        Self {
            client: Ollama::new(&config.host, config.port),
            config,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Self {
        Self::from_config(OllamaConfig::default())
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Check if the Ollama server is reachable
    pub async fn health_check(&self) -> bool {
        match self.client.list_local_models().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                false
            }
        }
    }

    /// Names of locally available models
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| BackendError::retryable(e.to_string()))?;

        Ok(models.into_iter().map(|m| m.name).collect())
    }

    /// Convert agent messages to Ollama format
    fn convert_messages(history: &[Message], tools: &[ToolSpec]) -> Vec<ChatMessage> {
        render_history(history, tools)
            .into_iter()
            .map(|(role, content)| {
                let role = match role {
                    Role::System => MessageRole::System,
                    Role::Assistant => MessageRole::Assistant,
                    Role::User | Role::Tool => MessageRole::User,
                };
                ChatMessage::new(role, content)
            })
            .collect()
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    async fn chat(&self, history: &[Message], tools: &[ToolSpec]) -> Result<LlmResponse, BackendError> {
        let request = ChatMessageRequest::new(self.config.model.clone(), Self::convert_messages(history, tools));

        tracing::debug!(model = %self.config.model, messages = history.len(), "Sending chat request to Ollama");

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| BackendError::retryable(format!("Ollama request failed: {e}")))?;

        Ok(parse_response(&response.message.content))
    }
}
