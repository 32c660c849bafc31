//! Model Backend Strategy Pattern
//!
//! Defines the one operation every language-model backend must provide,
//! allowing the orchestration loop to work with any backend without code
//! changes. Backends hold no conversation state: everything they need
//! travels in `history`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{LlmResponse, ModelBackend};
//!
//! let backend = OllamaBackend::from_env();
//! match backend.chat(&history, &registry.list_specs()).await? {
//!     LlmResponse::Final(text) => println!("{text}"),
//!     LlmResponse::ToolCalls(calls) => dispatch(calls).await,
//! }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::BackendError;
use crate::message::{Message, ToolCallRequest};
use crate::tool::ToolSpec;

/// What a backend decided to do with the conversation so far
#[derive(Clone, Debug, PartialEq)]
pub enum LlmResponse {
    /// The model answered; the interaction is over
    Final(String),

    /// The model wants these tools run before it continues
    ToolCalls(Vec<ToolCallRequest>),
}

/// Strategy trait for model backends
///
/// Implement this trait to add support for new LLM backends.
/// The loop works exclusively through this interface.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Map the conversation so far to a final answer or tool requests
    async fn chat(&self, history: &[Message], tools: &[ToolSpec]) -> Result<LlmResponse, BackendError>;
}

/// Multi-backend wrapper with failover support
///
/// Retryable failures move on to the next backend; the chain remembers the
/// last backend that answered and starts there on the next call. A
/// non-retryable failure is returned immediately.
pub struct BackendChain {
    backends: Vec<Arc<dyn ModelBackend>>,
    current_index: AtomicUsize,
}

impl BackendChain {
    pub fn new(backends: Vec<Arc<dyn ModelBackend>>) -> Self {
        Self {
            backends,
            current_index: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl ModelBackend for BackendChain {
    async fn chat(&self, history: &[Message], tools: &[ToolSpec]) -> Result<LlmResponse, BackendError> {
        if self.backends.is_empty() {
            return Err(BackendError::fatal("backend chain is empty"));
        }

        let start = self.current_index.load(Ordering::SeqCst);
        let mut last_error = None;

        for offset in 0..self.backends.len() {
            let idx = (start + offset) % self.backends.len();
            match self.backends[idx].chat(history, tools).await {
                Ok(response) => {
                    self.current_index.store(idx, Ordering::SeqCst);
                    return Ok(response);
                }
                Err(e) if e.retryable => {
                    tracing::warn!(backend = idx, error = %e, "Backend failed, failing over");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| BackendError::fatal("backend chain is empty")))
    }
}

/// Backend that plays back a fixed script of responses.
///
/// Every history it is called with is kept for inspection. Running past the
/// end of the script is a non-retryable error.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<LlmResponse, BackendError>>>,
    histories: Mutex<Vec<Vec<Message>>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: impl IntoIterator<Item = Result<LlmResponse, BackendError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Script consisting only of successful responses
    pub fn from_responses(responses: impl IntoIterator<Item = LlmResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok))
    }

    pub async fn push(&self, step: Result<LlmResponse, BackendError>) {
        self.script.lock().await.push_back(step);
    }

    /// Number of `chat` calls received, including failed ones
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Histories passed to each `chat` call, in call order
    pub async fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.script.lock().await.len()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn chat(&self, history: &[Message], _tools: &[ToolSpec]) -> Result<LlmResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().await.push(history.to_vec());

        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::fatal("script exhausted")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn final_text(text: &str) -> LlmResponse {
        LlmResponse::Final(text.into())
    }

    #[tokio::test]
    async fn scripted_backend_plays_in_order_then_fails() {
        let backend = ScriptedBackend::from_responses([final_text("one"), final_text("two")]);
        let history = [Message::user("hi")];

        assert_eq!(backend.chat(&history, &[]).await.unwrap(), final_text("one"));
        assert_eq!(backend.chat(&history, &[]).await.unwrap(), final_text("two"));

        let err = backend.chat(&history, &[]).await.unwrap_err();
        assert!(!err.retryable);
        assert_eq!(backend.calls(), 3);
        assert_eq!(backend.histories().await.len(), 3);
    }

    #[tokio::test]
    async fn scripted_backend_accepts_steps_pushed_later() {
        let backend = ScriptedBackend::from_responses([final_text("one")]);
        assert_eq!(backend.remaining().await, 1);

        backend.push(Err(BackendError::retryable("busy"))).await;
        backend.push(Ok(final_text("two"))).await;
        assert_eq!(backend.remaining().await, 3);

        assert_eq!(backend.chat(&[], &[]).await.unwrap(), final_text("one"));
        assert!(backend.chat(&[], &[]).await.unwrap_err().retryable);
        assert_eq!(backend.chat(&[], &[]).await.unwrap(), final_text("two"));
        assert_eq!(backend.remaining().await, 0);
    }

    #[tokio::test]
    async fn chain_fails_over_on_retryable_errors() {
        let flaky = Arc::new(ScriptedBackend::new([Err(BackendError::retryable("503"))]));
        let healthy = Arc::new(ScriptedBackend::from_responses([final_text("a"), final_text("b")]));
        let chain = BackendChain::new(vec![flaky.clone(), healthy.clone()]);

        assert_eq!(chain.chat(&[], &[]).await.unwrap(), final_text("a"));
        // Sticks with the backend that answered
        assert_eq!(chain.chat(&[], &[]).await.unwrap(), final_text("b"));
        assert_eq!(flaky.calls(), 1);
        assert_eq!(healthy.calls(), 2);
    }

    #[tokio::test]
    async fn chain_stops_on_fatal_errors() {
        let broken = Arc::new(ScriptedBackend::new([Err(BackendError::fatal("401"))]));
        let healthy = Arc::new(ScriptedBackend::from_responses([final_text("a")]));
        let chain = BackendChain::new(vec![broken, healthy.clone()]);

        let err = chain.chat(&[], &[]).await.unwrap_err();
        assert_eq!(err, BackendError::fatal("401"));
        assert_eq!(healthy.calls(), 0);
    }

    #[tokio::test]
    async fn empty_chain_is_a_fatal_error() {
        let chain = BackendChain::new(vec![]);
        assert!(chain.is_empty());
        assert!(!chain.chat(&[], &[]).await.unwrap_err().retryable);
    }
}
