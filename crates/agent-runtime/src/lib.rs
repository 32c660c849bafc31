//! # agent-runtime
//!
//! Concrete backends and host integrations for agent-core.
//!
//! ## Backends
//!
//! - **Ollama** (default): Local LLM inference via Ollama, with tool calling
//!   over the fenced-block text protocol
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{OllamaBackend, init_tracing};
//!
//! init_tracing("info")?;
//! let agent = Agent::builder()
//!     .identity("helper")
//!     .backend(Arc::new(OllamaBackend::from_env()))
//!     .tool(CalculatorTool)
//!     .recorder(Arc::new(FileRecorder::new("./store")))
//!     .build()?;
//! let reply = agent.input("What is 6 * 7?").await?;
//! ```

#[cfg(feature = "ollama")]
pub mod ollama;
pub mod protocol;
pub mod telemetry;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaBackend, OllamaConfig};
pub use telemetry::init_tracing;

// Re-export core types for convenience
pub use agent_core::{
    Agent, AgentBuilder, AgentConfig, AgentError, FileRecorder, LlmResponse, Message, ModelBackend, Reply, Result,
    Role, Session, Tool, ToolRegistry, ToolSpec,
};
