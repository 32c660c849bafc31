//! # agent-core
//!
//! Conversation orchestration with a provider-agnostic model backend,
//! concurrent tool dispatch and durable interaction records.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Agent                               │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐   │
//! │  │  Reasoning  │  │    Tool     │  │   ModelBackend      │   │
//! │  │    Loop     │──│  Registry   │──│   (Strategy)        │   │
//! │  └──────┬──────┘  └─────────────┘  └─────────────────────┘   │
//! │         │                                                    │
//! │  ┌──────▼──────┐                                             │
//! │  │  Recorder   │  <root>/agents/<name>/behavior.json         │
//! │  └─────────────┘                                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `ModelBackend` trait enables swapping between Ollama, OpenAI,
//! Anthropic, or a scripted replay without changing loop semantics.

pub mod config;
pub mod error;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod recorder;
pub mod replay;
pub mod session;
pub mod tool;

pub use config::{AgentConfig, RetryPolicy};
pub use error::{AgentError, BackendError, RecorderError, Result, ToolError};
pub use message::{
    Content, Conversation, Message, Role, ToolCallRequest, ToolCallResult, ToolFailure, ToolFailureKind, ToolOutcome,
};
pub use provider::{BackendChain, LlmResponse, ModelBackend, ScriptedBackend};
pub use reasoning::{Agent, AgentBuilder, Reply, dispatch_tool_calls};
pub use recorder::{FileRecorder, InteractionRecord, MemoryRecorder, RecordMetadata, RecordedToolCall, Recorder};
pub use session::{Session, SessionId};
pub use tool::{CalculatorTool, ParameterSchema, Tool, ToolRegistry, ToolSpec};
