//! Reasoning Loop
//!
//! Drives one interaction: the model is called with the full history, any
//! tools it asks for are run concurrently, their results are appended in
//! request order, and the model is called again until it answers or the
//! iteration cap is hit.
//!
//! ```text
//! AwaitingModel ──final──▶ Done ──▶ Recorder
//!      ▲   │
//!      │   └─tool calls─▶ AwaitingToolResults
//!      └────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, RetryPolicy};
use crate::error::{AgentError, RecorderError, Result, ToolError};
use crate::message::{
    Conversation, Message, Role, ToolCallRequest, ToolCallResult, ToolFailure, ToolFailureKind, ToolOutcome,
};
use crate::provider::{LlmResponse, ModelBackend};
use crate::recorder::{InteractionRecord, RecordMetadata, RecordedToolCall, Recorder};
use crate::tool::{Tool, ToolRegistry, ToolSpec};

const DEFAULT_IDENTITY: &str = "agent";

/// Outcome of a successful interaction
#[derive(Debug)]
pub struct Reply {
    /// Final answer text
    pub answer: String,

    /// Full conversation after the interaction
    pub messages: Vec<Message>,

    /// Every tool call made, in the order the calls were requested
    pub tool_calls: Vec<RecordedToolCall>,

    /// Tool-call rounds taken
    pub iterations: usize,

    /// Backend responses received (one per assistant message)
    pub backend_calls: usize,

    /// Set when the answer is valid but the behavior record was not written
    pub record_error: Option<RecorderError>,
}

enum State {
    AwaitingModel,
    AwaitingToolResults(Vec<ToolCallRequest>),
    Done(String),
}

/// The main Agent struct
pub struct Agent {
    identity: String,
    backend: Arc<dyn ModelBackend>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
    recorder: Option<Arc<dyn Recorder>>,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        identity: impl Into<String>,
        backend: Arc<dyn ModelBackend>,
        tools: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        Self {
            identity: identity.into(),
            backend,
            tools,
            config,
            recorder: None,
        }
    }

    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Add a tool between interactions.
    ///
    /// Interactions already in flight keep the registry snapshot they
    /// started with.
    pub fn register_tool<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        Arc::make_mut(&mut self.tools).register(tool)
    }

    /// Run one interaction on a fresh conversation
    pub async fn input(&self, text: &str) -> Result<Reply> {
        let mut conversation = Conversation::new();
        self.run(&mut conversation, text).await
    }

    /// Run one interaction on top of `conversation`.
    ///
    /// The conversation is only updated when the interaction succeeds; on
    /// failure the partial history travels inside the error instead.
    pub async fn run(&self, conversation: &mut Conversation, text: &str) -> Result<Reply> {
        let started_at = Utc::now();
        let tools = Arc::clone(&self.tools);
        let specs = tools.list_specs();
        let max_iterations = self.config.max_iterations;

        let mut history = conversation.messages().to_vec();
        if let Some(prompt) = &self.config.system_prompt {
            if history.first().map(Message::role) != Some(Role::System) {
                history.insert(0, Message::system(prompt.as_str()));
            }
        }
        history.push(Message::user(text));

        info!(agent = %self.identity, tools = specs.len(), "Starting interaction");

        let mut tool_calls = Vec::new();
        let mut iterations = 0;
        let mut backend_calls = 0;
        let mut state = State::AwaitingModel;

        let answer = loop {
            state = match state {
                State::AwaitingModel => {
                    debug!(agent = %self.identity, iteration = iterations, "Calling backend");
                    let response = self.call_backend(&history, &specs).await?;
                    backend_calls += 1;

                    match response {
                        LlmResponse::ToolCalls(requests) if !requests.is_empty() => {
                            if let Some(id) = first_duplicate_id(&requests) {
                                return Err(AgentError::ProtocolViolation {
                                    message: format!("duplicate tool call id {id:?} in one assistant turn"),
                                    history,
                                });
                            }
                            history.push(Message::assistant_with_tool_calls("", requests.clone()));
                            State::AwaitingToolResults(requests)
                        }
                        // An empty request list is an empty final answer
                        LlmResponse::ToolCalls(_) => {
                            history.push(Message::assistant(""));
                            State::Done(String::new())
                        }
                        LlmResponse::Final(answer) => {
                            history.push(Message::assistant(answer.as_str()));
                            State::Done(answer)
                        }
                    }
                }
                State::AwaitingToolResults(requests) => {
                    let results = dispatch_tool_calls(&tools, &requests).await;
                    for (request, result) in requests.iter().zip(&results) {
                        history.push(Message::tool_result(result));
                        tool_calls.push(RecordedToolCall::new(request, result));
                    }

                    iterations += 1;
                    if iterations >= max_iterations {
                        warn!(agent = %self.identity, max = max_iterations, "Max iterations reached");
                        return Err(AgentError::MaxIterationsExceeded {
                            max: max_iterations,
                            history,
                        });
                    }
                    State::AwaitingModel
                }
                State::Done(answer) => break answer,
            };
        };

        info!(agent = %self.identity, iterations, backend_calls, "Interaction complete");

        let record_error = match &self.recorder {
            Some(recorder) => {
                let mut metadata = RecordMetadata::new(self.config.model.clone());
                metadata.extra.insert("iterations".into(), Value::from(iterations));
                let record = InteractionRecord {
                    agent: self.identity.clone(),
                    task: text.to_string(),
                    timestamp: started_at,
                    messages: history.clone(),
                    tool_calls: tool_calls.clone(),
                    metadata,
                };
                match recorder.record(&record).await {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(agent = %self.identity, error = %e, "Failed to record interaction");
                        Some(e)
                    }
                }
            }
            None => None,
        };

        conversation.replace(history.clone());

        Ok(Reply {
            answer,
            messages: history,
            tool_calls,
            iterations,
            backend_calls,
            record_error,
        })
    }

    /// Call the backend, retrying retryable failures per the retry policy
    async fn call_backend(&self, history: &[Message], specs: &[ToolSpec]) -> Result<LlmResponse> {
        let max_retries = self.config.retry.max_retries;
        let delay = self.config.retry.delay();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.backend.chat(history, specs).await {
                Ok(response) => return Ok(response),
                Err(error) if error.retryable && attempt <= max_retries => {
                    warn!(agent = %self.identity, attempt, error = %error, "Backend call failed, retrying");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(error) => {
                    return Err(AgentError::Backend {
                        error,
                        attempts: attempt,
                        history: history.to_vec(),
                    });
                }
            }
        }
    }
}

fn first_duplicate_id(requests: &[ToolCallRequest]) -> Option<&str> {
    let mut seen = HashSet::new();
    requests
        .iter()
        .map(|r| r.id.as_str())
        .find(|id| !seen.insert(*id))
}

/// Run every request concurrently and return results in request order.
///
/// Requests are resolved against `tools`; unknown tools, invalid arguments,
/// tool errors and panics all become failure outcomes. Results are gathered
/// by id as they complete and re-emitted in the order requested. Dropping
/// the returned future aborts calls still in flight.
pub async fn dispatch_tool_calls(tools: &ToolRegistry, requests: &[ToolCallRequest]) -> Vec<ToolCallResult> {
    let mut set = JoinSet::new();
    for request in requests {
        let tool = tools.resolve(&request.name);
        let request = request.clone();
        set.spawn(execute_call(tool, request));
    }

    let mut by_id: HashMap<String, ToolCallResult> = HashMap::with_capacity(requests.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => {
                by_id.insert(result.id.clone(), result);
            }
            Err(e) => warn!(error = %e, "Tool task did not complete"),
        }
    }

    requests
        .iter()
        .map(|request| {
            by_id.remove(&request.id).unwrap_or_else(|| ToolCallResult {
                id: request.id.clone(),
                name: request.name.clone(),
                outcome: failure(request, ToolFailureKind::Execution, "tool task was cancelled".into()),
                elapsed: Duration::ZERO,
            })
        })
        .collect()
}

async fn execute_call(tool: Option<Arc<dyn Tool>>, request: ToolCallRequest) -> ToolCallResult {
    let started = Instant::now();

    let outcome = match tool {
        None => failure(&request, ToolFailureKind::NotFound, format!("Tool not found: {}", request.name)),
        Some(tool) => match tool.validate(&request.arguments) {
            Err(e) => tool_error(&request, e),
            Ok(()) => match AssertUnwindSafe(tool.invoke(&request.arguments)).catch_unwind().await {
                Ok(Ok(output)) => ToolOutcome::Success(output),
                Ok(Err(e)) => tool_error(&request, e),
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "tool panicked".into());
                    failure(&request, ToolFailureKind::Panicked, message)
                }
            },
        },
    };

    let elapsed = started.elapsed();
    match &outcome {
        ToolOutcome::Success(_) => {
            debug!(tool = %request.name, call_id = %request.id, elapsed = ?elapsed, "Tool succeeded");
        }
        ToolOutcome::Failure(f) => {
            warn!(tool = %request.name, call_id = %request.id, kind = ?f.kind, error = %f.message, "Tool failed");
        }
    }

    ToolCallResult {
        id: request.id,
        name: request.name,
        outcome,
        elapsed,
    }
}

fn failure(request: &ToolCallRequest, kind: ToolFailureKind, message: String) -> ToolOutcome {
    ToolOutcome::Failure(ToolFailure {
        kind,
        tool: request.name.clone(),
        message,
    })
}

fn tool_error(request: &ToolCallRequest, error: ToolError) -> ToolOutcome {
    let kind = match error {
        ToolError::InvalidArguments(_) => ToolFailureKind::InvalidArguments,
        ToolError::Execution(_) => ToolFailureKind::Execution,
    };
    failure(request, kind, error.to_string())
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    identity: String,
    backend: Option<Arc<dyn ModelBackend>>,
    tools: ToolRegistry,
    config: AgentConfig,
    recorder: Option<Arc<dyn Recorder>>,
    error: Option<AgentError>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.into(),
            backend: None,
            tools: ToolRegistry::new(),
            config: AgentConfig::default(),
            recorder: None,
            error: None,
        }
    }

    /// Name used for the behavior log
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Register a tool; a duplicate name is reported by [`build`](Self::build)
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        if let Err(e) = self.tools.register(tool) {
            self.error.get_or_insert(e);
        }
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn build(self) -> Result<Agent> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.config.validate()?;
        let backend = self
            .backend
            .ok_or_else(|| AgentError::Config("Backend is required".into()))?;

        let mut agent = Agent::new(self.identity, backend, Arc::new(self.tools), self.config);
        agent.recorder = self.recorder;
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::message::Content;
    use crate::provider::ScriptedBackend;
    use crate::recorder::MemoryRecorder;
    use crate::tool::{CalculatorTool, ParameterSchema};
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    fn call(id: &str, name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest::new(id, name, args.as_object().cloned().unwrap_or_default())
    }

    fn tool_calls(calls: Vec<ToolCallRequest>) -> LlmResponse {
        LlmResponse::ToolCalls(calls)
    }

    fn final_text(text: &str) -> LlmResponse {
        LlmResponse::Final(text.into())
    }

    fn agent(backend: &Arc<ScriptedBackend>) -> AgentBuilder {
        Agent::builder().identity("tester").backend(backend.clone())
    }

    fn count_role(messages: &[Message], role: Role) -> usize {
        messages.iter().filter(|m| m.role() == role).count()
    }

    /// Parses `value` as an integer; malformed input is an invocation error
    struct ParseIntTool;

    #[async_trait]
    impl Tool for ParseIntTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("parse_int", "Parse an integer")
        }

        async fn invoke(&self, arguments: &Map<String, Value>) -> std::result::Result<Value, ToolError> {
            let raw = arguments.get("value").and_then(Value::as_str).unwrap_or_default();
            raw.parse::<i64>()
                .map(Value::from)
                .map_err(|e| ToolError::InvalidArguments(format!("{raw:?}: {e}")))
        }
    }

    /// Sleeps `ms` then logs `id` as finished
    struct SleepTool {
        finished: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Tool for SleepTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("sleep", "Sleep for a while")
                .param(ParameterSchema::required("id", "string", "Label"))
                .param(ParameterSchema::required("ms", "integer", "Milliseconds"))
        }

        async fn invoke(&self, arguments: &Map<String, Value>) -> std::result::Result<Value, ToolError> {
            let ms = arguments["ms"].as_u64().unwrap_or_default();
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let id = arguments["id"].as_str().unwrap_or_default().to_string();
            self.finished.lock().await.push(id.clone());
            Ok(Value::String(id))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("boom", "Always panics")
        }

        async fn invoke(&self, _arguments: &Map<String, Value>) -> std::result::Result<Value, ToolError> {
            panic!("kaboom")
        }
    }

    struct FlagTool {
        done: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Tool for FlagTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("slow", "Sets a flag after a long sleep")
        }

        async fn invoke(&self, _arguments: &Map<String, Value>) -> std::result::Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            self.done.store(true, Ordering::SeqCst);
            Ok(Value::Bool(true))
        }
    }

    struct FailingRecorder;

    #[async_trait]
    impl Recorder for FailingRecorder {
        async fn record(&self, _record: &InteractionRecord) -> std::result::Result<(), RecorderError> {
            Err(RecorderError::InvalidIdentity("nope".into()))
        }
    }

    #[tokio::test]
    async fn calculator_round_is_recorded() {
        let backend = Arc::new(ScriptedBackend::from_responses([
            tool_calls(vec![call("c1", "calc", json!({"expr": "2+2"}))]),
            final_text("4"),
        ]));
        let recorder = Arc::new(MemoryRecorder::new());
        let agent = agent(&backend)
            .tool(CalculatorTool)
            .model("test-model")
            .recorder(recorder.clone())
            .build()
            .unwrap();

        let reply = agent.input("2+2?").await.unwrap();

        assert!(reply.answer.contains('4'));
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].result, json!(4));
        assert!(reply.record_error.is_none());

        let records = recorder.records("tester").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task, "2+2?");
        assert_eq!(records[0].tool_calls[0].name, "calc");
        assert_eq!(records[0].tool_calls[0].result, json!(4));
        assert_eq!(records[0].metadata.model, "test-model");
        assert_eq!(records[0].messages, reply.messages);
    }

    #[tokio::test]
    async fn tool_failure_is_data_and_loop_continues() {
        let backend = Arc::new(ScriptedBackend::from_responses([
            tool_calls(vec![call("c1", "parse_int", json!({"value": "forty"}))]),
            final_text("Sorry, that is not a number."),
        ]));
        let agent = agent(&backend).tool(ParseIntTool).build().unwrap();

        let reply = agent.input("parse forty").await.unwrap();

        assert_eq!(backend.calls(), 2);
        let tool_msg = &reply.messages[2];
        assert_eq!(tool_msg.role(), Role::Tool);
        assert_eq!(tool_msg.tool_call_id(), Some("c1"));
        assert_eq!(tool_msg.content().to_value()["error"]["kind"], "invalid_arguments");

        // The second backend call saw the structured error
        let histories = backend.histories().await;
        assert_eq!(histories[1].last(), Some(tool_msg));
    }

    #[tokio::test]
    async fn never_converging_backend_hits_iteration_cap() {
        let responses = (0..5).map(|i| tool_calls(vec![call(&format!("c{i}"), "calc", json!({"expr": "1+1"}))]));
        let backend = Arc::new(ScriptedBackend::from_responses(responses));
        let recorder = Arc::new(MemoryRecorder::new());
        let agent = agent(&backend)
            .tool(CalculatorTool)
            .max_iterations(3)
            .recorder(recorder.clone())
            .build()
            .unwrap();

        let err = agent.input("loop forever").await.unwrap_err();

        assert_eq!(backend.calls(), 3);
        match &err {
            AgentError::MaxIterationsExceeded { max, history } => {
                assert_eq!(*max, 3);
                assert_eq!(count_role(history, Role::Assistant), 3);
                assert_eq!(count_role(history, Role::Tool), 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(recorder.total().await, 0);
    }

    #[tokio::test]
    async fn fatal_backend_error_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::new([
            Err(BackendError::fatal("bad request")),
            Ok(final_text("unreachable")),
        ]));
        let agent = agent(&backend).build().unwrap();

        let err = agent.input("hi").await.unwrap_err();

        assert_eq!(backend.calls(), 1);
        assert!(matches!(err, AgentError::Backend { attempts: 1, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn retryable_backend_errors_are_retried_per_policy() {
        let backend = Arc::new(ScriptedBackend::new([
            Err(BackendError::retryable("503")),
            Err(BackendError::retryable("503")),
            Ok(final_text("ok")),
        ]));
        let agent = agent(&backend)
            .retry_policy(RetryPolicy {
                max_retries: 2,
                delay_ms: 0,
            })
            .build()
            .unwrap();

        let reply = agent.input("hi").await.unwrap();
        assert_eq!(reply.answer, "ok");
        assert_eq!(backend.calls(), 3);
        assert_eq!(reply.backend_calls, 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let backend = Arc::new(ScriptedBackend::new(
            (0..5).map(|_| Err(BackendError::retryable("timeout"))),
        ));
        let agent = agent(&backend)
            .retry_policy(RetryPolicy {
                max_retries: 1,
                delay_ms: 0,
            })
            .build()
            .unwrap();

        let err = agent.input("hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Backend { attempts: 2, .. }));
        assert!(err.is_retryable());
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_request_order_when_completion_order_differs() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(ScriptedBackend::from_responses([
            tool_calls(vec![
                call("slow", "sleep", json!({"id": "slow", "ms": 50})),
                call("fast", "sleep", json!({"id": "fast", "ms": 5})),
            ]),
            final_text("both done"),
        ]));
        let agent = agent(&backend)
            .tool(SleepTool {
                finished: finished.clone(),
            })
            .build()
            .unwrap();

        let reply = agent.input("sleep twice").await.unwrap();

        assert_eq!(*finished.lock().await, vec!["fast".to_string(), "slow".to_string()]);
        let ids: Vec<_> = reply
            .messages
            .iter()
            .filter(|m| m.role() == Role::Tool)
            .filter_map(Message::tool_call_id)
            .collect();
        assert_eq!(ids, vec!["slow", "fast"]);
        let results: Vec<_> = reply.tool_calls.iter().map(|c| c.result.clone()).collect();
        assert_eq!(results, vec![json!("slow"), json!("fast")]);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_calls_run_concurrently() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(ScriptedBackend::from_responses([
            tool_calls(vec![
                call("a", "sleep", json!({"id": "a", "ms": 100})),
                call("b", "sleep", json!({"id": "b", "ms": 100})),
                call("c", "sleep", json!({"id": "c", "ms": 100})),
            ]),
            final_text("done"),
        ]));
        let agent = agent(&backend).tool(SleepTool { finished }).build().unwrap();

        let started = tokio::time::Instant::now();
        agent.input("go").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn unknown_tool_yields_not_found_result() {
        let backend = Arc::new(ScriptedBackend::from_responses([
            tool_calls(vec![call("c1", "teleport", json!({}))]),
            final_text("cannot teleport"),
        ]));
        let agent = agent(&backend).build().unwrap();

        let reply = agent.input("beam me up").await.unwrap();
        assert_eq!(reply.tool_calls[0].result["error"]["kind"], "not_found");
        assert_eq!(reply.tool_calls[0].result["error"]["tool"], "teleport");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn schema_mismatch_is_captured() {
        let backend = Arc::new(ScriptedBackend::from_responses([
            tool_calls(vec![call("c1", "calc", json!({"expr": 42}))]),
            final_text("retry later"),
        ]));
        let agent = agent(&backend).tool(CalculatorTool).build().unwrap();

        let reply = agent.input("calc").await.unwrap();
        assert_eq!(reply.tool_calls[0].result["error"]["kind"], "invalid_arguments");
    }

    #[tokio::test]
    async fn panicking_tool_is_captured() {
        let backend = Arc::new(ScriptedBackend::from_responses([
            tool_calls(vec![call("c1", "boom", json!({}))]),
            final_text("it broke"),
        ]));
        let agent = agent(&backend).tool(PanicTool).build().unwrap();

        let reply = agent.input("explode").await.unwrap();
        assert_eq!(reply.tool_calls[0].result["error"]["kind"], "panicked");
        assert_eq!(reply.tool_calls[0].result["error"]["message"], "kaboom");
    }

    #[tokio::test]
    async fn duplicate_call_ids_are_a_protocol_violation() {
        let backend = Arc::new(ScriptedBackend::from_responses([
            tool_calls(vec![
                call("dup", "calc", json!({"expr": "1"})),
                call("dup", "calc", json!({"expr": "2"})),
            ]),
            final_text("unreachable"),
        ]));
        let agent = agent(&backend).tool(CalculatorTool).build().unwrap();

        let err = agent.input("twice").await.unwrap_err();
        assert!(matches!(err, AgentError::ProtocolViolation { .. }));
        assert_eq!(backend.calls(), 1);
        assert_eq!(err.partial_history().map(<[Message]>::len), Some(1));
    }

    #[tokio::test]
    async fn empty_tool_call_list_is_an_empty_final_answer() {
        let backend = Arc::new(ScriptedBackend::from_responses([tool_calls(vec![])]));
        let agent = agent(&backend).build().unwrap();

        let reply = agent.input("say nothing").await.unwrap();
        assert_eq!(reply.answer, "");
        assert_eq!(reply.messages.last().map(Message::content), Some(&Content::Text(String::new())));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn system_prompt_is_prepended_once_across_threaded_calls() {
        let backend = Arc::new(ScriptedBackend::from_responses([final_text("one"), final_text("two")]));
        let agent = agent(&backend).system_prompt("Be brief.").build().unwrap();

        let mut conversation = Conversation::new();
        agent.run(&mut conversation, "first").await.unwrap();
        let reply = agent.run(&mut conversation, "second").await.unwrap();

        assert_eq!(count_role(conversation.messages(), Role::System), 1);
        assert_eq!(conversation.messages()[0].text(), Some("Be brief."));
        assert_eq!(conversation.len(), 5);
        assert_eq!(reply.messages, conversation.messages());

        let histories = backend.histories().await;
        assert_eq!(histories[1].len(), 4);
    }

    #[tokio::test]
    async fn failed_interaction_leaves_conversation_untouched() {
        let backend = Arc::new(ScriptedBackend::new([Err(BackendError::fatal("down"))]));
        let agent = agent(&backend).build().unwrap();

        let mut conversation = Conversation::new();
        conversation.push(Message::user("earlier"));
        conversation.push(Message::assistant("reply"));

        let err = agent.run(&mut conversation, "now").await.unwrap_err();
        assert_eq!(conversation.len(), 2);
        assert_eq!(err.partial_history().map(<[Message]>::len), Some(3));
    }

    #[tokio::test]
    async fn recorder_failure_does_not_fail_the_interaction() {
        let backend = Arc::new(ScriptedBackend::from_responses([final_text("fine")]));
        let agent = agent(&backend).recorder(Arc::new(FailingRecorder)).build().unwrap();

        let reply = agent.input("hello").await.unwrap();
        assert_eq!(reply.answer, "fine");
        assert!(reply.record_error.is_some());
    }

    #[tokio::test]
    async fn message_counts_match_backend_and_tool_calls() {
        let backend = Arc::new(ScriptedBackend::from_responses([
            tool_calls(vec![
                call("a", "calc", json!({"expr": "1+1"})),
                call("b", "calc", json!({"expr": "2*3"})),
            ]),
            tool_calls(vec![call("c", "calc", json!({"expr": "2+6"}))]),
            final_text("8"),
        ]));
        let agent = agent(&backend).tool(CalculatorTool).build().unwrap();

        let reply = agent.input("compute").await.unwrap();

        assert_eq!(count_role(&reply.messages, Role::Assistant), reply.backend_calls);
        assert_eq!(reply.backend_calls, backend.calls());
        assert_eq!(reply.iterations, 2);
        assert_eq!(count_role(&reply.messages, Role::Tool), 3);
        assert!(crate::message::check_tool_references(&reply.messages).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_interaction_aborts_tools_and_writes_nothing() {
        let done = Arc::new(AtomicBool::new(false));
        let backend = Arc::new(ScriptedBackend::from_responses([
            tool_calls(vec![call("c1", "slow", json!({}))]),
            final_text("never"),
        ]));
        let recorder = Arc::new(MemoryRecorder::new());
        let agent = agent(&backend)
            .tool(FlagTool { done: done.clone() })
            .recorder(recorder.clone())
            .build()
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), agent.input("wait")).await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!done.load(Ordering::SeqCst));
        assert_eq!(recorder.total().await, 0);
    }

    #[tokio::test]
    async fn tools_registered_between_interactions_are_advertised() {
        let backend = Arc::new(ScriptedBackend::from_responses([
            tool_calls(vec![call("c1", "calc", json!({"expr": "3*3"}))]),
            final_text("9"),
        ]));
        let mut agent = agent(&backend).build().unwrap();
        assert!(agent.tools().is_empty());

        agent.register_tool(CalculatorTool).unwrap();
        assert!(matches!(agent.register_tool(CalculatorTool), Err(AgentError::DuplicateTool(_))));

        let reply = agent.input("3*3").await.unwrap();
        assert_eq!(reply.tool_calls[0].result, json!(9));
    }

    #[test]
    fn builder_requires_backend_and_valid_config() {
        assert!(matches!(AgentBuilder::new().build(), Err(AgentError::Config(_))));

        let backend = Arc::new(ScriptedBackend::default());
        assert!(matches!(agent(&backend).max_iterations(0).build(), Err(AgentError::Config(_))));
        assert!(matches!(
            agent(&backend).tool(CalculatorTool).tool(CalculatorTool).build(),
            Err(AgentError::DuplicateTool(_))
        ));
    }
}
