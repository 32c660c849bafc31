//! Replay of recorded interactions
//!
//! A behavior record holds everything needed to run an interaction again:
//! the assistant turns drive a [`ScriptedBackend`] and the recorded tool
//! calls are re-issued against a live registry.

use std::sync::Arc;

use crate::config::AgentConfig;
use crate::error::Result;
use crate::message::{Conversation, Message, Role, ToolCallRequest};
use crate::provider::{LlmResponse, ScriptedBackend};
use crate::reasoning::{Agent, Reply, dispatch_tool_calls};
use crate::recorder::{InteractionRecord, RecordedToolCall};
use crate::tool::ToolRegistry;

impl ScriptedBackend {
    /// Script that answers with the assistant turns of the recorded task, in
    /// order. Turns from earlier interactions in the same conversation are
    /// history, not script.
    pub fn from_record(record: &InteractionRecord) -> Self {
        Self::from_responses(
            record.messages[task_start(record)..]
                .iter()
                .filter(|m| m.role() == Role::Assistant)
                .map(|m| {
                    if m.tool_calls().is_empty() {
                        LlmResponse::Final(m.content().to_string())
                    } else {
                        LlmResponse::ToolCalls(m.tool_calls().to_vec())
                    }
                }),
        )
    }
}

/// Index of the user message that opened the recorded task
fn task_start(record: &InteractionRecord) -> usize {
    record
        .messages
        .iter()
        .rposition(|m| m.role() == Role::User && m.text() == Some(record.task.as_str()))
        .unwrap_or(0)
}

/// Messages that preceded the recorded task
fn prior_history(record: &InteractionRecord) -> Vec<Message> {
    record.messages[..task_start(record)].to_vec()
}

/// Re-run a recorded interaction against `tools`.
///
/// The backend is replaced by the recorded assistant turns and nothing is
/// recorded, so with the same tools the returned messages equal the
/// recorded ones.
pub async fn replay_interaction(
    record: &InteractionRecord,
    tools: ToolRegistry,
    config: AgentConfig,
) -> Result<Reply> {
    let mut conversation = Conversation::from_messages(prior_history(record))?;
    let agent = Agent::new(
        record.agent.clone(),
        Arc::new(ScriptedBackend::from_record(record)),
        Arc::new(tools),
        config,
    );
    agent.run(&mut conversation, &record.task).await
}

/// Re-invoke every recorded tool call with its recorded arguments
pub async fn replay_tool_calls(record: &InteractionRecord, tools: &ToolRegistry) -> Vec<RecordedToolCall> {
    let requests: Vec<_> = record
        .tool_calls
        .iter()
        .enumerate()
        .map(|(i, call)| ToolCallRequest::new(format!("replay-{i}"), call.name.clone(), call.args.clone()))
        .collect();

    let results = dispatch_tool_calls(tools, &requests).await;
    requests
        .iter()
        .zip(&results)
        .map(|(request, result)| RecordedToolCall::new(request, result))
        .collect()
}

/// Equal tool-call lists, ignoring timings
pub fn same_tool_calls(a: &[RecordedToolCall], b: &[RecordedToolCall]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.name == y.name && x.args == y.args && x.result == y.result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::MemoryRecorder;
    use crate::tool::CalculatorTool;
    use serde_json::json;

    async fn recorded_calc_interaction() -> InteractionRecord {
        let args = json!({"expr": "6*7"}).as_object().cloned().unwrap();
        let backend = Arc::new(ScriptedBackend::from_responses([
            LlmResponse::ToolCalls(vec![
                ToolCallRequest::new("c1", "calc", args),
                ToolCallRequest::new("c2", "missing", Default::default()),
            ]),
            LlmResponse::Final("42".into()),
        ]));
        let recorder = Arc::new(MemoryRecorder::new());
        let agent = Agent::builder()
            .identity("math")
            .backend(backend)
            .tool(CalculatorTool)
            .system_prompt("Use tools.")
            .recorder(recorder.clone())
            .build()
            .unwrap();

        agent.input("what is 6*7?").await.unwrap();
        recorder.records("math").await.remove(0)
    }

    fn calc_registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(CalculatorTool).unwrap();
        tools
    }

    #[tokio::test]
    async fn replayed_interaction_reproduces_messages_and_tool_calls() {
        let record = recorded_calc_interaction().await;

        let config = AgentConfig {
            system_prompt: Some("Use tools.".into()),
            ..AgentConfig::default()
        };
        let reply = replay_interaction(&record, calc_registry(), config).await.unwrap();

        assert_eq!(reply.answer, "42");
        assert_eq!(reply.messages, record.messages);
        assert!(same_tool_calls(&reply.tool_calls, &record.tool_calls));
    }

    #[tokio::test]
    async fn replayed_tool_calls_match_recorded_shape() {
        let record = recorded_calc_interaction().await;

        let replayed = replay_tool_calls(&record, &calc_registry()).await;
        assert!(same_tool_calls(&replayed, &record.tool_calls));
        assert_eq!(replayed[0].result, json!(42));
        assert_eq!(replayed[1].result["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn replay_after_json_round_trip() {
        let record = recorded_calc_interaction().await;
        let json = serde_json::to_string(&record).unwrap();
        let loaded: InteractionRecord = serde_json::from_str(&json).unwrap();

        let replayed = replay_tool_calls(&loaded, &calc_registry()).await;
        assert!(same_tool_calls(&replayed, &record.tool_calls));
    }

    #[test]
    fn prior_history_stops_before_the_task() {
        let record = InteractionRecord {
            agent: "a".into(),
            task: "second".into(),
            timestamp: chrono::Utc::now(),
            messages: vec![
                Message::user("first"),
                Message::assistant("ok"),
                Message::user("second"),
                Message::assistant("done"),
            ],
            tool_calls: vec![],
            metadata: crate::recorder::RecordMetadata::new("m"),
        };
        assert_eq!(prior_history(&record).len(), 2);
        assert_eq!(task_start(&record), 2);
    }

    #[tokio::test]
    async fn replaying_a_later_turn_of_a_conversation_uses_only_its_own_answers() {
        let backend = Arc::new(ScriptedBackend::from_responses([
            LlmResponse::Final("ok".into()),
            LlmResponse::Final("done".into()),
        ]));
        let recorder = Arc::new(MemoryRecorder::new());
        let agent = Agent::builder()
            .identity("chat")
            .backend(backend)
            .recorder(recorder.clone())
            .build()
            .unwrap();

        let mut conversation = Conversation::new();
        agent.run(&mut conversation, "first").await.unwrap();
        agent.run(&mut conversation, "second").await.unwrap();

        let records = recorder.records("chat").await;
        assert_eq!(records.len(), 2);
        let second = &records[1];
        assert_eq!(second.messages.len(), 4);

        let reply = replay_interaction(second, ToolRegistry::new(), AgentConfig::default())
            .await
            .unwrap();
        assert_eq!(reply.answer, "done");
        assert_eq!(reply.messages, second.messages);
    }
}
