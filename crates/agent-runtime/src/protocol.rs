//! Text tool-calling protocol
//!
//! For models without native function calling. Tools are described in the
//! system prompt and the model requests them with fenced blocks:
//!
//! ````text
//! ```tool
//! {"tool": "calc", "arguments": {"expr": "2 + 2"}}
//! ```
//! ````
//!
//! Several blocks in one reply become several tool calls in one turn.

use agent_core::{LlmResponse, Message, Role, ToolCallRequest, ToolSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const TOOL_FENCE: &str = "```tool";
const FENCE_END: &str = "```";

#[derive(Debug, Serialize, Deserialize)]
struct ToolBlock {
    tool: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

impl ToolBlock {
    fn into_request(self) -> ToolCallRequest {
        ToolCallRequest::new(uuid::Uuid::new_v4().to_string(), self.tool, self.arguments)
    }
}

/// Generate system prompt section describing available tools
pub fn tool_prompt_section(specs: &[ToolSpec]) -> String {
    let mut prompt = String::from("## Available Tools\n\n");
    prompt.push_str("You can use the following tools by responding with one JSON block per call:\n\n");
    prompt.push_str("```tool\n{\"tool\": \"tool_name\", \"arguments\": {\"arg\": \"value\"}}\n```\n\n");
    prompt.push_str("After receiving tool results, answer the user directly without a tool block.\n\n");

    for spec in specs {
        prompt.push_str(&format!("### {}\n{}\n", spec.name, spec.description));

        if !spec.parameters.is_empty() {
            prompt.push_str("**Parameters:**\n");
            for param in &spec.parameters {
                let required = if param.required { " (required)" } else { "" };
                prompt.push_str(&format!(
                    "- `{}` ({}){}: {}\n",
                    param.name, param.param_type, required, param.description
                ));
            }
        }
        prompt.push('\n');
    }

    prompt
}

fn render_call(call: &ToolCallRequest) -> String {
    let block = serde_json::json!({ "tool": call.name, "arguments": call.arguments });
    format!("{TOOL_FENCE}\n{block}\n{FENCE_END}")
}

/// Flatten history into `(role, text)` pairs a plain chat model accepts.
///
/// Tool results travel as user-role context; assistant tool requests are
/// re-rendered as tool blocks so the model sees its own calls.
pub fn render_history(history: &[Message], specs: &[ToolSpec]) -> Vec<(Role, String)> {
    let mut rendered: Vec<(Role, String)> = history
        .iter()
        .map(|m| match m.role() {
            Role::Tool => (
                Role::User,
                format!("[Tool result {}]\n{}", m.tool_call_id().unwrap_or("?"), m.content()),
            ),
            Role::Assistant if !m.tool_calls().is_empty() => {
                let mut parts: Vec<String> = Vec::new();
                if !m.content().is_empty() {
                    parts.push(m.content().to_string());
                }
                parts.extend(m.tool_calls().iter().map(render_call));
                (Role::Assistant, parts.join("\n"))
            }
            role => (role, m.content().to_string()),
        })
        .collect();

    if !specs.is_empty() {
        let section = tool_prompt_section(specs);
        match rendered.first_mut() {
            Some((Role::System, prompt)) => {
                prompt.push_str("\n\n");
                prompt.push_str(&section);
            }
            _ => rendered.insert(0, (Role::System, section)),
        }
    }

    rendered
}

/// Turn a model reply into a final answer or tool requests
pub fn parse_response(content: &str) -> LlmResponse {
    let mut calls = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find(TOOL_FENCE) {
        let after = &rest[start + TOOL_FENCE.len()..];
        let Some(end) = after.find(FENCE_END) else {
            break;
        };
        match serde_json::from_str::<ToolBlock>(after[..end].trim()) {
            Ok(block) => calls.push(block.into_request()),
            Err(e) => tracing::debug!(error = %e, "Ignoring malformed tool block"),
        }
        rest = &after[end + FENCE_END.len()..];
    }

    if calls.is_empty() {
        calls.extend(parse_inline_tool_call(content));
    }

    if calls.is_empty() {
        LlmResponse::Final(content.trim().to_string())
    } else {
        LlmResponse::ToolCalls(calls)
    }
}

/// Bare JSON object with a "tool" key, for models that drop the fence
fn parse_inline_tool_call(content: &str) -> Option<ToolCallRequest> {
    if !content.contains(r#""tool""#) {
        return None;
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }

    serde_json::from_str::<ToolBlock>(&content[start..=end])
        .ok()
        .map(ToolBlock::into_request)
}
