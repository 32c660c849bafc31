//! Tool System
//!
//! Extensible tool framework for agent capabilities.
//! Tools are registered before an interaction starts and resolved by name
//! when the model asks for them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result, ToolError};

/// Parameter definition for tool schema
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, integer, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    pub fn required(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self.param_type.as_str() {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        }
    }
}

/// Name and parameter schema advertised to the model backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to the model)
    pub description: String,

    /// Parameter definitions
    #[serde(default)]
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, param: ParameterSchema) -> Self {
        self.parameters.push(param);
        self
    }

    /// Render the parameters as a JSON Schema object
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), Value::String(param.param_type.clone()));
            prop.insert("description".into(), Value::String(param.description.clone()));
            if let Some(values) = &param.enum_values {
                prop.insert("enum".into(), Value::Array(values.clone()));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check arguments against the declared parameters.
    pub fn check_arguments(&self, arguments: &Map<String, Value>) -> std::result::Result<(), ToolError> {
        for param in &self.parameters {
            match arguments.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(ToolError::InvalidArguments(format!(
                        "Missing required parameter: {}",
                        param.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    if !param.accepts(value) {
                        return Err(ToolError::InvalidArguments(format!(
                            "Parameter '{}' must be of type {}",
                            param.name, param.param_type
                        )));
                    }
                    if let Some(allowed) = &param.enum_values {
                        if !allowed.contains(value) {
                            return Err(ToolError::InvalidArguments(format!(
                                "Parameter '{}' must be one of {}",
                                param.name,
                                Value::Array(allowed.clone())
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name and schema advertised to the model
    fn spec(&self) -> ToolSpec;

    /// Execute the tool with given arguments
    async fn invoke(&self, arguments: &Map<String, Value>) -> std::result::Result<Value, ToolError>;

    /// Validate arguments before execution
    fn validate(&self, arguments: &Map<String, Value>) -> std::result::Result<(), ToolError> {
        self.spec().check_arguments(arguments)
    }
}

#[derive(Clone)]
struct RegisteredTool {
    spec: ToolSpec,
    tool: Arc<dyn Tool>,
}

/// Registry for available tools.
///
/// Iteration order is registration order so that backends see the same
/// tool list on every call.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    entries: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let spec = tool.spec();
        if self.index.contains_key(&spec.name) {
            return Err(AgentError::DuplicateTool(spec.name));
        }

        tracing::debug!(tool = %spec.name, "Registering tool");
        self.index.insert(spec.name.clone(), self.entries.len());
        self.entries.push(RegisteredTool { spec, tool });
        Ok(())
    }

    /// Get a tool by name
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.entries[i].tool))
    }

    /// Specs of all tools, in registration order
    pub fn list_specs(&self) -> Vec<ToolSpec> {
        self.entries.iter().map(|e| e.spec.clone()).collect()
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.spec.name.as_str()).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// Calculator tool - evaluates arithmetic expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("calc", "Evaluate an arithmetic expression").param(ParameterSchema::required(
            "expr",
            "string",
            "Expression using + - * / ^ and parentheses (e.g., '2 + 2', '(1 + 2) * 3')",
        ))
    }

    async fn invoke(&self, arguments: &Map<String, Value>) -> std::result::Result<Value, ToolError> {
        let expr = arguments
            .get("expr")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("Missing expr".into()))?;

        let result = evaluate_expression(expr).map_err(ToolError::InvalidArguments)?;
        number_value(result)
    }
}

/// Integral results come back as JSON integers so `2+2` yields `4`, not `4.0`.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number_value(n: f64) -> std::result::Result<Value, ToolError> {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Ok(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| ToolError::Execution(format!("Result is not a finite number: {n}")))
}

fn evaluate_expression(expr: &str) -> std::result::Result<f64, String> {
    let mut parser = ExprParser {
        input: expr.as_bytes(),
        pos: 0,
    };
    let value = parser.sum()?;
    parser.skip_ws();
    if parser.pos != parser.input.len() {
        return Err(format!("Unexpected input at position {}", parser.pos));
    }
    Ok(value)
}

/// Recursive-descent evaluator: sum > product > unary > power > atom
struct ExprParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl ExprParser<'_> {
    fn skip_ws(&mut self) {
        while self.input.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: u8) -> bool {
        self.skip_ws();
        if self.input.get(self.pos) == Some(&c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn sum(&mut self) -> std::result::Result<f64, String> {
        let mut acc = self.product()?;
        loop {
            if self.eat(b'+') {
                acc += self.product()?;
            } else if self.eat(b'-') {
                acc -= self.product()?;
            } else {
                return Ok(acc);
            }
        }
    }

    fn product(&mut self) -> std::result::Result<f64, String> {
        let mut acc = self.unary()?;
        loop {
            if self.eat(b'*') {
                acc *= self.unary()?;
            } else if self.eat(b'/') {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err("Division by zero".into());
                }
                acc /= rhs;
            } else {
                return Ok(acc);
            }
        }
    }

    fn unary(&mut self) -> std::result::Result<f64, String> {
        if self.eat(b'-') {
            return Ok(-self.unary()?);
        }
        self.power()
    }

    fn power(&mut self) -> std::result::Result<f64, String> {
        let base = self.atom()?;
        if self.eat(b'^') {
            let exp = self.unary()?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    fn atom(&mut self) -> std::result::Result<f64, String> {
        if self.eat(b'(') {
            let inner = self.sum()?;
            if !self.eat(b')') {
                return Err("Unbalanced parentheses".into());
            }
            return Ok(inner);
        }

        self.skip_ws();
        let start = self.pos;
        while self
            .input
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_digit() || *c == b'.')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(format!("Expected a number at position {start}"));
        }

        std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|e| e.to_string())?
            .parse::<f64>()
            .map_err(|e| format!("Parse error: {e}"))
    }
}
