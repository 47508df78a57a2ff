//! Tool System
//!
//! Tool definitions pair a provider-facing schema with an invocation handle.
//! Each provider adapter owns one [`ToolRegistry`]; the engine installs
//! definitions onto it before asking the model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::mcp::ToolCatalogEntry;

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Backend-issued call id, unique within one response
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Mint a call id for backends that do not issue one
    pub fn generate_id() -> String {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    }
}

/// What a tool body hands back
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the tool reported success
    pub success: bool,

    /// Text shown to the model
    pub content: String,

    /// Structured data (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            data: None,
        }
    }

    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            success: false,
            content: content.into(),
            data: None,
        }
    }

    /// Successful output rendered from an arbitrary JSON value.
    ///
    /// Strings are used verbatim, anything else is rendered as compact JSON and
    /// also kept as structured data.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => Self::success(text),
            other => Self::success(other.to_string()).with_data(other),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Result from tool execution, as recorded by the engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that was called
    pub name: String,

    /// Call ID the result answers
    pub id: String,

    /// Whether execution succeeded
    pub success: bool,

    /// Output (success text or error detail)
    pub output: String,

    /// Structured data (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn from_output(call: &ToolCall, output: ToolOutput) -> Self {
        Self {
            name: call.name.clone(),
            id: call.id.clone(),
            success: output.success,
            output: output.content,
            data: output.data,
        }
    }

    pub fn failure(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            name: call.name.clone(),
            id: call.id.clone(),
            success: false,
            output: error.into(),
            data: None,
        }
    }

    /// Content of the tool-role message answering the call
    pub fn message_content(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!("Error: {}", self.output)
        }
    }
}

/// Invocation capability behind a tool definition
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with the caller's argument mapping
    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolOutput>;
}

/// Handler wrapping a synchronous closure, for local tool bodies
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Map<String, Value>) -> anyhow::Result<Value> + Send + Sync,
{
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(&Map<String, Value>) -> anyhow::Result<Value> + Send + Sync,
{
    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolOutput> {
        let value = (self.func)(arguments)?;
        Ok(ToolOutput::from_value(value))
    }
}

/// Schema half of a tool definition, as offered to a backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// JSON Schema of the argument mapping
    pub parameters: Value,
}

/// Tool definition: schema plus invocation handle
#[derive(Clone)]
pub struct ToolDefinition {
    pub spec: ToolSpec,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            spec: ToolSpec {
                name: name.into(),
                description: description.into(),
                parameters,
            },
            handler,
        }
    }

    /// Definition backed by a synchronous closure
    pub fn from_fn<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        func: F,
    ) -> Self
    where
        F: Fn(&Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, description, parameters, Arc::new(FnHandler::new(func)))
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Registry for available tools
///
/// Names are unique; registering an existing name replaces the binding.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous binding of the same name
    pub fn register(&mut self, tool: ToolDefinition) {
        if self.tools.insert(tool.spec.name.clone(), tool).is_some() {
            tracing::debug!("Replaced existing tool binding");
        }
    }

    /// Remove a tool by name
    pub fn remove(&mut self, name: &str) -> Option<ToolDefinition> {
        self.tools.remove(name)
    }

    /// Remove all tools
    pub fn clear(&mut self) {
        self.tools.clear();
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// All definitions, ordered by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().cloned().collect()
    }

    /// Get all tool schemas (for a backend request)
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec.clone()).collect()
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call, folding every failure into an error result.
    ///
    /// Unknown names and handler errors never escape: they become a failed
    /// [`ToolResult`] whose text the model can read.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            let error = AgentError::ToolNotFound(call.name.clone());
            return ToolResult::failure(call, error.to_string());
        };

        match tool.handler.invoke(&call.arguments).await {
            Ok(output) => ToolResult::from_output(call, output),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool execution failed");
                let error = AgentError::ToolExecution(format!("'{}' failed: {e}", call.name));
                ToolResult::failure(call, error.to_string())
            }
        }
    }
}

/// A source of tool definitions the engine can install before a turn
#[async_trait]
pub trait ToolSource: Send + Sync {
    /// Current definitions, each bound to its invocation handle
    async fn tool_definitions(&self) -> Result<Vec<ToolDefinition>>;

    /// Catalog entries describing the same tools
    async fn describe(&self) -> Vec<ToolCatalogEntry>;
}
