//! Remote Tool Adapter
//!
//! Bridges catalog entries into [`ToolDefinition`]s whose handler forwards to
//! [`RpcTransport::call`]. Remote tools that take a single envelope object
//! (`{"input": {...}}`) are presented to the model with the envelope's inner
//! schema; arguments are wrapped again on the way out.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::catalog::ToolCatalogEntry;
use super::protocol::ToolCallResult;
use super::transport::RpcTransport;
use crate::error::Result;
use crate::tool::{ToolDefinition, ToolHandler, ToolOutput, ToolRegistry, ToolSource};

/// Envelope field used by remote tools built around one input model
pub const DEFAULT_ENVELOPE: &str = "input";

/// Exposes a transport's catalog as locally invocable tools
#[derive(Clone, Debug)]
pub struct McpToolAdapter {
    transport: Arc<RpcTransport>,
    envelope: String,
}

impl McpToolAdapter {
    pub fn new(transport: Arc<RpcTransport>) -> Self {
        Self {
            transport,
            envelope: DEFAULT_ENVELOPE.into(),
        }
    }

    #[must_use]
    pub fn with_envelope(mut self, field: impl Into<String>) -> Self {
        self.envelope = field.into();
        self
    }

    pub const fn transport(&self) -> &Arc<RpcTransport> {
        &self.transport
    }

    /// Definition for one catalog entry
    pub fn definition(&self, entry: &ToolCatalogEntry) -> ToolDefinition {
        let inner = envelope_schema(&entry.input_schema, &self.envelope);
        let enveloped = inner.is_some();
        let parameters = inner.unwrap_or_else(|| entry.input_schema.clone());

        let handler = RemoteToolHandler {
            transport: Arc::clone(&self.transport),
            name: entry.name.clone(),
            envelope: enveloped.then(|| self.envelope.clone()),
        };

        ToolDefinition::new(
            entry.name.clone(),
            entry.description.clone(),
            parameters,
            Arc::new(handler),
        )
    }

    /// Register every catalog tool, replacing same-named bindings
    pub async fn register_all(&self, registry: &mut ToolRegistry) -> usize {
        let catalog = self.transport.catalog().await;
        for entry in &catalog {
            registry.register(self.definition(entry));
        }
        tracing::debug!(count = catalog.len(), "Registered remote tools");
        catalog.len()
    }
}

#[async_trait]
impl ToolSource for McpToolAdapter {
    async fn tool_definitions(&self) -> Result<Vec<ToolDefinition>> {
        let catalog = self.transport.catalog().await;
        Ok(catalog.iter().map(|entry| self.definition(entry)).collect())
    }

    async fn describe(&self) -> Vec<ToolCatalogEntry> {
        self.transport.catalog().await
    }
}

/// Handler forwarding one tool to the transport
struct RemoteToolHandler {
    transport: Arc<RpcTransport>,
    name: String,
    envelope: Option<String>,
}

#[async_trait]
impl ToolHandler for RemoteToolHandler {
    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<ToolOutput> {
        let arguments = match &self.envelope {
            Some(field) => {
                let mut wrapped = Map::new();
                wrapped.insert(field.clone(), Value::Object(arguments.clone()));
                Value::Object(wrapped)
            }
            None => Value::Object(arguments.clone()),
        };

        let raw = self.transport.call(&self.name, arguments).await?;
        Ok(parse_call_result(raw))
    }
}

/// Unwrap a `tools/call` result into tool output
pub fn parse_call_result(raw: Value) -> ToolOutput {
    let shaped = raw.get("content").is_some() || raw.get("structuredContent").is_some();
    match serde_json::from_value::<ToolCallResult>(raw.clone()) {
        Ok(result) if shaped => {
            ToolOutput {
                success: !result.is_error,
                content: result.text(),
                data: result.structured_content,
            }
        }
        _ => ToolOutput::from_value(raw),
    }
}

/// Inner schema when `field` is the only property of `schema` and itself
/// describes an object
pub fn envelope_schema(schema: &Value, field: &str) -> Option<Value> {
    let properties = schema.get("properties")?.as_object()?;
    if properties.len() != 1 {
        return None;
    }
    let inner = properties.get(field)?;

    let mut resolved = resolve_local_ref(inner, schema);
    let is_object = resolved.get("type").and_then(Value::as_str) == Some("object")
        || resolved.get("properties").is_some_and(Value::is_object);
    if !is_object {
        return None;
    }
    if let (Some(defs), Some(object)) = (schema.get("$defs"), resolved.as_object_mut()) {
        object.entry("$defs").or_insert_with(|| defs.clone());
    }
    Some(resolved)
}

fn resolve_local_ref(schema: &Value, root: &Value) -> Value {
    schema
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|reference| reference.strip_prefix('#'))
        .and_then(|pointer| root.pointer(pointer))
        .unwrap_or(schema)
        .clone()
}
