//! LLM Provider Adapter Contract
//!
//! Defines a common interface for all chat backends (Ollama, OpenAI, ...)
//! over the canonical [`Message`] type. Each adapter owns a local
//! [`ToolRegistry`]; tools registered on one adapter are invisible to another.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_core::provider::{ChatOptions, ProviderRegistry};
//!
//! let mut providers = ProviderRegistry::new();
//! relay_runtime::register_builtin_providers(&mut providers);
//!
//! let provider = providers.create("ollama", "llama3.2")?;
//! let response = provider.chat(&messages, &ChatOptions::default()).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::tool::{ToolCall, ToolDefinition, ToolRegistry, ToolSpec};

/// Per-call generation options
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Temperature for sampling (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Whether the adapter may offer its registered tools to the backend
    #[serde(default = "default_tools_enabled")]
    pub tools_enabled: bool,

    /// Backend-specific passthrough options
    #[serde(default)]
    pub extra: Map<String, Value>,
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_tools_enabled() -> bool {
    true
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: Some(1000),
            tools_enabled: default_tools_enabled(),
            extra: Map::new(),
        }
    }
}

impl ChatOptions {
    /// Same options with tool offering switched off
    #[must_use]
    pub fn without_tools(&self) -> Self {
        Self {
            tools_enabled: false,
            ..self.clone()
        }
    }
}

/// Token usage statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

impl FinishReason {
    /// Parse a backend finish/done reason string
    pub fn parse(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "tool_calls" | "tool_use" | "function_call" => Self::ToolUse,
            "content_filter" => Self::ContentFilter,
            _ => Self::Error,
        }
    }
}

/// Response from one backend chat call
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated text, if any
    pub text: Option<String>,

    /// Tool calls requested by the model, in backend order
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,
}

impl ChatResponse {
    /// Plain text response
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
            finish_reason: Some(FinishReason::Stop),
            usage: None,
        }
    }

    /// Response requesting tool calls
    pub fn tool_calls(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text,
            tool_calls,
            finish_reason: Some(FinishReason::ToolUse),
            usage: None,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// State every adapter carries: model, optional system prompt, local tools
#[derive(Clone, Debug, Default)]
pub struct ProviderCore {
    pub model: String,
    pub system_prompt: Option<String>,
    pub tools: ToolRegistry,
}

impl ProviderCore {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            tools: ToolRegistry::new(),
        }
    }
}

/// Adapter trait for chat backends
///
/// Implement this trait to add support for new backends. The engine works
/// exclusively through this interface.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registered backend name (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    fn core(&self) -> &ProviderCore;

    fn core_mut(&mut self) -> &mut ProviderCore;

    /// Send messages to the backend and get one response.
    ///
    /// Must not mutate caller state; failures are classified into the
    /// provider variants of [`AgentError`].
    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse>;

    /// Whether this backend/model supports function calling
    fn supports_tools(&self) -> bool;

    /// Whether this backend accepts a system role
    fn supports_system_prompt(&self) -> bool {
        true
    }

    fn model(&self) -> &str {
        &self.core().model
    }

    fn system_prompt(&self) -> Option<&str> {
        self.core().system_prompt.as_deref()
    }

    fn set_system_prompt(&mut self, prompt: String) {
        self.core_mut().system_prompt = Some(prompt);
    }

    fn registry(&self) -> &ToolRegistry {
        &self.core().tools
    }

    fn add_tool(&mut self, tool: ToolDefinition) {
        self.core_mut().tools.register(tool);
    }

    fn remove_tool(&mut self, name: &str) -> bool {
        self.core_mut().tools.remove(name).is_some()
    }

    fn clear_tools(&mut self) {
        self.core_mut().tools.clear();
    }

    fn list_tools(&self) -> Vec<ToolSpec> {
        self.core().tools.specs()
    }

    /// Tools to put on the wire for a call with `options`
    fn offered_tools(&self, options: &ChatOptions) -> Vec<ToolSpec> {
        if options.tools_enabled && self.supports_tools() {
            self.list_tools()
        } else {
            Vec::new()
        }
    }

    /// Single-message convenience: one ask, at most one tool round.
    ///
    /// Tool calls in the first response are executed against this adapter's
    /// own registry, then exactly one follow-up call is made with tools
    /// disabled. Further continuation is up to the caller.
    async fn chat_simple(
        &self,
        message: &str,
        history: &[Message],
        options: &ChatOptions,
    ) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() + 2);

        if self.supports_system_prompt() {
            if let Some(prompt) = self.system_prompt() {
                messages.push(Message::system(prompt));
            }
        }
        messages.extend_from_slice(history);
        messages.push(Message::user(message));

        let response = self.chat(&messages, options).await?;
        if !response.has_tool_calls() {
            return Ok(response.text.unwrap_or_else(|| "No response generated".into()));
        }

        messages.push(Message::assistant_with_calls(
            response.text.clone(),
            response.tool_calls.clone(),
        ));
        for call in &response.tool_calls {
            let result = self.registry().execute(call).await;
            messages.push(Message::tool(result.message_content(), call));
        }

        let final_response = self.chat(&messages, &options.without_tools()).await?;
        Ok(final_response
            .text
            .unwrap_or_else(|| "No response generated".into()))
    }
}

/// Construction parameters handed to a provider factory
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    /// Model identifier (e.g., "llama3.2", "gpt-4o-mini")
    pub model: String,

    /// Credential, when the backend needs one
    pub api_key: Option<String>,

    /// Override of the backend base URL
    pub base_url: Option<String>,

    /// HTTP timeout for one backend call
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: None,
            base_url: None,
            timeout: Duration::from_secs(120),
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Factory producing an adapter from settings
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderSettings) -> Result<Box<dyn ProviderAdapter>> + Send + Sync>;

/// Explicit name → factory table, injected wherever providers are created
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
    defaults: BTreeMap<String, ProviderSettings>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous one
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ProviderSettings) -> Result<Box<dyn ProviderAdapter>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Base settings (credentials, URLs) merged into every `create` for `name`
    pub fn set_defaults(&mut self, name: impl Into<String>, settings: ProviderSettings) {
        self.defaults.insert(name.into(), settings);
    }

    /// Create an adapter by registered name
    pub fn create(&self, name: &str, model: &str) -> Result<Box<dyn ProviderAdapter>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| AgentError::Config(format!("Unknown provider: {name}")))?;

        let mut settings = self
            .defaults
            .get(name)
            .cloned()
            .unwrap_or_else(|| ProviderSettings::new(model));
        settings.model = model.to_string();

        tracing::debug!(provider = %name, model = %model, "Creating provider");
        factory(&settings)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// List all registered providers
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::scripted::ScriptedProvider;
    use serde_json::json;

    #[test]
    fn test_chat_options_defaults() {
        let opts = ChatOptions::default();
        assert!((opts.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(opts.max_tokens, Some(1000));
        assert!(opts.tools_enabled);
        assert!(!opts.without_tools().tools_enabled);
    }

    #[test]
    fn test_finish_reason_parse() {
        assert_eq!(FinishReason::parse("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("tool_calls"), FinishReason::ToolUse);
        assert_eq!(FinishReason::parse("length"), FinishReason::Length);
    }

    #[test]
    fn test_registry_create_and_unknown() {
        let mut providers = ProviderRegistry::new();
        providers.register("scripted", |settings: &ProviderSettings| {
            Ok(Box::new(ScriptedProvider::new(settings.model.clone())) as Box<dyn ProviderAdapter>)
        });

        let provider = providers.create("scripted", "test-model").unwrap();
        assert_eq!(provider.name(), "scripted");
        assert_eq!(provider.model(), "test-model");
        assert_eq!(providers.names(), vec!["scripted"]);

        let err = providers.create("nope", "x").err().unwrap();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_offered_tools_respects_options() {
        let mut provider = ScriptedProvider::new("m");
        provider.add_tool(ToolDefinition::from_fn(
            "calculator",
            "Add numbers",
            json!({"type": "object"}),
            |_| Ok(json!(42)),
        ));

        let enabled = ChatOptions::default();
        assert_eq!(provider.offered_tools(&enabled).len(), 1);
        assert!(provider.offered_tools(&enabled.without_tools()).is_empty());

        assert!(provider.remove_tool("calculator"));
        assert!(provider.list_tools().is_empty());
    }

    #[tokio::test]
    async fn test_chat_simple_runs_one_tool_round() {
        let mut provider = ScriptedProvider::new("m");
        provider.set_system_prompt("Be brief.".into());
        provider.add_tool(ToolDefinition::from_fn(
            "calculator",
            "Add numbers",
            json!({"type": "object"}),
            |_| Ok(json!("42")),
        ));
        let script = provider.handle();
        script.push_response(ChatResponse::tool_calls(
            None,
            vec![
                ToolCall::new("c1", "calculator", Map::new()),
                ToolCall::new("c2", "unknown_tool", Map::new()),
            ],
        ));
        script.push_response(ChatResponse::text("The answer is 42."));

        let answer = provider
            .chat_simple("What is 15+27?", &[], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(answer, "The answer is 42.");

        let calls = script.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].messages[0].role, Role::System);
        assert_eq!(calls[0].offered_tools, vec!["calculator".to_string()]);
        assert!(calls[1].offered_tools.is_empty());

        let tool_messages: Vec<_> = calls[1]
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(tool_messages.len(), 2);
        assert_eq!(tool_messages[0].text(), "42");
        assert!(tool_messages[1].text().contains("not found"));
    }
}
