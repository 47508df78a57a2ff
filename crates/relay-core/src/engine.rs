//! Orchestration Engine
//!
//! Drives one turn: ask the model, execute whatever tools it requested in the
//! order it requested them, feed the results back and ask exactly once more
//! with tools disabled. A turn never recurses past that single tool round.
//!
//! ```text
//! Start ─▶ Plan ─▶ Ask ─┬─ no calls ───────────────────────▶ Done
//!                       └─ calls ─▶ Execute (in order) ─▶ Resolve ─▶ Done
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{AgentError, Result};
use crate::mcp::{McpServerConfig, McpToolAdapter, RpcTransport, ToolCatalogEntry};
use crate::message::{Conversation, Message};
use crate::provider::{ChatOptions, ChatResponse, ProviderAdapter, ProviderRegistry};
use crate::thinking::{preview, ThinkingStep, ThinkingStepType, ThinkingTrace};
use crate::tool::{ToolResult, ToolSource};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to structured tools.

When using tools:
1. Use structured inputs exactly as specified in the tool schemas
2. Interpret structured outputs to give complete answers
3. Explain briefly what each tool did and what it returned

If you can answer directly without tools, do so. Be concise and accurate.";

/// Engine configuration
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Registered provider name used by `initialize`
    pub provider: String,

    pub model: String,

    pub system_prompt: String,

    /// Default sampling temperature for a turn
    pub temperature: f32,

    /// Default generation cap for a turn
    pub max_tokens: Option<u32>,

    /// Whether turns use tools unless the request says otherwise
    pub tools_enabled: bool,

    /// Successful tool results summarized into the system prompt
    pub recent_results_window: usize,

    /// Characters of tool output shown in a `tool_result` step
    pub trace_preview_chars: usize,

    /// Bound on each provider call
    pub provider_timeout: Duration,

    /// Tool server spawned by `initialize`, if any
    pub mcp: Option<McpServerConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".into(),
            model: "llama3.2".into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            temperature: 0.7,
            max_tokens: Some(1000),
            tools_enabled: true,
            recent_results_window: 3,
            trace_preview_chars: 200,
            provider_timeout: Duration::from_secs(120),
            mcp: None,
        }
    }
}

/// One caller input; unset fields fall back to [`EngineConfig`]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    pub input: String,
    #[serde(default)]
    pub use_tools: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl TurnRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn use_tools(mut self, enabled: bool) -> Self {
        self.use_tools = Some(enabled);
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// What a turn produced. Failures are folded in: `is_error` marks `text` as
/// an error description rather than an answer.
#[derive(Clone, Debug, Serialize)]
pub struct TurnOutcome {
    pub text: String,
    pub is_error: bool,
    pub steps: Vec<ThinkingStep>,
}

/// Snapshot for status displays
#[derive(Clone, Debug, Serialize)]
pub struct EngineSummary {
    pub message_count: usize,
    pub tool_results: usize,
    /// `name/model`
    pub provider: String,
    pub tools_available: usize,
    pub initialized: bool,
}

/// The conversation orchestrator
///
/// `run` takes `&mut self`, so one engine never has two turns in flight.
pub struct Engine {
    config: EngineConfig,
    providers: ProviderRegistry,
    provider: Option<Box<dyn ProviderAdapter>>,
    tools: Option<Arc<dyn ToolSource>>,
    transport: Option<Arc<RpcTransport>>,
    conversation: Conversation,
    recent_results: VecDeque<ToolResult>,
    trace: ThinkingTrace,
    initialized: bool,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Create the provider and connect the tool server as configured.
    ///
    /// Returns `false` (and logs why) when either fails; `run` refuses to
    /// proceed until this has succeeded.
    pub async fn initialize(&mut self) -> bool {
        if self.initialized {
            return true;
        }

        if self.provider.is_none() {
            match self.providers.create(&self.config.provider, &self.config.model) {
                Ok(provider) => self.provider = Some(provider),
                Err(e) => {
                    tracing::error!(
                        provider = %self.config.provider,
                        error = %e,
                        "Failed to create provider"
                    );
                    return false;
                }
            }
        }

        if self.tools.is_none() {
            if let Some(server) = self.config.mcp.clone() {
                let transport = Arc::new(RpcTransport::new(server));
                if !transport.connect().await {
                    return false;
                }
                self.tools = Some(Arc::new(McpToolAdapter::new(Arc::clone(&transport))));
                self.transport = Some(transport);
            }
        }

        self.initialized = true;
        tracing::info!(
            provider = %self.config.provider,
            model = %self.config.model,
            tool_source = self.tools.is_some(),
            "Engine initialized"
        );
        true
    }

    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Run one turn. Never fails: errors come back as an `is_error` outcome
    /// together with the steps recorded up to the failure.
    pub async fn run(&mut self, request: TurnRequest) -> TurnOutcome {
        let started = Instant::now();
        self.trace.clear();

        let use_tools = request.use_tools.unwrap_or(self.config.tools_enabled);
        let options = ChatOptions {
            temperature: request.temperature.unwrap_or(self.config.temperature),
            max_tokens: request.max_tokens.or(self.config.max_tokens),
            tools_enabled: use_tools,
            extra: Map::new(),
        };

        self.trace.push(
            ThinkingStep::new(
                ThinkingStepType::UserInput,
                "Processing user request",
                request.input.as_str(),
            )
            .with_metadata("use_tools", json!(use_tools))
            .with_metadata("temperature", json!(options.temperature))
            .with_metadata("max_tokens", json!(options.max_tokens)),
        );

        if !self.initialize().await {
            return self.error_outcome(&AgentError::Config(
                "engine is not initialized: provider or tool server unavailable".into(),
            ));
        }

        self.conversation.push(Message::user(request.input));

        match self.drive(started, use_tools, &options).await {
            Ok(text) => TurnOutcome {
                text,
                is_error: false,
                steps: self.trace.take(),
            },
            Err(e) => self.error_outcome(&e),
        }
    }

    fn error_outcome(&mut self, error: &AgentError) -> TurnOutcome {
        tracing::error!(error = %error, "Turn failed");
        TurnOutcome {
            text: format!("Error in chat processing: {error}"),
            is_error: true,
            steps: self.trace.take(),
        }
    }

    async fn drive(
        &mut self,
        started: Instant,
        use_tools: bool,
        options: &ChatOptions,
    ) -> Result<String> {
        if use_tools {
            self.plan_tools().await;
        }

        let (name, model) = {
            let provider = self.active()?;
            (provider.name().to_string(), provider.model().to_string())
        };
        self.trace.push(ThinkingStep::new(
            ThinkingStepType::Reasoning,
            "Generating initial response",
            format!("Calling {name} with model {model}"),
        ));

        let response = self.ask(&self.outgoing_messages(), options).await?;

        let reply = if use_tools && response.has_tool_calls() {
            self.execute_calls(response).await?;
            tracing::debug!("Making follow-up call without tools");
            let messages = self.outgoing_messages();
            self.ask(&messages, &options.without_tools()).await?.text
        } else {
            response.text
        };
        let text = reply.unwrap_or_default();

        let length = text.chars().count();
        self.trace.push(
            ThinkingStep::new(
                ThinkingStepType::FinalResponse,
                "Response completed",
                format!("Generated {length} characters"),
            )
            .with_duration(started.elapsed())
            .with_metadata("response_length", json!(length)),
        );

        self.conversation.push(Message::assistant(text.as_str()));
        Ok(text)
    }

    /// Install the tool source's current definitions on the active adapter
    async fn plan_tools(&mut self) {
        let Some(source) = self.tools.clone() else {
            return;
        };

        let definitions = match source.tool_definitions().await {
            Ok(definitions) => definitions,
            Err(e) => {
                tracing::warn!(error = %e, "Could not fetch tool definitions");
                return;
            }
        };
        let Some(provider) = self.provider.as_mut() else {
            return;
        };

        provider.clear_tools();
        let names: Vec<String> = definitions.iter().map(|d| d.name().to_string()).collect();
        for definition in definitions {
            provider.add_tool(definition);
        }

        self.trace.push(
            ThinkingStep::new(
                ThinkingStepType::ToolPlanning,
                format!("Planning with {} available tools", names.len()),
                format!("Available tools: {}", names.join(", ")),
            )
            .with_metadata("tool_count", json!(names.len())),
        );
    }

    async fn ask(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse> {
        let provider = self.active()?;
        tracing::debug!(
            provider = %provider.name(),
            messages = messages.len(),
            tools = provider.offered_tools(options).len(),
            "Calling provider"
        );

        tokio::time::timeout(self.config.provider_timeout, provider.chat(messages, options))
            .await
            .map_err(|_| {
                AgentError::Timeout(format!(
                    "provider '{}' did not answer within {:?}",
                    provider.name(),
                    self.config.provider_timeout
                ))
            })?
    }

    /// Execute every call of `response` in order, one tool message per call
    async fn execute_calls(&mut self, response: ChatResponse) -> Result<()> {
        let provider = self
            .provider
            .as_deref()
            .ok_or_else(|| AgentError::Config("no active provider".into()))?;

        tracing::info!(count = response.tool_calls.len(), "Processing tool calls");
        self.conversation.push(Message::assistant_with_calls(
            response.text,
            response.tool_calls.clone(),
        ));

        for call in &response.tool_calls {
            let arguments = Value::Object(call.arguments.clone());
            self.trace.push(
                ThinkingStep::new(
                    ThinkingStepType::ToolExecution,
                    format!("Executing {}", call.name),
                    format!("Arguments: {arguments}"),
                )
                .with_metadata("tool_name", json!(call.name))
                .with_metadata("arguments", arguments),
            );

            let started = Instant::now();
            let result = provider.registry().execute(call).await;
            let elapsed = started.elapsed();

            tracing::info!(tool = %call.name, success = result.success, "Tool executed");
            let outcome = if result.success { "succeeded" } else { "failed" };
            self.trace.push(
                ThinkingStep::new(
                    ThinkingStepType::ToolResult,
                    format!("Tool {} {outcome}", call.name),
                    preview(&result.output, self.config.trace_preview_chars),
                )
                .with_duration(elapsed)
                .with_metadata("tool_name", json!(call.name))
                .with_metadata("success", json!(result.success))
                .with_metadata("result_length", json!(result.output.chars().count())),
            );

            self.conversation
                .push(Message::tool(result.message_content(), call));

            self.recent_results.push_back(result);
            while self.recent_results.len() > self.config.recent_results_window {
                self.recent_results.pop_front();
            }
        }
        Ok(())
    }

    /// System prompt with recent results, then the full history
    fn outgoing_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.conversation.len() + 1);
        if self
            .provider
            .as_deref()
            .is_none_or(|provider| provider.supports_system_prompt())
        {
            messages.push(Message::system(self.system_prompt_with_context()));
        }
        messages.extend_from_slice(self.conversation.messages());
        messages
    }

    fn system_prompt_with_context(&self) -> String {
        let mut prompt = self.config.system_prompt.clone();
        let mut recent = self.recent_results.iter().filter(|r| r.success).peekable();
        if recent.peek().is_some() {
            prompt.push_str("\n\nRecent tool execution results for context:");
            for result in recent {
                let _ = write!(
                    prompt,
                    "\n- {}: {}",
                    result.name,
                    preview(&result.output, self.config.trace_preview_chars)
                );
            }
        }
        prompt
    }

    fn active(&self) -> Result<&dyn ProviderAdapter> {
        self.provider
            .as_deref()
            .ok_or_else(|| AgentError::Config("no active provider".into()))
    }

    /// Swap the active adapter, keeping the conversation.
    ///
    /// Tool definitions and the system prompt are carried over. On failure the
    /// previous adapter stays active.
    pub fn switch_provider(&mut self, name: &str, model: Option<&str>) -> Result<()> {
        let model = model.unwrap_or(&self.config.model).to_string();
        let mut next = self
            .providers
            .create(name, &model)
            .map_err(|e| AgentError::SwitchProvider(format!("{name}/{model}: {e}")))?;

        if let Some(current) = self.provider.as_deref() {
            if let Some(prompt) = current.system_prompt() {
                next.set_system_prompt(prompt.to_string());
            }
            for definition in current.registry().definitions() {
                next.add_tool(definition);
            }
        }

        self.provider = Some(next);
        self.config.provider = name.to_string();
        self.config.model = model;
        tracing::info!(
            provider = %self.config.provider,
            model = %self.config.model,
            "Switched provider"
        );
        Ok(())
    }

    /// Drop history and buffered tool results
    pub fn clear_conversation(&mut self) {
        self.conversation.clear();
        self.recent_results.clear();
        tracing::info!("Conversation history cleared");
    }

    pub async fn summary(&self) -> EngineSummary {
        EngineSummary {
            message_count: self.conversation.len(),
            tool_results: self.recent_results.len(),
            provider: format!("{}/{}", self.config.provider, self.config.model),
            tools_available: self.available_tools().await.len(),
            initialized: self.initialized,
        }
    }

    /// Catalog entries of the attached tool source
    pub async fn available_tools(&self) -> Vec<ToolCatalogEntry> {
        match &self.tools {
            Some(source) => source.describe().await,
            None => Vec::new(),
        }
    }

    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Caller-side access, e.g. for windowing with `retain_recent`
    pub const fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    pub fn recent_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.recent_results.iter()
    }

    pub fn provider(&self) -> Option<&dyn ProviderAdapter> {
        self.provider.as_deref()
    }

    /// Mutable access to the active adapter, e.g. to register local tools
    pub fn provider_mut(&mut self) -> Option<&mut (dyn ProviderAdapter + 'static)> {
        self.provider.as_deref_mut()
    }

    pub const fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Disconnect the tool server this engine spawned
    pub async fn shutdown(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.disconnect().await;
            self.tools = None;
        }
        self.initialized = false;
        tracing::info!("Engine shut down");
    }
}

/// Builder for [`Engine`]
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    providers: ProviderRegistry,
    provider: Option<Box<dyn ProviderAdapter>>,
    tools: Option<Arc<dyn ToolSource>>,
    conversation: Conversation,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    /// Use an already constructed adapter instead of creating one by name
    #[must_use]
    pub fn provider(mut self, provider: Box<dyn ProviderAdapter>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn tool_source(mut self, source: Arc<dyn ToolSource>) -> Self {
        self.tools = Some(source);
        self
    }

    #[must_use]
    pub fn mcp_server(mut self, server: McpServerConfig) -> Self {
        self.config.mcp = Some(server);
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    #[must_use]
    pub const fn tools_enabled(mut self, enabled: bool) -> Self {
        self.config.tools_enabled = enabled;
        self
    }

    /// Start from an existing history
    #[must_use]
    pub fn history(mut self, conversation: Conversation) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn build(mut self) -> Result<Engine> {
        match &self.provider {
            Some(provider) => {
                self.config.provider = provider.name().to_string();
                self.config.model = provider.model().to_string();
            }
            None if !self.providers.contains(&self.config.provider) => {
                return Err(AgentError::Config(format!(
                    "Provider '{}' is not registered",
                    self.config.provider
                )));
            }
            None => {}
        }

        Ok(Engine {
            config: self.config,
            providers: self.providers,
            provider: self.provider,
            tools: self.tools,
            transport: None,
            conversation: self.conversation,
            recent_results: VecDeque::new(),
            trace: ThinkingTrace::new(),
            initialized: false,
        })
    }
}
