//! Ollama Provider
//!
//! `ProviderAdapter` over Ollama's native `/api/chat` endpoint. Ollama does
//! not issue tool call ids, so one is minted per call at decode time.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

use relay_core::{
    AgentError, ChatOptions, ChatResponse, FinishReason, Message, ProviderAdapter, ProviderCore,
    ProviderSettings, Result, Role, TokenUsage, ToolCall, ToolSpec,
};

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout: Duration::from_secs(120),
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self {
            host,
            port,
            ..Default::default()
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}:{}", self.host.trim_end_matches('/'), self.port)
    }
}

/// Ollama chat provider
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    core: ProviderCore,
}

impl OllamaProvider {
    pub fn new(model: impl Into<String>, config: &OllamaConfig) -> Result<Self> {
        Ok(Self {
            client: crate::client(config.timeout)?,
            base_url: config.base_url(),
            core: ProviderCore::new(model),
        })
    }

    /// Build from registry settings; `base_url` wins over the environment
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let config = OllamaConfig {
            timeout: settings.timeout,
            ..OllamaConfig::from_env()
        };
        let mut provider = Self::new(settings.model.clone(), &config)?;
        if let Some(url) = &settings.base_url {
            provider.base_url = url.trim_end_matches('/').to_string();
        }
        Ok(provider)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn convert_message(message: &Message) -> Value {
        let mut wire = json!({
            "role": message.role.to_string(),
            "content": message.text(),
        });

        if message.has_tool_calls() {
            wire["tool_calls"] = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "function": { "name": call.name, "arguments": call.arguments }
                    })
                })
                .collect();
        }
        if message.role == Role::Tool {
            if let Some(name) = &message.name {
                wire["tool_name"] = json!(name);
            }
        }
        wire
    }

    fn convert_tool(spec: &ToolSpec) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": spec.name,
                "description": spec.description,
                "parameters": spec.parameters,
            }
        })
    }

    /// Request body for `/api/chat`
    fn build_request(&self, messages: &[Message], options: &ChatOptions) -> Value {
        let mut generation = Map::new();
        generation.insert("temperature".into(), json!(options.temperature));
        if let Some(max_tokens) = options.max_tokens {
            generation.insert("num_predict".into(), json!(max_tokens));
        }
        generation.extend(options.extra.clone());

        let mut request = json!({
            "model": self.core.model,
            "messages": messages.iter().map(Self::convert_message).collect::<Vec<_>>(),
            "stream": false,
            "options": generation,
        });

        let tools = self.offered_tools(options);
        if !tools.is_empty() {
            request["tools"] = tools.iter().map(Self::convert_tool).collect();
        }
        request
    }

    fn parse_response(response: OllamaResponse) -> ChatResponse {
        let tool_calls: Vec<ToolCall> = response
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                ToolCall::new(
                    call.id.unwrap_or_else(ToolCall::generate_id),
                    call.function.name,
                    arguments_map(call.function.arguments),
                )
            })
            .collect();

        let finish_reason = if tool_calls.is_empty() {
            response.done_reason.as_deref().map(FinishReason::parse)
        } else {
            Some(FinishReason::ToolUse)
        };

        let prompt_tokens = response.prompt_eval_count.unwrap_or(0);
        let completion_tokens = response.eval_count.unwrap_or(0);

        ChatResponse {
            text: Some(response.message.content).filter(|text| !text.is_empty()),
            tool_calls,
            finish_reason,
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens.saturating_add(completion_tokens),
            }),
        }
    }

    /// Map an Ollama failure onto the provider error taxonomy.
    ///
    /// Ollama answers unknown models with 404 and `{"error": "model ... not found"}`.
    pub fn classify_error(status: Option<u16>, body: &str) -> AgentError {
        let detail = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());

        let text = match status {
            Some(code) => format!("Ollama API error ({code}): {detail}"),
            None => format!("Ollama API error: {detail}"),
        };
        AgentError::classify_provider(status, text)
    }
}

/// Arguments arrive as an object, or from some models as a JSON string
fn arguments_map(arguments: Value) -> Map<String, Value> {
    match arguments {
        Value::Object(map) => map,
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        _ => Map::new(),
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCall {
    #[serde(default)]
    id: Option<String>,
    function: OllamaFunction,
}

#[derive(Debug, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[async_trait]
impl ProviderAdapter for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn core(&self) -> &ProviderCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ProviderCore {
        &mut self.core
    }

    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let request = self.build_request(messages, options);

        tracing::debug!(
            model = %self.core.model,
            messages = messages.len(),
            "Ollama chat request"
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| crate::request_error("Ollama", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(Some(status.as_u16()), &body));
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("Failed to parse Ollama response: {e}")))?;

        Ok(Self::parse_response(body))
    }

    fn supports_tools(&self) -> bool {
        true
    }
}
