//! OpenAI Provider
//!
//! Works against any OpenAI-compatible `/chat/completions` endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

use relay_core::{
    AgentError, ChatOptions, ChatResponse, FinishReason, Message, ProviderAdapter, ProviderCore,
    ProviderSettings, Result, Role, TokenUsage, ToolCall, ToolSpec,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.into(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl OpenAiConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into()),
            ..Default::default()
        }
    }
}

/// OpenAI chat provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    core: ProviderCore,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.core.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    pub fn new(model: impl Into<String>, config: &OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AgentError::ProviderAuth("OPENAI_API_KEY is not set".into()))?;

        Ok(Self {
            client: crate::client(config.timeout)?,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            core: ProviderCore::new(model),
        })
    }

    /// Build from registry settings, falling back to the environment
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let env = OpenAiConfig::from_env();
        let config = OpenAiConfig {
            api_key: settings.api_key.clone().or(env.api_key),
            base_url: settings.base_url.clone().unwrap_or(env.base_url),
            timeout: settings.timeout,
        };
        Self::new(settings.model.clone(), &config)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn convert_message(message: &Message) -> Value {
        match message.role {
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id,
                "content": message.text(),
            }),
            Role::Assistant if message.has_tool_calls() => json!({
                "role": "assistant",
                "content": message.content,
                "tool_calls": message.tool_calls.iter().map(|call| json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": Value::Object(call.arguments.clone()).to_string(),
                    }
                })).collect::<Vec<_>>(),
            }),
            role => json!({
                "role": role.to_string(),
                "content": message.text(),
            }),
        }
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

    fn build_request(&self, messages: &[Message], options: &ChatOptions) -> Value {
        let mut request = json!({
            "model": self.core.model,
            "messages": messages.iter().map(Self::convert_message).collect::<Vec<_>>(),
            "temperature": options.temperature,
        });

        if let Some(max_tokens) = options.max_tokens {
            request["max_tokens"] = json!(max_tokens);
        }

        let tools = self.offered_tools(options);
        if !tools.is_empty() {
            request["tools"] = tools.iter().map(Self::convert_tool).collect();
        }

        if let Value::Object(body) = &mut request {
            body.extend(options.extra.clone());
        }
        request
    }

    fn parse_response(response: CompletionResponse) -> Result<ChatResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Provider("OpenAI response had no choices".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let arguments: Map<String, Value> =
                    serde_json::from_str(&call.function.arguments).unwrap_or_default();
                ToolCall::new(call.id, call.function.name, arguments)
            })
            .collect();

        Ok(ChatResponse {
            text: choice.message.content.filter(|text| !text.is_empty()),
            tool_calls,
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::parse),
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    /// Map an OpenAI failure onto the provider error taxonomy
    pub fn classify_error(status: Option<u16>, body: &str) -> AgentError {
        let error = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("error").cloned());

        let detail = error
            .as_ref()
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map_or_else(|| body.trim().to_string(), str::to_string);
        let code = error
            .as_ref()
            .and_then(|e| e.get("code").or_else(|| e.get("type")))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let text = match status {
            Some(status) => format!("OpenAI API error ({status}): {detail}"),
            None => format!("OpenAI API error: {detail}"),
        };

        match code {
            "insufficient_quota" | "rate_limit_exceeded" => AgentError::ProviderQuota(text),
            "invalid_api_key" => AgentError::ProviderAuth(text),
            "model_not_found" => AgentError::ProviderModel(text),
            _ => AgentError::classify_provider(status, text),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    /// Some compatible servers send `null` for plain answers
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn core(&self) -> &ProviderCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ProviderCore {
        &mut self.core
    }

    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = self.build_request(messages, options);

        tracing::debug!(
            model = %self.core.model,
            messages = messages.len(),
            "OpenAI chat request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| crate::request_error("OpenAI", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(Some(status.as_u16()), &body));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("Failed to parse OpenAI response: {e}")))?;

        Self::parse_response(body)
    }

    fn supports_tools(&self) -> bool {
        true
    }
}
