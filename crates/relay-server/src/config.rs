//! Server Configuration
//!
//! Everything is read from the environment (after `.env` is loaded). Parsing
//! goes through [`ServerConfig::from_lookup`] so tests can feed a map.

use std::time::Duration;

use relay_core::{EngineConfig, McpServerConfig, ProviderRegistry, ProviderSettings};

/// Conversation messages kept between requests
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// Engine defaults, including the tool server command
    pub engine: EngineConfig,

    pub history_window: usize,

    pub ollama_base_url: String,

    pub openai_api_key: Option<String>,

    pub openai_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            engine: EngineConfig::default(),
            history_window: DEFAULT_HISTORY_WINDOW,
            ollama_base_url: "http://localhost:11434".into(),
            openai_api_key: None,
            openai_base_url: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(addr) = get("BIND_ADDR") {
            config.bind_addr = addr;
        }

        let engine = &mut config.engine;
        if let Some(provider) = get("RELAY_PROVIDER") {
            engine.provider = provider.to_lowercase();
        }
        if let Some(model) = get("RELAY_MODEL") {
            engine.model = model;
        }
        if let Some(prompt) = get("RELAY_SYSTEM_PROMPT") {
            engine.system_prompt = prompt;
        }
        if let Some(enabled) = get("RELAY_TOOLS_ENABLED") {
            engine.tools_enabled = parse_bool("RELAY_TOOLS_ENABLED", &enabled)?;
        }
        if let Some(window) = get("RELAY_RECENT_RESULTS") {
            engine.recent_results_window = parse("RELAY_RECENT_RESULTS", &window)?;
        }
        if let Some(secs) = get("RELAY_PROVIDER_TIMEOUT_SECS") {
            let secs = parse("RELAY_PROVIDER_TIMEOUT_SECS", &secs)?;
            engine.provider_timeout = Duration::from_secs(secs);
        }

        if let Some(command) = get("RELAY_MCP_COMMAND") {
            let args = get("RELAY_MCP_ARGS")
                .map(|args| args.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            let mut server = McpServerConfig::new(command, args);
            if let Some(secs) = get("RELAY_RPC_TIMEOUT_SECS") {
                let secs = parse("RELAY_RPC_TIMEOUT_SECS", &secs)?;
                server = server.with_request_timeout(Duration::from_secs(secs));
            }
            engine.mcp = Some(server);
        }

        if let Some(window) = get("RELAY_HISTORY_WINDOW") {
            config.history_window = parse("RELAY_HISTORY_WINDOW", &window)?;
        }

        let host = get("OLLAMA_HOST").unwrap_or_else(|| "http://localhost".into());
        let port: u16 = match get("OLLAMA_PORT") {
            Some(port) => parse("OLLAMA_PORT", &port)?,
            None => 11434,
        };
        config.ollama_base_url = format!("{}:{port}", host.trim_end_matches('/'));
        config.openai_api_key = get("OPENAI_API_KEY");
        config.openai_base_url = get("OPENAI_BASE_URL");

        Ok(config)
    }

    /// Builtin backends with this configuration's credentials and URLs
    pub fn provider_registry(&self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        relay_runtime::register_builtin_providers(&mut registry);

        let timeout = self.engine.provider_timeout;

        let mut ollama =
            ProviderSettings::new(&self.engine.model).with_base_url(&self.ollama_base_url);
        ollama.timeout = timeout;
        registry.set_defaults("ollama", ollama);

        let mut openai = ProviderSettings::new(&self.engine.model);
        openai.api_key.clone_from(&self.openai_api_key);
        openai.base_url.clone_from(&self.openai_base_url);
        openai.timeout = timeout;
        registry.set_defaults("openai", openai);

        registry
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}
