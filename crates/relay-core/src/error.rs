//! Error Types

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
///
/// The transport variants (`Connection` through `TransportClosed`) come from the
/// stdio tool protocol client; the `Provider*` variants are produced by a
/// backend adapter's error classifier and are the only provider failures the
/// engine ever observes.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Tool server could not be spawned or the handshake failed to start
    #[error("Connection error: {0}")]
    Connection(String),

    /// A line from the tool server was not valid JSON
    #[error("Framing error: {0}")]
    Framing(String),

    /// The tool server answered with an `error` object or an unexpected response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The tool server closed its pipes, or the transport was disconnected
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// Tool not found in registry or catalog
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Backend rejected the credentials
    #[error("Provider authentication failed: {0}")]
    ProviderAuth(String),

    /// Backend quota or rate limit exhausted
    #[error("Provider quota exceeded: {0}")]
    ProviderQuota(String),

    /// Backend does not know or cannot serve the requested model
    #[error("Provider model error: {0}")]
    ProviderModel(String),

    /// Any other backend failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Switching the active provider failed; the previous one stays active
    #[error("Failed to switch provider: {0}")]
    SwitchProvider(String),

    /// A bounded wait (RPC read or provider call) expired
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Map a backend failure onto the closed provider taxonomy.
    ///
    /// `status` is the HTTP status when the backend produced one. Adapters call
    /// this from their own `classify_error` so backend-specific sniffing stays in
    /// one place per adapter.
    pub fn classify_provider(status: Option<u16>, text: impl Into<String>) -> Self {
        let text = text.into();
        let lowered = text.to_lowercase();

        match status {
            Some(401 | 403) => return Self::ProviderAuth(text),
            Some(429) => return Self::ProviderQuota(text),
            Some(404) => return Self::ProviderModel(text),
            _ => {}
        }

        if lowered.contains("api key")
            || lowered.contains("api_key")
            || lowered.contains("unauthorized")
            || lowered.contains("401")
        {
            Self::ProviderAuth(text)
        } else if lowered.contains("quota")
            || lowered.contains("rate limit")
            || lowered.contains("429")
        {
            Self::ProviderQuota(text)
        } else if lowered.contains("404")
            || (lowered.contains("model") && lowered.contains("not found"))
        {
            Self::ProviderModel(text)
        } else {
            Self::Provider(text)
        }
    }

    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::ProviderQuota(_) | Self::TransportClosed(_) | Self::Io(_)
        )
    }

    /// Whether the failure came from the tool server transport
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Framing(_) | Self::Protocol(_) | Self::TransportClosed(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection(_) => "The tool server could not be started.".into(),
            Self::Framing(_) | Self::Protocol(_) => {
                "The tool server sent an invalid response.".into()
            }
            Self::TransportClosed(_) => "The tool server is no longer running.".into(),
            Self::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            Self::ToolExecution(msg) => format!("Tool error: {msg}"),
            Self::ProviderAuth(_) => {
                "Authentication with the AI service failed. Please check your API key.".into()
            }
            Self::ProviderQuota(_) => {
                "The AI service quota is exhausted. Please check your usage limits.".into()
            }
            Self::ProviderModel(_) => "The requested model is not available.".into(),
            Self::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            Self::SwitchProvider(msg) => format!("Could not switch provider: {msg}"),
            Self::Timeout(_) => "The request took too long. Please try again.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
