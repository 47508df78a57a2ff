//! # relay-runtime
//!
//! HTTP chat backends for the relay engine.
//!
//! ## Providers
//!
//! - **Ollama** (default): local inference through `/api/chat` with native tools
//! - **OpenAI** (default): any OpenAI-compatible `/chat/completions` endpoint
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_core::{Engine, ProviderRegistry};
//!
//! let mut providers = ProviderRegistry::new();
//! relay_runtime::register_builtin_providers(&mut providers);
//!
//! let engine = Engine::builder().providers(providers).build()?;
//! ```

#[cfg(feature = "ollama")]
pub mod ollama;
#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};
#[cfg(feature = "openai")]
pub use openai::{OpenAiConfig, OpenAiProvider};

use relay_core::{AgentError, ProviderAdapter, ProviderRegistry};

/// Install every compiled-in backend under its registered name
pub fn register_builtin_providers(registry: &mut ProviderRegistry) {
    #[cfg(feature = "ollama")]
    registry.register("ollama", |settings| {
        Ok(Box::new(OllamaProvider::from_settings(settings)?) as Box<dyn ProviderAdapter>)
    });

    #[cfg(feature = "openai")]
    registry.register("openai", |settings| {
        Ok(Box::new(OpenAiProvider::from_settings(settings)?) as Box<dyn ProviderAdapter>)
    });

    tracing::debug!(providers = ?registry.names(), "Registered builtin providers");
}

/// Failure before any HTTP status was received
pub(crate) fn request_error(backend: &str, err: &reqwest::Error) -> AgentError {
    if err.is_timeout() {
        AgentError::Timeout(format!("{backend} request timed out: {err}"))
    } else {
        AgentError::Provider(format!("{backend} request failed: {err}"))
    }
}

pub(crate) fn client(timeout: std::time::Duration) -> relay_core::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))
}
