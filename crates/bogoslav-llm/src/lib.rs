//! Language model providers.
//!
//! [`LlmProvider`] is the capability the dispatcher talks to. Concrete HTTP
//! providers exist for Gemini and Anthropic; [`ProviderFactory`] builds the
//! configured one.

mod anthropic;
mod gemini;
mod http;
mod provider;
pub mod retry;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use anthropic::{AnthropicProvider, ANTHROPIC_BASE_URL};
pub use gemini::{GeminiProvider, GEMINI_BASE_URL};
pub use provider::*;
pub use retry::RetryPolicy;

use bogoslav_common_config::{api_key, ModelConfig, ProviderKind};
use std::sync::Arc;
use std::time::Duration;

pub struct ProviderFactory;

impl ProviderFactory {
    /// Build the configured provider, reading its API key from the
    /// environment.
    pub fn create(config: &ModelConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
        let key = api_key(config)
            .map_err(|_| LlmError::MissingApiKey(config.api_key_var().to_string()))?;
        Self::create_with_key(config, key)
    }

    pub fn create_with_key(
        config: &ModelConfig,
        api_key: String,
    ) -> Result<Arc<dyn LlmProvider>, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let model = config.model_name();

        match config.provider {
            ProviderKind::Gemini => {
                let mut provider = GeminiProvider::new(api_key, model).with_client(client);
                if let Some(base_url) = &config.base_url {
                    provider = provider.with_base_url(base_url);
                }
                Ok(Arc::new(provider))
            }
            ProviderKind::Anthropic => {
                let mut provider = AnthropicProvider::new(api_key, model).with_client(client);
                if let Some(base_url) = &config.base_url {
                    provider = provider.with_base_url(base_url);
                }
                Ok(Arc::new(provider))
            }
        }
    }
}
