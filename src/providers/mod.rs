//! Language-model completion clients used by model-backed agents.

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use crate::config::Config;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} API key is not configured")]
    MissingApiKey(&'static str),

    #[error("unsupported model provider for model: {0}")]
    UnsupportedModel(String),

    #[error("{provider} request failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned status {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{0} returned no content")]
    EmptyResponse(&'static str),
}

/// Text returned by a completion call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Tokens the provider reported for the exchange, when it reports usage
    pub tokens_used: Option<u64>,
}

/// A chat-style completion endpoint
pub trait LlmProvider {
    /// Sends one user prompt with an optional system prompt.
    ///
    /// When `json` is set the provider is asked to answer with a JSON object.
    fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        json: bool,
    ) -> Result<Completion, ProviderError>;
}

/// Picks a provider for `model` based on its name prefix
pub fn provider_for(model: &str, config: &Config) -> Result<Box<dyn LlmProvider>, ProviderError> {
    let timeout = Duration::from_secs(config.providers.timeout_secs);

    if model.starts_with("gpt") {
        let key = &config.providers.openai.api_key;
        if key.is_empty() {
            return Err(ProviderError::MissingApiKey(OpenAiProvider::NAME));
        }
        return Ok(Box::new(OpenAiProvider::new(key, model, timeout)?));
    }
    if model.starts_with("claude") {
        let key = &config.providers.anthropic.api_key;
        if key.is_empty() {
            return Err(ProviderError::MissingApiKey(AnthropicProvider::NAME));
        }
        return Ok(Box::new(AnthropicProvider::new(key, model, timeout)?));
    }

    Err(ProviderError::UnsupportedModel(model.to_string()))
}

fn build_client(
    provider: &'static str,
    timeout: Duration,
) -> Result<reqwest::blocking::Client, ProviderError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|source| ProviderError::Http { provider, source })
}

fn check_status(
    provider: &'static str,
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(ProviderError::Api {
        provider,
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_model() {
        let err = provider_for("llama-3", &Config::default()).err().unwrap();
        assert!(matches!(err, ProviderError::UnsupportedModel(m) if m == "llama-3"));
    }

    #[test]
    fn test_missing_keys() {
        let config = Config::default();

        let err = provider_for("gpt-4o", &config).err().unwrap();
        assert_eq!(err.to_string(), "OpenAI API key is not configured");

        let err = provider_for("claude-3-5-sonnet-20240620", &config).err().unwrap();
        assert_eq!(err.to_string(), "Anthropic API key is not configured");
    }

    #[test]
    fn test_configured_key_builds_provider() {
        let mut config = Config::default();
        config.providers.anthropic.api_key = "sk-ant-test".to_string();
        assert!(provider_for("claude-3-haiku-20240307", &config).is_ok());
    }
}
