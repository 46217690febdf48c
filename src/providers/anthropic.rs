use super::{Completion, LlmProvider, ProviderError, build_client, check_status};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Client for the Anthropic messages API
pub struct AnthropicProvider {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicProvider {
    pub const NAME: &'static str = "Anthropic";

    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(Self::NAME, timeout)?,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

impl LlmProvider for AnthropicProvider {
    fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        _json: bool,
    ) -> Result<Completion, ProviderError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: system_prompt,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let http_err = |source| ProviderError::Http {
            provider: Self::NAME,
            source,
        };
        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .map_err(http_err)?;
        let body: MessagesResponse = check_status(Self::NAME, response)?
            .json()
            .map_err(http_err)?;

        let text = body
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or(ProviderError::EmptyResponse(Self::NAME))?;

        Ok(Completion {
            text,
            tokens_used: body.usage.map(|u| u.input_tokens + u.output_tokens),
        })
    }
}
