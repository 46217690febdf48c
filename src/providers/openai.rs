use super::{Completion, LlmProvider, ProviderError, build_client, check_status};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const TEMPERATURE: f32 = 0.2;

/// Client for the OpenAI chat completions API
pub struct OpenAiProvider {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

impl OpenAiProvider {
    pub const NAME: &'static str = "OpenAI";

    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(Self::NAME, timeout)?,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

impl LlmProvider for OpenAiProvider {
    fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        json: bool,
    ) -> Result<Completion, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: TEMPERATURE,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format: json.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let http_err = |source| ProviderError::Http {
            provider: Self::NAME,
            source,
        };
        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(http_err)?;
        let body: ChatResponse = check_status(Self::NAME, response)?
            .json()
            .map_err(http_err)?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ProviderError::EmptyResponse(Self::NAME))?;

        Ok(Completion {
            text,
            tokens_used: body.usage.map(|u| u.total_tokens),
        })
    }
}
