//! OpenAI chat completions.

use async_trait::async_trait;
use pipeline::ports::{LlmError, LlmProvider, LlmRequest, LlmResponse};
use pipeline::ModelName;
use serde::{Deserialize, Serialize};

use crate::http;

const NAME: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: ModelName,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, api_key: String, model: ModelName) -> Self {
        Self {
            client,
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Points the adapter at a compatible endpoint (proxy, local gateway).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn body<'a>(&'a self, request: &'a LlmRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: self.model.as_str(),
            messages: [
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    fn parse(&self, text: &str) -> Result<LlmResponse, LlmError> {
        let parsed: ChatResponse = serde_json::from_str(text).map_err(|e| http::invalid(NAME, e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| http::invalid(NAME, "response contained no message content"))?;
        Ok(LlmResponse {
            text: content,
            model: parsed.model.and_then(ModelName::new).unwrap_or_else(|| self.model.clone()),
            input_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn model(&self) -> &ModelName {
        &self.model
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let builder = self.client.post(url).bearer_auth(&self.api_key);
        let text = http::post_json(NAME, builder, &self.body(request)).await?;
        self.parse(&text)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    model: Option<String>,
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
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
