//! Anthropic messages API.

use async_trait::async_trait;
use pipeline::ports::{LlmError, LlmProvider, LlmRequest, LlmResponse};
use pipeline::ModelName;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::http;

const NAME: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: ModelName,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(client: reqwest::Client, api_key: String, model: ModelName) -> Self {
        Self {
            client,
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn body<'a>(&'a self, request: &'a LlmRequest) -> MessagesRequest<'a> {
        MessagesRequest {
            model: self.model.as_str(),
            system: &request.system,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: [UserMessage {
                role: "user",
                content: &request.prompt,
            }],
        }
    }

    fn parse(&self, text: &str) -> Result<LlmResponse, LlmError> {
        let parsed: MessagesResponse =
            serde_json::from_str(text).map_err(|e| http::invalid(NAME, e.to_string()))?;
        if parsed.stop_reason.as_deref() == Some("max_tokens") {
            warn!(provider = NAME, "response truncated at max_tokens");
        }
        let content: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        if content.trim().is_empty() {
            return Err(http::invalid(NAME, "response contained no text blocks"));
        }
        Ok(LlmResponse {
            text: content,
            model: parsed.model.and_then(ModelName::new).unwrap_or_else(|| self.model.clone()),
            input_tokens: parsed.usage.as_ref().map(|u| u.input_tokens),
            output_tokens: parsed.usage.as_ref().map(|u| u.output_tokens),
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn model(&self) -> &ModelName {
        &self.model
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let builder = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION);
        let text = http::post_json(NAME, builder, &self.body(request)).await?;
        self.parse(&text)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [UserMessage<'a>; 1],
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new(
            reqwest::Client::new(),
            "key".into(),
            ModelName::new("claude-3-5-sonnet-latest").expect("model"),
        )
    }

    #[test]
    fn system_prompt_is_a_top_level_field() {
        let request = LlmRequest {
            system: "you review code".into(),
            prompt: "diff".into(),
            max_tokens: 100,
            temperature: 0.2,
        };
        let p = provider();
        let json = serde_json::to_value(p.body(&request)).expect("serialize");
        assert_eq!(json["system"], "you review code");
        assert_eq!(json["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["messages"][0]["content"], "diff");
    }

    #[test]
    fn text_blocks_are_concatenated() {
        let text = r#"{
            "model": "claude-3-5-sonnet-20241022",
            "content": [
                {"type": "text", "text": "part one "},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "part two"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 40, "output_tokens": 8}
        }"#;
        let response = provider().parse(text).expect("parse");
        assert_eq!(response.text, "part one part two");
        assert_eq!(response.input_tokens, Some(40));
        assert_eq!(response.model.as_str(), "claude-3-5-sonnet-20241022");
    }

    #[test]
    fn no_text_is_invalid() {
        let text = r#"{"content": [], "usage": {"input_tokens": 1, "output_tokens": 0}}"#;
        assert!(matches!(provider().parse(text), Err(LlmError::InvalidResponse { .. })));
    }
}
