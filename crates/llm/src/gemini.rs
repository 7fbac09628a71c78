//! Google Gemini `generateContent`.

use async_trait::async_trait;
use pipeline::ports::{LlmError, LlmProvider, LlmRequest, LlmResponse};
use pipeline::ModelName;
use serde::{Deserialize, Serialize};

use crate::http;

const NAME: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: ModelName,
    base_url: String,
}

impl GeminiProvider {
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

    fn body<'a>(&self, request: &'a LlmRequest) -> GenerateRequest<'a> {
        GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: &request.system }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &request.prompt }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            },
        }
    }

    fn parse(&self, text: &str) -> Result<LlmResponse, LlmError> {
        let parsed: GenerateResponse =
            serde_json::from_str(text).map_err(|e| http::invalid(NAME, e.to_string()))?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| http::invalid(NAME, "response contained no candidates"))?;
        let content: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if content.trim().is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
            return Err(http::invalid(NAME, format!("empty candidate (finish reason {reason})")));
        }
        Ok(LlmResponse {
            text: content,
            model: parsed
                .model_version
                .and_then(ModelName::new)
                .unwrap_or_else(|| self.model.clone()),
            input_tokens: parsed.usage_metadata.as_ref().and_then(|u| u.prompt_token_count),
            output_tokens: parsed.usage_metadata.as_ref().and_then(|u| u.candidates_token_count),
        })
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn model(&self) -> &ModelName {
        &self.model
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let builder = self.client.post(url).header("x-goog-api-key", &self.api_key);
        let text = http::post_json(NAME, builder, &self.body(request)).await?;
        self.parse(&text)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GeminiProvider {
        GeminiProvider::new(
            reqwest::Client::new(),
            "key".into(),
            ModelName::new("gemini-1.5-flash").expect("model"),
        )
    }

    #[test]
    fn body_uses_camel_case_generation_config() {
        let request = LlmRequest {
            system: "sys".into(),
            prompt: "user".into(),
            max_tokens: 256,
            temperature: 0.0,
        };
        let json = serde_json::to_value(provider().body(&request)).expect("serialize");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn parts_of_first_candidate_are_joined() {
        let text = r#"{
            "candidates": [{"content": {"parts": [{"text": "a"}, {"text": "b"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2},
            "modelVersion": "gemini-1.5-flash-002"
        }"#;
        let response = provider().parse(text).expect("parse");
        assert_eq!(response.text, "ab");
        assert_eq!(response.output_tokens, Some(2));
        assert_eq!(response.model.as_str(), "gemini-1.5-flash-002");
    }

    #[test]
    fn blocked_candidate_reports_finish_reason() {
        let text = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        match provider().parse(text) {
            Err(LlmError::InvalidResponse { reason, .. }) => assert!(reason.contains("SAFETY")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
