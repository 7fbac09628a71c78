//! Taskwright LLM provider adapters.
//!
//! Implements the [`pipeline::ports::LlmProvider`] trait for OpenAI,
//! Anthropic, and Gemini over HTTPS. Each adapter performs exactly one
//! request per call; timeouts and the single retry of transient failures are
//! applied by the gateway in the `nodes` crate.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Request formatting, response parsing, and mapping of
//! HTTP failures onto [`LlmError`] live here. The [`pipeline`] crate sees only
//! the trait.
//!
//! ## Provider selection
//!
//! [`select_provider`] honours an explicit `llm.provider` setting. Otherwise
//! the first provider whose credential is present in the environment wins, in
//! the order OpenAI, Anthropic, Gemini.

use std::sync::Arc;
use std::time::Duration;

use pipeline::config::{LlmSettings, ProviderKind};
use pipeline::ports::{LlmError, LlmProvider};
use pipeline::ModelName;
use tracing::info;

pub mod anthropic;
pub mod gemini;
mod http;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

const DETECTION_ORDER: [ProviderKind; 3] = [ProviderKind::OpenAi, ProviderKind::Anthropic, ProviderKind::Gemini];

/// Builds the configured provider, reading credentials from the process
/// environment.
pub fn select_provider(settings: &LlmSettings) -> Result<Arc<dyn LlmProvider>, LlmError> {
    select_provider_with(settings, |name| std::env::var(name).ok())
}

/// Same as [`select_provider`] with an injectable environment lookup.
pub fn select_provider_with(
    settings: &LlmSettings,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let credential = |kind: ProviderKind| env(kind.credential_var()).filter(|v| !v.trim().is_empty());

    let (kind, key) = match settings.provider {
        Some(kind) => {
            let key = credential(kind).ok_or_else(|| LlmError::MissingCredential {
                expected: kind.credential_var().to_string(),
            })?;
            (kind, key)
        }
        None => DETECTION_ORDER
            .iter()
            .find_map(|&kind| credential(kind).map(|key| (kind, key)))
            .ok_or_else(|| LlmError::MissingCredential {
                expected: DETECTION_ORDER
                    .iter()
                    .map(|k| k.credential_var())
                    .collect::<Vec<_>>()
                    .join(" or "),
            })?,
    };

    let model = settings
        .model
        .as_deref()
        .and_then(ModelName::new)
        .or_else(|| ModelName::new(kind.default_model()))
        .ok_or_else(|| LlmError::MissingCredential {
            expected: "llm.model".to_string(),
        })?;

    // The request deadline sits slightly past the gateway timeout so the
    // gateway reports the timeout, not the transport.
    let deadline = Duration::from_secs(settings.timeout_secs.saturating_add(5));
    let client = http::client(deadline)?;

    info!(provider = %kind, model = %model, "LLM provider selected");
    let provider: Arc<dyn LlmProvider> = match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(client, key, model)),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(client, key, model)),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(client, key, model)),
    };
    Ok(provider)
}
