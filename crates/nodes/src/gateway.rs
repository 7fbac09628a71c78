//! LLM gateway: every model call goes through here.
//!
//! Each call is bounded by the configured timeout. A transient failure
//! (timeout, rate limit, 5xx) is retried exactly once after a backoff; the
//! second failure surfaces with the provider named in the error.

use std::sync::Arc;
use std::time::Duration;

use pipeline::config::LlmSettings;
use pipeline::ports::{LlmError, LlmProvider, LlmRequest};
use pipeline::RetryPolicy;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    timeout: Duration,
    backoff: Duration,
    max_tokens: u32,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: &LlmSettings) -> Self {
        Self {
            provider,
            timeout: Duration::from_secs(settings.timeout_secs),
            backoff: Duration::from_millis(settings.retry_backoff_ms),
            max_tokens: settings.max_tokens,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Sends one completion request and returns the response text.
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let request = LlmRequest {
            system: system.to_string(),
            prompt: prompt.to_string(),
            max_tokens: self.max_tokens,
            temperature: 0.2,
        };

        match self.attempt(&request).await {
            Ok(text) => Ok(text),
            Err(e) => match e.retry_policy() {
                RetryPolicy::Retryable { after } => {
                    let delay = after.unwrap_or(self.backoff);
                    warn!(
                        provider = self.provider.name(),
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "transient provider error; retrying once"
                    );
                    sleep(delay).await;
                    self.attempt(&request).await
                }
                RetryPolicy::NonRetryable => Err(e),
            },
        }
    }

    async fn attempt(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let response = timeout(self.timeout, self.provider.complete(request))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: self.provider.name().to_string(),
                seconds: self.timeout.as_secs(),
            })??;
        debug!(
            provider = self.provider.name(),
            model = %response.model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "completion received"
        );
        Ok(response.text)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pipeline::ports::LlmResponse;
    use pipeline::{ErrorKind, ModelName};

    use super::*;

    struct Scripted {
        model: ModelName,
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                model: ModelName::new("test-model").unwrap(),
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &ModelName {
            &self.model
        }

        async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            *self.calls.lock().unwrap() += 1;
            let next = self.replies.lock().unwrap().pop_front().unwrap_or_else(|| Ok(String::new()));
            next.map(|text| LlmResponse {
                text,
                model: self.model.clone(),
                input_tokens: None,
                output_tokens: None,
            })
        }
    }

    fn settings() -> LlmSettings {
        LlmSettings {
            retry_backoff_ms: 1,
            ..LlmSettings::default()
        }
    }

    fn transient() -> LlmError {
        LlmError::Transient {
            provider: "scripted".into(),
            status: 503,
            message: "overloaded".into(),
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let provider = Scripted::new(vec![Err(transient()), Ok("hello".into())]);
        let gateway = LlmGateway::new(provider.clone(), &settings());

        assert_eq!(gateway.complete("sys", "prompt").await.unwrap(), "hello");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn second_transient_failure_surfaces() {
        let provider = Scripted::new(vec![Err(transient()), Err(transient()), Ok("late".into())]);
        let gateway = LlmGateway::new(provider.clone(), &settings());

        let err = gateway.complete("sys", "prompt").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransientProviderError);
        assert!(err.to_string().contains("scripted"));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let provider = Scripted::new(vec![Err(LlmError::Authentication {
            provider: "scripted".into(),
            message: "bad key".into(),
        })]);
        let gateway = LlmGateway::new(provider.clone(), &settings());

        assert!(gateway.complete("sys", "prompt").await.is_err());
        assert_eq!(provider.calls(), 1);
    }
}
