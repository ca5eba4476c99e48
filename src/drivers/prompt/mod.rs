//! Prompt driver trait and normalized request/response types.
//!
//! The [`PromptDriver`] trait abstracts over chat-completion providers,
//! translating between a normalized [`PromptRequest`]/[`PromptResponse`]
//! pair and the provider's HTTP API.
//!
//! ```text
//! PromptTask ──► PromptRequest ──► PromptDriver::run[_streaming]() ──► PromptResponse
//!                                          │
//!                              ┌───────────┴───────────┐
//!                    OpenAiChatPromptDriver      MockPromptDriver
//!                    /v1/chat/completions        canned tokens
//!                    Azure deployments
//! ```

pub mod mock;
pub mod openai;
pub mod sse;

pub use mock::MockPromptDriver;
pub use openai::OpenAiChatPromptDriver;

use crate::drivers::backoff::{self, BackoffConfig, RetryCallback};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::AtomicBool;

/// Generation settings sent with every prompt.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f64,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2048,
            json_mode: false,
        }
    }
}

impl PromptConfig {
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }
}

/// A normalized prompt request, independent of the provider.
#[derive(Debug, Clone, Default)]
pub struct PromptRequest {
    /// Optional system prompt (rules, persona).
    pub system_prompt: Option<String>,
    /// The user prompt text.
    pub prompt: String,
    /// Prior conversation turns, sent before `prompt`.
    pub messages: Vec<ChatMessage>,
    pub config: PromptConfig,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// The role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A normalized prompt response.
#[derive(Debug)]
pub struct PromptResponse {
    /// The generated text.
    pub text: String,
    /// HTTP status code (for diagnostics/logging).
    pub status: u16,
    /// Provider-specific metadata (usage, ids), stored as raw JSON.
    pub metadata: Option<serde_json::Value>,
}

/// Abstraction over chat-completion providers.
///
/// Object-safe, used as `Arc<dyn PromptDriver>`.
#[async_trait]
pub trait PromptDriver: Send + Sync {
    /// Execute a non-streaming completion.
    async fn run(&self, request: &PromptRequest) -> Result<PromptResponse>;

    /// Execute a streaming completion, calling `on_token` per token.
    /// The accumulated text is returned in the response.
    async fn run_streaming(
        &self,
        request: &PromptRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<PromptResponse>;

    /// Driver name for logging and diagnostics.
    fn name(&self) -> &'static str;

    /// Model identifier sent to the provider.
    fn model(&self) -> &str;

    /// Whether tasks should use [`run_streaming`](Self::run_streaming).
    fn is_streaming(&self) -> bool;
}

/// Non-streaming call with transport retry.
pub async fn with_backoff(
    driver: &dyn PromptDriver,
    request: &PromptRequest,
    config: &BackoffConfig,
    cancel: Option<&AtomicBool>,
    on_retry: RetryCallback<'_>,
) -> Result<PromptResponse> {
    backoff::retry(config, cancel, on_retry, || driver.run(request)).await
}

/// Streaming call with transport retry.
///
/// Each retry restarts the stream, so only attempts that failed before
/// delivering any token are retried. A failure after the first token is
/// returned as is.
pub async fn with_backoff_streaming(
    driver: &dyn PromptDriver,
    request: &PromptRequest,
    config: &BackoffConfig,
    cancel: Option<&AtomicBool>,
    mut on_retry: RetryCallback<'_>,
    on_token: &mut (dyn FnMut(String) + Send),
) -> Result<PromptResponse> {
    let mut last_error: Option<Error> = None;

    for attempt in 0..=config.max_retries {
        backoff::check_cancelled(cancel)?;

        if attempt > 0 {
            let delay = config.delay_after(attempt, last_error.as_ref());
            let reason = last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            tracing::warn!(driver = driver.name(), attempt, %reason, "retrying streaming prompt");
            if let Some(ref mut cb) = on_retry {
                cb(attempt, delay, &reason);
            }
            tokio::time::sleep(delay).await;
            backoff::check_cancelled(cancel)?;
        }

        let mut delivered = false;
        let result = {
            let mut forward = |token: String| {
                delivered = true;
                on_token(token);
            };
            driver.run_streaming(request, &mut forward).await
        };

        match result {
            Ok(response) => return Ok(response),
            Err(e) if delivered => {
                tracing::warn!(driver = driver.name(), error = %e, "stream failed mid-response, not retrying");
                return Err(e);
            }
            Err(e) if attempt < config.max_retries && backoff::is_retryable(&e, config) => {
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Other("retry loop exited unexpectedly".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails with 503 a fixed number of times, then streams "ok".
    /// With `partial` set, each failing call first streams "He".
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        partial: bool,
    }

    fn flaky(failures: u32) -> Flaky {
        Flaky {
            failures,
            calls: AtomicU32::new(0),
            partial: false,
        }
    }

    #[async_trait]
    impl PromptDriver for Flaky {
        async fn run(&self, request: &PromptRequest) -> Result<PromptResponse> {
            let mut sink = |_t: String| {};
            self.run_streaming(request, &mut sink).await
        }

        async fn run_streaming(
            &self,
            _request: &PromptRequest,
            on_token: &mut (dyn FnMut(String) + Send),
        ) -> Result<PromptResponse> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                if self.partial {
                    on_token("He".into());
                }
                return Err(Error::HttpError {
                    status: 503,
                    body: "busy".into(),
                    retry_after: None,
                });
            }
            on_token("ok".into());
            Ok(PromptResponse {
                text: "ok".into(),
                status: 200,
                metadata: None,
            })
        }

        fn name(&self) -> &'static str {
            "flaky"
        }

        fn model(&self) -> &str {
            "flaky-1"
        }

        fn is_streaming(&self) -> bool {
            true
        }
    }

    fn quick() -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..BackoffConfig::standard()
        }
    }

    #[test]
    fn test_prompt_config_builder() {
        let config = PromptConfig::default()
            .with_temperature(0.3)
            .with_max_tokens(4096)
            .with_json_mode(true);
        assert_eq!(config.temperature, 0.3);
        assert_eq!(config.max_tokens, 4096);
        assert!(config.json_mode);
    }

    #[tokio::test]
    async fn test_with_backoff_retries_transient() {
        let driver = flaky(2);
        let resp = with_backoff(&driver, &PromptRequest::new("hi"), &quick(), None, None)
            .await
            .unwrap();
        assert_eq!(resp.text, "ok");
        assert_eq!(driver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_backoff_streaming_retries_and_streams() {
        let driver = flaky(1);
        let mut tokens = Vec::new();
        let mut retries = 0;
        let mut on_retry = |_a: u32, _d: Duration, _r: &str| retries += 1;
        let resp = with_backoff_streaming(
            &driver,
            &PromptRequest::new("hi"),
            &quick(),
            None,
            Some(&mut on_retry),
            &mut |t: String| tokens.push(t),
        )
        .await
        .unwrap();
        assert_eq!(resp.text, "ok");
        assert_eq!(tokens, vec!["ok"]);
        assert_eq!(retries, 1);
    }

    #[tokio::test]
    async fn test_streaming_failure_after_tokens_is_not_retried() {
        let driver = Flaky {
            partial: true,
            ..flaky(1)
        };
        let mut tokens = Vec::new();
        let result = with_backoff_streaming(
            &driver,
            &PromptRequest::new("hi"),
            &quick(),
            None,
            None,
            &mut |t: String| tokens.push(t),
        )
        .await;
        assert!(matches!(result, Err(Error::HttpError { status: 503, .. })));
        assert_eq!(tokens, vec!["He"]);
        assert_eq!(driver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_backoff_no_retry_config_fails_fast() {
        let driver = flaky(1);
        let result = with_backoff(
            &driver,
            &PromptRequest::new("hi"),
            &BackoffConfig::none(),
            None,
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::HttpError { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_streaming_backoff_respects_cancellation() {
        let driver = flaky(0);
        let cancel = AtomicBool::new(true);
        let result = with_backoff_streaming(
            &driver,
            &PromptRequest::new("hi"),
            &quick(),
            Some(&cancel),
            None,
            &mut |_t: String| {},
        )
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(driver.calls.load(Ordering::SeqCst), 0);
    }
}
