//! Mock prompt driver for testing without a live provider.
//!
//! [`MockPromptDriver`] replays canned responses, split into tokens, so
//! streaming code paths can be exercised deterministically.
//!
//! # Example
//!
//! ```
//! use llm_structures::drivers::prompt::MockPromptDriver;
//!
//! let mock = MockPromptDriver::tokens(vec!["Hello", " world"]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{PromptDriver, PromptRequest, PromptResponse};
use crate::error::{Error, Result};

/// A test driver that returns canned, pre-tokenized responses in order.
///
/// Cycles back to the first response when all have been used. Streams by
/// default; see [`with_stream`](Self::with_stream).
#[derive(Debug)]
pub struct MockPromptDriver {
    responses: Vec<Vec<String>>,
    index: AtomicUsize,
    stream: bool,
    failure: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl MockPromptDriver {
    /// One canned response per entry, each given as its token sequence.
    pub fn new(responses: Vec<Vec<String>>) -> Self {
        assert!(
            !responses.is_empty(),
            "MockPromptDriver requires at least one response"
        );
        Self {
            responses,
            index: AtomicUsize::new(0),
            stream: true,
            failure: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A single response streamed as the given tokens.
    pub fn tokens<S: Into<String>>(tokens: Vec<S>) -> Self {
        Self::new(vec![tokens.into_iter().map(Into::into).collect()])
    }

    /// A single response streamed as one token.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![vec![response.into()]])
    }

    /// A driver whose every call fails with [`Error::Upstream`].
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::fixed("")
        }
    }

    pub fn with_stream(mut self, enabled: bool) -> Self {
        self.stream = enabled;
        self
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn next_response(&self, request: &PromptRequest) -> Result<Vec<String>> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        if let Some(ref message) = self.failure {
            return Err(Error::Upstream {
                driver: "mock",
                message: message.clone(),
            });
        }
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.responses.len();
        Ok(self.responses[idx].clone())
    }
}

#[async_trait]
impl PromptDriver for MockPromptDriver {
    async fn run(&self, request: &PromptRequest) -> Result<PromptResponse> {
        let tokens = self.next_response(request)?;
        Ok(PromptResponse {
            text: tokens.concat(),
            status: 200,
            metadata: None,
        })
    }

    async fn run_streaming(
        &self,
        request: &PromptRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<PromptResponse> {
        let tokens = self.next_response(request)?;
        let text = tokens.concat();
        for token in tokens {
            on_token(token);
        }
        Ok(PromptResponse {
            text,
            status: 200,
            metadata: None,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn is_streaming(&self) -> bool {
        self.stream
    }
}
