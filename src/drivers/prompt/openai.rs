//! Prompt driver for OpenAI chat completions and Azure OpenAI deployments.
//!
//! Endpoint: `/v1/chat/completions`, or
//! `{endpoint}/openai/deployments/{deployment}/chat/completions` on Azure.
//! Streaming: SSE with `data: {"choices": [{"delta": {"content": "token"}}]}`.

use super::sse::{SseDecoder, SseFrame};
use super::{PromptDriver, PromptRequest, PromptResponse};
use crate::drivers::{check_status, env_var, redact, AzureDeployment};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone)]
enum Target {
    OpenAi { base_url: String },
    Azure(AzureDeployment),
}

/// Chat-completion driver for OpenAI-compatible APIs and Azure OpenAI.
///
/// # Example
///
/// ```
/// use llm_structures::drivers::prompt::OpenAiChatPromptDriver;
///
/// let openai = OpenAiChatPromptDriver::new("gpt-4o").with_api_key("sk-...");
/// let azure = OpenAiChatPromptDriver::azure("gpt-4", "https://my.openai.azure.com", "gpt4-deploy")
///     .unwrap()
///     .with_api_key("azure-key")
///     .with_stream(true);
/// ```
#[derive(Clone)]
pub struct OpenAiChatPromptDriver {
    client: Client,
    model: String,
    target: Target,
    api_key: Option<String>,
    organization: Option<String>,
    stream: bool,
}

impl std::fmt::Debug for OpenAiChatPromptDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatPromptDriver")
            .field("model", &self.model)
            .field("target", &self.target)
            .field("api_key", &self.api_key.as_deref().map(redact))
            .field("organization", &self.organization)
            .field("stream", &self.stream)
            .finish()
    }
}

impl OpenAiChatPromptDriver {
    /// Driver for `api.openai.com` without credentials.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            target: Target::OpenAi {
                base_url: OPENAI_BASE_URL.to_string(),
            },
            api_key: None,
            organization: None,
            stream: false,
        }
    }

    /// Driver for an Azure OpenAI deployment. Endpoint and deployment are required.
    pub fn azure(
        model: impl Into<String>,
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Result<Self> {
        let deployment = AzureDeployment::new(endpoint, deployment)?;
        Ok(Self {
            target: Target::Azure(deployment),
            ..Self::new(model)
        })
    }

    /// OpenAI driver keyed from `OPENAI_API_KEY`.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        Ok(Self::new(model).with_api_key(env_var("OPENAI_API_KEY")?))
    }

    /// Azure driver keyed from `AZURE_OPENAI_API_KEY` at `AZURE_OPENAI_API_BASE`.
    pub fn azure_from_env(model: impl Into<String>, deployment: impl Into<String>) -> Result<Self> {
        Ok(Self::azure(model, env_var("AZURE_OPENAI_API_BASE")?, deployment)?
            .with_api_key(env_var("AZURE_OPENAI_API_KEY")?))
    }

    /// Point at an OpenAI-compatible server (vLLM, LM Studio, ...).
    /// Ignored for Azure drivers.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        if let Target::OpenAi { .. } = self.target {
            self.target = Target::OpenAi {
                base_url: base_url.into().trim_end_matches('/').to_string(),
            };
        }
        self
    }

    /// Ignored for non-Azure drivers.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.target = match self.target {
            Target::Azure(d) => Target::Azure(d.with_api_version(version)),
            other => other,
        };
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    /// Use a shared HTTP client (timeouts, proxies, connection pool).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Enable token streaming. Required for [`Stream`](crate::stream::Stream).
    pub fn with_stream(mut self, enabled: bool) -> Self {
        self.stream = enabled;
        self
    }

    fn url(&self) -> String {
        match &self.target {
            Target::OpenAi { base_url } => format!("{}/v1/chat/completions", base_url),
            Target::Azure(d) => d.url("chat/completions"),
        }
    }

    fn build_messages(request: &PromptRequest) -> Vec<Value> {
        let mut messages = Vec::new();
        if let Some(sys) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages.push(json!({"role": "system", "content": sys}));
        }
        for msg in &request.messages {
            messages.push(json!({"role": msg.role.as_str(), "content": msg.content}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));
        messages
    }

    fn build_body(&self, request: &PromptRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": Self::build_messages(request),
            "temperature": request.config.temperature,
            "max_tokens": request.config.max_tokens,
            "stream": stream,
        });
        if request.config.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }

    fn build_http_request(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut req = self.client.post(self.url()).json(body);
        match (&self.target, &self.api_key) {
            (Target::Azure(_), Some(key)) => req = req.header("api-key", key.as_str()),
            (Target::OpenAi { .. }, Some(key)) => {
                req = req.header("Authorization", format!("Bearer {}", key))
            }
            (_, None) => {}
        }
        if let Some(ref org) = self.organization {
            req = req.header("OpenAI-Organization", org.as_str());
        }
        req
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self.build_http_request(body).send().await?;
        check_status(resp).await
    }

    fn delta_content(frame: &Value) -> Option<&str> {
        frame
            .get("choices")?
            .get(0)?
            .get("delta")?
            .get("content")?
            .as_str()
            .filter(|s| !s.is_empty())
    }

    fn extract_metadata(json_resp: &Value) -> Option<Value> {
        let meta: serde_json::Map<String, Value> = ["usage", "model", "id"]
            .iter()
            .filter_map(|k| json_resp.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect();
        (!meta.is_empty()).then_some(Value::Object(meta))
    }
}

#[async_trait]
impl PromptDriver for OpenAiChatPromptDriver {
    async fn run(&self, request: &PromptRequest) -> Result<PromptResponse> {
        let body = self.build_body(request, false);
        tracing::debug!(model = %self.model, url = %self.url(), "sending chat completion");
        let resp = self.send(&body).await?;
        let status = resp.status().as_u16();
        let json_resp: Value = resp.json().await?;

        let text = json_resp
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MalformedResponse {
                driver: self.name(),
                message: "missing choices[0].message.content".into(),
            })?
            .to_string();

        Ok(PromptResponse {
            text,
            status,
            metadata: Self::extract_metadata(&json_resp),
        })
    }

    async fn run_streaming(
        &self,
        request: &PromptRequest,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<PromptResponse> {
        let body = self.build_body(request, true);
        tracing::debug!(model = %self.model, url = %self.url(), "streaming chat completion");
        let resp = self.send(&body).await?;
        let status = resp.status().as_u16();

        let mut stream = resp.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut accumulated = String::new();
        let mut done = false;

        while let Some(chunk) = stream.next().await {
            for frame in decoder.decode(&chunk?) {
                match frame {
                    SseFrame::Done => done = true,
                    SseFrame::Data(ref v) => {
                        if let Some(content) = Self::delta_content(v) {
                            accumulated.push_str(content);
                            on_token(content.to_string());
                        }
                    }
                }
            }
            if done {
                break;
            }
        }
        if !done {
            for frame in decoder.flush() {
                if let SseFrame::Data(ref v) = frame {
                    if let Some(content) = Self::delta_content(v) {
                        accumulated.push_str(content);
                        on_token(content.to_string());
                    }
                }
            }
        }

        Ok(PromptResponse {
            text: accumulated,
            status,
            metadata: None,
        })
    }

    fn name(&self) -> &'static str {
        match self.target {
            Target::OpenAi { .. } => "openai",
            Target::Azure(_) => "azure-openai",
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_streaming(&self) -> bool {
        self.stream
    }
}
