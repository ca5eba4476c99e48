//! DALL-E image generation on OpenAI and Azure OpenAI.
//!
//! Endpoint: `/v1/images/generations`, or
//! `{endpoint}/openai/deployments/{deployment}/images/generations` on Azure.
//! Images are requested as `b64_json` so no second download is needed.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{decode_base64_image, ImageGenerationDriver};
use crate::artifacts::ImageArtifact;
use crate::drivers::backoff::{self, BackoffConfig};
use crate::drivers::{check_status, env_var, redact, AzureDeployment};
use crate::error::{Error, Result};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone)]
enum Target {
    OpenAi { base_url: String },
    Azure(AzureDeployment),
}

/// DALL-E text-to-image driver.
///
/// Editing operations are not offered by this driver and report
/// [`Error::Unsupported`]. Negative prompts are ignored; DALL-E has no
/// equivalent parameter.
///
/// # Example
///
/// ```
/// use llm_structures::drivers::image_generation::OpenAiDalleImageGenerationDriver;
///
/// let driver = OpenAiDalleImageGenerationDriver::azure(
///     "dall-e-3",
///     "https://dalle.example.com",
///     "dalle-deployment",
///     "1024x1024",
/// )
/// .unwrap()
/// .with_api_key("azure-key")
/// .with_quality("hd");
/// ```
#[derive(Clone)]
pub struct OpenAiDalleImageGenerationDriver {
    client: Client,
    model: String,
    target: Target,
    api_key: Option<String>,
    image_size: String,
    width: u32,
    height: u32,
    quality: Option<String>,
    style: Option<String>,
    backoff: BackoffConfig,
}

impl std::fmt::Debug for OpenAiDalleImageGenerationDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiDalleImageGenerationDriver")
            .field("model", &self.model)
            .field("target", &self.target)
            .field("api_key", &self.api_key.as_deref().map(redact))
            .field("image_size", &self.image_size)
            .field("quality", &self.quality)
            .field("style", &self.style)
            .finish()
    }
}

/// Parse a `"{width}x{height}"` size string.
fn parse_image_size(size: &str) -> Result<(u32, u32)> {
    let invalid = || Error::InvalidConfig(format!("invalid image size '{}'", size));
    let (w, h) = size.split_once('x').ok_or_else(invalid)?;
    let width = w.trim().parse::<u32>().map_err(|_| invalid())?;
    let height = h.trim().parse::<u32>().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

impl OpenAiDalleImageGenerationDriver {
    /// Driver for `api.openai.com`. `image_size` is e.g. `"1024x1024"`.
    pub fn new(model: impl Into<String>, image_size: impl Into<String>) -> Result<Self> {
        let image_size = image_size.into();
        let (width, height) = parse_image_size(&image_size)?;
        Ok(Self {
            client: Client::new(),
            model: model.into(),
            target: Target::OpenAi {
                base_url: OPENAI_BASE_URL.to_string(),
            },
            api_key: None,
            image_size,
            width,
            height,
            quality: None,
            style: None,
            backoff: BackoffConfig::standard(),
        })
    }

    /// Driver for an Azure OpenAI DALL-E deployment. Endpoint and deployment
    /// are required.
    pub fn azure(
        model: impl Into<String>,
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        image_size: impl Into<String>,
    ) -> Result<Self> {
        let deployment = AzureDeployment::new(endpoint, deployment)?;
        Ok(Self {
            target: Target::Azure(deployment),
            ..Self::new(model, image_size)?
        })
    }

    /// OpenAI driver keyed from `OPENAI_API_KEY`.
    pub fn from_env(model: impl Into<String>, image_size: impl Into<String>) -> Result<Self> {
        Ok(Self::new(model, image_size)?.with_api_key(env_var("OPENAI_API_KEY")?))
    }

    /// Ignored for Azure drivers.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        if let Target::OpenAi { .. } = self.target {
            self.target = Target::OpenAi {
                base_url: base_url.into().trim_end_matches('/').to_string(),
            };
        }
        self
    }

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

    /// `"standard"` or `"hd"` (dall-e-3 only).
    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    /// `"vivid"` or `"natural"` (dall-e-3 only).
    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = config;
        self
    }

    fn url(&self) -> String {
        match &self.target {
            Target::OpenAi { base_url } => format!("{}/v1/images/generations", base_url),
            Target::Azure(d) => d.url("images/generations"),
        }
    }

    fn build_body(&self, prompts: &[String]) -> Value {
        let mut body = json!({
            "model": self.model,
            "prompt": prompts.join(", "),
            "size": self.image_size,
            "response_format": "b64_json",
            "n": 1,
        });
        if let Some(ref quality) = self.quality {
            body["quality"] = json!(quality);
        }
        if let Some(ref style) = self.style {
            body["style"] = json!(style);
        }
        body
    }

    fn build_http_request(&self, body: &Value) -> reqwest::RequestBuilder {
        let req = self.client.post(self.url()).json(body);
        match (&self.target, &self.api_key) {
            (Target::Azure(_), Some(key)) => req.header("api-key", key.as_str()),
            (Target::OpenAi { .. }, Some(key)) => {
                req.header("Authorization", format!("Bearer {}", key))
            }
            (_, None) => req,
        }
    }

    async fn send(&self, body: &Value) -> Result<Value> {
        let resp = self.build_http_request(body).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }

    fn parse_image(&self, response: &Value) -> Result<Vec<u8>> {
        let data = response
            .pointer("/data/0/b64_json")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MalformedResponse {
                driver: self.name(),
                message: "missing data[0].b64_json".into(),
            })?;
        decode_base64_image(data)
    }
}

#[async_trait]
impl ImageGenerationDriver for OpenAiDalleImageGenerationDriver {
    fn name(&self) -> &'static str {
        match self.target {
            Target::OpenAi { .. } => "openai-dalle",
            Target::Azure(_) => "azure-openai-dalle",
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn try_text_to_image(
        &self,
        prompts: &[String],
        _negative_prompts: &[String],
    ) -> Result<ImageArtifact> {
        let body = self.build_body(prompts);
        tracing::debug!(model = %self.model, url = %self.url(), "requesting image generation");

        let response = backoff::retry(&self.backoff, None, None, || self.send(&body)).await?;
        let value = self.parse_image(&response)?;

        Ok(ImageArtifact {
            value,
            mime_type: "image/png".into(),
            width: self.width,
            height: self.height,
            model: self.model.clone(),
            prompt: prompts.join(", "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn azure() -> OpenAiDalleImageGenerationDriver {
        OpenAiDalleImageGenerationDriver::azure(
            "dall-e-3",
            "https://dalle.example.com",
            "dalle-deployment",
            "512x512",
        )
        .unwrap()
    }

    /// Serve one canned JSON response and hand back the raw request text.
    async fn serve_once(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let len = text[..end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + len {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let reply = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_azure_requires_endpoint() {
        let err = OpenAiDalleImageGenerationDriver::azure("dall-e-3", "", "dalle-deployment", "512x512")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_azure_requires_deployment() {
        let err = OpenAiDalleImageGenerationDriver::azure(
            "dall-e-3",
            "https://dalle.example.com",
            "",
            "512x512",
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_image_size_parsing() {
        assert_eq!(parse_image_size("1792x1024").unwrap(), (1792, 1024));
        assert!(parse_image_size("large").is_err());
        assert!(parse_image_size("0x512").is_err());
        assert!(OpenAiDalleImageGenerationDriver::new("dall-e-2", "512").is_err());
    }

    #[test]
    fn test_azure_url_and_key_header() {
        let driver = azure().with_api_key("azure-key");
        assert_eq!(
            driver.url(),
            "https://dalle.example.com/openai/deployments/dalle-deployment/images/generations?api-version=2024-02-01"
        );
        let req = driver.build_http_request(&json!({})).build().unwrap();
        assert_eq!(req.headers().get("api-key").unwrap(), "azure-key");
        assert!(req.headers().get("Authorization").is_none());
        assert_eq!(driver.name(), "azure-openai-dalle");
    }

    #[test]
    fn test_request_body() {
        let driver = OpenAiDalleImageGenerationDriver::new("dall-e-3", "1024x1024")
            .unwrap()
            .with_quality("hd")
            .with_api_key("sk-test");
        let body = driver.build_body(&["a cat".into(), "watercolor".into()]);
        assert_eq!(body["prompt"], "a cat, watercolor");
        assert_eq!(body["size"], "1024x1024");
        assert_eq!(body["response_format"], "b64_json");
        assert_eq!(body["n"], 1);
        assert_eq!(body["quality"], "hd");
        assert!(body.get("style").is_none());

        let req = driver.build_http_request(&body).build().unwrap();
        assert_eq!(req.headers().get("Authorization").unwrap(), "Bearer sk-test");
    }

    #[test]
    fn test_missing_image_data_is_malformed() {
        let err = azure().parse_image(&json!({"data": []})).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_generate_image() {
        let (base_url, server) = serve_once(r#"{"data": [{"b64_json": "aW1hZ2UgZGF0YQ=="}]}"#).await;
        let driver = OpenAiDalleImageGenerationDriver::new("dall-e-3", "512x512")
            .unwrap()
            .with_base_url(base_url)
            .with_backoff(BackoffConfig::none());

        let image = driver
            .generate_image(&["test prompt".to_string()], None)
            .await
            .unwrap();

        assert_eq!(image.value, b"image data");
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.width, 512);
        assert_eq!(image.height, 512);
        assert_eq!(image.model, "dall-e-3");
        assert_eq!(image.prompt, "test prompt");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/images/generations"));
        assert!(request.contains("\"response_format\":\"b64_json\""));
    }

    #[tokio::test]
    async fn test_inpainting_unsupported() {
        let img = ImageArtifact::png(vec![], 512, 512);
        let err = azure().try_inpainting(&[], &img, &img, &[]).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }
}
