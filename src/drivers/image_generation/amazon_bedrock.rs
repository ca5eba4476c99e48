//! Image generation through the Amazon Bedrock runtime.
//!
//! The driver owns the transport (one `InvokeModel` call per operation) and
//! the image geometry; the request body and response decoding come from the
//! configured [`ImageGenerationModelDriver`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::model::ImageGenerationModelDriver;
use super::ImageGenerationDriver;
use crate::artifacts::ImageArtifact;
use crate::error::{Error, Result};

/// One `InvokeModel` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeModelRequest {
    pub model_id: String,
    /// JSON request body.
    pub body: Vec<u8>,
    pub content_type: String,
    pub accept: String,
}

/// The slice of the Bedrock runtime API this driver needs.
///
/// Implement it over whichever AWS SDK client the application already uses.
/// The returned bytes are the raw response body.
#[async_trait]
pub trait BedrockRuntimeClient: Send + Sync {
    async fn invoke_model(&self, request: InvokeModelRequest) -> anyhow::Result<Vec<u8>>;
}

/// Image driver for models hosted on Amazon Bedrock.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use llm_structures::drivers::image_generation::*;
/// # fn client() -> Arc<dyn BedrockRuntimeClient> { unimplemented!() }
/// let driver = AmazonBedrockImageGenerationDriver::builder(
///     "stability.stable-diffusion-xl-v1",
///     client(),
///     Arc::new(BedrockStableDiffusionImageGenerationModelDriver::new()),
/// )
/// .image_width(1024)
/// .image_height(1024)
/// .build()
/// .unwrap();
/// ```
pub struct AmazonBedrockImageGenerationDriver {
    model: String,
    client: Arc<dyn BedrockRuntimeClient>,
    model_driver: Arc<dyn ImageGenerationModelDriver>,
    image_width: u32,
    image_height: u32,
    seed: Option<u64>,
}

impl std::fmt::Debug for AmazonBedrockImageGenerationDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmazonBedrockImageGenerationDriver")
            .field("model", &self.model)
            .field("model_driver", &self.model_driver.name())
            .field("image_width", &self.image_width)
            .field("image_height", &self.image_height)
            .field("seed", &self.seed)
            .finish()
    }
}

/// Builder for [`AmazonBedrockImageGenerationDriver`].
pub struct AmazonBedrockImageGenerationDriverBuilder {
    model: String,
    client: Arc<dyn BedrockRuntimeClient>,
    model_driver: Arc<dyn ImageGenerationModelDriver>,
    image_width: u32,
    image_height: u32,
    seed: Option<u64>,
}

impl AmazonBedrockImageGenerationDriverBuilder {
    /// Defaults to 512.
    pub fn image_width(mut self, width: u32) -> Self {
        self.image_width = width;
        self
    }

    /// Defaults to 512.
    pub fn image_height(mut self, height: u32) -> Self {
        self.image_height = height;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate the geometry and build the driver.
    pub fn build(self) -> Result<AmazonBedrockImageGenerationDriver> {
        if self.model.trim().is_empty() {
            return Err(Error::InvalidConfig("Bedrock model id is required".into()));
        }
        for (label, value) in [("width", self.image_width), ("height", self.image_height)] {
            if value == 0 || value % 64 != 0 {
                return Err(Error::InvalidConfig(format!(
                    "image {} must be a positive multiple of 64, got {}",
                    label, value
                )));
            }
        }
        Ok(AmazonBedrockImageGenerationDriver {
            model: self.model,
            client: self.client,
            model_driver: self.model_driver,
            image_width: self.image_width,
            image_height: self.image_height,
            seed: self.seed,
        })
    }
}

impl AmazonBedrockImageGenerationDriver {
    pub fn builder(
        model: impl Into<String>,
        client: Arc<dyn BedrockRuntimeClient>,
        model_driver: Arc<dyn ImageGenerationModelDriver>,
    ) -> AmazonBedrockImageGenerationDriverBuilder {
        AmazonBedrockImageGenerationDriverBuilder {
            model: model.into(),
            client,
            model_driver,
            image_width: 512,
            image_height: 512,
            seed: None,
        }
    }

    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    async fn invoke(&self, request: Value) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(&request)?;
        tracing::debug!(
            model = %self.model,
            model_driver = self.model_driver.name(),
            bytes = body.len(),
            "invoking bedrock model"
        );

        let raw = self
            .client
            .invoke_model(InvokeModelRequest {
                model_id: self.model.clone(),
                body,
                content_type: "application/json".into(),
                accept: "application/json".into(),
            })
            .await
            .map_err(|e| Error::Upstream {
                driver: "amazon-bedrock",
                message: format!("{:#}", e),
            })?;

        let response: Value = serde_json::from_slice(&raw)
            .map_err(|e| Error::ImageGeneration(format!("unreadable model response: {}", e)))?;

        self.model_driver
            .get_generated_image(&response)
            .map_err(|e| match e {
                Error::ImageGeneration(_) => e,
                other => Error::ImageGeneration(other.to_string()),
            })
    }

    fn artifact(&self, value: Vec<u8>, prompts: &[String]) -> ImageArtifact {
        ImageArtifact {
            value,
            mime_type: "image/png".into(),
            width: self.image_width,
            height: self.image_height,
            model: self.model.clone(),
            prompt: prompts.join(", "),
        }
    }
}

#[async_trait]
impl ImageGenerationDriver for AmazonBedrockImageGenerationDriver {
    fn name(&self) -> &'static str {
        "amazon-bedrock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn try_text_to_image(
        &self,
        prompts: &[String],
        negative_prompts: &[String],
    ) -> Result<ImageArtifact> {
        let request = self.model_driver.text_to_image_request_parameters(
            prompts,
            self.image_width,
            self.image_height,
            negative_prompts,
            self.seed,
        )?;
        let image = self.invoke(request).await?;
        Ok(self.artifact(image, prompts))
    }

    async fn try_image_variation(
        &self,
        prompts: &[String],
        image: &ImageArtifact,
        negative_prompts: &[String],
    ) -> Result<ImageArtifact> {
        let request = self.model_driver.image_variation_request_parameters(
            prompts,
            image,
            negative_prompts,
            self.seed,
        )?;
        let image = self.invoke(request).await?;
        Ok(self.artifact(image, prompts))
    }

    async fn try_inpainting(
        &self,
        prompts: &[String],
        image: &ImageArtifact,
        mask: &ImageArtifact,
        negative_prompts: &[String],
    ) -> Result<ImageArtifact> {
        let request = self.model_driver.image_inpainting_request_parameters(
            prompts,
            image,
            mask,
            negative_prompts,
            self.seed,
        )?;
        let image = self.invoke(request).await?;
        Ok(self.artifact(image, prompts))
    }

    async fn try_outpainting(
        &self,
        prompts: &[String],
        image: &ImageArtifact,
        mask: &ImageArtifact,
        negative_prompts: &[String],
    ) -> Result<ImageArtifact> {
        let request = self.model_driver.image_outpainting_request_parameters(
            prompts,
            image,
            mask,
            negative_prompts,
            self.seed,
        )?;
        let image = self.invoke(request).await?;
        Ok(self.artifact(image, prompts))
    }
}
