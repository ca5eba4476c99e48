//! Image generation drivers.
//!
//! An [`ImageGenerationDriver`] turns prompts (and optionally an input image
//! and mask) into an [`ImageArtifact`]. Multi-model hosts such as Amazon
//! Bedrock delegate request building and response decoding to an
//! [`ImageGenerationModelDriver`] chosen per hosted model.

pub mod amazon_bedrock;
pub mod model;
pub mod openai_dalle;

pub use amazon_bedrock::{
    AmazonBedrockImageGenerationDriver, BedrockRuntimeClient, InvokeModelRequest,
};
pub use model::{
    BedrockStableDiffusionImageGenerationModelDriver, BedrockTitanImageGenerationModelDriver,
    ImageGenerationModelDriver,
};
pub use openai_dalle::OpenAiDalleImageGenerationDriver;

use crate::artifacts::ImageArtifact;
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Abstraction over image generation providers.
///
/// Only text-to-image is mandatory; the editing operations default to
/// [`Error::Unsupported`].
#[async_trait]
pub trait ImageGenerationDriver: Send + Sync {
    /// Driver name for logging and events.
    fn name(&self) -> &'static str;

    /// Model identifier sent to the provider.
    fn model(&self) -> &str;

    async fn try_text_to_image(
        &self,
        prompts: &[String],
        negative_prompts: &[String],
    ) -> Result<ImageArtifact>;

    async fn try_image_variation(
        &self,
        _prompts: &[String],
        _image: &ImageArtifact,
        _negative_prompts: &[String],
    ) -> Result<ImageArtifact> {
        Err(Error::Unsupported {
            driver: self.name(),
            operation: "image variation",
        })
    }

    async fn try_inpainting(
        &self,
        _prompts: &[String],
        _image: &ImageArtifact,
        _mask: &ImageArtifact,
        _negative_prompts: &[String],
    ) -> Result<ImageArtifact> {
        Err(Error::Unsupported {
            driver: self.name(),
            operation: "inpainting",
        })
    }

    async fn try_outpainting(
        &self,
        _prompts: &[String],
        _image: &ImageArtifact,
        _mask: &ImageArtifact,
        _negative_prompts: &[String],
    ) -> Result<ImageArtifact> {
        Err(Error::Unsupported {
            driver: self.name(),
            operation: "outpainting",
        })
    }

    /// Text-to-image with no negative prompts by default.
    async fn generate_image(
        &self,
        prompts: &[String],
        negative_prompts: Option<&[String]>,
    ) -> Result<ImageArtifact> {
        self.try_text_to_image(prompts, negative_prompts.unwrap_or(&[]))
            .await
    }
}

/// Decode a base64 image payload, tolerating embedded line breaks.
pub(crate) fn decode_base64_image(data: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
}
