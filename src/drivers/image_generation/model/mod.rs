//! Per-model request/response shapes for multi-model hosts.

pub mod stable_diffusion;
pub mod titan;

pub use stable_diffusion::BedrockStableDiffusionImageGenerationModelDriver;
pub use titan::BedrockTitanImageGenerationModelDriver;

use crate::artifacts::ImageArtifact;
use crate::error::Result;
use serde_json::Value;

/// Builds request bodies for, and decodes responses from, one hosted model
/// family.
pub trait ImageGenerationModelDriver: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn text_to_image_request_parameters(
        &self,
        prompts: &[String],
        image_width: u32,
        image_height: u32,
        negative_prompts: &[String],
        seed: Option<u64>,
    ) -> Result<Value>;

    fn image_variation_request_parameters(
        &self,
        prompts: &[String],
        image: &ImageArtifact,
        negative_prompts: &[String],
        seed: Option<u64>,
    ) -> Result<Value>;

    fn image_inpainting_request_parameters(
        &self,
        prompts: &[String],
        image: &ImageArtifact,
        mask: &ImageArtifact,
        negative_prompts: &[String],
        seed: Option<u64>,
    ) -> Result<Value>;

    fn image_outpainting_request_parameters(
        &self,
        prompts: &[String],
        image: &ImageArtifact,
        mask: &ImageArtifact,
        negative_prompts: &[String],
        seed: Option<u64>,
    ) -> Result<Value>;

    /// Extract the image bytes from a decoded response body.
    ///
    /// Errors here are reported as image generation failures by the host
    /// driver.
    fn get_generated_image(&self, response: &Value) -> Result<Vec<u8>>;
}
