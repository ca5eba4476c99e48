//! Stability AI Stable Diffusion models hosted on Amazon Bedrock.
//!
//! Parameter reference:
//! <https://platform.stability.ai/docs/api-reference#tag/v1generation/operation/textToImage>

use super::ImageGenerationModelDriver;
use crate::artifacts::ImageArtifact;
use crate::drivers::image_generation::decode_base64_image;
use crate::error::{Error, Result};
use serde_json::{json, Map, Value};

/// Request/response shape for `stability.stable-diffusion-*` models.
#[derive(Debug, Clone)]
pub struct BedrockStableDiffusionImageGenerationModelDriver {
    /// How strictly the diffusion follows the prompt (0-35).
    pub cfg_scale: u32,
    pub style_preset: Option<String>,
    pub clip_guidance_preset: Option<String>,
    pub sampler: Option<String>,
    /// Diffusion steps. `None` leaves the choice to the model.
    pub steps: Option<u32>,
    /// Weight of the init image for variations (0.0-1.0).
    pub image_strength: Option<f64>,
}

impl Default for BedrockStableDiffusionImageGenerationModelDriver {
    fn default() -> Self {
        Self {
            cfg_scale: 7,
            style_preset: None,
            clip_guidance_preset: None,
            sampler: None,
            steps: Some(30),
            image_strength: None,
        }
    }
}

enum MaskSource {
    Black,
    White,
}

impl MaskSource {
    fn as_str(&self) -> &'static str {
        match self {
            MaskSource::Black => "MASK_IMAGE_BLACK",
            MaskSource::White => "MASK_IMAGE_WHITE",
        }
    }
}

impl BedrockStableDiffusionImageGenerationModelDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cfg_scale(mut self, cfg_scale: u32) -> Self {
        self.cfg_scale = cfg_scale;
        self
    }

    pub fn with_style_preset(mut self, preset: impl Into<String>) -> Self {
        self.style_preset = Some(preset.into());
        self
    }

    pub fn with_clip_guidance_preset(mut self, preset: impl Into<String>) -> Self {
        self.clip_guidance_preset = Some(preset.into());
        self
    }

    pub fn with_sampler(mut self, sampler: impl Into<String>) -> Self {
        self.sampler = Some(sampler.into());
        self
    }

    pub fn with_steps(mut self, steps: Option<u32>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_image_strength(mut self, strength: f64) -> Self {
        self.image_strength = Some(strength);
        self
    }

    #[allow(clippy::too_many_arguments)]
    fn request_parameters(
        &self,
        prompts: &[String],
        negative_prompts: &[String],
        size: (u32, u32),
        image: Option<&ImageArtifact>,
        mask: Option<(&ImageArtifact, MaskSource)>,
        seed: Option<u64>,
    ) -> Value {
        let text_prompts: Vec<Value> = prompts
            .iter()
            .map(|p| json!({"text": p, "weight": 1.0}))
            .chain(
                negative_prompts
                    .iter()
                    .map(|p| json!({"text": p, "weight": -1.0})),
            )
            .collect();

        let mut request = Map::new();
        request.insert("text_prompts".into(), Value::Array(text_prompts));
        request.insert("cfg_scale".into(), json!(self.cfg_scale));
        let optional = [
            ("style_preset", self.style_preset.as_ref().map(|v| json!(v))),
            (
                "clip_guidance_preset",
                self.clip_guidance_preset.as_ref().map(|v| json!(v)),
            ),
            ("sampler", self.sampler.as_ref().map(|v| json!(v))),
            ("steps", self.steps.map(|v| json!(v))),
            ("seed", seed.map(|v| json!(v))),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                request.insert(key.into(), value);
            }
        }

        match image {
            Some(image) => {
                request.insert("init_image".into(), json!(image.base64()));
                request.insert("width".into(), json!(image.width));
                request.insert("height".into(), json!(image.height));
                if let (Some(strength), None) = (self.image_strength, &mask) {
                    request.insert("init_image_mode".into(), json!("IMAGE_STRENGTH"));
                    request.insert("image_strength".into(), json!(strength));
                }
            }
            None => {
                request.insert("width".into(), json!(size.0));
                request.insert("height".into(), json!(size.1));
            }
        }

        if let Some((mask, source)) = mask {
            request.insert("mask_source".into(), json!(source.as_str()));
            request.insert("mask_image".into(), json!(mask.base64()));
        }

        Value::Object(request)
    }
}

impl ImageGenerationModelDriver for BedrockStableDiffusionImageGenerationModelDriver {
    fn name(&self) -> &'static str {
        "stable-diffusion"
    }

    fn text_to_image_request_parameters(
        &self,
        prompts: &[String],
        image_width: u32,
        image_height: u32,
        negative_prompts: &[String],
        seed: Option<u64>,
    ) -> Result<Value> {
        Ok(self.request_parameters(
            prompts,
            negative_prompts,
            (image_width, image_height),
            None,
            None,
            seed,
        ))
    }

    fn image_variation_request_parameters(
        &self,
        prompts: &[String],
        image: &ImageArtifact,
        negative_prompts: &[String],
        seed: Option<u64>,
    ) -> Result<Value> {
        Ok(self.request_parameters(
            prompts,
            negative_prompts,
            (image.width, image.height),
            Some(image),
            None,
            seed,
        ))
    }

    fn image_inpainting_request_parameters(
        &self,
        prompts: &[String],
        image: &ImageArtifact,
        mask: &ImageArtifact,
        negative_prompts: &[String],
        seed: Option<u64>,
    ) -> Result<Value> {
        Ok(self.request_parameters(
            prompts,
            negative_prompts,
            (image.width, image.height),
            Some(image),
            Some((mask, MaskSource::Black)),
            seed,
        ))
    }

    fn image_outpainting_request_parameters(
        &self,
        prompts: &[String],
        image: &ImageArtifact,
        mask: &ImageArtifact,
        negative_prompts: &[String],
        seed: Option<u64>,
    ) -> Result<Value> {
        Ok(self.request_parameters(
            prompts,
            negative_prompts,
            (image.width, image.height),
            Some(image),
            Some((mask, MaskSource::White)),
            seed,
        ))
    }

    fn get_generated_image(&self, response: &Value) -> Result<Vec<u8>> {
        let artifact = response
            .pointer("/artifacts/0")
            .ok_or_else(|| Error::ImageGeneration("response contains no artifacts".into()))?;

        let finish_reason = artifact
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");
        if finish_reason != "SUCCESS" {
            return Err(Error::ImageGeneration(format!(
                "finish reason {}",
                finish_reason
            )));
        }

        let data = artifact
            .get("base64")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::ImageGeneration("artifact has no base64 payload".into()))?;
        decode_base64_image(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_text_to_image_parameters() {
        let driver = BedrockStableDiffusionImageGenerationModelDriver::new()
            .with_style_preset("photographic")
            .with_steps(Some(40));
        let params = driver
            .text_to_image_request_parameters(
                &prompts(&["a cat"]),
                512,
                768,
                &prompts(&["blurry"]),
                Some(42),
            )
            .unwrap();
        assert_eq!(
            params["text_prompts"],
            json!([{"text": "a cat", "weight": 1.0}, {"text": "blurry", "weight": -1.0}])
        );
        assert_eq!(params["cfg_scale"], 7);
        assert_eq!(params["style_preset"], "photographic");
        assert_eq!(params["steps"], 40);
        assert_eq!(params["seed"], 42);
        assert_eq!(params["width"], 512);
        assert_eq!(params["height"], 768);
        assert!(params.get("sampler").is_none());
        assert!(params.get("init_image").is_none());
    }

    #[test]
    fn test_variation_uses_image_dimensions() {
        let driver = BedrockStableDiffusionImageGenerationModelDriver::new().with_image_strength(0.35);
        let image = ImageArtifact::png(b"image data".to_vec(), 1024, 1024);
        let params = driver
            .image_variation_request_parameters(&prompts(&["x"]), &image, &[], None)
            .unwrap();
        assert_eq!(params["init_image"], "aW1hZ2UgZGF0YQ==");
        assert_eq!(params["width"], 1024);
        assert_eq!(params["init_image_mode"], "IMAGE_STRENGTH");
        assert_eq!(params["image_strength"], 0.35);
        assert!(params.get("seed").is_none());
        assert_eq!(params["steps"], 30);
    }

    #[test]
    fn test_mask_sources() {
        let driver = BedrockStableDiffusionImageGenerationModelDriver::new();
        let image = ImageArtifact::png(b"i".to_vec(), 512, 512);
        let mask = ImageArtifact::png(b"m".to_vec(), 512, 512);
        let inpaint = driver
            .image_inpainting_request_parameters(&prompts(&["x"]), &image, &mask, &[], None)
            .unwrap();
        let outpaint = driver
            .image_outpainting_request_parameters(&prompts(&["x"]), &image, &mask, &[], None)
            .unwrap();
        assert_eq!(inpaint["mask_source"], "MASK_IMAGE_BLACK");
        assert_eq!(outpaint["mask_source"], "MASK_IMAGE_WHITE");
        assert_eq!(inpaint["mask_image"], mask.base64());
    }

    #[test]
    fn test_get_generated_image() {
        let driver = BedrockStableDiffusionImageGenerationModelDriver::new();
        let response = json!({"artifacts": [{"finishReason": "SUCCESS", "base64": "aW1hZ2UgZGF0YQ=="}]});
        assert_eq!(driver.get_generated_image(&response).unwrap(), b"image data");
    }

    #[test]
    fn test_filtered_image_is_failure() {
        let driver = BedrockStableDiffusionImageGenerationModelDriver::new();
        let response = json!({"artifacts": [{"finishReason": "CONTENT_FILTERED", "base64": ""}]});
        let err = driver.get_generated_image(&response).unwrap_err();
        assert!(err.to_string().contains("CONTENT_FILTERED"));
    }

    #[test]
    fn test_missing_artifacts_is_failure() {
        let driver = BedrockStableDiffusionImageGenerationModelDriver::new();
        assert!(driver.get_generated_image(&json!({})).is_err());
    }
}
