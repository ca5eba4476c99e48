//! Amazon Titan Image Generator models hosted on Amazon Bedrock.

use super::ImageGenerationModelDriver;
use crate::artifacts::ImageArtifact;
use crate::drivers::image_generation::decode_base64_image;
use crate::error::{Error, Result};
use serde_json::{json, Map, Value};

/// Request/response shape for `amazon.titan-image-generator-*` models.
#[derive(Debug, Clone)]
pub struct BedrockTitanImageGenerationModelDriver {
    /// `"standard"` or `"premium"`.
    pub quality: String,
    pub cfg_scale: u32,
}

impl Default for BedrockTitanImageGenerationModelDriver {
    fn default() -> Self {
        Self {
            quality: "standard".into(),
            cfg_scale: 7,
        }
    }
}

impl BedrockTitanImageGenerationModelDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn with_cfg_scale(mut self, cfg_scale: u32) -> Self {
        self.cfg_scale = cfg_scale;
        self
    }

    fn generation_config(&self, width: u32, height: u32, seed: Option<u64>) -> Value {
        let mut config = json!({
            "numberOfImages": 1,
            "quality": self.quality,
            "width": width,
            "height": height,
            "cfgScale": self.cfg_scale,
        });
        if let Some(seed) = seed {
            config["seed"] = json!(seed);
        }
        config
    }

    fn task_params(prompts: &[String], negative_prompts: &[String]) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("text".into(), json!(prompts.join(" ")));
        if !negative_prompts.is_empty() {
            params.insert("negativeText".into(), json!(negative_prompts.join(" ")));
        }
        params
    }

    fn request(
        &self,
        task_type: &str,
        params_key: &str,
        params: Map<String, Value>,
        size: (u32, u32),
        seed: Option<u64>,
    ) -> Value {
        let mut request = Map::new();
        request.insert("taskType".into(), json!(task_type));
        request.insert(params_key.into(), Value::Object(params));
        request.insert(
            "imageGenerationConfig".into(),
            self.generation_config(size.0, size.1, seed),
        );
        Value::Object(request)
    }
}

impl ImageGenerationModelDriver for BedrockTitanImageGenerationModelDriver {
    fn name(&self) -> &'static str {
        "titan"
    }

    fn text_to_image_request_parameters(
        &self,
        prompts: &[String],
        image_width: u32,
        image_height: u32,
        negative_prompts: &[String],
        seed: Option<u64>,
    ) -> Result<Value> {
        Ok(self.request(
            "TEXT_IMAGE",
            "textToImageParams",
            Self::task_params(prompts, negative_prompts),
            (image_width, image_height),
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
        let mut params = Self::task_params(prompts, negative_prompts);
        params.insert("images".into(), json!([image.base64()]));
        Ok(self.request(
            "IMAGE_VARIATION",
            "imageVariationParams",
            params,
            (image.width, image.height),
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
        let mut params = Self::task_params(prompts, negative_prompts);
        params.insert("image".into(), json!(image.base64()));
        params.insert("maskImage".into(), json!(mask.base64()));
        Ok(self.request(
            "INPAINTING",
            "inPaintingParams",
            params,
            (image.width, image.height),
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
        let mut params = Self::task_params(prompts, negative_prompts);
        params.insert("image".into(), json!(image.base64()));
        params.insert("maskImage".into(), json!(mask.base64()));
        params.insert("outPaintingMode".into(), json!("DEFAULT"));
        Ok(self.request(
            "OUTPAINTING",
            "outPaintingParams",
            params,
            (image.width, image.height),
            seed,
        ))
    }

    fn get_generated_image(&self, response: &Value) -> Result<Vec<u8>> {
        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(Error::ImageGeneration(message));
        }

        let data = response
            .pointer("/images/0")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::ImageGeneration("response contains no images".into()))?;
        decode_base64_image(data)
    }
}
