//! Value objects produced by tasks and drivers.

use std::fmt;

/// A piece of text produced by a task or a streamed run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextArtifact {
    pub value: String,
}

impl TextArtifact {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn to_text(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for TextArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl From<String> for TextArtifact {
    fn from(value: String) -> Self {
        Self { value }
    }
}

impl From<&str> for TextArtifact {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A generated or input image.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    /// Raw image bytes.
    pub value: Vec<u8>,
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    /// Model that produced the image. Empty for caller-supplied images.
    pub model: String,
    /// Prompts used to produce the image, joined with `", "`.
    pub prompt: String,
}

impl ImageArtifact {
    /// Wrap caller-supplied PNG bytes (e.g. an input image or mask).
    pub fn png(value: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            value,
            mime_type: "image/png".to_string(),
            width,
            height,
            model: String::new(),
            prompt: String::new(),
        }
    }

    /// Base64 encoding of the image bytes, as most image APIs expect.
    pub fn base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.value)
    }
}

impl fmt::Debug for ImageArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageArtifact")
            .field("bytes", &self.value.len())
            .field("mime_type", &self.mime_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("model", &self.model)
            .field("prompt", &self.prompt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_artifact_display() {
        let a = TextArtifact::new("hello");
        assert_eq!(a.to_string(), "hello");
        assert_eq!(a.to_text(), "hello");
    }

    #[test]
    fn test_image_base64() {
        let img = ImageArtifact::png(b"image data".to_vec(), 512, 512);
        assert_eq!(img.base64(), "aW1hZ2UgZGF0YQ==");
    }

    #[test]
    fn test_image_debug_hides_bytes() {
        let img = ImageArtifact::png(vec![0; 4096], 64, 64);
        let dbg = format!("{:?}", img);
        assert!(dbg.contains("bytes: 4096"));
    }
}
