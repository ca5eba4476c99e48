//! Engines: higher-level operations composed over drivers.

pub mod image_generation;

pub use image_generation::ImageGenerationEngine;
