//! Rules-aware front end for image generation drivers.

use std::sync::Arc;

use crate::artifacts::ImageArtifact;
use crate::drivers::image_generation::ImageGenerationDriver;
use crate::error::Result;
use crate::events::{Event, EventBus, EventListener, ListenerId};
use crate::rules::Ruleset;

/// Folds rulesets into prompt lists and delegates to an
/// [`ImageGenerationDriver`].
///
/// Rule values of `rulesets` are appended to the prompts; rule values of
/// `negative_rulesets` are appended to the negative prompts.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use llm_structures::drivers::image_generation::OpenAiDalleImageGenerationDriver;
/// # use llm_structures::engines::ImageGenerationEngine;
/// # use llm_structures::rules::{Rule, Ruleset};
/// # async fn demo() -> llm_structures::Result<()> {
/// let driver = OpenAiDalleImageGenerationDriver::from_env("dall-e-3", "1024x1024")?;
/// let engine = ImageGenerationEngine::new(Arc::new(driver));
/// let style = Ruleset::new("style", vec![Rule::new("watercolor")]);
/// let image = engine
///     .text_to_image(vec!["a lighthouse".into()], None, Some(&[style]), None)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ImageGenerationEngine {
    driver: Arc<dyn ImageGenerationDriver>,
    events: Arc<EventBus>,
}

impl std::fmt::Debug for ImageGenerationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageGenerationEngine")
            .field("driver", &self.driver.name())
            .field("model", &self.driver.model())
            .field("listeners", &self.events.len())
            .finish()
    }
}

/// Prompts and negative prompts after ruleset folding.
struct Prompts {
    positive: Vec<String>,
    negative: Vec<String>,
}

impl Prompts {
    fn fold(
        mut prompts: Vec<String>,
        negative_prompts: Option<Vec<String>>,
        rulesets: Option<&[Ruleset]>,
        negative_rulesets: Option<&[Ruleset]>,
    ) -> Self {
        let mut negative = negative_prompts.unwrap_or_default();
        for ruleset in rulesets.unwrap_or_default() {
            prompts.extend(ruleset.values().map(str::to_string));
        }
        for ruleset in negative_rulesets.unwrap_or_default() {
            negative.extend(ruleset.values().map(str::to_string));
        }
        Self {
            positive: prompts,
            negative,
        }
    }
}

impl ImageGenerationEngine {
    pub fn new(driver: Arc<dyn ImageGenerationDriver>) -> Self {
        Self {
            driver,
            events: Arc::new(EventBus::new()),
        }
    }

    /// Publish `StartImageGeneration` / `FinishImageGeneration` on a shared
    /// bus, e.g. a structure's. Default: a private bus.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = bus;
        self
    }

    pub fn add_event_listener(&self, listener: EventListener) -> ListenerId {
        self.events.add(listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.events.remove(id)
    }

    pub fn driver(&self) -> &dyn ImageGenerationDriver {
        self.driver.as_ref()
    }

    fn emit(&self, event: Event) {
        self.events.publish(&event);
    }

    fn start(&self, prompts: &Prompts) {
        tracing::debug!(
            driver = self.driver.name(),
            model = self.driver.model(),
            prompts = prompts.positive.len(),
            negative_prompts = prompts.negative.len(),
            "generating image"
        );
        self.emit(Event::StartImageGeneration {
            driver: self.driver.name(),
            prompts: prompts.positive.clone(),
            negative_prompts: prompts.negative.clone(),
        });
    }

    fn finish(&self, result: Result<ImageArtifact>) -> Result<ImageArtifact> {
        if let Err(ref e) = result {
            tracing::warn!(driver = self.driver.name(), error = %e, "image generation failed");
        }
        self.emit(Event::FinishImageGeneration {
            driver: self.driver.name(),
            ok: result.is_ok(),
        });
        result
    }

    pub async fn text_to_image(
        &self,
        prompts: Vec<String>,
        negative_prompts: Option<Vec<String>>,
        rulesets: Option<&[Ruleset]>,
        negative_rulesets: Option<&[Ruleset]>,
    ) -> Result<ImageArtifact> {
        let p = Prompts::fold(prompts, negative_prompts, rulesets, negative_rulesets);
        self.start(&p);
        let result = self.driver.try_text_to_image(&p.positive, &p.negative).await;
        self.finish(result)
    }

    pub async fn image_variation(
        &self,
        prompts: Vec<String>,
        image: &ImageArtifact,
        negative_prompts: Option<Vec<String>>,
        rulesets: Option<&[Ruleset]>,
        negative_rulesets: Option<&[Ruleset]>,
    ) -> Result<ImageArtifact> {
        let p = Prompts::fold(prompts, negative_prompts, rulesets, negative_rulesets);
        self.start(&p);
        let result = self
            .driver
            .try_image_variation(&p.positive, image, &p.negative)
            .await;
        self.finish(result)
    }

    pub async fn image_inpainting(
        &self,
        prompts: Vec<String>,
        image: &ImageArtifact,
        mask: &ImageArtifact,
        negative_prompts: Option<Vec<String>>,
        rulesets: Option<&[Ruleset]>,
        negative_rulesets: Option<&[Ruleset]>,
    ) -> Result<ImageArtifact> {
        let p = Prompts::fold(prompts, negative_prompts, rulesets, negative_rulesets);
        self.start(&p);
        let result = self
            .driver
            .try_inpainting(&p.positive, image, mask, &p.negative)
            .await;
        self.finish(result)
    }

    pub async fn image_outpainting(
        &self,
        prompts: Vec<String>,
        image: &ImageArtifact,
        mask: &ImageArtifact,
        negative_prompts: Option<Vec<String>>,
        rulesets: Option<&[Ruleset]>,
        negative_rulesets: Option<&[Ruleset]>,
    ) -> Result<ImageArtifact> {
        let p = Prompts::fold(prompts, negative_prompts, rulesets, negative_rulesets);
        self.start(&p);
        let result = self
            .driver
            .try_outpainting(&p.positive, image, mask, &p.negative)
            .await;
        self.finish(result)
    }
}
