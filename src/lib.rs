//! # LLM Structures
//!
//! Structures (pipelines of prompt tasks) over pluggable provider drivers,
//! plus a blocking token stream over a running structure.
//!
//! ## Core Concepts
//!
//! - **[`Structure`]**: object-safe trait for a runnable unit that publishes
//!   [`Event`]s to registered [`EventListener`]s. [`Pipeline`] is the
//!   sequential implementation.
//! - **[`Task`]**: one step of a structure. [`PromptTask`] renders a
//!   template and calls the prompt driver, streaming when the driver does.
//! - **[`ExecCtx`]**: per-run context (prompt driver, retry policy,
//!   template vars, cancellation, event bus).
//! - **[`Stream`]**: runs a streaming structure on a producer thread and
//!   hands its completion chunks back as an ordinary [`Iterator`].
//! - **Drivers**: [`drivers::prompt`] (OpenAI / Azure OpenAI chat),
//!   [`drivers::image_generation`] (Amazon Bedrock, DALL-E),
//!   [`drivers::sql`] (Amazon Redshift Data API).
//! - **[`ImageGenerationEngine`]**: folds rulesets into image prompts.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use llm_structures::drivers::prompt::OpenAiChatPromptDriver;
//! use llm_structures::{Pipeline, PromptTask, Stream};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = OpenAiChatPromptDriver::from_env("gpt-4o")?.with_stream(true);
//!     let pipeline = Pipeline::builder()
//!         .prompt_driver(Arc::new(driver))
//!         .task(PromptTask::new("story", "Tell a short story about {input}"))
//!         .build()?;
//!
//!     for chunk in Stream::new(Arc::new(pipeline))?.run(["a lighthouse keeper"])? {
//!         print!("{}", chunk?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod artifacts;
pub mod drivers;
pub mod engines;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod rules;
pub mod stream;
pub mod structure;
pub mod tasks;
pub mod template;

pub use artifacts::{ImageArtifact, TextArtifact};
pub use drivers::{BackoffConfig, JitterStrategy};
pub use engines::ImageGenerationEngine;
pub use error::{Error, Result};
pub use events::{Event, EventBus, EventHandler, EventKind, EventListener, ListenerId, RunId};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use rules::{Rule, Ruleset};
pub use stream::{Stream, StreamIter};
pub use structure::{ListenerGuard, Pipeline, PipelineBuilder, RunArgs, RunResult, Structure};
pub use tasks::{BoxFut, PromptTask, Task};
