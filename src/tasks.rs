//! Tasks: the steps a structure runs.
//!
//! A [`Task`] takes the previous step's text, does some work against an
//! [`ExecCtx`], and returns a [`TextArtifact`]. The trait is object-safe so
//! structures can hold `Box<dyn Task>`.

use crate::artifacts::TextArtifact;
use crate::drivers::prompt::{self, PromptConfig, PromptRequest, PromptResponse};
use crate::error::Result;
use crate::events::Event;
use crate::exec_ctx::ExecCtx;
use crate::rules::Ruleset;
use crate::template;
use std::future::Future;
use std::pin::Pin;

/// A boxed, pinned, Send future -- the return type of [`Task::run`].
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe trait for executable tasks.
pub trait Task: Send + Sync {
    /// Stable identifier for the task type (e.g. `"prompt"`).
    fn kind(&self) -> &'static str;

    /// Instance name, used in events and logs.
    fn name(&self) -> &str;

    fn run<'a>(&'a self, ctx: &'a ExecCtx, input: String) -> BoxFut<'a, Result<TextArtifact>>;
}

/// A task that renders a prompt and sends it to the context's prompt driver.
///
/// Streams through the driver when the driver streams, publishing one
/// `CompletionChunk` per token between `StartPrompt` and `FinishPrompt`.
///
/// # Example
///
/// ```
/// use llm_structures::tasks::PromptTask;
/// use llm_structures::rules::{Rule, Ruleset};
///
/// let task = PromptTask::new("summarize", "Summarize for {audience}: {input}")
///     .with_system("You are a careful editor.")
///     .with_ruleset(Ruleset::new("tone", vec![Rule::new("Be concise")]));
/// ```
#[derive(Debug, Clone)]
pub struct PromptTask {
    name: String,
    prompt_template: String,
    system_template: Option<String>,
    rulesets: Vec<Ruleset>,
    config: PromptConfig,
}

impl PromptTask {
    pub fn new(name: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt_template: prompt_template.into(),
            system_template: None,
            rulesets: Vec::new(),
            config: PromptConfig::default(),
        }
    }

    pub fn prompt_template(&self) -> &str {
        &self.prompt_template
    }

    pub fn system_template(&self) -> Option<&str> {
        self.system_template.as_deref()
    }

    pub fn rulesets(&self) -> &[Ruleset] {
        &self.rulesets
    }

    pub fn config(&self) -> &PromptConfig {
        &self.config
    }

    pub fn with_system(mut self, template: impl Into<String>) -> Self {
        self.system_template = Some(template.into());
        self
    }

    pub fn with_ruleset(mut self, ruleset: Ruleset) -> Self {
        self.rulesets.push(ruleset);
        self
    }

    pub fn with_rulesets(mut self, rulesets: Vec<Ruleset>) -> Self {
        self.rulesets = rulesets;
        self
    }

    pub fn with_config(mut self, config: PromptConfig) -> Self {
        self.config = config;
        self
    }

    /// System template (vars only) followed by every ruleset section.
    fn render_system(&self, ctx: &ExecCtx) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(ref template) = self.system_template {
            parts.push(template::render(template, "", &ctx.vars));
        }
        if !self.rulesets.is_empty() {
            let sections: Vec<String> = self.rulesets.iter().map(Ruleset::to_prompt_section).collect();
            parts.push(sections.join("\n").trim_end().to_string());
        }
        (!parts.is_empty()).then(|| parts.join("\n\n"))
    }

    fn build_request(&self, ctx: &ExecCtx, input: &str) -> PromptRequest {
        PromptRequest {
            system_prompt: self.render_system(ctx),
            prompt: template::render(&self.prompt_template, input, &ctx.vars),
            messages: Vec::new(),
            config: self.config.clone(),
        }
    }

    async fn call_driver(&self, ctx: &ExecCtx, request: &PromptRequest) -> Result<(PromptResponse, usize)> {
        let driver = ctx.prompt_driver.as_ref();
        let retry_name = self.name.clone();
        let mut on_retry = |attempt: u32, delay: std::time::Duration, reason: &str| {
            ctx.emit(Event::TransportRetry {
                name: retry_name.clone(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                reason: reason.to_string(),
            });
        };

        if !driver.is_streaming() {
            let response = prompt::with_backoff(
                driver,
                request,
                &ctx.backoff,
                ctx.cancel_flag(),
                Some(&mut on_retry),
            )
            .await?;
            return Ok((response, 0));
        }

        let mut token_count = 0usize;
        let task = self.name.clone();
        let mut on_token = |token: String| {
            token_count += 1;
            ctx.emit(Event::CompletionChunk {
                task: task.clone(),
                token,
            });
        };
        let response = prompt::with_backoff_streaming(
            driver,
            request,
            &ctx.backoff,
            ctx.cancel_flag(),
            Some(&mut on_retry),
            &mut on_token,
        )
        .await?;
        Ok((response, token_count))
    }

    async fn execute(&self, ctx: &ExecCtx, input: String) -> Result<TextArtifact> {
        ctx.check_cancelled()?;
        let request = self.build_request(ctx, &input);
        let model = ctx.prompt_driver.model().to_string();

        tracing::debug!(
            task = %self.name,
            driver = ctx.prompt_driver.name(),
            model = %model,
            streaming = ctx.prompt_driver.is_streaming(),
            "sending prompt"
        );
        ctx.emit(Event::StartPrompt {
            task: self.name.clone(),
            model: model.clone(),
            prompt: request.prompt.clone(),
        });

        let (response, token_count) = self.call_driver(ctx, &request).await?;

        ctx.emit(Event::FinishPrompt {
            task: self.name.clone(),
            model,
            token_count,
        });
        Ok(TextArtifact::new(response.text))
    }
}

impl Task for PromptTask {
    fn kind(&self) -> &'static str {
        "prompt"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, ctx: &'a ExecCtx, input: String) -> BoxFut<'a, Result<TextArtifact>> {
        Box::pin(self.execute(ctx, input))
    }
}
