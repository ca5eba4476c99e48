//! Execution context shared by the tasks of one structure run.
//!
//! [`ExecCtx`] carries the prompt driver, transport retry policy, template
//! variables, the run's cancellation flag, and the structure's event bus.
//! A structure builds one per run and hands it to every task.

use crate::drivers::prompt::PromptDriver;
use crate::drivers::BackoffConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, RunId};
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared execution context for task runs.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use llm_structures::ExecCtx;
/// use llm_structures::drivers::prompt::MockPromptDriver;
///
/// let ctx = ExecCtx::builder(Arc::new(MockPromptDriver::fixed("ok")))
///     .var("domain", "science")
///     .var("audience", "researchers")
///     .build();
/// assert!(!ctx.is_cancelled());
/// ```
pub struct ExecCtx {
    pub prompt_driver: Arc<dyn PromptDriver>,
    /// Transport retry configuration. Default: [`BackoffConfig::none()`].
    pub backoff: BackoffConfig,
    /// Template variables substituted into `{key}` placeholders.
    pub vars: HashMap<String, String>,
    /// Checked between tasks and before each driver attempt.
    pub cancellation: Option<Arc<AtomicBool>>,
    /// Bus the run's events are published on.
    pub events: Arc<EventBus>,
    /// Stamped on every emitted event so run-scoped listeners can filter.
    pub run_id: Option<RunId>,
}

impl ExecCtx {
    pub fn builder(prompt_driver: Arc<dyn PromptDriver>) -> ExecCtxBuilder {
        ExecCtxBuilder {
            prompt_driver,
            backoff: None,
            vars: HashMap::new(),
            cancellation: None,
            events: None,
            run_id: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Return [`Error::Cancelled`] if cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    pub fn cancel_flag(&self) -> Option<&AtomicBool> {
        self.cancellation.as_deref()
    }

    /// Publish an event on the run's bus, tagged with the run id if any.
    pub fn emit(&self, event: Event) {
        match self.run_id {
            Some(run) => self.events.publish_for(run, &event),
            None => self.events.publish(&event),
        }
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("prompt_driver", &self.prompt_driver.name())
            .field("model", &self.prompt_driver.model())
            .field("backoff", &self.backoff)
            .field("vars_count", &self.vars.len())
            .field("has_cancellation", &self.cancellation.is_some())
            .field("listeners", &self.events.len())
            .field("run_id", &self.run_id)
            .finish()
    }
}

/// Builder for [`ExecCtx`].
pub struct ExecCtxBuilder {
    prompt_driver: Arc<dyn PromptDriver>,
    backoff: Option<BackoffConfig>,
    vars: HashMap<String, String>,
    cancellation: Option<Arc<AtomicBool>>,
    events: Option<Arc<EventBus>>,
    run_id: Option<RunId>,
}

impl ExecCtxBuilder {
    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = Some(config);
        self
    }

    /// Replace all template variables.
    pub fn vars(mut self, vars: HashMap<String, String>) -> Self {
        self.vars = vars;
        self
    }

    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn cancellation(mut self, cancel: Option<Arc<AtomicBool>>) -> Self {
        self.cancellation = cancel;
        self
    }

    /// Publish on an existing bus. Default: a fresh, listener-less bus.
    pub fn events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn run_id(mut self, run: RunId) -> Self {
        self.run_id = Some(run);
        self
    }

    pub fn build(self) -> ExecCtx {
        ExecCtx {
            prompt_driver: self.prompt_driver,
            backoff: self.backoff.unwrap_or_else(BackoffConfig::none),
            vars: self.vars,
            cancellation: self.cancellation,
            events: self.events.unwrap_or_default(),
            run_id: self.run_id,
        }
    }
}
