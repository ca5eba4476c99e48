//! Structures: named units of execution that publish events while they run.
//!
//! A [`Structure`] owns an event bus and a set of tasks. Callers observe a
//! run by registering [`EventListener`]s, either directly or through a
//! [`ListenerGuard`] that unregisters on drop.

pub mod pipeline;

pub use pipeline::{Pipeline, PipelineBuilder};

use crate::artifacts::TextArtifact;
use crate::error::Result;
use crate::events::{EventListener, ListenerId, RunId};
use crate::tasks::BoxFut;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Arguments for one structure run.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub args: Vec<String>,
    /// Fresh per `RunArgs`; tags every event the run publishes.
    pub run_id: RunId,
    /// Set to request cancellation; checked between tasks and before each
    /// driver attempt.
    pub cancellation: Option<Arc<AtomicBool>>,
}

impl RunArgs {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            run_id: RunId::next(),
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancellation = Some(flag);
        self
    }

    /// The arguments as one input string.
    pub fn input(&self) -> String {
        self.args.join(" ")
    }
}

impl Default for RunArgs {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

/// Outputs of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    /// Output of the last task.
    pub output: Option<TextArtifact>,
    /// Output of every task, in execution order.
    pub task_outputs: Vec<TextArtifact>,
}

impl RunResult {
    /// Text of the final output, or `""` when there is none.
    pub fn to_text(&self) -> &str {
        self.output.as_ref().map(TextArtifact::to_text).unwrap_or("")
    }
}

/// Object-safe trait for runnable structures.
pub trait Structure: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the structure's prompt driver streams tokens.
    fn is_streaming(&self) -> bool;

    fn add_event_listener(&self, listener: EventListener) -> ListenerId;

    /// Returns `false` if the listener was not registered.
    fn remove_event_listener(&self, id: ListenerId) -> bool;

    fn listener_count(&self) -> usize;

    /// Run to completion. A `FinishStructureRun` event is published exactly
    /// once per run, whether it succeeds or fails.
    fn run<'a>(&'a self, args: RunArgs) -> BoxFut<'a, Result<RunResult>>;
}

/// Scoped listener registration.
///
/// Registers on creation and unregisters on drop, so the listener is removed
/// on every exit path, unwinding included.
pub struct ListenerGuard<'a> {
    structure: &'a dyn Structure,
    id: ListenerId,
}

impl<'a> ListenerGuard<'a> {
    pub fn register(structure: &'a dyn Structure, listener: EventListener) -> Self {
        let id = structure.add_event_listener(listener);
        Self { structure, id }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        if !self.structure.remove_event_listener(self.id) {
            tracing::debug!(structure = %self.structure.name(), "listener already removed");
        }
    }
}

impl std::fmt::Debug for ListenerGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("structure", &self.structure.name())
            .field("id", &self.id)
            .finish()
    }
}
