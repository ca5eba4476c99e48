//! Event system for structure runs, prompts, and driver calls.
//!
//! Structures publish [`Event`]s on an [`EventBus`] while they run. Callers
//! observe them by registering an [`EventListener`], optionally restricted to
//! a set of [`EventKind`]s. The [`Stream`](crate::stream::Stream) bridge is
//! built on exactly this mechanism.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Events emitted while a structure runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A structure run has started.
    StartStructureRun {
        /// Name of the structure.
        structure: String,
        /// Arguments the run was invoked with.
        input: Vec<String>,
    },
    /// A structure run has finished. Emitted exactly once per run, on
    /// failure paths too.
    FinishStructureRun {
        /// Name of the structure.
        structure: String,
        /// Text of the final task output, if the run produced one.
        output: Option<String>,
    },
    /// A task has started executing.
    StartTask {
        /// Task name.
        task: String,
    },
    /// A task has finished executing.
    FinishTask {
        /// Task name.
        task: String,
        /// Whether execution succeeded.
        ok: bool,
    },
    /// A prompt is about to be sent to the prompt driver.
    StartPrompt {
        /// Task issuing the prompt.
        task: String,
        /// Model identifier.
        model: String,
        /// Rendered prompt text.
        prompt: String,
    },
    /// The prompt driver returned a complete response.
    FinishPrompt {
        /// Task that issued the prompt.
        task: String,
        /// Model identifier.
        model: String,
        /// Number of streamed chunks received (0 when not streaming).
        token_count: usize,
    },
    /// A token was received during streaming.
    CompletionChunk {
        /// Task producing this token.
        task: String,
        /// The token text.
        token: String,
    },
    /// An image generation request is about to be sent.
    StartImageGeneration {
        /// Driver name.
        driver: &'static str,
        /// Positive prompts.
        prompts: Vec<String>,
        /// Negative prompts.
        negative_prompts: Vec<String>,
    },
    /// An image generation request completed.
    FinishImageGeneration {
        /// Driver name.
        driver: &'static str,
        /// Whether an image was produced.
        ok: bool,
    },
    /// A transport-level retry due to HTTP error.
    TransportRetry {
        /// Instance name or operation description.
        name: String,
        /// The retry attempt number (1-indexed).
        attempt: u32,
        /// Delay before this retry attempt in milliseconds.
        delay_ms: u64,
        /// Reason for the retry (error description).
        reason: String,
    },
}

/// Tag of an [`Event`] variant, used for listener filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StartStructureRun,
    FinishStructureRun,
    StartTask,
    FinishTask,
    StartPrompt,
    FinishPrompt,
    CompletionChunk,
    StartImageGeneration,
    FinishImageGeneration,
    TransportRetry,
}

impl Event {
    /// The variant tag of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::StartStructureRun { .. } => EventKind::StartStructureRun,
            Event::FinishStructureRun { .. } => EventKind::FinishStructureRun,
            Event::StartTask { .. } => EventKind::StartTask,
            Event::FinishTask { .. } => EventKind::FinishTask,
            Event::StartPrompt { .. } => EventKind::StartPrompt,
            Event::FinishPrompt { .. } => EventKind::FinishPrompt,
            Event::CompletionChunk { .. } => EventKind::CompletionChunk,
            Event::StartImageGeneration { .. } => EventKind::StartImageGeneration,
            Event::FinishImageGeneration { .. } => EventKind::FinishImageGeneration,
            Event::TransportRetry { .. } => EventKind::TransportRetry,
        }
    }
}

/// Handler for structure events.
///
/// # Example
///
/// ```
/// use llm_structures::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::CompletionChunk { token, .. } => print!("{}", token),
///             Event::FinishPrompt { .. } => println!(),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when a structure emits an event.
    fn on_event(&self, event: Event);
}

/// An [`EventHandler`] backed by a closure.
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

/// Identifies one structure run on a shared bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(u64);

impl RunId {
    /// A process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// A handler plus the set of event kinds it wants to receive.
///
/// An empty kind set means "everything". A listener scoped with
/// [`for_run`](Self::for_run) only sees events published for that run.
#[derive(Clone)]
pub struct EventListener {
    handler: Arc<dyn EventHandler>,
    kinds: Vec<EventKind>,
    run: Option<RunId>,
}

impl EventListener {
    /// Listen to every event kind.
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            handler,
            kinds: Vec::new(),
            run: None,
        }
    }

    /// Listener backed by a closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        Self::new(Arc::new(FnEventHandler(f)))
    }

    /// Restrict the listener to the given kinds.
    pub fn with_event_kinds(mut self, kinds: &[EventKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    /// Restrict the listener to events published for `run`.
    pub fn for_run(mut self, run: RunId) -> Self {
        self.run = Some(run);
        self
    }

    pub fn run(&self) -> Option<RunId> {
        self.run
    }

    /// Whether events of `kind` are forwarded to the handler.
    pub fn accepts(&self, kind: EventKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    fn wants(&self, kind: EventKind, run: Option<RunId>) -> bool {
        self.accepts(kind) && (self.run.is_none() || self.run == run)
    }

    /// Forward the event if it passes the filter.
    pub fn publish(&self, event: &Event) {
        if self.accepts(event.kind()) {
            self.handler.on_event(event.clone());
        }
    }
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListener")
            .field("kinds", &self.kinds)
            .field("run", &self.run)
            .finish()
    }
}

/// Opaque handle returned when registering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(ListenerId, EventListener)>,
}

/// Thread-safe registry of event listeners.
///
/// Events are dispatched in registration order. Handlers run outside the
/// registry lock, so a handler may register or remove listeners.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // A panicking handler never runs under the lock, so the data is intact.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a listener and return its handle.
    pub fn add(&self, listener: EventListener) -> ListenerId {
        let mut reg = self.registry();
        let id = ListenerId(reg.next_id);
        reg.next_id += 1;
        reg.listeners.push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if the handle was unknown.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut reg = self.registry();
        let before = reg.listeners.len();
        reg.listeners.retain(|(lid, _)| *lid != id);
        reg.listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.registry().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch an event that belongs to no run. Run-scoped listeners
    /// do not see it.
    pub fn publish(&self, event: &Event) {
        self.dispatch(None, event);
    }

    /// Dispatch an event of `run` to unscoped listeners and to listeners
    /// scoped to that run.
    pub fn publish_for(&self, run: RunId, event: &Event) {
        self.dispatch(Some(run), event);
    }

    fn dispatch(&self, run: Option<RunId>, event: &Event) {
        let kind = event.kind();
        let snapshot: Vec<EventListener> = self
            .registry()
            .listeners
            .iter()
            .filter(|(_, l)| l.wants(kind, run))
            .map(|(_, l)| l.clone())
            .collect();
        for listener in snapshot {
            listener.handler.on_event(event.clone());
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .finish()
    }
}
