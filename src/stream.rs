//! Blocking token stream over a running structure.
//!
//! [`Stream`] turns the push-style events a structure publishes into a
//! pull-style iterator. Each [`Stream::run`] spawns one producer thread that
//! drives the structure on a private current-thread runtime and forwards
//! the relevant events over an unbounded channel:
//!
//! ```text
//!  producer thread                               caller
//!  ───────────────                               ──────
//!  ListenerGuard::register ─┐
//!  block_on(structure.run)  │  CompletionChunk ──► TextArtifact(token)
//!                           ├─ FinishPrompt    ──► TextArtifact("\n")
//!                           └─ FinishStructureRun ► join producer, end
//!  guard dropped (unregister)                    (run error ► one Err item)
//! ```
//!
//! The listener is scoped to its run, so a run abandoned by dropping its
//! [`StreamIter`] cannot feed tokens into a later run on the same structure.
//! Dropping a [`StreamIter`] before the end requests cancellation of the run.

use crate::artifacts::TextArtifact;
use crate::error::{Error, Result};
use crate::events::{Event, EventKind, EventListener};
use crate::structure::{ListenerGuard, RunArgs, RunResult, Structure};
use crossbeam::channel::{self, Receiver};
use std::iter::FusedIterator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Event kinds the bridge forwards to the consumer.
const STREAMED_EVENTS: [EventKind; 3] = [
    EventKind::CompletionChunk,
    EventKind::FinishPrompt,
    EventKind::FinishStructureRun,
];

/// Wraps a streaming structure so its completion tokens can be iterated.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use llm_structures::drivers::prompt::MockPromptDriver;
/// use llm_structures::structure::Pipeline;
/// use llm_structures::tasks::PromptTask;
/// use llm_structures::Stream;
///
/// let pipeline = Pipeline::builder()
///     .prompt_driver(Arc::new(MockPromptDriver::tokens(vec!["Hello", " world"])))
///     .task(PromptTask::new("greet", "Say hello to {input}"))
///     .build()
///     .unwrap();
///
/// let stream = Stream::new(Arc::new(pipeline)).unwrap();
/// let text: String = stream
///     .run(["the reader"])
///     .unwrap()
///     .map(|chunk| chunk.unwrap().value)
///     .collect();
/// assert_eq!(text, "Hello world\n");
/// ```
#[derive(Clone)]
pub struct Stream {
    structure: Arc<dyn Structure>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("structure", &self.structure.name())
            .finish()
    }
}

impl Stream {
    /// Fails with [`Error::InvalidConfig`] unless the structure's prompt
    /// driver streams.
    pub fn new(structure: Arc<dyn Structure>) -> Result<Self> {
        if !structure.is_streaming() {
            return Err(Error::InvalidConfig(format!(
                "prompt driver of structure '{}' does not have streaming enabled",
                structure.name()
            )));
        }
        Ok(Self { structure })
    }

    pub fn structure(&self) -> &Arc<dyn Structure> {
        &self.structure
    }

    /// Start a run and return an iterator over its output chunks.
    ///
    /// Every call uses a fresh channel and a fresh producer thread.
    pub fn run<I, S>(&self, args: I) -> Result<StreamIter>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (tx, rx) = channel::unbounded::<Event>();
        let cancel = Arc::new(AtomicBool::new(false));
        let run_args = RunArgs::new(args).with_cancellation(Arc::clone(&cancel));
        let run_id = run_args.run_id;
        let structure = Arc::clone(&self.structure);

        let producer = thread::Builder::new()
            .name(format!("stream-{}", structure.name()))
            .spawn(move || -> Result<RunResult> {
                let listener = EventListener::from_fn(move |event| {
                    // The consumer may already be gone; the run still finishes.
                    let _ = tx.send(event);
                })
                .with_event_kinds(&STREAMED_EVENTS)
                .for_run(run_id);
                let _guard = ListenerGuard::register(structure.as_ref(), listener);

                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| Error::Other(format!("failed to start stream runtime: {}", e)))?;
                runtime.block_on(structure.run(run_args))
            })
            .map_err(|e| Error::Other(format!("failed to spawn stream producer: {}", e)))?;

        tracing::debug!(structure = %self.structure.name(), run = %run_id, "stream started");
        Ok(StreamIter {
            rx: Some(rx),
            producer: Some(producer),
            cancel,
        })
    }
}

/// Iterator over the chunks of one streamed run.
///
/// Yields one item per completion token and a `"\n"` item at the end of each
/// prompt. A failed run yields a single `Err` after all chunks it produced,
/// then ends. Consumed once; fused.
#[derive(Debug)]
pub struct StreamIter {
    rx: Option<Receiver<Event>>,
    producer: Option<JoinHandle<Result<RunResult>>>,
    cancel: Arc<AtomicBool>,
}

impl StreamIter {
    /// Stop receiving, join the producer, and surface its failure, if any.
    fn finish(&mut self) -> Option<Result<TextArtifact>> {
        self.rx = None;
        let producer = self.producer.take()?;
        match producer.join() {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(Err(e)),
            Err(panic) => Some(Err(Error::ProducerPanicked(panic_message(panic.as_ref())))),
        }
    }
}

impl Iterator for StreamIter {
    type Item = Result<TextArtifact>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let event = match self.rx.as_ref()?.recv() {
                Ok(event) => event,
                // Producer exited without a terminal event.
                Err(_) => return self.finish(),
            };
            match event {
                Event::CompletionChunk { token, .. } => return Some(Ok(TextArtifact::new(token))),
                Event::FinishPrompt { .. } => return Some(Ok(TextArtifact::new("\n"))),
                Event::FinishStructureRun { .. } => return self.finish(),
                _ => continue,
            }
        }
    }
}

impl FusedIterator for StreamIter {}

impl Drop for StreamIter {
    fn drop(&mut self) {
        if self.producer.is_some() {
            tracing::debug!("stream dropped before the run finished; cancelling");
            self.cancel.store(true, Ordering::Relaxed);
            self.rx = None;
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
