//! Sequential pipeline of tasks.
//!
//! [`Pipeline`] runs its tasks in order, passing each task's output text as
//! the next task's `{input}`. The first task receives the run arguments
//! joined with spaces.
//!
//! ```text
//! StartStructureRun
//!   StartTask ─ StartPrompt ─ CompletionChunk* ─ FinishPrompt ─ FinishTask
//!   StartTask ─ ...                                           ─ FinishTask
//! FinishStructureRun   (always, exactly once)
//! ```

use super::{RunArgs, RunResult, Structure};
use crate::drivers::prompt::PromptDriver;
use crate::drivers::BackoffConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EventListener, ListenerId};
use crate::exec_ctx::ExecCtx;
use crate::tasks::{BoxFut, Task};
use std::collections::HashMap;
use std::sync::Arc;

/// A sequential pipeline of tasks sharing one prompt driver.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use llm_structures::structure::{Pipeline, RunArgs, Structure};
/// use llm_structures::tasks::PromptTask;
/// use llm_structures::drivers::prompt::MockPromptDriver;
///
/// # tokio_test::block_on(async {
/// let pipeline = Pipeline::builder()
///     .prompt_driver(Arc::new(MockPromptDriver::fixed("done")))
///     .task(PromptTask::new("draft", "Draft: {input}"))
///     .task(PromptTask::new("polish", "Polish: {input}"))
///     .build()
///     .unwrap();
///
/// let result = pipeline.run(RunArgs::new(["notes"])).await.unwrap();
/// assert_eq!(result.to_text(), "done");
/// # });
/// ```
pub struct Pipeline {
    name: String,
    prompt_driver: Arc<dyn PromptDriver>,
    tasks: Vec<Box<dyn Task>>,
    vars: HashMap<String, String>,
    backoff: BackoffConfig,
    events: Arc<EventBus>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn prompt_driver(&self) -> &Arc<dyn PromptDriver> {
        &self.prompt_driver
    }

    fn exec_ctx(&self, args: &RunArgs) -> ExecCtx {
        ExecCtx::builder(self.prompt_driver.clone())
            .backoff(self.backoff.clone())
            .vars(self.vars.clone())
            .cancellation(args.cancellation.clone())
            .events(self.events.clone())
            .run_id(args.run_id)
            .build()
    }

    async fn run_tasks(&self, ctx: &ExecCtx, input: String) -> Result<RunResult> {
        let mut task_outputs = Vec::with_capacity(self.tasks.len());
        let mut current = input;

        for task in &self.tasks {
            ctx.check_cancelled()?;
            ctx.emit(Event::StartTask {
                task: task.name().to_string(),
            });

            let result = task.run(ctx, current).await;
            ctx.emit(Event::FinishTask {
                task: task.name().to_string(),
                ok: result.is_ok(),
            });

            let output = result.map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::TaskFailed {
                    task: task.name().to_string(),
                    message: other.to_string(),
                },
            })?;
            current = output.value.clone();
            task_outputs.push(output);
        }

        Ok(RunResult {
            output: task_outputs.last().cloned(),
            task_outputs,
        })
    }

    async fn execute(&self, args: RunArgs) -> Result<RunResult> {
        let input = args.input();
        let ctx = self.exec_ctx(&args);
        tracing::info!(structure = %self.name, run = %args.run_id, tasks = self.tasks.len(), "structure run started");
        ctx.emit(Event::StartStructureRun {
            structure: self.name.clone(),
            input: args.args.clone(),
        });

        let result = self.run_tasks(&ctx, input).await;

        match result {
            Ok(_) => tracing::info!(structure = %self.name, "structure run finished"),
            Err(ref e) => tracing::warn!(structure = %self.name, error = %e, "structure run failed"),
        }
        ctx.emit(Event::FinishStructureRun {
            structure: self.name.clone(),
            output: result
                .as_ref()
                .ok()
                .and_then(|r| r.output.as_ref())
                .map(|o| o.value.clone()),
        });
        result
    }
}

impl Structure for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_streaming(&self) -> bool {
        self.prompt_driver.is_streaming()
    }

    fn add_event_listener(&self, listener: EventListener) -> ListenerId {
        self.events.add(listener)
    }

    fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.events.remove(id)
    }

    fn listener_count(&self) -> usize {
        self.events.len()
    }

    fn run<'a>(&'a self, args: RunArgs) -> BoxFut<'a, Result<RunResult>> {
        Box::pin(self.execute(args))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tasks: Vec<&str> = self.tasks.iter().map(|t| t.name()).collect();
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("prompt_driver", &self.prompt_driver.name())
            .field("tasks", &tasks)
            .field("listeners", &self.events.len())
            .finish()
    }
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    name: Option<String>,
    prompt_driver: Option<Arc<dyn PromptDriver>>,
    tasks: Vec<Box<dyn Task>>,
    vars: HashMap<String, String>,
    backoff: Option<BackoffConfig>,
    listeners: Vec<EventListener>,
}

impl PipelineBuilder {
    /// Default: `"pipeline"`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Required.
    pub fn prompt_driver(mut self, driver: Arc<dyn PromptDriver>) -> Self {
        self.prompt_driver = Some(driver);
        self
    }

    pub fn task(mut self, task: impl Task + 'static) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    pub fn boxed_task(mut self, task: Box<dyn Task>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Transport retry for prompt calls. Default: [`BackoffConfig::none()`].
    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = Some(config);
        self
    }

    /// Register a listener for the pipeline's whole lifetime.
    pub fn event_listener(mut self, listener: EventListener) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let prompt_driver = self
            .prompt_driver
            .ok_or_else(|| Error::InvalidConfig("Pipeline requires a prompt driver".into()))?;
        if self.tasks.is_empty() {
            return Err(Error::InvalidConfig("Pipeline has no tasks".into()));
        }
        let events = Arc::new(EventBus::new());
        for listener in self.listeners {
            events.add(listener);
        }
        Ok(Pipeline {
            name: self.name.unwrap_or_else(|| "pipeline".to_string()),
            prompt_driver,
            tasks: self.tasks,
            vars: self.vars,
            backoff: self.backoff.unwrap_or_else(BackoffConfig::none),
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::prompt::MockPromptDriver;
    use crate::events::EventKind;
    use crate::tasks::PromptTask;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    fn recorder() -> (EventListener, Arc<Mutex<Vec<Event>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (EventListener::from_fn(move |e| sink.lock().unwrap().push(e)), seen)
    }

    #[tokio::test]
    async fn test_pipes_output_between_tasks() {
        let driver = Arc::new(MockPromptDriver::new(vec![
            vec!["first".into()],
            vec!["second".into()],
        ]));
        let pipeline = Pipeline::builder()
            .prompt_driver(driver.clone())
            .task(PromptTask::new("a", "A: {input}"))
            .task(PromptTask::new("b", "B: {input} ({tone})"))
            .var("tone", "dry")
            .build()
            .unwrap();

        let result = pipeline.run(RunArgs::new(["x", "y"])).await.unwrap();
        assert_eq!(result.to_text(), "second");
        assert_eq!(result.task_outputs.len(), 2);
        assert_eq!(driver.prompts(), vec!["A: x y", "B: first (dry)"]);
    }

    #[tokio::test]
    async fn test_event_order() {
        let (listener, seen) = recorder();
        let pipeline = Pipeline::builder()
            .prompt_driver(Arc::new(MockPromptDriver::tokens(vec!["Hi"])))
            .task(PromptTask::new("t", "{input}"))
            .event_listener(listener.with_event_kinds(&[
                EventKind::StartStructureRun,
                EventKind::StartTask,
                EventKind::CompletionChunk,
                EventKind::FinishPrompt,
                EventKind::FinishTask,
                EventKind::FinishStructureRun,
            ]))
            .build()
            .unwrap();

        pipeline.run(RunArgs::new(["go"])).await.unwrap();
        let kinds: Vec<EventKind> = seen.lock().unwrap().iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::StartStructureRun,
                EventKind::StartTask,
                EventKind::CompletionChunk,
                EventKind::FinishPrompt,
                EventKind::FinishTask,
                EventKind::FinishStructureRun,
            ]
        );
        assert!(matches!(
            seen.lock().unwrap().last(),
            Some(Event::FinishStructureRun { output: Some(ref o), .. }) if o == "Hi"
        ));
    }

    #[tokio::test]
    async fn test_failure_still_finishes_run() {
        let (listener, seen) = recorder();
        let pipeline = Pipeline::builder()
            .prompt_driver(Arc::new(MockPromptDriver::failing("boom")))
            .task(PromptTask::new("t", "{input}"))
            .task(PromptTask::new("never", "{input}"))
            .event_listener(listener)
            .build()
            .unwrap();

        let err = pipeline.run(RunArgs::default()).await.unwrap_err();
        assert!(matches!(err, Error::TaskFailed { ref task, .. } if task == "t"));
        assert!(err.to_string().contains("boom"));

        let events = seen.lock().unwrap();
        let finishes = events
            .iter()
            .filter(|e| e.kind() == EventKind::FinishStructureRun)
            .count();
        assert_eq!(finishes, 1);
        assert!(!events
            .iter()
            .any(|e| matches!(e, Event::StartTask { task } if task == "never")));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::FinishTask { ok: false, .. })));
    }

    #[tokio::test]
    async fn test_run_scoped_listener_sees_only_its_run() {
        let pipeline = Pipeline::builder()
            .prompt_driver(Arc::new(MockPromptDriver::tokens(vec!["Hi"])))
            .task(PromptTask::new("t", "{input}"))
            .build()
            .unwrap();
        let first = RunArgs::new(["one"]);
        let second = RunArgs::new(["two"]);
        let (listener, seen) = recorder();
        let id = pipeline.add_event_listener(listener.for_run(second.run_id));

        pipeline.run(first).await.unwrap();
        assert!(seen.lock().unwrap().is_empty());

        pipeline.run(second).await.unwrap();
        let events = seen.lock().unwrap();
        assert!(matches!(
            events.first(),
            Some(Event::StartStructureRun { input, .. }) if input == &vec!["two".to_string()]
        ));
        assert_eq!(events.last().map(Event::kind), Some(EventKind::FinishStructureRun));
        assert!(pipeline.remove_event_listener(id));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_task() {
        let pipeline = Pipeline::builder()
            .prompt_driver(Arc::new(MockPromptDriver::fixed("x")))
            .task(PromptTask::new("t", "{input}"))
            .build()
            .unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let err = pipeline
            .run(RunArgs::default().with_cancellation(flag))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_build_validation() {
        let no_tasks = Pipeline::builder()
            .prompt_driver(Arc::new(MockPromptDriver::fixed("x")))
            .build();
        assert!(matches!(no_tasks, Err(Error::InvalidConfig(_))));

        let no_driver = Pipeline::builder().task(PromptTask::new("t", "{input}")).build();
        assert!(matches!(no_driver, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_streaming_follows_driver() {
        let build = |stream: bool| {
            Pipeline::builder()
                .prompt_driver(Arc::new(MockPromptDriver::fixed("x").with_stream(stream)))
                .task(PromptTask::new("t", "{input}"))
                .build()
                .unwrap()
        };
        assert!(build(true).is_streaming());
        assert!(!build(false).is_streaming());
    }
}
