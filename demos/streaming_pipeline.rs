use std::sync::Arc;

use llm_structures::drivers::prompt::{MockPromptDriver, OpenAiChatPromptDriver, PromptDriver};
use llm_structures::{EventKind, EventListener, Pipeline, PromptTask, Rule, Ruleset, Stream};
use tracing_subscriber::EnvFilter;

fn prompt_driver() -> Arc<dyn PromptDriver> {
    match OpenAiChatPromptDriver::from_env("gpt-4o-mini") {
        Ok(driver) => Arc::new(driver.with_stream(true)),
        Err(_) => {
            eprintln!("OPENAI_API_KEY not set, using canned responses\n");
            Arc::new(MockPromptDriver::new(vec![
                vec!["The robot ".into(), "dipped a brush ".into(), "in blue.".into()],
                vec!["Blue, ".into(), "it decided, ".into(), "was a beginning.".into()],
            ]))
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let pipeline = Pipeline::builder()
        .name("story")
        .prompt_driver(prompt_driver())
        .task(
            PromptTask::new("write", "Write a three-sentence story about {input}.")
                .with_ruleset(Ruleset::new("style", vec![Rule::new("Use plain words")])),
        )
        .task(PromptTask::new("polish", "Rewrite this as one vivid sentence:\n\n{input}"))
        .event_listener(
            EventListener::from_fn(|event| eprintln!("[event] {:?}", event.kind()))
                .with_event_kinds(&[EventKind::StartTask, EventKind::FinishTask]),
        )
        .build()?;

    let stream = Stream::new(Arc::new(pipeline))?;
    for chunk in stream.run(["a robot learning to paint"])? {
        print!("{}", chunk?);
    }
    Ok(())
}
