//! Agentic edit loop: plan, then generate and self-check until the model is
//! satisfied or the iteration budget is spent.

use editstream_proto::{
    EditResult, ErrorInfo, InputImage, IterationInfo, ProgressEvent, ProgressStep,
};
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::editor::{EditJob, EditorError, ImageEditor, PlanChunk};
use super::lifecycle::{FrameStream, ProgressEmitter};
use super::producer::{Completion, LocalStreamProducer};

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("image generation failed on attempt {iteration}: {source}")]
    Generation {
        iteration: u32,
        #[source]
        source: EditorError,
    },

    #[error("not satisfied after {max} iteration(s): {reasoning}")]
    IterationExhausted { max: u32, reasoning: String },

    #[error("no iterations were requested")]
    NoIterations,
}

impl From<WorkflowError> for ErrorInfo {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::Generation { iteration, source } => ErrorInfo::with_details(
                format!("Image generation failed (attempt {})", iteration),
                source.to_string(),
            ),
            WorkflowError::IterationExhausted { max, reasoning } => ErrorInfo::with_details(
                format!("AI was not satisfied after {} iterations", max),
                reasoning,
            ),
            WorkflowError::NoIterations => ErrorInfo::new("No iterations were requested"),
        }
    }
}

pub struct AgenticEditWorkflow {
    editor: Arc<dyn ImageEditor>,
    accept_final_iteration: bool,
}

impl AgenticEditWorkflow {
    pub fn new(editor: Arc<dyn ImageEditor>, accept_final_iteration: bool) -> Self {
        Self {
            editor,
            accept_final_iteration,
        }
    }

    /// The first row of the log: the operation's inputs, before any AI work.
    pub fn opening_event(job: &EditJob) -> ProgressEvent {
        ProgressEvent::new(ProgressStep::Planning, "Sending planning request to AI...")
            .prompt(job.user_prompt.clone())
            .input_images(input_images(job))
            .iteration(IterationInfo::new(0, job.max_iterations))
            .new_log_entry()
    }

    /// Run `job` on a spawned task and return its event stream.
    pub fn start(self: &Arc<Self>, job: EditJob, completion_message: &str) -> FrameStream {
        let completion = Completion {
            message: completion_message.to_string(),
            max_iterations: job.max_iterations,
        };
        let workflow = Arc::clone(self);

        LocalStreamProducer::spawn(Self::opening_event(&job), completion, move |emitter| async move {
            workflow.run(job, emitter).await
        })
    }

    pub async fn run(&self, job: EditJob, emitter: ProgressEmitter) -> Result<EditResult, WorkflowError> {
        let max = job.max_iterations;
        if max == 0 {
            return Err(WorkflowError::NoIterations);
        }
        info!("Starting agentic edit (max {} iteration(s))", max);

        let mut prompt = match self.plan(&job, &emitter).await {
            Ok(refined) if !refined.trim().is_empty() => {
                let refined = refined.trim().to_string();
                emitter.emit(
                    ProgressEvent::new(ProgressStep::Planning, "AI response received")
                        .raw_output(refined.clone())
                        .iteration(IterationInfo::new(0, max)),
                );
                emitter.emit(
                    ProgressEvent::new(ProgressStep::Processing, "AI planned the edit")
                        .raw_output(refined.clone())
                        .iteration(IterationInfo::new(0, max)),
                );
                refined
            }
            Ok(_) => {
                emitter.emit(
                    ProgressEvent::new(ProgressStep::Processing, "AI returned no plan, using original prompt")
                        .iteration(IterationInfo::new(0, max)),
                );
                job.user_prompt.clone()
            }
            Err(e) => {
                warn!("Planning failed, continuing with user prompt: {}", e);
                emitter.emit(
                    ProgressEvent::new(ProgressStep::Error, "Planning failed, continuing with original prompt")
                        .error(ErrorInfo::with_details("Planning failed", e.to_string()))
                        .iteration(IterationInfo::new(0, max)),
                );
                job.user_prompt.clone()
            }
        };

        let inputs = input_images(&job);

        for attempt in 1..=max {
            let iteration = IterationInfo::new(attempt, max);

            emitter.emit(
                ProgressEvent::new(
                    ProgressStep::CallingApi,
                    format!("Generating image (attempt {}/{})...", attempt, max),
                )
                .prompt(prompt.clone())
                .input_images(inputs.clone())
                .iteration(iteration)
                .new_log_entry(),
            );

            let image = self
                .editor
                .generate(&prompt, &job.source_image, job.mask_image.as_deref())
                .await
                .map_err(|source| WorkflowError::Generation {
                    iteration: attempt,
                    source,
                })?;

            emitter.emit(
                ProgressEvent::new(
                    ProgressStep::Processing,
                    format!("Image generated (attempt {}/{})", attempt, max),
                )
                .iteration(iteration)
                .iteration_image(image.clone()),
            );

            let finish = |image: String, prompt: String| EditResult {
                image_data: image,
                iterations: attempt,
                final_prompt: prompt,
            };

            if attempt == max && self.accept_final_iteration {
                emitter.emit(
                    ProgressEvent::new(ProgressStep::Processing, "Max iterations reached, using final result")
                        .iteration(iteration),
                );
                return Ok(finish(image, prompt));
            }

            emitter.emit(
                ProgressEvent::new(ProgressStep::SelfChecking, "AI is evaluating the result...").iteration(iteration),
            );

            let evaluation = match self
                .editor
                .evaluate(&job.user_prompt, &prompt, &job.source_image, &image)
                .await
            {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    warn!("Self-check failed on attempt {}, accepting result: {}", attempt, e);
                    emitter.emit(
                        ProgressEvent::new(ProgressStep::Processing, "Self-check unavailable, accepting current result")
                            .iteration(iteration),
                    );
                    return Ok(finish(image, prompt));
                }
            };

            if evaluation.satisfied {
                emitter.emit(
                    ProgressEvent::new(ProgressStep::Processing, format!("AI approved: {}", evaluation.reasoning))
                        .iteration(iteration),
                );
                return Ok(finish(image, prompt));
            }

            if attempt == max {
                return Err(WorkflowError::IterationExhausted {
                    max,
                    reasoning: evaluation.reasoning,
                });
            }

            let mut revision = ProgressEvent::new(
                ProgressStep::Iterating,
                format!("AI requested revision: {}", evaluation.reasoning),
            )
            .iteration(iteration);
            if let Some(revised) = evaluation.revised_prompt.filter(|p| !p.trim().is_empty()) {
                revision = revision.raw_output(revised.clone());
                prompt = revised;
            }
            emitter.emit(revision);
            debug!("Revising prompt after attempt {}", attempt);
        }

        Err(WorkflowError::NoIterations)
    }

    /// Stream the planning call into thinking deltas and collect the text.
    async fn plan(&self, job: &EditJob, emitter: &ProgressEmitter) -> Result<String, EditorError> {
        let mut chunks = self.editor.plan(job).await?;
        let mut text = String::new();
        let mut thought_chars = 0usize;

        while let Some(chunk) = chunks.next().await {
            match chunk? {
                PlanChunk::Thinking(delta) => {
                    thought_chars += delta.chars().count();
                    emitter.emit(
                        ProgressEvent::new(
                            ProgressStep::Planning,
                            format!("AI is thinking... ({} chars)", thought_chars),
                        )
                        .thinking_delta(delta)
                        .iteration(IterationInfo::new(0, job.max_iterations)),
                    );
                }
                PlanChunk::Text(delta) => text.push_str(&delta),
            }
        }

        Ok(text)
    }
}

fn input_images(job: &EditJob) -> Vec<InputImage> {
    let mut images = vec![InputImage::new("Original Image", job.source_image.clone())];
    if let Some(mask) = &job.mask_image {
        images.push(InputImage::new("Mask", mask.clone()));
    }
    images
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::editor::{Evaluation, PlanStream};
    use async_trait::async_trait;
    use editstream_client::{consume, ClientError, ProgressAggregator};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Plays back canned responses in order.
    #[derive(Default)]
    struct ScriptedEditor {
        plan: Vec<PlanChunk>,
        plan_fails: bool,
        images: Mutex<VecDeque<Result<String, EditorError>>>,
        evaluations: Mutex<VecDeque<Result<Evaluation, EditorError>>>,
        prompts_seen: Mutex<Vec<String>>,
    }

    impl ScriptedEditor {
        fn images(self, images: Vec<Result<String, EditorError>>) -> Self {
            *self.images.lock() = images.into();
            self
        }

        fn evaluations(self, evaluations: Vec<Result<Evaluation, EditorError>>) -> Self {
            *self.evaluations.lock() = evaluations.into();
            self
        }
    }

    #[async_trait]
    impl ImageEditor for ScriptedEditor {
        async fn plan(&self, _job: &EditJob) -> Result<PlanStream, EditorError> {
            if self.plan_fails {
                return Err(EditorError::Api {
                    status: 503,
                    body: "planner down".into(),
                });
            }
            let chunks: Vec<Result<PlanChunk, EditorError>> = self.plan.iter().cloned().map(Ok).collect();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }

        async fn generate(&self, prompt: &str, _source: &str, _mask: Option<&str>) -> Result<String, EditorError> {
            self.prompts_seen.lock().push(prompt.to_string());
            self.images.lock().pop_front().unwrap_or(Err(EditorError::NoImage))
        }

        async fn evaluate(&self, _user: &str, _edit: &str, _source: &str, _result: &str) -> Result<Evaluation, EditorError> {
            self.evaluations
                .lock()
                .pop_front()
                .unwrap_or(Err(EditorError::InvalidResponse("script exhausted".into())))
        }
    }

    fn job(max_iterations: u32) -> EditJob {
        EditJob {
            source_image: "data:image/png;base64,SRC".into(),
            mask_image: None,
            user_prompt: "add a red hat".into(),
            reference_points: Vec::new(),
            max_iterations,
        }
    }

    fn rejected(reason: &str, revised: &str) -> Result<Evaluation, EditorError> {
        Ok(Evaluation {
            satisfied: false,
            reasoning: reason.into(),
            revised_prompt: Some(revised.into()),
        })
    }

    fn approved() -> Result<Evaluation, EditorError> {
        Ok(Evaluation {
            satisfied: true,
            reasoning: "hat is red".into(),
            revised_prompt: None,
        })
    }

    fn images(n: usize) -> Vec<Result<String, EditorError>> {
        (1..=n).map(|i| Ok(format!("data:image/png;base64,IMG{}", i))).collect()
    }

    async fn run(
        editor: ScriptedEditor,
        accept_final: bool,
        job: EditJob,
    ) -> (Arc<ScriptedEditor>, ProgressAggregator, Result<EditResult, ClientError>) {
        let editor = Arc::new(editor);
        let workflow = Arc::new(AgenticEditWorkflow::new(editor.clone(), accept_final));
        let stream = workflow.start(job, "Edit completed successfully!");
        let mut aggregator = ProgressAggregator::new();
        let outcome = consume(stream, &mut aggregator, |_| {}).await;
        (editor, aggregator, outcome)
    }

    #[tokio::test]
    async fn test_iteration_bound_ends_on_third_attempt() {
        let editor = ScriptedEditor::default()
            .images(images(3))
            .evaluations(vec![rejected("hat is blue", "a RED hat"), rejected("still blue", "a crimson hat"), approved()]);

        let (editor, aggregator, outcome) = run(editor, false, job(3)).await;
        let result = outcome.unwrap();
        assert_eq!(result.iterations, 3);
        assert_eq!(result.image_data, "data:image/png;base64,IMG3");
        assert_eq!(result.final_prompt, "a crimson hat");

        let last = aggregator.state().log.last().unwrap();
        assert_eq!(last.step, ProgressStep::Complete);
        assert_eq!(last.iteration, Some(IterationInfo::new(3, 3)));
        assert!(last.duration_ms.is_some());

        // each revision was adopted for the next attempt
        assert_eq!(*editor.prompts_seen.lock(), vec!["add a red hat", "a RED hat", "a crimson hat"]);
    }

    #[tokio::test]
    async fn test_final_iteration_accepted_without_check() {
        let editor = ScriptedEditor::default()
            .images(images(2))
            .evaluations(vec![rejected("no hat", "add a hat")]);

        let (_, aggregator, outcome) = run(editor, true, job(2)).await;
        assert_eq!(outcome.unwrap().iterations, 2);

        let log = &aggregator.state().log;
        assert_eq!(log.len(), 3);
        assert_eq!(log[1].step, ProgressStep::Iterating);
        assert_eq!(log[1].raw_output.as_deref(), Some("add a hat"));
        assert_eq!(log[2].step, ProgressStep::Complete);
        assert_eq!(log[2].iteration, Some(IterationInfo::new(2, 2)));
    }

    #[tokio::test]
    async fn test_planning_streams_thinking_and_refines_prompt() {
        let editor = ScriptedEditor {
            plan: vec![
                PlanChunk::Thinking("Hel".into()),
                PlanChunk::Thinking("lo ".into()),
                PlanChunk::Thinking("world".into()),
                PlanChunk::Text("Add a bright ".into()),
                PlanChunk::Text("red hat".into()),
            ],
            ..Default::default()
        }
        .images(images(1))
        .evaluations(vec![approved()]);

        let (editor, aggregator, outcome) = run(editor, true, job(3)).await;
        assert_eq!(outcome.unwrap().final_prompt, "Add a bright red hat");
        assert_eq!(editor.prompts_seen.lock()[0], "Add a bright red hat");

        let planning = &aggregator.state().log[0];
        assert_eq!(planning.thinking_text, "Hello world");
        assert_eq!(planning.raw_output.as_deref(), Some("Add a bright red hat"));
        assert_eq!(planning.input_images.as_ref().map(|i| i.len()), Some(1));
    }

    #[tokio::test]
    async fn test_planning_failure_is_not_fatal() {
        let editor = ScriptedEditor {
            plan_fails: true,
            ..Default::default()
        }
        .images(images(1))
        .evaluations(vec![approved()]);

        let (editor, aggregator, outcome) = run(editor, true, job(1)).await;
        assert_eq!(outcome.unwrap().final_prompt, "add a red hat");
        assert_eq!(editor.prompts_seen.lock()[0], "add a red hat");
        assert_eq!(aggregator.state().log[0].step, ProgressStep::Error);
        assert!(aggregator.state().error.is_none());
    }

    #[tokio::test]
    async fn test_generation_failure_is_terminal_error() {
        let editor = ScriptedEditor::default().images(vec![Err(EditorError::NoImage)]);

        let (_, aggregator, outcome) = run(editor, true, job(3)).await;
        match outcome {
            Err(ClientError::Operation(error)) => {
                assert_eq!(error.message, "Image generation failed (attempt 1)");
            }
            other => panic!("expected operation error, got {:?}", other),
        }
        let last = aggregator.state().log.last().unwrap();
        assert_eq!(last.step, ProgressStep::Error);
        // the planning and generation rows stay visible
        assert!(aggregator.state().log.len() >= 3);
    }

    #[tokio::test]
    async fn test_exhausted_iterations_surface_as_error() {
        let editor = ScriptedEditor::default()
            .images(images(2))
            .evaluations(vec![rejected("blue", "red"), rejected("still blue", "crimson")]);

        let (_, aggregator, outcome) = run(editor, false, job(2)).await;
        assert!(matches!(outcome, Err(ClientError::Operation(_))));
        let error = aggregator.state().error.clone().unwrap();
        assert_eq!(error.message, "AI was not satisfied after 2 iterations");
        assert_eq!(error.details.as_deref(), Some("still blue"));
    }

    #[tokio::test]
    async fn test_evaluation_failure_accepts_current_image() {
        let editor = ScriptedEditor::default()
            .images(images(3))
            .evaluations(vec![Err(EditorError::Request("timeout".into()))]);

        let (_, _, outcome) = run(editor, true, job(3)).await;
        let result = outcome.unwrap();
        assert_eq!(result.iterations, 1);
        assert_eq!(result.image_data, "data:image/png;base64,IMG1");
    }

    #[test]
    fn test_opening_event_carries_inputs() {
        let mut job = job(3);
        job.mask_image = Some("data:image/png;base64,MASK".into());
        let event = AgenticEditWorkflow::opening_event(&job);

        assert!(event.starts_log_entry());
        assert_eq!(event.prompt.as_deref(), Some("add a red hat"));
        assert_eq!(event.iteration, Some(IterationInfo::new(0, 3)));
        let labels: Vec<_> = event.input_images.unwrap().into_iter().map(|i| i.label).collect();
        assert_eq!(labels, vec!["Original Image", "Mask"]);
    }
}
