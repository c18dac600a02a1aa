use chrono::{DateTime, Utc};
use editstream_proto::{
    EditResult, ErrorInfo, InputImage, IterationInfo, ProgressEvent, ProgressStep, WireEvent,
};
use serde::Serialize;
use tracing::debug;

use crate::ClientError;

/// One user-visible row of the operation log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AILogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub step: ProgressStep,
    pub message: String,
    /// Reasoning text folded into this row.
    pub thinking_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_images: Option<Vec<InputImage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<IterationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Set once, when the entry's step first becomes `complete` or `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl AILogEntry {
    /// A row born terminal never transitions, so it carries no duration.
    fn from_event(event: &ProgressEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now,
            step: event.step,
            message: event.message.clone().unwrap_or_default(),
            thinking_text: event
                .thinking_text_delta
                .clone()
                .or_else(|| event.thinking_text.clone())
                .unwrap_or_default(),
            prompt: event.prompt.clone(),
            raw_output: event.raw_output.clone().or_else(|| event.raw_output_delta.clone()),
            input_images: event.input_images.clone(),
            iteration: event.iteration,
            iteration_image: event.iteration_image.clone(),
            error: event.error.clone(),
            duration_ms: None,
        }
    }

    fn amend(&mut self, event: &ProgressEvent, now: DateTime<Utc>) {
        let was_terminal = self.step.is_terminal();
        self.step = event.step;
        if let Some(message) = &event.message {
            self.message = message.clone();
        }
        if let Some(delta) = &event.thinking_text_delta {
            self.thinking_text.push_str(delta);
        } else if let Some(full) = &event.thinking_text {
            self.thinking_text = full.clone();
        }
        if let Some(prompt) = &event.prompt {
            self.prompt = Some(prompt.clone());
        }
        if let Some(full) = &event.raw_output {
            self.raw_output = Some(full.clone());
        } else if let Some(delta) = &event.raw_output_delta {
            self.raw_output.get_or_insert_with(String::new).push_str(delta);
        }
        if let Some(images) = &event.input_images {
            self.input_images = Some(images.clone());
        }
        if event.iteration.is_some() {
            self.iteration = event.iteration;
        }
        if let Some(image) = &event.iteration_image {
            self.iteration_image = Some(image.clone());
        }
        if let Some(error) = &event.error {
            self.error = Some(error.clone());
        }
        if self.step.is_terminal() && !was_terminal && self.duration_ms.is_none() {
            self.duration_ms = Some(elapsed_ms(self.timestamp, now));
        }
    }
}

/// Running view of one operation, as a UI would render it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AIProgressState {
    pub step: ProgressStep,
    pub message: String,
    /// Reasoning text accumulated over the whole operation. Each log row
    /// keeps its own share in [`AILogEntry::thinking_text`].
    pub thinking_text: String,
    pub raw_output: String,
    pub iteration: Option<IterationInfo>,
    pub elapsed_ms: u64,
    pub start_time: DateTime<Utc>,
    pub error: Option<ErrorInfo>,
    pub log: Vec<AILogEntry>,
}

impl AIProgressState {
    fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            step: ProgressStep::Idle,
            message: String::new(),
            thinking_text: String::new(),
            raw_output: String::new(),
            iteration: None,
            elapsed_ms: 0,
            start_time,
            error: None,
            log: Vec::new(),
        }
    }
}

/// Folds decoded events, strictly in arrival order, into [`AIProgressState`].
///
/// The first terminal event (`complete` or `error`) freezes the state; any
/// later event is ignored.
#[derive(Debug)]
pub struct ProgressAggregator {
    state: AIProgressState,
    outcome: Option<Result<EditResult, ErrorInfo>>,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::started_at(Utc::now())
    }

    pub fn started_at(start_time: DateTime<Utc>) -> Self {
        Self {
            state: AIProgressState::new(start_time),
            outcome: None,
        }
    }

    pub fn state(&self) -> &AIProgressState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Fold one event. Returns false when it was ignored.
    pub fn apply(&mut self, event: WireEvent) -> bool {
        self.apply_at(event, Utc::now())
    }

    pub fn apply_at(&mut self, event: WireEvent, now: DateTime<Utc>) -> bool {
        if self.outcome.is_some() {
            debug!("Ignoring {} event after terminal event", event.kind().as_str());
            return false;
        }
        self.state.elapsed_ms = elapsed_ms(self.state.start_time, now);

        match event {
            WireEvent::Progress(progress) => self.fold_progress(&progress, now),
            WireEvent::Complete(result) => {
                self.state.step = ProgressStep::Complete;
                self.outcome = Some(Ok(result));
            }
            WireEvent::Error(error) => {
                self.fail(error, now);
            }
        }
        true
    }

    /// Resolve the operation. Without a terminal event the stream is treated
    /// as closed by the transport, which is recorded in the log like any
    /// other failure.
    pub fn finish(&mut self) -> Result<EditResult, ClientError> {
        if self.outcome.is_none() {
            self.fail(
                ErrorInfo::new("Connection closed before the operation finished"),
                Utc::now(),
            );
            return Err(ClientError::TransportClosed);
        }

        match &self.outcome {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(error)) => Err(ClientError::Operation(error.clone())),
            None => Err(ClientError::TransportClosed),
        }
    }

    fn fold_progress(&mut self, event: &ProgressEvent, now: DateTime<Utc>) {
        let state = &mut self.state;
        let new_entry = event.starts_log_entry() || state.log.is_empty();

        state.step = event.step;
        if let Some(message) = &event.message {
            state.message = message.clone();
        }

        if let Some(delta) = &event.thinking_text_delta {
            state.thinking_text.push_str(delta);
        } else if let Some(full) = &event.thinking_text {
            state.thinking_text = full.clone();
        }
        if let Some(delta) = &event.raw_output_delta {
            state.raw_output.push_str(delta);
        } else if let Some(full) = &event.raw_output {
            state.raw_output = full.clone();
        }
        if event.iteration.is_some() {
            state.iteration = event.iteration;
        }

        if new_entry {
            let entry = AILogEntry::from_event(event, now);
            state.log.push(entry);
        } else if let Some(entry) = state.log.last_mut() {
            entry.amend(event, now);
        }
    }

    /// Failures always get a row of their own; earlier rows are left as they were.
    fn fail(&mut self, error: ErrorInfo, now: DateTime<Utc>) {
        let state = &mut self.state;
        state.step = ProgressStep::Error;
        state.message = error.message.clone();
        state.error = Some(error.clone());

        let event = ProgressEvent::new(ProgressStep::Error, error.message.clone()).error(error.clone());
        let mut entry = AILogEntry::from_event(&event, now);
        entry.iteration = state.iteration;
        state.log.push(entry);

        self.outcome = Some(Err(error));
    }
}

fn elapsed_ms(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - since).num_milliseconds().max(0) as u64
}
