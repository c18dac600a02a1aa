use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// Closed set of steps an operation moves through.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    #[default]
    Idle,
    Planning,
    CallingApi,
    Processing,
    SelfChecking,
    Iterating,
    Complete,
    Error,
}

impl ProgressStep {
    /// `complete` and `error` end a log entry's life.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressStep::Complete | ProgressStep::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStep::Idle => "idle",
            ProgressStep::Planning => "planning",
            ProgressStep::CallingApi => "calling_api",
            ProgressStep::Processing => "processing",
            ProgressStep::SelfChecking => "self_checking",
            ProgressStep::Iterating => "iterating",
            ProgressStep::Complete => "complete",
            ProgressStep::Error => "error",
        }
    }
}

impl std::fmt::Display for ProgressStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1-based iteration counter within one operation.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct IterationInfo {
    pub current: u32,
    pub max: u32,
}

impl IterationInfo {
    pub fn new(current: u32, max: u32) -> Self {
        Self { current, max }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

/// An image handed to the model, kept for traceability in the log.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputImage {
    pub label: String,
    pub data_url: String,
}

impl InputImage {
    pub fn new(label: impl Into<String>, data_url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data_url: data_url.into(),
        }
    }
}

/// Payload of a `progress` frame.
///
/// Every field but `step` is optional and omitted from the wire when unset.
/// Unknown fields are ignored on decode so newer producers can add fields
/// without breaking older consumers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub step: ProgressStep,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_text_delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output_delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_images: Option<Vec<InputImage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<IterationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_log_entry: Option<bool>,
}

impl ProgressEvent {
    pub fn new(step: ProgressStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn iteration(mut self, iteration: IterationInfo) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn thinking_delta(mut self, delta: impl Into<String>) -> Self {
        self.thinking_text = None;
        self.thinking_text_delta = Some(delta.into());
        self
    }

    pub fn thinking(mut self, text: impl Into<String>) -> Self {
        self.thinking_text_delta = None;
        self.thinking_text = Some(text.into());
        self
    }

    pub fn raw_output(mut self, text: impl Into<String>) -> Self {
        self.raw_output_delta = None;
        self.raw_output = Some(text.into());
        self
    }

    pub fn raw_output_delta(mut self, delta: impl Into<String>) -> Self {
        self.raw_output = None;
        self.raw_output_delta = Some(delta.into());
        self
    }

    pub fn input_images(mut self, images: Vec<InputImage>) -> Self {
        self.input_images = Some(images);
        self
    }

    pub fn iteration_image(mut self, data_url: impl Into<String>) -> Self {
        self.iteration_image = Some(data_url.into());
        self
    }

    pub fn error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    pub fn new_log_entry(mut self) -> Self {
        self.new_log_entry = Some(true);
        self
    }

    pub fn starts_log_entry(&self) -> bool {
        self.new_log_entry.unwrap_or(false)
    }

    /// Full and delta forms of the same text are mutually exclusive.
    pub fn validate(&self) -> Result<(), ProtoError> {
        if self.thinking_text.is_some() && self.thinking_text_delta.is_some() {
            return Err(ProtoError::AmbiguousText("thinkingText"));
        }
        if self.raw_output.is_some() && self.raw_output_delta.is_some() {
            return Err(ProtoError::AmbiguousText("rawOutput"));
        }
        Ok(())
    }
}

/// Payload of the terminal `complete` frame.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResult {
    pub image_data: String,
    pub iterations: u32,
    pub final_prompt: String,
}

/// Labeled point placed on the image for spatial instructions ("move A to B").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub label: String,
    pub x: f64,
    pub y: f64,
}

/// Body of `POST /api/agentic/edit` and `/api/images/inpaint`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub source_image: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_points: Option<Vec<ReferencePoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}
