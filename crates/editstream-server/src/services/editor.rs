use async_trait::async_trait;
use editstream_proto::ReferencePoint;
use futures::stream::Stream;
use std::pin::Pin;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("model API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("unexpected model response: {0}")]
    InvalidResponse(String),

    #[error("model returned no image")]
    NoImage,

    #[error("invalid input image: {0}")]
    InvalidImage(String),

    #[error("image editor is not configured: {0}")]
    NotConfigured(String),
}

/// Everything one edit operation needs.
#[derive(Debug, Clone)]
pub struct EditJob {
    pub source_image: String,
    pub mask_image: Option<String>,
    pub user_prompt: String,
    pub reference_points: Vec<ReferencePoint>,
    pub max_iterations: u32,
}

/// A piece of the planning response as it streams in.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanChunk {
    Thinking(String),
    Text(String),
}

pub type PlanStream = Pin<Box<dyn Stream<Item = Result<PlanChunk, EditorError>> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub satisfied: bool,
    pub reasoning: String,
    pub revised_prompt: Option<String>,
}

/// The generative model behind an edit.
#[async_trait]
pub trait ImageEditor: Send + Sync {
    /// Stream the model's reasoning and its refined edit prompt.
    async fn plan(&self, job: &EditJob) -> Result<PlanStream, EditorError>;

    /// Produce the edited image as a data URL.
    async fn generate(&self, prompt: &str, source_image: &str, mask_image: Option<&str>) -> Result<String, EditorError>;

    /// Judge whether `result_image` satisfies the user's request.
    async fn evaluate(
        &self,
        user_prompt: &str,
        edit_prompt: &str,
        source_image: &str,
        result_image: &str,
    ) -> Result<Evaluation, EditorError>;
}
