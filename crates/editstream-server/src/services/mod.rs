pub mod editor;
pub mod gemini;
pub mod lifecycle;
pub mod producer;
pub mod relay;
pub mod upstream;
pub mod workflow;

pub use editor::{EditJob, EditorError, ImageEditor};
pub use gemini::GeminiEditor;
pub use lifecycle::{FrameStream, OperationLifecycle, ProgressEmitter};
pub use producer::LocalStreamProducer;
pub use upstream::{RelayError, UpstreamClient};
pub use workflow::{AgenticEditWorkflow, WorkflowError};
