use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::services::{AgenticEditWorkflow, EditorError, GeminiEditor, UpstreamClient};

/// Where edit operations actually run.
#[derive(Clone)]
pub enum EditMode {
    /// Forward to another instance and relay its event stream.
    Relay(Arc<UpstreamClient>),
    /// Run the workflow in this process.
    Local(Arc<AgenticEditWorkflow>),
}

impl EditMode {
    pub fn name(&self) -> &'static str {
        match self {
            EditMode::Relay(_) => "relay",
            EditMode::Local(_) => "local",
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub mode: EditMode,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Settings, mode: EditMode) -> Self {
        Self {
            settings,
            mode,
            started_at: Instant::now(),
        }
    }

    /// Relay mode when an upstream is configured, otherwise Gemini locally.
    pub fn from_settings(settings: Settings) -> Result<Self, EditorError> {
        let mode = match &settings.upstream.base_url {
            Some(base_url) => EditMode::Relay(Arc::new(UpstreamClient::new(base_url.clone(), &settings.upstream))),
            None => {
                let editor = GeminiEditor::new(settings.gemini.clone())?;
                EditMode::Local(Arc::new(AgenticEditWorkflow::new(
                    Arc::new(editor),
                    settings.workflow.accept_final_iteration,
                )))
            }
        };
        Ok(Self::new(settings, mode))
    }
}
