use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName},
    response::{IntoResponse, Response},
    Json,
};
use editstream_proto::{EditRequest, CONTENT_TYPE};
use std::sync::Arc;
use tracing::info;

use crate::services::{EditJob, FrameStream};
use crate::state::{AppState, EditMode};
use crate::utils::error::ApiError;
use crate::utils::DataUrl;

pub const EDIT_PATH: &str = "/api/agentic/edit";
pub const INPAINT_PATH: &str = "/api/images/inpaint";
/// Older clients post inpaint requests next to the edit route.
pub const INPAINT_ALIAS_PATH: &str = "/api/agentic/inpaint";

const MAX_ITERATIONS_LIMIT: u32 = 5;
const INPAINT_ITERATIONS: u32 = 3;

pub async fn edit_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EditRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    validate(&request, false)?;

    let max_iterations = match request.max_iterations {
        Some(n) => n,
        None => state.settings.workflow.default_max_iterations.clamp(1, MAX_ITERATIONS_LIMIT),
    };

    info!(
        "Edit request: mode={}, max_iterations={}, masked={}",
        state.mode.name(),
        max_iterations,
        request.mask_image.is_some()
    );

    let body = start(&state, EDIT_PATH, request, max_iterations, "Edit completed successfully!").await;
    Ok(event_stream_response(body))
}

pub async fn inpaint_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EditRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    validate(&request, true)?;

    info!("Inpaint request: mode={}", state.mode.name());

    let body = start(&state, INPAINT_PATH, request, INPAINT_ITERATIONS, "Inpaint completed successfully!").await;
    Ok(event_stream_response(body))
}

async fn start(
    state: &AppState,
    path: &str,
    mut request: EditRequest,
    max_iterations: u32,
    completion_message: &str,
) -> FrameStream {
    request.max_iterations = Some(max_iterations);

    match &state.mode {
        EditMode::Relay(upstream) => upstream.relay(path, &request).await,
        EditMode::Local(workflow) => {
            let job = EditJob {
                source_image: request.source_image,
                mask_image: request.mask_image,
                user_prompt: request.prompt,
                reference_points: request.reference_points.unwrap_or_default(),
                max_iterations,
            };
            workflow.start(job, completion_message)
        }
    }
}

/// Checked before any streaming starts, so failures are plain JSON 400s.
fn validate(request: &EditRequest, mask_required: bool) -> Result<(), ApiError> {
    if DataUrl::parse(&request.source_image).is_none() {
        return Err(ApiError::BadRequest("sourceImage must be a data: URL".to_string()));
    }

    if request.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".to_string()));
    }

    match &request.mask_image {
        Some(mask) if DataUrl::parse(mask).is_none() => {
            return Err(ApiError::BadRequest("maskImage must be a data: URL".to_string()));
        }
        None if mask_required => {
            return Err(ApiError::BadRequest("maskImage is required for inpainting".to_string()));
        }
        _ => {}
    }

    // inpainting always runs a fixed number of iterations
    if let (Some(n), false) = (request.max_iterations, mask_required) {
        if !(1..=MAX_ITERATIONS_LIMIT).contains(&n) {
            return Err(ApiError::BadRequest(format!(
                "maxIterations must be between 1 and {}",
                MAX_ITERATIONS_LIMIT
            )));
        }
    }

    Ok(())
}

/// Wrap a frame stream as a streaming HTTP response that proxies will not buffer.
pub fn event_stream_response(body: FrameStream) -> Response {
    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
