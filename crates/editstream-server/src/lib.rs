pub mod config;
pub mod handlers;
pub mod services;
pub mod state;
pub mod utils;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use handlers::agentic::{EDIT_PATH, INPAINT_ALIAS_PATH, INPAINT_PATH};
use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.settings.server.body_limit_mb * 1024 * 1024;

    Router::new()
        .route("/", get(handlers::health::service_info))
        .route("/health", get(handlers::health::health_check))
        .route(EDIT_PATH, post(handlers::agentic::edit_handler))
        .route(INPAINT_PATH, post(handlers::agentic::inpaint_handler))
        .route(INPAINT_ALIAS_PATH, post(handlers::agentic::inpaint_handler))
        .with_state(state)
        // CORS
        .layer(
            CorsLayer::permissive()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Tracing
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        // Images arrive inline as data URLs
        .layer(DefaultBodyLimit::max(body_limit))
}
