//! HTTP surface: routes, extractors, error mapping, streaming body binding.

pub mod errors;
pub mod extractors;
pub mod handlers;
pub mod streaming;

use axum::routing::{get, post, put};
use axum::{middleware, Router};
use handlers::AppState;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the application router.
///
/// Upload API paths:
///   POST   /uploads?uploadType=resumable  - create session
///   PUT    /uploads/{id}                  - chunk PUT or status probe
///   DELETE /uploads/{id}                  - abort
///   GET    /uploads/{id}/status           - progress snapshot
///   PUT    /uploads/{id}/draft            - draft metadata (pre-completion)
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .route("/uploads", post(handlers::create_session))
        .route(
            "/uploads/:id",
            put(handlers::put_chunk).delete(handlers::abort_upload),
        )
        .route("/uploads/:id/status", get(handlers::get_status))
        .route("/uploads/:id/draft", put(handlers::update_draft))
        .layer(TraceLayer::new_for_http())
        // HTTP metrics middleware (records request counts and durations)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::metrics::http_metrics_middleware,
        ))
        // CORS outermost so OPTIONS preflight is answered before anything else
        .layer(CorsLayer::permissive())
        .with_state(state)
}
