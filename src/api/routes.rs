//! Route table and HTTP middleware

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::api::handlers;
use crate::AppState;

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let request_timeout = Duration::from_secs(state.settings.server.request_timeout_secs);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/images/text-to-image", post(handlers::text_to_image))
        .route("/images/edit", post(handlers::edit))
        .route("/images/filter", post(handlers::filter))
        .route("/images/adjust", post(handlers::adjust))
        .route("/images/compose", post(handlers::compose))
        .route("/v1/jobs", post(handlers::submit_job))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
