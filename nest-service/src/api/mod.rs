pub mod ncsr;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::types::HealthResponse;
use ncsr::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Application and status
        .route("/ncsr", post(ncsr::apply))
        .route("/ncsr/:hostname", get(ncsr::status))
        // Certificate issuance
        .route("/ncsr/:hostname/enroll", post(ncsr::enroll))
        .route("/ncsr/:hostname/reenroll", post(ncsr::reenroll))
        .route("/ncsr/:hostname/serverkeygen", post(ncsr::serverkeygen))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Health check endpoint
async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
}
