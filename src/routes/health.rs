use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

/// GET /health
async fn health() -> Json<HealthStatus> {
    Json(HealthStatus { status: "healthy" })
}
