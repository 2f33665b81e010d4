pub mod events;
pub mod health;

use axum::{
    Json, Router,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use calver_core::{CalverError, UserId};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::state::AppState;

/// Header carrying the authenticated user id, set by the identity layer in
/// front of this service.
pub const USER_HEADER: &str = "x-user-id";

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router())
        .merge(events::router())
        .with_state(state)
        .layer(cors)
}

/// Standard API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<u32>,
}

/// Convert errors to HTTP responses, one status per error kind.
pub struct AppError(anyhow::Error);

fn classify(err: &CalverError) -> (StatusCode, &'static str) {
    match err {
        CalverError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
        CalverError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
        CalverError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        CalverError::ConcurrencyConflict { .. } => (StatusCode::CONFLICT, "concurrency_conflict"),
        CalverError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let calver = self.0.downcast_ref::<CalverError>();
        let (status, kind) = calver
            .map(classify)
            .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, "internal"));
        let current_version = match calver {
            Some(CalverError::ConcurrencyConflict { actual, .. }) => Some(*actual),
            _ => None,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }

        let body = Json(ErrorResponse {
            error: self.0.to_string(),
            kind,
            current_version,
        });
        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// The user a request acts as, read from [`USER_HEADER`].
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<UserId>().ok())
            .ok_or(CalverError::Unauthorized)?;
        Ok(CurrentUser(user))
    }
}
