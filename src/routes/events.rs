//! Event, sharing and history endpoints

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::Deserialize;

use calver_core::changelog::ChangeRecord;
use calver_core::date_range::DateRange;
use calver_core::service::{EventListing, UpdatedEvent, VersionDiff};
use calver_core::{
    EventId, EventUpdate, EventView, Grant, GrantRole, Snapshot, UserId, VersionSummary,
};

use crate::routes::{AppError, CurrentUser};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events", get(list_events).post(create_event))
        .route(
            "/events/{id}",
            get(get_event).put(update_event).delete(delete_event),
        )
        .route("/events/{id}/shares", get(list_shares))
        .route("/events/{id}/share", post(share_event))
        .route("/events/{id}/share/{user_id}", delete(revoke_share))
        .route("/events/{id}/history", get(history))
        .route("/events/{id}/history/{version}", get(event_at_version))
        .route("/events/{id}/history/{version}/restore", post(restore_event))
        .route("/events/{id}/changelog", get(changelog))
        .route("/events/{id}/diff/{from}/{to}", get(diff))
}

/// Query parameters for listing events
#[derive(Deserialize)]
pub struct ListQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// GET /events - Events the user can see with occurrences in a range
async fn list_events(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<EventListing>, AppError> {
    let range = DateRange::from_args(query.from.as_deref(), query.to.as_deref())?;
    let page = state.service.settings().page(query.offset, query.limit);
    Ok(Json(state.service.list_events(user, range, page)?))
}

/// Request body for creating an event
#[derive(Deserialize)]
pub struct CreateEventRequest {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    pub note: Option<String>,
}

/// POST /events - Create an event owned by the caller
async fn create_event(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<EventView>), AppError> {
    let event = state.service.create_event(user, req.snapshot, req.note)?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /events/{id} - Current state of an event
async fn get_event(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<EventId>,
) -> Result<Json<EventView>, AppError> {
    Ok(Json(state.service.get_event(user, id)?))
}

/// Request body for updating an event
#[derive(Deserialize)]
pub struct UpdateEventRequest {
    /// The version the caller last saw.
    pub expected_version: u32,
    #[serde(flatten)]
    pub changes: EventUpdate,
    pub note: Option<String>,
}

/// PUT /events/{id} - Apply a partial update
async fn update_event(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<EventId>,
    Json(req): Json<UpdateEventRequest>,
) -> Result<Json<UpdatedEvent>, AppError> {
    let updated = state
        .service
        .update_event(user, id, req.expected_version, req.changes, req.note)?;
    Ok(Json(updated))
}

/// DELETE /events/{id}
async fn delete_event(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<EventId>,
) -> Result<StatusCode, AppError> {
    state.service.delete_event(user, id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /events/{id}/shares - Collaborator grants
async fn list_shares(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<EventId>,
) -> Result<Json<Vec<Grant>>, AppError> {
    Ok(Json(state.service.grants(user, id)?))
}

/// Request body for sharing an event
#[derive(Deserialize)]
pub struct ShareRequest {
    pub user_id: UserId,
    pub role: GrantRole,
    pub expected_version: Option<u32>,
}

/// POST /events/{id}/share - Grant or replace a collaborator role
async fn share_event(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<EventId>,
    Json(req): Json<ShareRequest>,
) -> Result<Json<Grant>, AppError> {
    let grant = state
        .service
        .share_event(user, id, req.user_id, req.role, req.expected_version)?;
    Ok(Json(grant))
}

/// DELETE /events/{id}/share/{user_id} - Revoke a collaborator
async fn revoke_share(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, target)): Path<(EventId, UserId)>,
) -> Result<StatusCode, AppError> {
    state.service.revoke_share(user, id, target)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /events/{id}/history - Version summaries, oldest first
async fn history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<EventId>,
) -> Result<Json<Vec<VersionSummary>>, AppError> {
    Ok(Json(state.service.history(user, id)?))
}

/// GET /events/{id}/history/{version} - The event as it was at a version
async fn event_at_version(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, version)): Path<(EventId, u32)>,
) -> Result<Json<EventView>, AppError> {
    Ok(Json(state.service.get_event_at_version(user, id, version)?))
}

/// Request body for restoring a version
#[derive(Deserialize)]
pub struct RestoreRequest {
    pub expected_version: u32,
    pub note: Option<String>,
}

/// POST /events/{id}/history/{version}/restore - Make an old version current
async fn restore_event(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, version)): Path<(EventId, u32)>,
    Json(req): Json<RestoreRequest>,
) -> Result<Json<UpdatedEvent>, AppError> {
    let restored = state
        .service
        .restore_event(user, id, version, req.expected_version, req.note)?;
    Ok(Json(restored))
}

/// Query parameters for paging the changelog
#[derive(Deserialize)]
pub struct PageQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// GET /events/{id}/changelog - Human-readable change history
async fn changelog(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<EventId>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<ChangeRecord>>, AppError> {
    let page = state.service.settings().page(query.offset, query.limit);
    Ok(Json(state.service.changelog(user, id, page)?))
}

/// GET /events/{id}/diff/{from}/{to} - Field deltas between two versions
async fn diff(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, from, to)): Path<(EventId, u32, u32)>,
) -> Result<Json<VersionDiff>, AppError> {
    Ok(Json(state.service.diff(user, id, from, to)?))
}
