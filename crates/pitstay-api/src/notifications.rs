use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use pitstay_types::api::{Claims, MarkReadResponse, UnreadCountResponse};
use pitstay_types::models::Notification;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let notes = run_blocking(move || state.notifications.list(claims.sub, query.limit)).await?;
    Ok(Json(notes))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let unread = run_blocking(move || state.notifications.unread_count(claims.sub)).await?;
    Ok(Json(UnreadCountResponse { unread }))
}

/// Marking an already read notification reports `updated: 0`.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let updated =
        run_blocking(move || state.notifications.mark_read(claims.sub, notification_id)).await?;
    Ok(Json(MarkReadResponse { updated }))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let updated = run_blocking(move || state.notifications.mark_all_read(claims.sub)).await?;
    Ok(Json(MarkReadResponse { updated }))
}
